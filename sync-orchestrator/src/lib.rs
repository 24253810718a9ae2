//! Binds the splitter, embedder, vector store, FSM, and retry scheduler into the document
//! sync pipeline: the `ingest`/`resync` entry points, a bounded worker pool, and the
//! re-entry rule that resumes a retried job from the right step.

mod config;
mod error;
mod orchestrator;
mod pipeline;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use orchestrator::{DimensionMismatch, DocInput, Orchestrator, PipelineOutcome};
pub use pipeline::CancellationToken;
