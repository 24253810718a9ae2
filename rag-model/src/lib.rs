//! Shared identifiers, entities, and error taxonomy used across the workspace.

pub mod entities;
pub mod error;
pub mod ids;
pub mod sync_state;

pub use entities::{Chunk, ChunkStatus, Collection, DocStatus, Document, EpochMs};
pub use error::{CoreError, InfraKind, SurfacedError};
pub use ids::{DocId, IdError, PointId};
pub use sync_state::{SyncEvent, SyncJob, SyncState, Transition};
