use thiserror::Error;

use rag_model::{CoreError, InfraKind};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("store error: {0}")]
    Store(#[from] metadata_store::StoreError),
    #[error("vector store error: {0}")]
    VectorStore(#[from] vector_store::VectorStoreError),
    #[error("embedder error: {0}")]
    Embedder(#[from] embedding_provider::EmbedderError),
    #[error("splitter error: {0}")]
    Splitter(#[from] splitter::SplitError),
    #[error("fsm rejected transition: {0}")]
    Fsm(#[from] sync_fsm::RejectedTransition),
    #[error("ingestion queue is closed")]
    QueueClosed,
    #[error("vector dimension changed from {recorded} to {observed}; this is fatal")]
    DimensionChanged { recorded: usize, observed: usize },
    #[error("pipeline cancelled")]
    Cancelled,
}

impl From<OrchestratorError> for CoreError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Store(e) => e.into(),
            OrchestratorError::VectorStore(e) => CoreError::Infrastructure { kind: InfraKind::ExternalService, message: e.to_string() },
            OrchestratorError::Embedder(e) => CoreError::Infrastructure { kind: InfraKind::ExternalService, message: e.to_string() },
            OrchestratorError::Splitter(e) => CoreError::Validation(e.to_string()),
            OrchestratorError::Fsm(e) => CoreError::BusinessRuleViolation(e.to_string()),
            OrchestratorError::QueueClosed => CoreError::Internal("ingestion queue closed".into()),
            OrchestratorError::DimensionChanged { recorded, observed } => {
                CoreError::Configuration(format!("vector dimension changed from {recorded} to {observed}"))
            }
            OrchestratorError::Cancelled => CoreError::Internal("pipeline cancelled".into()),
        }
    }
}
