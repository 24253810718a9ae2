use thiserror::Error;

use rag_model::{CoreError, InfraKind};

#[derive(Debug, Error)]
pub enum GcError {
    #[error("store error: {0}")]
    Store(#[from] metadata_store::StoreError),
    #[error("vector store error: {0}")]
    VectorStore(#[from] vector_store::VectorStoreError),
    #[error("a GC pass is already running")]
    AlreadyRunning,
}

impl From<GcError> for CoreError {
    fn from(err: GcError) -> Self {
        match err {
            GcError::Store(e) => e.into(),
            GcError::VectorStore(e) => CoreError::Infrastructure { kind: InfraKind::ExternalService, message: e.to_string() },
            GcError::AlreadyRunning => CoreError::Conflict("a GC pass is already running".into()),
        }
    }
}
