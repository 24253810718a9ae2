use thiserror::Error;

use rag_model::CoreError;

use crate::config::ConfigError;

/// The facade's single error type: every subsystem's error converts into `CoreError` at
/// its own boundary already, so this just forwards that conversion.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] metadata_store::StoreError),
    #[error(transparent)]
    Orchestrator(#[from] sync_orchestrator::OrchestratorError),
    #[error(transparent)]
    Search(#[from] hybrid_search::SearchError),
    #[error(transparent)]
    Gc(#[from] gc::GcError),
    #[error(transparent)]
    Embedder(#[from] embedding_provider::EmbedderError),
}

impl From<ServiceError> for CoreError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Config(e) => e.into(),
            ServiceError::Store(e) => e.into(),
            ServiceError::Orchestrator(e) => e.into(),
            ServiceError::Search(e) => e.into(),
            ServiceError::Gc(e) => e.into(),
            ServiceError::Embedder(e) => rag_model::CoreError::Infrastructure {
                kind: rag_model::InfraKind::ExternalService,
                message: e.to_string(),
            },
        }
    }
}
