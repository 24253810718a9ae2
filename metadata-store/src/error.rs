use thiserror::Error;

use rag_model::{CoreError, InfraKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("pagination error: {0}")]
    Pagination(#[from] crate::pagination::PaginationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("id error: {0}")]
    Id(#[from] rag_model::IdError),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => CoreError::NotFound(msg),
            StoreError::Conflict(msg) => CoreError::Conflict(msg),
            StoreError::Pagination(e) => CoreError::Validation(e.to_string()),
            StoreError::Id(e) => CoreError::Validation(e.to_string()),
            StoreError::Sqlite(e) => CoreError::Infrastructure { kind: InfraKind::Database, message: e.to_string() },
            StoreError::Serde(e) => CoreError::Internal(e.to_string()),
        }
    }
}
