use serde::Serialize;
use thiserror::Error;

/// The subset of infrastructure failure the core distinguishes for retry routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InfraKind {
    Database,
    Network,
    ExternalService,
}

/// Error taxonomy surfaced by the core. Individual crates define their own narrower
/// error enums and convert into this one at the boundary they share with a caller
/// outside the core (the orchestrator, hybrid search, and GC).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("business rule violated: {0}")]
    BusinessRuleViolation(String),
    #[error("infrastructure error ({kind:?}): {message}")]
    Infrastructure { kind: InfraKind, message: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::BusinessRuleViolation(_) => "BUSINESS_RULE_VIOLATION",
            CoreError::Infrastructure { .. } => "INFRASTRUCTURE_ERROR",
            CoreError::Configuration(_) => "CONFIGURATION_ERROR",
            CoreError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for errors a pipeline step should hand to the retry scheduler rather than
    /// surface synchronously to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Infrastructure { .. })
    }

    /// Builds the `{code, message, errorId, timestamp, details}` envelope surfaced to
    /// callers outside the core.
    pub fn surface(&self, now_ms: i64) -> SurfacedError {
        SurfacedError {
            code: self.code().to_string(),
            message: self.to_string(),
            error_id: random_error_id(),
            timestamp: now_ms,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SurfacedError {
    pub code: String,
    pub message: String,
    pub error_id: String,
    pub timestamp: i64,
    pub details: Option<serde_json::Value>,
}

fn random_error_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 4] = rng.gen();
    hex::encode(bytes)
}
