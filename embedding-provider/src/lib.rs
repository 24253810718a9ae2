//! The embedding provider interface plus a deterministic reference backend.
//!
//! Real embedding models are an external collaborator, not something this crate
//! implements; what the rest of the system needs is something that honestly implements
//! the contract — order-preserving batch embedding at a fixed dimension — so the
//! orchestrator, hybrid search, and GC all have something real to drive without a live
//! model or network call.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmbedderError {
    #[error("invalid embedder configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("provider failure: {message}")]
    ProviderFailure { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderInfo {
    pub model_id: String,
    pub dimension: usize,
}

/// `embed(texts) -> vectors`, order-preserving, fixed-dimension. The sync orchestrator
/// records `dimension` at first use and treats a later change as fatal; this trait only
/// needs to report it honestly.
pub trait EmbeddingProvider: Send + Sync {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;
    fn info(&self) -> &EmbedderInfo;
}

/// Deterministic, hash-seeded vector generator: no network, no model file, same text
/// always yields the same vector. Good enough to drive ranking and convergence tests, not
/// good enough to mean anything semantically — real deployments supply their own
/// `EmbeddingProvider`.
pub struct DeterministicEmbedder {
    info: EmbedderInfo,
}

impl DeterministicEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbedderError> {
        if dimension == 0 {
            return Err(EmbedderError::InvalidConfiguration {
                message: "dimension must be greater than zero".into(),
            });
        }
        Ok(Self {
            info: EmbedderInfo { model_id: "deterministic-hash-v1".into(), dimension },
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.info.dimension;
        let mut out = Vec::with_capacity(dim);
        for i in 0..dim {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            // map to [-1.0, 1.0]
            let v = (h % 2_000_001) as f32 / 1_000_000.0 - 1.0;
            out.push(v);
        }
        out
    }
}

impl EmbeddingProvider for DeterministicEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        tracing::debug!(count = texts.len(), dimension = self.info.dimension, "embedding batch");
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn info(&self) -> &EmbedderInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_yields_same_vector() {
        let e = DeterministicEmbedder::new(8).unwrap();
        let a = e.embed_batch(&["hello".to_string()]).unwrap();
        let b = e.embed_batch(&["hello".to_string()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
    }

    #[test]
    fn batch_preserves_order() {
        let e = DeterministicEmbedder::new(4).unwrap();
        let texts = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        let batch = e.embed_batch(&texts).unwrap();
        for (t, v) in texts.iter().zip(batch.iter()) {
            let single = e.embed_batch(&[t.clone()]).unwrap();
            assert_eq!(&single[0], v);
        }
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(DeterministicEmbedder::new(0).is_err());
    }
}
