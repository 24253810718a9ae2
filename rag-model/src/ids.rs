use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// A content-derived document identifier: lower-hex SHA-256 of the document's bytes.
///
/// Two uploads of identical content always produce the same `DocId`; this is the
/// identity idempotent ingestion relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct DocId(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("doc id must be 64 lowercase hex characters, got `{0}`")]
    InvalidDocId(String),
    #[error("point id `{0}` is not of the form `<64-hex>#<index>`")]
    MalformedPointId(String),
    #[error("point id chunk index `{0}` is not a valid non-negative integer")]
    InvalidChunkIndex(String),
}

impl DocId {
    /// `makeDocId`: SHA-256 over the UTF-8 bytes of `content`, lower-hex.
    pub fn from_content(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        let digest = hasher.finalize();
        Self(hex::encode(digest))
    }

    /// Validates and wraps an externally supplied hex string.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            Ok(Self(s.to_string()))
        } else {
            Err(IdError::InvalidDocId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Composite primary key for a chunk, shared verbatim as the id of its vector-store point:
/// `"<docId>#<chunkIndex>"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct PointId {
    pub doc_id: DocId,
    pub chunk_index: u32,
}

impl PointId {
    /// `makePointId`.
    pub fn new(doc_id: DocId, chunk_index: u32) -> Self {
        Self { doc_id, chunk_index }
    }

    /// `parsePointId`: strict inverse of `Display`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let (doc_part, idx_part) = s
            .split_once('#')
            .ok_or_else(|| IdError::MalformedPointId(s.to_string()))?;
        let doc_id = DocId::parse(doc_part).map_err(|_| IdError::MalformedPointId(s.to_string()))?;
        if idx_part.is_empty() || !idx_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::InvalidChunkIndex(idx_part.to_string()));
        }
        let chunk_index: u32 = idx_part
            .parse()
            .map_err(|_| IdError::InvalidChunkIndex(idx_part.to_string()))?;
        Ok(Self { doc_id, chunk_index })
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.doc_id, self.chunk_index)
    }
}

impl FromStr for PointId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
