use serde::{Deserialize, Serialize};

use crate::ids::{DocId, PointId};

pub type EpochMs = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub collection_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: EpochMs,
    pub updated_at: EpochMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocStatus {
    New,
    Processing,
    Completed,
    Failed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: DocId,
    pub collection_id: String,
    pub key: String,
    pub name: String,
    pub mime: String,
    pub size_bytes: u64,
    /// Append-only; a rewrite produces a new `DocId`, never mutates this field in place.
    pub content: Vec<u8>,
    pub status: DocStatus,
    pub created_at: EpochMs,
    pub updated_at: EpochMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    New,
    Embedded,
    Synced,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub point_id: PointId,
    pub doc_id: DocId,
    pub collection_id: String,
    pub chunk_index: u32,
    pub title: Option<String>,
    /// Ordered header path ending in this chunk's most-local title; first element is
    /// the document base name when known.
    pub title_chain: Vec<String>,
    pub content: String,
    pub content_hash: String,
    pub status: ChunkStatus,
}

impl Chunk {
    /// `"a > b > c"` serialisation used in the vector-store payload schema.
    pub fn title_chain_serialized(&self) -> Option<String> {
        if self.title_chain.is_empty() {
            None
        } else {
            Some(self.title_chain.join(" > "))
        }
    }
}
