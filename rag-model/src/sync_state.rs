use serde::{Deserialize, Serialize};

use crate::entities::EpochMs;
use crate::ids::DocId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    New,
    SplitOk,
    EmbedOk,
    Synced,
    Failed,
    Retrying,
    Dead,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Synced | SyncState::Dead)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncEvent {
    ChunksSaved,
    VectorsInserted,
    MetaUpdated,
    Error,
    Retry,
    RetriesExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub sync_job_id: String,
    pub doc_id: DocId,
    pub status: SyncState,
    pub retries: u32,
    pub last_attempt_at: Option<EpochMs>,
    pub last_error: Option<String>,
    pub created_at: EpochMs,
    pub updated_at: EpochMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub job_id: String,
    pub from: SyncState,
    pub to: SyncState,
    pub event: SyncEvent,
    pub at: EpochMs,
    pub context: Option<String>,
}
