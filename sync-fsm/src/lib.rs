//! The per-document sync state machine.
//!
//! This crate is deliberately pure: it knows the transition table and how to produce a
//! `Transition` record, but nothing about persistence. `sync-orchestrator` drives it and
//! is responsible for writing the resulting `SyncJob`/`Transition` pair back atomically.

use rag_model::{SyncEvent, SyncJob, SyncState, Transition};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("event {event:?} is not accepted in state {state:?}")]
pub struct RejectedTransition {
    pub state: SyncState,
    pub event: SyncEvent,
}

/// The transition table. Returns `None` for any `(state, event)` pair absent from the
/// table — callers must treat that as rejection, never as a no-op.
pub fn next_state(state: SyncState, event: SyncEvent) -> Option<SyncState> {
    use SyncEvent::*;
    use SyncState::*;
    match (state, event) {
        (New, ChunksSaved) => Some(SplitOk),
        (New, Error) => Some(Failed),
        (SplitOk, VectorsInserted) => Some(EmbedOk),
        (SplitOk, Error) => Some(Failed),
        (EmbedOk, MetaUpdated) => Some(Synced),
        (EmbedOk, Error) => Some(Failed),
        (Failed, Retry) => Some(Retrying),
        (Failed, RetriesExceeded) => Some(Dead),
        (Retrying, ChunksSaved) => Some(SplitOk),
        (Retrying, VectorsInserted) => Some(EmbedOk),
        (Retrying, MetaUpdated) => Some(Synced),
        (Retrying, Error) => Some(Failed),
        _ => None,
    }
}

/// Applies `event` to `job`, mutating it in place and returning the `Transition` record to
/// persist in the same write. Rejects (without mutating `job`) any event the table does not
/// accept for the job's current state.
pub fn apply(job: &mut SyncJob, event: SyncEvent, now_ms: i64, context: Option<String>) -> Result<Transition, RejectedTransition> {
    let from = job.status;
    let to = next_state(from, event).ok_or(RejectedTransition { state: from, event })?;
    job.status = to;
    job.updated_at = now_ms;
    tracing::info!(job_id = %job.sync_job_id, doc_id = %job.doc_id, ?from, ?to, ?event, "sync job transition");
    Ok(Transition {
        job_id: job.sync_job_id.clone(),
        from,
        to,
        event,
        at: now_ms,
        context,
    })
}

/// Jobs in a terminal state whose last update predates `now_ms - ttl_ms` are eligible for
/// transition-log compaction (metadata kept, log truncated).
pub fn eligible_for_compaction(job: &SyncJob, now_ms: i64, ttl_ms: i64) -> bool {
    job.status.is_terminal() && now_ms.saturating_sub(job.updated_at) >= ttl_ms
}

pub const COMPACTION_TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[cfg(test)]
mod tests {
    use super::*;
    use rag_model::DocId;

    fn job(status: SyncState) -> SyncJob {
        SyncJob {
            sync_job_id: "job-1".into(),
            doc_id: DocId::from_content(b"x"),
            status,
            retries: 0,
            last_attempt_at: None,
            last_error: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn happy_path_sequence() {
        let mut j = job(SyncState::New);
        apply(&mut j, SyncEvent::ChunksSaved, 1, None).unwrap();
        assert_eq!(j.status, SyncState::SplitOk);
        apply(&mut j, SyncEvent::VectorsInserted, 2, None).unwrap();
        assert_eq!(j.status, SyncState::EmbedOk);
        apply(&mut j, SyncEvent::MetaUpdated, 3, None).unwrap();
        assert_eq!(j.status, SyncState::Synced);
    }

    #[test]
    fn retry_cycle() {
        let mut j = job(SyncState::SplitOk);
        apply(&mut j, SyncEvent::Error, 1, None).unwrap();
        assert_eq!(j.status, SyncState::Failed);
        apply(&mut j, SyncEvent::Retry, 2, None).unwrap();
        assert_eq!(j.status, SyncState::Retrying);
        apply(&mut j, SyncEvent::VectorsInserted, 3, None).unwrap();
        assert_eq!(j.status, SyncState::EmbedOk);
    }

    #[test]
    fn exhausted_retries_reach_dead() {
        let mut j = job(SyncState::Failed);
        apply(&mut j, SyncEvent::RetriesExceeded, 1, None).unwrap();
        assert_eq!(j.status, SyncState::Dead);
        assert!(j.status.is_terminal());
    }

    #[test]
    fn rejects_transitions_absent_from_table() {
        let mut j = job(SyncState::New);
        let err = apply(&mut j, SyncEvent::MetaUpdated, 1, None).unwrap_err();
        assert_eq!(err.state, SyncState::New);
        assert_eq!(err.event, SyncEvent::MetaUpdated);
        // job must be untouched on rejection
        assert_eq!(j.status, SyncState::New);
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [SyncState::Synced, SyncState::Dead] {
            for event in [
                SyncEvent::ChunksSaved,
                SyncEvent::VectorsInserted,
                SyncEvent::MetaUpdated,
                SyncEvent::Error,
                SyncEvent::Retry,
                SyncEvent::RetriesExceeded,
            ] {
                assert_eq!(next_state(terminal, event), None);
            }
        }
    }

    #[test]
    fn compaction_window() {
        let mut j = job(SyncState::Synced);
        j.updated_at = 0;
        assert!(!eligible_for_compaction(&j, COMPACTION_TTL_MS - 1, COMPACTION_TTL_MS));
        assert!(eligible_for_compaction(&j, COMPACTION_TTL_MS, COMPACTION_TTL_MS));
        j.status = SyncState::Failed;
        assert!(!eligible_for_compaction(&j, COMPACTION_TTL_MS, COMPACTION_TTL_MS));
    }

    proptest::proptest! {
        #[test]
        fn every_accepted_transition_is_in_table(
            state_idx in 0u8..7, event_idx in 0u8..6
        ) {
            let states = [
                SyncState::New, SyncState::SplitOk, SyncState::EmbedOk,
                SyncState::Synced, SyncState::Failed, SyncState::Retrying, SyncState::Dead,
            ];
            let events = [
                SyncEvent::ChunksSaved, SyncEvent::VectorsInserted, SyncEvent::MetaUpdated,
                SyncEvent::Error, SyncEvent::Retry, SyncEvent::RetriesExceeded,
            ];
            let state = states[state_idx as usize];
            let event = events[event_idx as usize];
            let mut j = job(state);
            let result = apply(&mut j, event, 1, None);
            match result {
                Ok(_) => proptest::prop_assert!(next_state(state, event).is_some()),
                Err(_) => proptest::prop_assert!(next_state(state, event).is_none()),
            }
        }
    }
}
