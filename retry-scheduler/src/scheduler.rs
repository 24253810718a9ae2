//! Delayed re-trigger of `FAILED` sync jobs.

use std::collections::HashMap;
use std::sync::Mutex;

use rag_model::{DocId, EpochMs, SyncJob, SyncState};

use crate::backoff::BackoffPolicy;
use crate::clock::Clock;

pub const DEFAULT_SCAN_INTERVAL_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Arm (or re-arm) a retry for this deadline.
    Schedule { deadline_ms: EpochMs },
    /// Retries are exhausted; the caller should fire `RETRIES_EXCEEDED` and move the job
    /// to `DEAD` without arming anything.
    Exceeded,
}

struct Armed {
    deadline_ms: EpochMs,
}

/// Holds the live set of armed doc-ids so a second retry request for an already-armed
/// document coalesces into a no-op.
pub struct RetryScheduler<C: Clock> {
    clock: C,
    policy: BackoffPolicy,
    armed: Mutex<HashMap<DocId, Armed>>,
}

impl<C: Clock> RetryScheduler<C> {
    pub fn new(clock: C, policy: BackoffPolicy) -> Self {
        Self { clock, policy, armed: Mutex::new(HashMap::new()) }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Decides what should happen to a job that just transitioned to `FAILED` with the
    /// given retry count, and arms the timer if a retry is still due. A second call for a
    /// doc-id that is already armed is a no-op and returns the existing deadline.
    pub fn on_failure(&self, doc_id: &DocId, retries: u32) -> RetryAction {
        if self.policy.exceeded(retries) {
            return RetryAction::Exceeded;
        }
        let mut armed = self.armed.lock().unwrap();
        if let Some(existing) = armed.get(doc_id) {
            return RetryAction::Schedule { deadline_ms: existing.deadline_ms };
        }
        let deadline_ms = self.clock.now_ms() + self.policy.delay_ms(retries);
        armed.insert(doc_id.clone(), Armed { deadline_ms });
        RetryAction::Schedule { deadline_ms }
    }

    /// Returns every doc-id whose deadline has passed, disarming each one (the caller is
    /// expected to actually retry it next).
    pub fn due(&self) -> Vec<DocId> {
        let now = self.clock.now_ms();
        let mut armed = self.armed.lock().unwrap();
        let due: Vec<DocId> = armed.iter().filter(|(_, a)| a.deadline_ms <= now).map(|(id, _)| id.clone()).collect();
        for id in &due {
            armed.remove(id);
        }
        due
    }

    pub fn is_armed(&self, doc_id: &DocId) -> bool {
        self.armed.lock().unwrap().contains_key(doc_id)
    }

    pub fn cancel(&self, doc_id: &DocId) {
        self.armed.lock().unwrap().remove(doc_id);
    }

    /// Boot-time recovery: re-arms a timer for every persisted `FAILED` job. A job whose
    /// original deadline has already elapsed is armed for immediate firing on the next
    /// `due()` scan, which bounds the delay to at most one scan interval past the
    /// original deadline, never more.
    pub fn rearm_from_persisted(&self, jobs: &[SyncJob]) {
        let now = self.clock.now_ms();
        let mut armed = self.armed.lock().unwrap();
        for job in jobs {
            if job.status != SyncState::Failed {
                continue;
            }
            if armed.contains_key(&job.doc_id) {
                continue;
            }
            if self.policy.exceeded(job.retries) {
                continue; // the caller is expected to move these straight to DEAD
            }
            let last_attempt = job.last_attempt_at.unwrap_or(now);
            let original_deadline = last_attempt + self.policy.delay_ms(job.retries);
            // Already overdue: fire on the next scan instead of waiting for a deadline
            // that already passed. Not yet due: keep the original deadline.
            let deadline_ms = if original_deadline <= now { now } else { original_deadline };
            armed.insert(job.doc_id.clone(), Armed { deadline_ms });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn job(doc_id: DocId, retries: u32, last_attempt_at: Option<EpochMs>) -> SyncJob {
        SyncJob {
            sync_job_id: "job".into(),
            doc_id,
            status: SyncState::Failed,
            retries,
            last_attempt_at,
            last_error: Some("boom".into()),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn first_failure_arms_with_base_delay() {
        let clock = FakeClock::new(1_000);
        let sched = RetryScheduler::new(clock, BackoffPolicy::default());
        let doc = DocId::from_content(b"a");
        let action = sched.on_failure(&doc, 0);
        assert_eq!(action, RetryAction::Schedule { deadline_ms: 1_000 + 30_000 });
        assert!(sched.is_armed(&doc));
    }

    #[test]
    fn second_failure_while_armed_is_coalesced() {
        let clock = FakeClock::new(0);
        let sched = RetryScheduler::new(clock, BackoffPolicy::default());
        let doc = DocId::from_content(b"a");
        let first = sched.on_failure(&doc, 0);
        let second = sched.on_failure(&doc, 3); // different retry count, still coalesced
        assert_eq!(first, second);
    }

    #[test]
    fn retries_exceeded_past_ceiling() {
        let clock = FakeClock::new(0);
        let sched = RetryScheduler::new(clock, BackoffPolicy::default());
        let doc = DocId::from_content(b"a");
        assert_eq!(sched.on_failure(&doc, 5), RetryAction::Exceeded);
        assert!(!sched.is_armed(&doc));
    }

    #[test]
    fn due_returns_and_disarms_elapsed_jobs() {
        let clock = FakeClock::new(0);
        let sched = RetryScheduler::new(clock, BackoffPolicy::default());
        sched.clock.advance(0);
        let doc = DocId::from_content(b"a");
        sched.on_failure(&doc, 0);
        assert!(sched.due().is_empty());
        sched.clock.advance(30_000);
        let due = sched.due();
        assert_eq!(due, vec![doc.clone()]);
        assert!(!sched.is_armed(&doc));
    }

    #[test]
    fn rearm_from_persisted_fires_overdue_jobs_immediately() {
        let clock = FakeClock::new(10_000);
        let sched = RetryScheduler::new(clock, BackoffPolicy::default());
        let doc = DocId::from_content(b"a");
        // last attempt long enough ago that its backoff deadline has already passed
        let persisted = vec![job(doc.clone(), 0, Some(0))];
        sched.rearm_from_persisted(&persisted);
        assert_eq!(sched.due(), vec![doc]);
    }

    #[test]
    fn rearm_from_persisted_skips_already_armed() {
        let clock = FakeClock::new(0);
        let sched = RetryScheduler::new(clock, BackoffPolicy::default());
        let doc = DocId::from_content(b"a");
        sched.on_failure(&doc, 0);
        let deadline_before = if let RetryAction::Schedule { deadline_ms } = sched.on_failure(&doc, 0) {
            deadline_ms
        } else {
            panic!("expected schedule")
        };
        sched.rearm_from_persisted(&[job(doc.clone(), 4, Some(0))]);
        let deadline_after = if let RetryAction::Schedule { deadline_ms } = sched.on_failure(&doc, 0) {
            deadline_ms
        } else {
            panic!("expected schedule")
        };
        assert_eq!(deadline_before, deadline_after);
    }
}
