//! Bounded-backoff delayed re-trigger of failed syncs.

mod backoff;
mod clock;
mod scheduler;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, FakeClock, SystemClock};
pub use scheduler::{RetryAction, RetryScheduler, DEFAULT_SCAN_INTERVAL_MS};
