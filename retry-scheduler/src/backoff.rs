//! Exponential backoff policy: `delay = base * 2^retries`, capped, with a hard retry
//! ceiling past which the scheduler gives up.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_ms: i64,
    pub cap_ms: i64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_ms: 30_000, cap_ms: 30 * 60 * 1000, max_retries: 5 }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt numbered `retries` (0-based: the first retry after an
    /// initial failure uses `retries = 0`).
    pub fn delay_ms(&self, retries: u32) -> i64 {
        let factor = 1i64.checked_shl(retries).unwrap_or(i64::MAX);
        self.base_ms.saturating_mul(factor).min(self.cap_ms)
    }

    pub fn exceeded(&self, retries: u32) -> bool {
        retries >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_each_retry() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay_ms(0), 30_000);
        assert_eq!(p.delay_ms(1), 60_000);
        assert_eq!(p.delay_ms(2), 120_000);
    }

    #[test]
    fn delay_is_capped() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay_ms(10), p.cap_ms);
    }

    #[test]
    fn exceeded_at_configured_ceiling() {
        let p = BackoffPolicy::default();
        assert!(!p.exceeded(4));
        assert!(p.exceeded(5));
        assert!(p.exceeded(6));
    }
}
