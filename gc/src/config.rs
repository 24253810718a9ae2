//! GC scheduling configuration: runs every `gc_interval_hours`.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    pub interval_hours: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { interval_hours: 1 }
    }
}

impl GcConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }
}
