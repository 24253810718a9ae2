//! Orchestrator-level configuration.

use std::time::Duration;

use splitter::SplitterKind;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub ingestion_parallelism: usize,
    pub embed_batch_size: usize,
    pub default_collection_name: String,
    pub splitter_default: SplitterKind,
    /// How often the background timer scans the retry scheduler for due jobs. Bounds how
    /// late a retry can fire past its deadline (never more than one scan interval).
    pub retry_scan_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ingestion_parallelism: 4,
            embed_batch_size: 64,
            default_collection_name: "default".to_string(),
            splitter_default: SplitterKind::MarkdownHeadings,
            retry_scan_interval_ms: retry_scheduler::DEFAULT_SCAN_INTERVAL_MS as u64,
        }
    }
}

impl OrchestratorConfig {
    pub fn retry_scan_interval(&self) -> Duration {
        Duration::from_millis(self.retry_scan_interval_ms)
    }
}

impl OrchestratorConfig {
    pub fn queue_capacity(&self) -> usize {
        4 * self.ingestion_parallelism
    }
}
