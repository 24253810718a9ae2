//! The embedding entry point for everything built in this workspace: loads `Config`,
//! opens the stores, and wires the orchestrator, hybrid search, and GC into one
//! `RagService`.

mod config;
mod error;
mod service;
mod tracing_init;

pub use config::{Config, ConfigError};
pub use error::ServiceError;
pub use service::{IngestRequest, RagService, SyncStatus};
pub use tracing_init::init_tracing;

#[cfg(test)]
mod tests {
    use super::*;
    use rag_model::SyncState;
    use std::time::{Duration, Instant};

    fn test_config() -> Config {
        Config {
            sqlite_path: ":memory:".to_string(),
            vector_dimension: Some(8),
            ..Config::default()
        }
    }

    fn wait_for_sync(service: &RagService, doc_id: &rag_model::DocId) -> SyncState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(status) = service.get_sync_status(doc_id).unwrap() {
                if matches!(status.state, SyncState::Synced | SyncState::Dead) {
                    return status.state;
                }
            }
            if Instant::now() > deadline {
                panic!("sync job did not reach a terminal state in time");
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn ingest_then_search_round_trips_through_the_facade() {
        let service = RagService::open(&test_config()).unwrap();
        let doc_id = service
            .ingest(IngestRequest {
                collection_name: Some("docs".into()),
                key: "k1".into(),
                name: "a.md".into(),
                mime: "text/markdown".into(),
                content: b"# Title\nSome body content long enough to pass the floor.".to_vec(),
            })
            .unwrap();

        assert_eq!(wait_for_sync(&service, &doc_id), SyncState::Synced);

        let req = hybrid_search::SearchRequest {
            query: "body content".into(),
            collection_id: None,
            ..Default::default()
        };
        let resp = service.search(&req).unwrap();
        assert!(resp.results.iter().any(|hit| hit.doc_id == doc_id));
    }

    #[test]
    fn delete_document_is_finalised_by_a_gc_pass() {
        let service = RagService::open(&test_config()).unwrap();
        let doc_id = service
            .ingest(IngestRequest {
                collection_name: Some("docs".into()),
                key: "k1".into(),
                name: "a.txt".into(),
                mime: "text/plain".into(),
                content: b"content to be soft deleted and then reconciled".to_vec(),
            })
            .unwrap();
        wait_for_sync(&service, &doc_id);

        service.delete_document(&doc_id).unwrap();
        let report = service.gc_run().unwrap();
        assert_eq!(report.docs_finalised, 1);
    }
}
