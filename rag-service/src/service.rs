//! Binds the stores, orchestrator, search, and GC together behind one RPC-shaped
//! surface: an `RagService` an embedding binary (or `rag-cli`) constructs once and
//! calls into.

use std::sync::Arc;

use rag_model::{DocId, SyncJob};
use retry_scheduler::{BackoffPolicy, Clock, RetryScheduler, SystemClock};
use sync_orchestrator::{DimensionMismatch, DocInput, Orchestrator, OrchestratorConfig, PipelineOutcome};
use vector_store::VectorStore;

use crate::config::Config;
use crate::error::ServiceError;

/// What the caller gave us to ingest; mirrors `DocInput` so callers outside this crate
/// don't need to depend on `sync-orchestrator` directly.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub collection_name: Option<String>,
    pub key: String,
    pub name: String,
    pub mime: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub doc_id: DocId,
    pub state: rag_model::SyncState,
    pub retries: u32,
    pub last_error: Option<String>,
}

impl From<SyncJob> for SyncStatus {
    fn from(job: SyncJob) -> Self {
        Self { doc_id: job.doc_id, state: job.status, retries: job.retries, last_error: job.last_error }
    }
}

/// Used when `config.vector_dimension` is unset. The orchestrator records whatever
/// dimension the embedder's first call reports and treats any later mismatch as fatal,
/// so this value only matters at cold start, before that recording happens.
const DEFAULT_EMBEDDING_DIMENSION: usize = 256;

pub struct RagService {
    meta: Arc<metadata_store::MetadataStore>,
    orchestrator: Arc<Orchestrator<SystemClock>>,
    search: hybrid_search::HybridSearch,
    gc: Arc<gc::Gc<SystemClock>>,
}

impl RagService {
    /// Opens the metadata store at `config.sqlite_path`, constructs the in-memory vector
    /// store and deterministic embedder, and wires the orchestrator, hybrid search facade,
    /// and GC on top: one process, shared `Arc` stores, no external services to dial.
    pub fn open(config: &Config) -> Result<Self, ServiceError> {
        let dimension = config.vector_dimension.unwrap_or(DEFAULT_EMBEDDING_DIMENSION);
        let meta = Arc::new(metadata_store::MetadataStore::open(&config.sqlite_path)?);
        let vectors: Arc<dyn VectorStore> = Arc::new(vector_store::InMemoryVectorStore::new());
        let embedder: Arc<dyn embedding_provider::EmbeddingProvider> =
            Arc::new(embedding_provider::DeterministicEmbedder::new(dimension).map_err(ServiceError::Embedder)?);

        let policy = BackoffPolicy {
            base_ms: config.retry_base_ms,
            cap_ms: config.retry_cap_ms,
            max_retries: config.retry_max_attempts,
        };
        let retry = Arc::new(RetryScheduler::new(SystemClock, policy));
        let orchestrator_config = OrchestratorConfig {
            ingestion_parallelism: config.ingestion_parallelism,
            embed_batch_size: config.embed_batch_size,
            default_collection_name: config.default_collection_name.clone(),
            splitter_default: config.splitter_default,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(
            meta.clone(),
            vectors.clone(),
            embedder.clone(),
            retry,
            Arc::new(SystemClock),
            orchestrator_config,
        ));
        orchestrator.start()?;

        let search = hybrid_search::HybridSearch::new(meta.clone(), vectors.clone(), embedder.clone());

        let gc_config = gc::GcConfig { interval_hours: config.gc_interval_hours };
        let gc = gc::Gc::new(meta.clone(), vectors.clone(), Arc::new(SystemClock), gc_config);
        gc.start();

        Ok(Self { meta, orchestrator, search, gc })
    }

    pub fn ingest(&self, req: IngestRequest) -> Result<DocId, ServiceError> {
        let input = DocInput { key: req.key, name: req.name, mime: req.mime, content: req.content };
        Ok(self.orchestrator.ingest(req.collection_name.as_deref(), input)?)
    }

    pub fn resync(&self, doc_id: &DocId) -> Result<(), ServiceError> {
        Ok(self.orchestrator.resync(doc_id)?)
    }

    /// Soft-deletes the doc; GC's next pass finalises the tombstone into an actual vector
    /// and row delete.
    pub fn delete_document(&self, doc_id: &DocId) -> Result<(), ServiceError> {
        let now = SystemClock.now_ms();
        Ok(self.meta.soft_delete_doc(doc_id, now)?)
    }

    pub fn delete_collection(&self, collection_id: &str) -> Result<(), ServiceError> {
        Ok(self.meta.delete_collection(collection_id)?)
    }

    pub fn search(&self, req: &hybrid_search::SearchRequest) -> Result<hybrid_search::SearchResponse, ServiceError> {
        Ok(self.search.search(req)?)
    }

    pub fn get_sync_status(&self, doc_id: &DocId) -> Result<Option<SyncStatus>, ServiceError> {
        Ok(self.meta.get_sync_job(doc_id)?.map(SyncStatus::from))
    }

    /// Runs one GC pass inline and returns its report, bypassing the background timer —
    /// the operator-triggered `gc-run` surface.
    pub fn gc_run(&self) -> Result<gc::GcReport, ServiceError> {
        Ok(self.gc.run_once()?)
    }

    /// Blocks until `doc_id`'s pipeline run reaches a terminal outcome or the channel
    /// closes. Used by callers (notably `rag-cli ingest`) that want a synchronous result.
    pub fn await_outcome(&self, doc_id: &DocId) -> Option<PipelineOutcome> {
        self.orchestrator.subscribe(doc_id).recv().ok()
    }

    pub fn cancel(&self, doc_id: &DocId) {
        self.orchestrator.cancel(doc_id);
    }

    /// Set once this process has hit a fatal condition (currently: a vector-dimension
    /// mismatch mid-flight). Sticky for the process's life; callers should stop admitting
    /// new work and exit non-zero once this is `Some`.
    pub fn fatal_condition(&self) -> Option<DimensionMismatch> {
        self.orchestrator.fatal_condition()
    }
}
