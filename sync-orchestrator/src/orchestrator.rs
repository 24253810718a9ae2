//! Binds the splitter, embedder, vector store, FSM, and retry scheduler into the
//! `ingest`/`resync` entry points and the worker pool that actually drives the pipeline.

use std::collections::HashMap;
use std::sync::mpsc::{channel, sync_channel, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use rag_model::{DocId, DocStatus, SyncEvent, SyncJob, SyncState};
use retry_scheduler::{Clock, RetryAction, RetryScheduler};
use vector_store::VectorStore;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::pipeline::{self, CancellationToken};

/// What the caller asked to be ingested; the RPC facade is responsible for turning its own
/// request shape into this. Request validation happens at that boundary, not here.
#[derive(Debug, Clone)]
pub struct DocInput {
    pub key: String,
    pub name: String,
    pub mime: String,
    pub content: Vec<u8>,
}

/// The terminal outcome of one pipeline run, delivered to anyone who `subscribe`d. The
/// orchestrator emits a completion signal that the caller may subscribe to;
/// single-consumer, no cross-request ordering guarantees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Synced,
    Retrying,
    Dead,
    /// Fatal to the whole process, not just this doc; never retried. See `Shared::fatal`.
    Fatal(DimensionMismatch),
}

/// The vector dimension the embedding provider reports today no longer matches the one
/// recorded from the first document this process embedded. Per-process fatal: the store's
/// vectors were written under one dimension and can't be mixed with another without a
/// resync, so this is not something a doc-level retry can fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionMismatch {
    pub recorded: usize,
    pub observed: usize,
}

struct Shared<C: Clock> {
    meta: Arc<metadata_store::MetadataStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn embedding_provider::EmbeddingProvider>,
    retry: Arc<RetryScheduler<C>>,
    clock: Arc<C>,
    config: OrchestratorConfig,
    recorded_dimension: Mutex<Option<usize>>,
    /// Set once a dimension mismatch is observed; sticky for the life of the process.
    fatal: Mutex<Option<DimensionMismatch>>,
    cancellations: Mutex<HashMap<DocId, CancellationToken>>,
    waiters: Mutex<HashMap<DocId, Vec<Sender<PipelineOutcome>>>>,
}

/// Binds the splitter, embedder, and retry scheduler into the split/embed/finalise
/// pipeline and runs it on a bounded pool of worker threads pulling from an in-process
/// queue.
pub struct Orchestrator<C: Clock + 'static> {
    shared: Arc<Shared<C>>,
    sender: Mutex<Option<SyncSender<DocId>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    retry_timer_stop: Mutex<Option<Sender<()>>>,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock + 'static> Orchestrator<C> {
    pub fn new(
        meta: Arc<metadata_store::MetadataStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn embedding_provider::EmbeddingProvider>,
        retry: Arc<RetryScheduler<C>>,
        clock: Arc<C>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                meta,
                vectors,
                embedder,
                retry,
                clock,
                config,
                recorded_dimension: Mutex::new(None),
                fatal: Mutex::new(None),
                cancellations: Mutex::new(HashMap::new()),
                waiters: Mutex::new(HashMap::new()),
            }),
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            retry_timer_stop: Mutex::new(None),
            retry_timer: Mutex::new(None),
        }
    }

    /// Spawns `config.ingestion_parallelism` long-lived worker threads pulling doc-ids off
    /// a channel bounded at `4 * N` for back-pressure, plus a background timer that scans
    /// the retry scheduler every `config.retry_scan_interval_ms` and re-enqueues due jobs.
    /// Also re-arms the retry scheduler from any `FAILED` jobs persisted from a previous
    /// run, per §4.7's boot-time recovery.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        let failed = self.shared.meta.list_sync_jobs_by_status(SyncState::Failed)?;
        self.shared.retry.rearm_from_persisted(&failed);

        let (tx, rx) = sync_channel::<DocId>(self.shared.config.queue_capacity());
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(self.shared.config.ingestion_parallelism);
        for _ in 0..self.shared.config.ingestion_parallelism {
            let shared = self.shared.clone();
            let rx = rx.clone();
            workers.push(std::thread::spawn(move || worker_loop(shared, rx)));
        }
        *self.sender.lock().unwrap() = Some(tx.clone());
        *self.workers.lock().unwrap() = workers;

        let (stop_tx, stop_rx) = channel::<()>();
        let shared = self.shared.clone();
        let interval = self.shared.config.retry_scan_interval();
        let timer = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    for doc_id in shared.retry.due() {
                        if tx.send(doc_id).is_err() {
                            return; // ingestion queue closed, worker pool is shutting down
                        }
                    }
                }
            }
        });
        *self.retry_timer_stop.lock().unwrap() = Some(stop_tx);
        *self.retry_timer.lock().unwrap() = Some(timer);
        Ok(())
    }

    /// Closes the ingestion queue, stops the retry timer, and joins every worker thread.
    /// Jobs already mid-pipeline run to completion; nothing new is admitted.
    pub fn stop(self) {
        if let Some(stop_tx) = self.retry_timer_stop.lock().unwrap().take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.retry_timer.lock().unwrap().take() {
            let _ = handle.join();
        }
        drop(self.sender.lock().unwrap().take());
        for handle in self.workers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }

    /// Resolves the collection (auto-creating the configured default if missing),
    /// computes the content-derived `docId`, transactionally upserts the doc row,
    /// (re)creates its `SyncJob` in `NEW`, and hands off to the worker pool.
    pub fn ingest(&self, collection_name: Option<&str>, input: DocInput) -> Result<DocId, OrchestratorError> {
        let now = self.shared.clock.now_ms();
        let collection = self.resolve_or_create_collection(collection_name, now)?;

        let doc = self
            .shared
            .meta
            .create_doc(&collection.collection_id, &input.key, &input.name, &input.mime, input.content, now)?;

        if doc.status == DocStatus::Completed {
            return Ok(doc.doc_id); // idempotent re-upload of already-synced content
        }

        let existing_job = self.shared.meta.get_sync_job(&doc.doc_id)?;
        let job = match existing_job {
            Some(j) if j.status == SyncState::Synced => return Ok(doc.doc_id),
            Some(mut j) => {
                j.status = SyncState::New;
                j.retries = 0;
                j.last_error = None;
                j.updated_at = now;
                j
            }
            None => SyncJob {
                sync_job_id: uuid::Uuid::new_v4().to_string(),
                doc_id: doc.doc_id.clone(),
                status: SyncState::New,
                retries: 0,
                last_attempt_at: None,
                last_error: None,
                created_at: now,
                updated_at: now,
            },
        };
        self.shared.meta.upsert_sync_job(&job)?;

        self.enqueue(doc.doc_id.clone())?;
        Ok(doc.doc_id)
    }

    /// Re-arms and re-enqueues a doc's pipeline regardless of its current sync state;
    /// used by an operator after a job reaches `DEAD`.
    pub fn resync(&self, doc_id: &DocId) -> Result<(), OrchestratorError> {
        let now = self.shared.clock.now_ms();
        let mut job = self
            .shared
            .meta
            .get_sync_job(doc_id)?
            .ok_or_else(|| OrchestratorError::Store(metadata_store::StoreError::NotFound(format!("sync job for {doc_id}"))))?;
        job.status = SyncState::New;
        job.retries = 0;
        job.last_error = None;
        job.updated_at = now;
        self.shared.meta.upsert_sync_job(&job)?;
        self.shared.retry.cancel(doc_id);
        self.enqueue(doc_id.clone())
    }

    /// Registers a single-consumer channel that receives this doc's terminal pipeline
    /// outcome the next time it reaches one.
    pub fn subscribe(&self, doc_id: &DocId) -> Receiver<PipelineOutcome> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.shared.waiters.lock().unwrap().entry(doc_id.clone()).or_default().push(tx);
        rx
    }

    /// Cooperative cancellation for a document's in-flight pipeline run.
    pub fn cancel(&self, doc_id: &DocId) {
        if let Some(token) = self.shared.cancellations.lock().unwrap().get(doc_id) {
            token.cancel();
        }
    }

    /// Set once a vector-dimension mismatch has been observed mid-flight. Sticky: once
    /// present, it stays present for the rest of the process's life. Callers (the binary's
    /// exit path) should treat this as "stop taking new work and exit non-zero".
    pub fn fatal_condition(&self) -> Option<DimensionMismatch> {
        *self.shared.fatal.lock().unwrap()
    }

    /// Scans the retry scheduler for doc-ids whose backoff deadline has elapsed and
    /// re-enqueues them. The production binary calls this from a timer loop; tests call it
    /// directly against a `FakeClock`.
    pub fn tick_retries(&self) -> Result<(), OrchestratorError> {
        for doc_id in self.shared.retry.due() {
            self.enqueue(doc_id)?;
        }
        Ok(())
    }

    fn enqueue(&self, doc_id: DocId) -> Result<(), OrchestratorError> {
        let guard = self.sender.lock().unwrap();
        let tx = guard.as_ref().ok_or(OrchestratorError::QueueClosed)?;
        tx.send(doc_id).map_err(|_| OrchestratorError::QueueClosed)
    }

    fn resolve_or_create_collection(
        &self,
        name: Option<&str>,
        now: i64,
    ) -> Result<rag_model::Collection, OrchestratorError> {
        let name = name.unwrap_or(&self.shared.config.default_collection_name);
        if let Some(existing) = self.shared.meta.get_collection_by_name(name)? {
            return Ok(existing);
        }
        Ok(self.shared.meta.create_collection(name, None, now)?)
    }
}

fn worker_loop<C: Clock + 'static>(shared: Arc<Shared<C>>, rx: Arc<Mutex<Receiver<DocId>>>) {
    loop {
        let doc_id = {
            let rx = rx.lock().unwrap();
            match rx.recv() {
                Ok(id) => id,
                Err(_) => return, // sender dropped: shutting down
            }
        };
        run_one(&shared, doc_id);
    }
}

fn run_one<C: Clock + 'static>(shared: &Arc<Shared<C>>, doc_id: DocId) {
    let token = CancellationToken::new();
    shared.cancellations.lock().unwrap().insert(doc_id.clone(), token.clone());

    let outcome = execute(shared, &doc_id, &token);

    shared.cancellations.lock().unwrap().remove(&doc_id);
    notify(shared, &doc_id, outcome);
}

fn notify<C: Clock + 'static>(shared: &Arc<Shared<C>>, doc_id: &DocId, outcome: PipelineOutcome) {
    if let Some(txs) = shared.waiters.lock().unwrap().remove(doc_id) {
        for tx in txs {
            let _ = tx.send(outcome.clone());
        }
    }
}

/// Runs the doc through whichever pipeline steps its persisted state says are still
/// outstanding, advancing the FSM after each, and routes any failure to the retry
/// scheduler.
fn execute<C: Clock + 'static>(shared: &Arc<Shared<C>>, doc_id: &DocId, token: &CancellationToken) -> PipelineOutcome {
    let now = shared.clock.now_ms();
    let doc = match shared.meta.get_doc(doc_id) {
        Ok(Some(d)) => d,
        Ok(None) => {
            tracing::error!(%doc_id, "pipeline woke for a doc with no row");
            return PipelineOutcome::Dead;
        }
        Err(e) => {
            tracing::error!(%doc_id, error = %e, "failed to load doc for pipeline run");
            return PipelineOutcome::Dead;
        }
    };
    let mut job = match shared.meta.get_sync_job(doc_id) {
        Ok(Some(j)) => j,
        Ok(None) => {
            tracing::error!(%doc_id, "pipeline woke for a doc with no sync job");
            return PipelineOutcome::Dead;
        }
        Err(e) => {
            tracing::error!(%doc_id, error = %e, "failed to load sync job for pipeline run");
            return PipelineOutcome::Dead;
        }
    };
    job.last_attempt_at = Some(now);

    if doc.status == DocStatus::New || doc.status == DocStatus::Failed {
        if let Err(e) = shared.meta.update_doc_status(doc_id, DocStatus::Processing, now) {
            tracing::error!(%doc_id, error = %e, "failed to mark doc processing");
        }
    }

    let collection = match shared.meta.get_collection_by_id(&doc.collection_id) {
        Ok(Some(c)) => c,
        Ok(None) => {
            tracing::error!(%doc_id, "pipeline woke for a doc whose collection was deleted");
            return PipelineOutcome::Dead;
        }
        Err(e) => return fail(shared, &mut job, doc_id, e.into(), token),
    };

    if token.is_cancelled() {
        return fail(shared, &mut job, doc_id, OrchestratorError::Cancelled, token);
    }

    let chunks = match pipeline::ensure_split(&shared.meta, &doc, &shared.config) {
        Ok(c) => c,
        Err(e) => return fail(shared, &mut job, doc_id, e, token),
    };
    if let Err(e) = advance(shared, &mut job, doc_id, SyncEvent::ChunksSaved, now) {
        return fail(shared, &mut job, doc_id, e, token);
    }

    if token.is_cancelled() {
        return fail(shared, &mut job, doc_id, OrchestratorError::Cancelled, token);
    }

    if let Err(e) = check_dimension(shared, &shared.embedder.info().dimension) {
        return fatal(shared, &mut job, doc_id, e);
    }
    if let Err(e) = pipeline::ensure_embedded(shared.vectors.as_ref(), shared.embedder.as_ref(), &collection, &chunks, &shared.config, token) {
        return fail(shared, &mut job, doc_id, e, token);
    }
    if let Err(e) = advance(shared, &mut job, doc_id, SyncEvent::VectorsInserted, shared.clock.now_ms()) {
        return fail(shared, &mut job, doc_id, e, token);
    }

    if let Err(e) = pipeline::finalise(&shared.meta, doc_id, shared.clock.now_ms()) {
        return fail(shared, &mut job, doc_id, e, token);
    }
    if let Err(e) = advance(shared, &mut job, doc_id, SyncEvent::MetaUpdated, shared.clock.now_ms()) {
        return fail(shared, &mut job, doc_id, e, token);
    }

    PipelineOutcome::Synced
}

fn check_dimension<C: Clock + 'static>(shared: &Arc<Shared<C>>, observed: &usize) -> Result<(), OrchestratorError> {
    let mut recorded = shared.recorded_dimension.lock().unwrap();
    match *recorded {
        None => {
            *recorded = Some(*observed);
            Ok(())
        }
        Some(d) if d == *observed => Ok(()),
        Some(d) => Err(OrchestratorError::DimensionChanged { recorded: d, observed: *observed }),
    }
}

fn advance<C: Clock + 'static>(
    shared: &Arc<Shared<C>>,
    job: &mut SyncJob,
    doc_id: &DocId,
    event: SyncEvent,
    now: i64,
) -> Result<(), OrchestratorError> {
    let transition = sync_fsm::apply(job, event, now, None)?;
    shared.meta.append_transition(job, &transition)?;
    Ok(())
}

/// Records the failure, advances the FSM to `FAILED`, and asks the retry scheduler what
/// happens next: another retry (`FAILED` → `RETRYING`) or exhaustion (`FAILED` → `DEAD`).
fn fail<C: Clock + 'static>(
    shared: &Arc<Shared<C>>,
    job: &mut SyncJob,
    doc_id: &DocId,
    err: OrchestratorError,
    token: &CancellationToken,
) -> PipelineOutcome {
    let now = shared.clock.now_ms();
    let cancelled = matches!(err, OrchestratorError::Cancelled) || token.is_cancelled();
    job.last_error = Some(if cancelled {
        "{\"cancelled\":true}".to_string()
    } else {
        err.to_string()
    });

    // FAILED may already be the current state on repeated failures within one run; the
    // FSM only accepts the Error event from NEW/SPLIT_OK/EMBED_OK/RETRYING, so guard the
    // call instead of letting a second `ERROR` in the same pass get rejected.
    if job.status != SyncState::Failed {
        if let Ok(transition) = sync_fsm::apply(job, SyncEvent::Error, now, job.last_error.clone()) {
            let _ = shared.meta.append_transition(job, &transition);
        }
    } else if let Err(e) = shared.meta.upsert_sync_job(job) {
        tracing::error!(%doc_id, error = %e, "failed to persist sync job after pipeline error");
    }

    match shared.retry.on_failure(doc_id, job.retries) {
        RetryAction::Schedule { deadline_ms } => {
            job.retries += 1;
            if let Ok(transition) = sync_fsm::apply(job, SyncEvent::Retry, now, None) {
                let _ = shared.meta.append_transition(job, &transition);
            }
            tracing::warn!(%doc_id, deadline_ms, retries = job.retries, "sync job failed, retry armed");
            PipelineOutcome::Retrying
        }
        RetryAction::Exceeded => {
            if let Ok(transition) = sync_fsm::apply(job, SyncEvent::RetriesExceeded, now, None) {
                let _ = shared.meta.append_transition(job, &transition);
            }
            if let Err(e) = shared.meta.update_doc_status(doc_id, DocStatus::Failed, now) {
                tracing::error!(%doc_id, error = %e, "failed to mark doc failed after exhausting retries");
            }
            tracing::error!(%doc_id, "sync job exhausted retries, moved to DEAD");
            PipelineOutcome::Dead
        }
    }
}

/// A process-fatal error: no retry, no backoff, the job just gets marked `FAILED` and the
/// process-wide fatal flag is set so the binary can exit non-zero instead of churning. The
/// only caller today is the dimension-mismatch check in `execute`.
fn fatal<C: Clock + 'static>(shared: &Arc<Shared<C>>, job: &mut SyncJob, doc_id: &DocId, err: OrchestratorError) -> PipelineOutcome {
    let now = shared.clock.now_ms();
    job.last_error = Some(err.to_string());
    if job.status != SyncState::Failed {
        if let Ok(transition) = sync_fsm::apply(job, SyncEvent::Error, now, job.last_error.clone()) {
            let _ = shared.meta.append_transition(job, &transition);
        }
    } else if let Err(e) = shared.meta.upsert_sync_job(job) {
        tracing::error!(%doc_id, error = %e, "failed to persist sync job after fatal pipeline error");
    }
    if let Err(e) = shared.meta.update_doc_status(doc_id, DocStatus::Failed, now) {
        tracing::error!(%doc_id, error = %e, "failed to mark doc failed after a fatal pipeline error");
    }
    shared.retry.cancel(doc_id);

    let mismatch = match err {
        OrchestratorError::DimensionChanged { recorded, observed } => DimensionMismatch { recorded, observed },
        _ => unreachable!("fatal() is only reached for process-fatal errors"),
    };
    *shared.fatal.lock().unwrap() = Some(mismatch);
    tracing::error!(
        %doc_id,
        recorded = mismatch.recorded,
        observed = mismatch.observed,
        "vector dimension changed mid-flight; this is fatal to the process"
    );
    PipelineOutcome::Fatal(mismatch)
}
