//! Reconciling garbage collector: a periodic double-scan that repairs divergence
//! between the metadata store's chunk rows and the vector store's points, then
//! finalises soft-deleted documents.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use metadata_store::MetadataStore;
use rag_model::PointId;
use retry_scheduler::Clock;
use vector_store::VectorStore;

use crate::config::GcConfig;
use crate::error::GcError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub collections_scanned: usize,
    pub orphans_deleted_from_vectors: usize,
    pub orphans_deleted_from_meta: usize,
    pub docs_finalised: usize,
}

/// Guards `run_once` against overlapping itself: GC never runs concurrently with
/// itself. Reset on drop so a pass that errors out mid-way doesn't wedge every future
/// pass.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, GcError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| Self(flag))
            .map_err(|_| GcError::AlreadyRunning)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Gc<C: Clock + 'static> {
    meta: Arc<MetadataStore>,
    vectors: Arc<dyn VectorStore>,
    clock: Arc<C>,
    config: GcConfig,
    running: AtomicBool,
    stop: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock + 'static> Gc<C> {
    pub fn new(meta: Arc<MetadataStore>, vectors: Arc<dyn VectorStore>, clock: Arc<C>, config: GcConfig) -> Arc<Self> {
        Arc::new(Self {
            meta,
            vectors,
            clock,
            config,
            running: AtomicBool::new(false),
            stop: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    /// Spawns the background timer thread. Idempotent: a second call while already
    /// started is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }
        let (tx, rx) = channel::<()>();
        *self.stop.lock().unwrap() = Some(tx);
        let gc = Arc::clone(self);
        let interval = self.config.interval();
        let handle = std::thread::spawn(move || loop {
            match rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => match gc.run_once() {
                    Ok(report) => tracing::info!(
                        collections = report.collections_scanned,
                        orphans_in_vectors = report.orphans_deleted_from_vectors,
                        orphans_in_meta = report.orphans_deleted_from_meta,
                        docs_finalised = report.docs_finalised,
                        "GC pass complete"
                    ),
                    Err(err) => tracing::error!(error = %err, "GC pass failed"),
                },
            }
        });
        *worker = Some(handle);
    }

    pub fn stop(&self) {
        if let Some(tx) = self.stop.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Runs one full double-scan pass over every collection, then finalises soft-deleted
    /// documents. Single-flight: returns `GcError::AlreadyRunning` if a pass is already in
    /// progress.
    pub fn run_once(&self) -> Result<GcReport, GcError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let started_at = self.clock.now_ms();
        let mut report = GcReport::default();

        let mut page = 1u32;
        loop {
            let req = metadata_store::PageRequest::new(page, 200)
                .expect("page and limit are both within their valid ranges");
            let listing = self
                .meta
                .list_collections_paginated(req, metadata_store::SortField::Name, metadata_store::SortOrder::Asc)?;
            for collection in &listing.data {
                let (vector_orphans, meta_orphans) = self.reconcile_collection(&collection.collection_id)?;
                report.collections_scanned += 1;
                report.orphans_deleted_from_vectors += vector_orphans;
                report.orphans_deleted_from_meta += meta_orphans;
            }
            if !listing.has_next {
                break;
            }
            page += 1;
        }

        report.docs_finalised = self.finalise_deleted_docs()?;
        tracing::debug!(started_at, "GC pass finished");
        Ok(report)
    }

    /// Reconciles a single collection: snapshot both sides, delete whichever points
    /// appear only on one of them. Anything inserted between the two snapshots is safe —
    /// it will simply show up on both sides of the next pass.
    fn reconcile_collection(&self, collection_id: &str) -> Result<(usize, usize), GcError> {
        let sqlite_points: HashSet<PointId> =
            self.meta.list_chunk_point_ids_by_collection(collection_id)?.into_iter().collect();
        let vector_points: HashSet<PointId> = self.vectors.list_all_point_ids(collection_id)?.into_iter().collect();

        let orphans_in_vectors: Vec<PointId> = vector_points.difference(&sqlite_points).cloned().collect();
        if !orphans_in_vectors.is_empty() {
            self.vectors.delete_points(collection_id, &orphans_in_vectors)?;
        }

        let orphans_in_meta: Vec<PointId> = sqlite_points.difference(&vector_points).cloned().collect();
        if !orphans_in_meta.is_empty() {
            self.meta.delete_chunks_by_point_ids(&orphans_in_meta)?;
        }

        Ok((orphans_in_vectors.len(), orphans_in_meta.len()))
    }

    /// Deletes a soft-deleted doc's vectors, then its chunks and doc row inside one
    /// metadata-store transaction.
    fn finalise_deleted_docs(&self) -> Result<usize, GcError> {
        let deleted = self.meta.list_deleted_docs()?;
        let mut count = 0;
        for doc in &deleted {
            self.vectors.delete_by_filter(&doc.collection_id, &doc.doc_id)?;
            self.meta.hard_delete_doc(&doc.doc_id)?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metadata_store::MetadataStore;
    use rag_model::{Chunk, ChunkStatus, DocId, PointId};
    use retry_scheduler::FakeClock;
    use vector_store::{InMemoryVectorStore, VectorPayload, VectorPoint, VectorStore};

    use super::*;

    fn chunk(doc_id: &DocId, idx: u32, collection_id: &str) -> Chunk {
        Chunk {
            point_id: PointId::new(doc_id.clone(), idx),
            doc_id: doc_id.clone(),
            collection_id: collection_id.to_string(),
            chunk_index: idx,
            title: None,
            title_chain: vec![],
            content: "body text long enough to pass the floor".to_string(),
            content_hash: "deadbeef".to_string(),
            status: ChunkStatus::Synced,
        }
    }

    fn point(p: &PointId, doc_id: &DocId, collection_id: &str) -> VectorPoint {
        VectorPoint {
            point_id: p.clone(),
            vector: vec![1.0, 0.0],
            payload: VectorPayload {
                doc_id: doc_id.clone(),
                collection_id: collection_id.to_string(),
                chunk_index: p.chunk_index,
                title: None,
                title_chain: None,
            },
        }
    }

    #[test]
    fn s5_gc_deletes_spurious_vector_points_with_no_chunk_row() {
        let meta = Arc::new(MetadataStore::open_in_memory().unwrap());
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let clock = Arc::new(FakeClock::new(0));
        let gc = Gc::new(meta.clone(), vectors.clone(), clock, GcConfig::default());

        let col = meta.create_collection("c", None, 0).unwrap();
        let real_doc = meta.create_doc(&col.collection_id, "k1", "a.txt", "text/plain", b"real content".to_vec(), 0).unwrap();
        let real_chunk = chunk(&real_doc.doc_id, 0, &col.collection_id);
        meta.add_chunks(&real_doc.doc_id, &[real_chunk.clone()]).unwrap();
        vectors.upsert_batch(&col.collection_id, &[point(&real_chunk.point_id, &real_doc.doc_id, &col.collection_id)]).unwrap();

        // 3 spurious vector points belonging to a doc with no chunk row.
        let spurious_doc = DocId::from_content(b"never synced to sqlite");
        let spurious_points: Vec<VectorPoint> = (0..3)
            .map(|i| point(&PointId::new(spurious_doc.clone(), i), &spurious_doc, &col.collection_id))
            .collect();
        vectors.upsert_batch(&col.collection_id, &spurious_points).unwrap();

        let report = gc.run_once().unwrap();
        assert_eq!(report.orphans_deleted_from_vectors, 3);
        assert_eq!(report.orphans_deleted_from_meta, 0);

        let remaining = vectors.list_all_point_ids(&col.collection_id).unwrap();
        assert_eq!(remaining, vec![real_chunk.point_id]);
    }

    #[test]
    fn gc_deletes_orphaned_chunk_rows_with_no_vector_point() {
        let meta = Arc::new(MetadataStore::open_in_memory().unwrap());
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let clock = Arc::new(FakeClock::new(0));
        let gc = Gc::new(meta.clone(), vectors, clock, GcConfig::default());

        let col = meta.create_collection("c", None, 0).unwrap();
        let doc = meta.create_doc(&col.collection_id, "k1", "a.txt", "text/plain", b"content".to_vec(), 0).unwrap();
        let orphan_chunk = chunk(&doc.doc_id, 0, &col.collection_id);
        meta.add_chunks(&doc.doc_id, &[orphan_chunk.clone()]).unwrap();
        // never upserted into the vector store

        let report = gc.run_once().unwrap();
        assert_eq!(report.orphans_deleted_from_meta, 1);
        let remaining = meta
            .get_chunks_by_doc_id_paginated(&doc.doc_id, metadata_store::PageRequest::new(1, 10).unwrap())
            .unwrap();
        assert_eq!(remaining.total, 0);
    }

    #[test]
    fn invariant_7_gc_converges_after_one_pass() {
        let meta = Arc::new(MetadataStore::open_in_memory().unwrap());
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let clock = Arc::new(FakeClock::new(0));
        let gc = Gc::new(meta.clone(), vectors.clone(), clock, GcConfig::default());

        let col = meta.create_collection("c", None, 0).unwrap();
        let doc = meta.create_doc(&col.collection_id, "k1", "a.txt", "text/plain", b"content".to_vec(), 0).unwrap();
        let synced_chunk = chunk(&doc.doc_id, 0, &col.collection_id);
        meta.add_chunks(&doc.doc_id, &[synced_chunk.clone()]).unwrap();
        vectors.upsert_batch(&col.collection_id, &[point(&synced_chunk.point_id, &doc.doc_id, &col.collection_id)]).unwrap();

        let orphan_vector_doc = DocId::from_content(b"orphan");
        vectors
            .upsert_batch(&col.collection_id, &[point(&PointId::new(orphan_vector_doc.clone(), 0), &orphan_vector_doc, &col.collection_id)])
            .unwrap();

        let deleted_doc = meta.create_doc(&col.collection_id, "k2", "b.txt", "text/plain", b"to be deleted".to_vec(), 0).unwrap();
        let deleted_chunk = chunk(&deleted_doc.doc_id, 0, &col.collection_id);
        meta.add_chunks(&deleted_doc.doc_id, &[deleted_chunk.clone()]).unwrap();
        vectors.upsert_batch(&col.collection_id, &[point(&deleted_chunk.point_id, &deleted_doc.doc_id, &col.collection_id)]).unwrap();
        meta.soft_delete_doc(&deleted_doc.doc_id, 0).unwrap();

        gc.run_once().unwrap();

        let meta_points: HashSet<PointId> = meta.list_chunk_point_ids_by_collection(&col.collection_id).unwrap().into_iter().collect();
        let vector_points: HashSet<PointId> = vectors.list_all_point_ids(&col.collection_id).unwrap().into_iter().collect();
        assert_eq!(meta_points, vector_points);
        assert_eq!(meta.list_deleted_docs().unwrap(), vec![]);
        assert!(meta.get_doc(&deleted_doc.doc_id).unwrap().is_none());
    }

    #[test]
    fn run_once_rejects_concurrent_passes() {
        let meta = Arc::new(MetadataStore::open_in_memory().unwrap());
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let clock = Arc::new(FakeClock::new(0));
        let gc = Gc::new(meta, vectors, clock, GcConfig::default());

        let _guard = RunGuard::acquire(&gc.running).unwrap();
        assert!(matches!(gc.run_once(), Err(GcError::AlreadyRunning)));
    }
}
