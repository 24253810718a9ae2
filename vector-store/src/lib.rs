//! The vector store interface (`spec.md` §4.3) plus the single concrete backend this
//! workspace ships.
//!
//! Per the Non-goals in `spec.md` §9 ("a production implementation picks one backend;
//! multi-backend routing is out of scope"), only one [`VectorStore`] implementation is
//! provided: an in-process, exactly-searched index. A networked product (Qdrant, pgvector,
//! ...) would implement the same trait; nothing above this crate depends on how the
//! vectors are actually stored or searched.

use std::collections::HashMap;
use std::sync::Mutex;

use rag_model::{DocId, PointId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector dimension mismatch: store has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorPayload {
    pub doc_id: DocId,
    pub collection_id: String,
    pub chunk_index: u32,
    pub title: Option<String>,
    /// `"a > b > c"` form, matching the wire schema in `spec.md` §6.
    pub title_chain: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub point_id: PointId,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub point_id: PointId,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub doc_id: Option<DocId>,
}

#[derive(Debug, Clone)]
pub struct VectorQuery<'a> {
    pub vector: &'a [f32],
    pub limit: usize,
    pub filter: Option<VectorFilter>,
}

/// Abstract operations from `spec.md` §4.3.
pub trait VectorStore: Send + Sync {
    fn upsert_batch(&self, collection_id: &str, points: &[VectorPoint]) -> Result<(), VectorStoreError>;
    fn delete_points(&self, collection_id: &str, point_ids: &[PointId]) -> Result<(), VectorStoreError>;
    /// Returns the number of points removed.
    fn delete_by_filter(&self, collection_id: &str, doc_id: &DocId) -> Result<usize, VectorStoreError>;
    fn search(&self, collection_id: &str, query: &VectorQuery<'_>) -> Result<Vec<ScoredPoint>, VectorStoreError>;

    /// One page of a restartable full scan, used only by GC. `cursor = None` starts from
    /// the beginning; the returned cursor feeds the next call and is `None` once exhausted.
    fn scan_point_ids(
        &self,
        collection_id: &str,
        cursor: Option<PointId>,
        page_size: usize,
    ) -> Result<(Vec<PointId>, Option<PointId>), VectorStoreError>;

    /// Convenience wrapper draining `scan_point_ids` to completion.
    fn list_all_point_ids(&self, collection_id: &str) -> Result<Vec<PointId>, VectorStoreError> {
        let mut out = Vec::new();
        let mut cursor = None;
        loop {
            let (page, next) = self.scan_point_ids(collection_id, cursor, 1000)?;
            out.extend(page);
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
struct CollectionIndex {
    points: HashMap<PointId, (Vec<f32>, VectorPayload)>,
}

/// Exact, in-process backend. Holds every collection's points in memory and searches by
/// brute-force cosine similarity, which is exact (no recall loss) and trivially supports
/// deletion — the two properties the GC convergence property in `spec.md` §8 depends on.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, CollectionIndex>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

impl VectorStore for InMemoryVectorStore {
    fn upsert_batch(&self, collection_id: &str, points: &[VectorPoint]) -> Result<(), VectorStoreError> {
        let mut guard = self.collections.lock().expect("vector store mutex poisoned");
        let idx = guard.entry(collection_id.to_string()).or_default();
        for p in points {
            if let Some((existing, _)) = idx.points.values().next() {
                if existing.len() != p.vector.len() {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: existing.len(),
                        actual: p.vector.len(),
                    });
                }
            }
            idx.points
                .insert(p.point_id.clone(), (p.vector.clone(), p.payload.clone()));
        }
        tracing::debug!(collection_id, count = points.len(), "upserted vectors");
        Ok(())
    }

    fn delete_points(&self, collection_id: &str, point_ids: &[PointId]) -> Result<(), VectorStoreError> {
        let mut guard = self.collections.lock().expect("vector store mutex poisoned");
        if let Some(idx) = guard.get_mut(collection_id) {
            for pid in point_ids {
                idx.points.remove(pid);
            }
        }
        Ok(())
    }

    fn delete_by_filter(&self, collection_id: &str, doc_id: &DocId) -> Result<usize, VectorStoreError> {
        let mut guard = self.collections.lock().expect("vector store mutex poisoned");
        let mut removed = 0usize;
        if let Some(idx) = guard.get_mut(collection_id) {
            let to_remove: Vec<PointId> = idx
                .points
                .iter()
                .filter(|(_, (_, payload))| &payload.doc_id == doc_id)
                .map(|(pid, _)| pid.clone())
                .collect();
            for pid in &to_remove {
                idx.points.remove(pid);
            }
            removed = to_remove.len();
        }
        Ok(removed)
    }

    fn search(&self, collection_id: &str, query: &VectorQuery<'_>) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let guard = self.collections.lock().expect("vector store mutex poisoned");
        let Some(idx) = guard.get(collection_id) else {
            return Ok(Vec::new());
        };
        let filter_doc = query.filter.as_ref().and_then(|f| f.doc_id.as_ref());
        let mut scored: Vec<ScoredPoint> = idx
            .points
            .iter()
            .filter(|(_, (_, payload))| filter_doc.is_none_or_matches(&payload.doc_id))
            .map(|(pid, (vec, _))| ScoredPoint {
                point_id: pid.clone(),
                score: cosine_similarity(query.vector, vec),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.point_id.cmp(&b.point_id))
        });
        scored.truncate(query.limit);
        Ok(scored)
    }

    fn scan_point_ids(
        &self,
        collection_id: &str,
        cursor: Option<PointId>,
        page_size: usize,
    ) -> Result<(Vec<PointId>, Option<PointId>), VectorStoreError> {
        let guard = self.collections.lock().expect("vector store mutex poisoned");
        let Some(idx) = guard.get(collection_id) else {
            return Ok((Vec::new(), None));
        };
        let mut ids: Vec<PointId> = idx.points.keys().cloned().collect();
        ids.sort();
        let start = match &cursor {
            Some(c) => ids.partition_point(|id| id <= c),
            None => 0,
        };
        let page: Vec<PointId> = ids[start..].iter().take(page_size).cloned().collect();
        let next = if start + page.len() < ids.len() {
            page.last().cloned()
        } else {
            None
        };
        Ok((page, next))
    }
}

trait OptionDocIdExt {
    fn is_none_or_matches(&self, doc_id: &DocId) -> bool;
}

impl OptionDocIdExt for Option<&DocId> {
    fn is_none_or_matches(&self, doc_id: &DocId) -> bool {
        match self {
            None => true,
            Some(d) => *d == doc_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(doc_id: &DocId) -> VectorPayload {
        VectorPayload {
            doc_id: doc_id.clone(),
            collection_id: "c1".into(),
            chunk_index: 0,
            title: None,
            title_chain: None,
        }
    }

    #[test]
    fn upsert_then_search_returns_nearest_first() {
        let store = InMemoryVectorStore::new();
        let doc = DocId::from_content(b"doc");
        let p0 = PointId::new(doc.clone(), 0);
        let p1 = PointId::new(doc.clone(), 1);
        store
            .upsert_batch(
                "c1",
                &[
                    VectorPoint { point_id: p0.clone(), vector: vec![1.0, 0.0], payload: payload(&doc) },
                    VectorPoint { point_id: p1.clone(), vector: vec![0.0, 1.0], payload: payload(&doc) },
                ],
            )
            .unwrap();
        let hits = store
            .search("c1", &VectorQuery { vector: &[1.0, 0.0], limit: 2, filter: None })
            .unwrap();
        assert_eq!(hits[0].point_id, p0);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn delete_by_filter_removes_only_matching_doc() {
        let store = InMemoryVectorStore::new();
        let doc_a = DocId::from_content(b"a");
        let doc_b = DocId::from_content(b"b");
        let pa = PointId::new(doc_a.clone(), 0);
        let pb = PointId::new(doc_b.clone(), 0);
        store
            .upsert_batch(
                "c1",
                &[
                    VectorPoint { point_id: pa.clone(), vector: vec![1.0], payload: payload(&doc_a) },
                    VectorPoint { point_id: pb.clone(), vector: vec![1.0], payload: payload(&doc_b) },
                ],
            )
            .unwrap();
        let removed = store.delete_by_filter("c1", &doc_a).unwrap();
        assert_eq!(removed, 1);
        let remaining = store.list_all_point_ids("c1").unwrap();
        assert_eq!(remaining, vec![pb]);
    }

    #[test]
    fn scan_is_restartable() {
        let store = InMemoryVectorStore::new();
        let doc = DocId::from_content(b"doc");
        let points: Vec<VectorPoint> = (0..10)
            .map(|i| VectorPoint {
                point_id: PointId::new(doc.clone(), i),
                vector: vec![i as f32],
                payload: payload(&doc),
            })
            .collect();
        store.upsert_batch("c1", &points).unwrap();

        let (page1, cursor1) = store.scan_point_ids("c1", None, 4).unwrap();
        assert_eq!(page1.len(), 4);
        let cursor1 = cursor1.expect("more pages remain");
        let (page2, _) = store.scan_point_ids("c1", Some(cursor1), 100).unwrap();
        assert_eq!(page1.len() + page2.len(), 10);
    }
}
