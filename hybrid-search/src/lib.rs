//! Hybrid keyword + vector search with Reciprocal Rank Fusion.

mod fusion;

use std::sync::Arc;

use rag_model::{CoreError, InfraKind, PointId};
use thiserror::Error;
use vector_store::{VectorQuery, VectorStore};

pub use fusion::{fuse, RRF_K};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("store error: {0}")]
    Store(#[from] metadata_store::StoreError),
    #[error("vector store error: {0}")]
    VectorStore(#[from] vector_store::VectorStoreError),
    #[error("limit must be between 1 and {MAX_LIMIT}, got {0}")]
    InvalidLimit(u32),
    #[error("page must be >= 1, got {0}")]
    InvalidPage(u32),
}

impl From<SearchError> for CoreError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Store(e) => e.into(),
            SearchError::VectorStore(e) => CoreError::Infrastructure { kind: InfraKind::ExternalService, message: e.to_string() },
            SearchError::InvalidLimit(_) | SearchError::InvalidPage(_) => CoreError::Validation(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub collection_id: Option<String>,
    pub limit: u32,
    pub page: u32,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self { query: String::new(), collection_id: None, limit: DEFAULT_LIMIT, page: 1 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub point_id: PointId,
    pub doc_id: rag_model::DocId,
    pub collection_id: String,
    pub chunk_index: u32,
    pub title: Option<String>,
    pub title_chain: Vec<String>,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    /// Size of the fused candidate pool this page was sliced from, not the total corpus
    /// size: paginated search oversamples then slices the fused tail.
    pub total: usize,
    pub degraded: bool,
}

/// Binds the metadata store's FTS arm and the vector store's similarity arm into the
/// fused query path.
pub struct HybridSearch {
    meta: Arc<metadata_store::MetadataStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn embedding_provider::EmbeddingProvider>,
}

impl HybridSearch {
    pub fn new(
        meta: Arc<metadata_store::MetadataStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn embedding_provider::EmbeddingProvider>,
    ) -> Self {
        Self { meta, vectors, embedder }
    }

    pub fn search(&self, req: &SearchRequest) -> Result<SearchResponse, SearchError> {
        if req.limit < 1 || req.limit > MAX_LIMIT {
            return Err(SearchError::InvalidLimit(req.limit));
        }
        if req.page < 1 {
            return Err(SearchError::InvalidPage(req.page));
        }

        // Oversample by limit * page from each arm so the fused tail for page N is
        // available without needing true cursor-based pagination per arm.
        let oversample = (req.limit as usize) * (req.page as usize);

        let (keyword_ids, vector_ids, degraded) = std::thread::scope(|scope| {
            let keyword_handle = scope.spawn(|| self.keyword_arm(req, oversample));
            let vector_handle = scope.spawn(|| self.vector_arm(req, oversample));

            let keyword_ids = keyword_handle.join().expect("keyword arm thread panicked");
            let vector_result = vector_handle.join().expect("vector arm thread panicked");
            match vector_result {
                Ok(ids) => (keyword_ids, ids, false),
                Err(e) => {
                    tracing::warn!(error = %e, "vector arm failed, degrading to keyword-only search");
                    (keyword_ids, Ok(Vec::new()), true)
                }
            }
        });
        let keyword_ids = keyword_ids?;
        let vector_ids = vector_ids?;

        let fused = fuse(&keyword_ids, &vector_ids);
        let total = fused.len();

        let start = ((req.page - 1) as usize) * (req.limit as usize);
        let page_slice: Vec<PointId> = fused.into_iter().skip(start).take(req.limit as usize).collect();

        let keyword_rank: std::collections::HashMap<&PointId, usize> =
            keyword_ids.iter().enumerate().map(|(i, p)| (p, i + 1)).collect();
        let vector_rank: std::collections::HashMap<&PointId, usize> =
            vector_ids.iter().enumerate().map(|(i, p)| (p, i + 1)).collect();

        let chunks = self.meta.get_chunks_by_point_ids(&page_slice)?;
        let by_point: std::collections::HashMap<&PointId, &rag_model::Chunk> =
            chunks.iter().map(|c| (&c.point_id, c)).collect();

        let mut results = Vec::with_capacity(page_slice.len());
        for point_id in &page_slice {
            let Some(chunk) = by_point.get(point_id) else {
                continue; // observably deleted since the snapshot was taken
            };
            let score = rrf_score(keyword_rank.get(point_id).copied(), vector_rank.get(point_id).copied());
            results.push(SearchHit {
                point_id: point_id.clone(),
                doc_id: chunk.doc_id.clone(),
                collection_id: chunk.collection_id.clone(),
                chunk_index: chunk.chunk_index,
                title: chunk.title.clone(),
                title_chain: chunk.title_chain.clone(),
                content: chunk.content.clone(),
                score,
            });
        }

        Ok(SearchResponse { results, total, degraded })
    }

    fn keyword_arm(&self, req: &SearchRequest, oversample: usize) -> Result<Vec<PointId>, SearchError> {
        let rows = self
            .meta
            .fts_search(&req.query, req.collection_id.as_deref(), oversample as u32)?;
        Ok(rows.into_iter().map(|(p, _)| p).collect())
    }

    fn vector_arm(&self, req: &SearchRequest, oversample: usize) -> Result<Vec<PointId>, SearchError> {
        let vectors = self.embedder.embed_batch(std::slice::from_ref(&req.query))?;
        let query_vector = vectors.into_iter().next().unwrap_or_default();
        let query = VectorQuery { vector: &query_vector, limit: oversample, filter: None };

        let mut hits = match &req.collection_id {
            Some(cid) => self.vectors.search(cid, &query)?,
            // No scope given: fan out to every known collection and merge by score, since
            // the vector store's `search` is itself always scoped to one collection.
            None => {
                let mut merged = Vec::new();
                for collection_id in self.known_collection_ids()? {
                    merged.extend(self.vectors.search(&collection_id, &query)?);
                }
                merged
            }
        };
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(oversample);
        Ok(hits.into_iter().map(|h| h.point_id).collect())
    }

    fn known_collection_ids(&self) -> Result<Vec<String>, SearchError> {
        let mut ids = Vec::new();
        let mut page = 1u32;
        loop {
            let req = metadata_store::PageRequest::new(page, metadata_store::MAX_LIMIT)
                .expect("page and limit are both within their valid ranges");
            let listing = self.meta.list_collections_paginated(
                req,
                metadata_store::SortField::Name,
                metadata_store::SortOrder::Asc,
            )?;
            let has_next = listing.has_next;
            ids.extend(listing.data.into_iter().map(|c| c.collection_id));
            if !has_next {
                break;
            }
            page += 1;
        }
        Ok(ids)
    }
}

impl From<embedding_provider::EmbedderError> for SearchError {
    fn from(err: embedding_provider::EmbedderError) -> Self {
        // Modelled as a vector-store-arm failure so the caller degrades to keyword-only.
        SearchError::VectorStore(vector_store::VectorStoreError::Backend(err.to_string()))
    }
}

fn rrf_score(keyword_rank: Option<usize>, vector_rank: Option<usize>) -> f64 {
    let mut score = 0.0;
    if let Some(k) = keyword_rank {
        score += 1.0 / (RRF_K + k as f64);
    }
    if let Some(v) = vector_rank {
        score += 1.0 / (RRF_K + v as f64);
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedding_provider::DeterministicEmbedder;
    use metadata_store::MetadataStore;
    use rag_model::{Chunk, ChunkStatus, DocId, PointId};
    use vector_store::{InMemoryVectorStore, VectorPayload, VectorPoint};

    fn seed_chunk(doc_id: &DocId, idx: u32, collection_id: &str, content: &str) -> Chunk {
        Chunk {
            point_id: PointId::new(doc_id.clone(), idx),
            doc_id: doc_id.clone(),
            collection_id: collection_id.to_string(),
            chunk_index: idx,
            title: None,
            title_chain: vec![],
            content: content.to_string(),
            content_hash: DocId::from_content(content.as_bytes()).as_str().to_string(),
            status: ChunkStatus::Synced,
        }
    }

    #[test]
    fn s6_hybrid_search_surfaces_literal_keyword_hits() {
        let meta = Arc::new(MetadataStore::open_in_memory().unwrap());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn embedding_provider::EmbeddingProvider> = Arc::new(DeterministicEmbedder::new(8).unwrap());

        let col = meta.create_collection("c", None, 0).unwrap();
        let doc = meta.create_doc(&col.collection_id, "k", "doc.txt", "text/plain", b"x".to_vec(), 0).unwrap();

        let contents = ["alpha beta", "beta gamma delta", "gamma delta epsilon"];
        let mut chunks = Vec::new();
        for (i, c) in contents.iter().enumerate() {
            chunks.push(seed_chunk(&doc.doc_id, i as u32, &col.collection_id, c));
        }
        meta.add_chunks(&doc.doc_id, &chunks).unwrap();

        let points: Vec<VectorPoint> = chunks
            .iter()
            .map(|c| VectorPoint {
                point_id: c.point_id.clone(),
                vector: embedder.embed_batch(&[c.content.clone()]).unwrap().remove(0),
                payload: VectorPayload {
                    doc_id: c.doc_id.clone(),
                    collection_id: c.collection_id.clone(),
                    chunk_index: c.chunk_index,
                    title: None,
                    title_chain: None,
                },
            })
            .collect();
        vectors.upsert_batch(&col.collection_id, &points).unwrap();

        let search = HybridSearch::new(meta, vectors, embedder);
        let req = SearchRequest { query: "beta".into(), collection_id: Some(col.collection_id.clone()), limit: 2, page: 1 };
        let resp = search.search(&req).unwrap();
        assert!(!resp.degraded);
        assert!(!resp.results.is_empty());
        let top_contents: Vec<&str> = resp.results.iter().map(|r| r.content.as_str()).collect();
        assert!(top_contents.contains(&"alpha beta") || top_contents.contains(&"beta gamma delta"));
    }

    #[test]
    fn pagination_slices_the_fused_tail() {
        let meta = Arc::new(MetadataStore::open_in_memory().unwrap());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn embedding_provider::EmbeddingProvider> = Arc::new(DeterministicEmbedder::new(4).unwrap());

        let col = meta.create_collection("c", None, 0).unwrap();
        let doc = meta.create_doc(&col.collection_id, "k", "doc.txt", "text/plain", b"x".to_vec(), 0).unwrap();
        let mut chunks = Vec::new();
        for i in 0..5u32 {
            chunks.push(seed_chunk(&doc.doc_id, i, &col.collection_id, &format!("needle document number {i}")));
        }
        meta.add_chunks(&doc.doc_id, &chunks).unwrap();

        let search = HybridSearch::new(meta, vectors, embedder);
        let page1 = search
            .search(&SearchRequest { query: "needle".into(), collection_id: Some(col.collection_id.clone()), limit: 2, page: 1 })
            .unwrap();
        let page2 = search
            .search(&SearchRequest { query: "needle".into(), collection_id: Some(col.collection_id.clone()), limit: 2, page: 2 })
            .unwrap();
        let ids1: Vec<_> = page1.results.iter().map(|r| r.point_id.clone()).collect();
        let ids2: Vec<_> = page2.results.iter().map(|r| r.point_id.clone()).collect();
        assert!(ids1.iter().all(|id| !ids2.contains(id)), "pages must not overlap");
    }

    #[test]
    fn unscoped_search_fans_out_across_every_collection() {
        let meta = Arc::new(MetadataStore::open_in_memory().unwrap());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn embedding_provider::EmbeddingProvider> = Arc::new(DeterministicEmbedder::new(8).unwrap());

        let col_a = meta.create_collection("a", None, 0).unwrap();
        let col_b = meta.create_collection("b", None, 0).unwrap();
        let doc_a = meta.create_doc(&col_a.collection_id, "k", "a.txt", "text/plain", b"x".to_vec(), 0).unwrap();
        let doc_b = meta.create_doc(&col_b.collection_id, "k", "b.txt", "text/plain", b"y".to_vec(), 0).unwrap();

        let chunk_a = seed_chunk(&doc_a.doc_id, 0, &col_a.collection_id, "needle in collection a");
        let chunk_b = seed_chunk(&doc_b.doc_id, 0, &col_b.collection_id, "needle in collection b");
        meta.add_chunks(&doc_a.doc_id, &[chunk_a.clone()]).unwrap();
        meta.add_chunks(&doc_b.doc_id, &[chunk_b.clone()]).unwrap();

        for (collection_id, chunk) in [(&col_a.collection_id, &chunk_a), (&col_b.collection_id, &chunk_b)] {
            vectors
                .upsert_batch(
                    collection_id,
                    &[VectorPoint {
                        point_id: chunk.point_id.clone(),
                        vector: embedder.embed_batch(&[chunk.content.clone()]).unwrap().remove(0),
                        payload: VectorPayload {
                            doc_id: chunk.doc_id.clone(),
                            collection_id: collection_id.clone(),
                            chunk_index: chunk.chunk_index,
                            title: None,
                            title_chain: None,
                        },
                    }],
                )
                .unwrap();
        }

        let search = HybridSearch::new(meta, vectors, embedder);
        let resp = search
            .search(&SearchRequest { query: "needle".into(), collection_id: None, limit: 10, page: 1 })
            .unwrap();
        let hit_collections: std::collections::HashSet<_> = resp.results.iter().map(|h| h.collection_id.clone()).collect();
        assert_eq!(hit_collections.len(), 2, "an unscoped search must surface hits from every collection");
    }

    #[test]
    fn invalid_limit_is_rejected() {
        let meta = Arc::new(MetadataStore::open_in_memory().unwrap());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn embedding_provider::EmbeddingProvider> = Arc::new(DeterministicEmbedder::new(4).unwrap());
        let search = HybridSearch::new(meta, vectors, embedder);
        let req = SearchRequest { query: "x".into(), collection_id: None, limit: 0, page: 1 };
        assert!(search.search(&req).is_err());
    }
}
