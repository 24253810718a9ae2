//! The split/embed/finalise pipeline steps and the re-entry rule that decides where a
//! resumed job should pick back up.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rag_model::{Chunk, ChunkStatus, Collection, Document, PointId};
use vector_store::{VectorPayload, VectorPoint, VectorStore};

use crate::error::OrchestratorError;
use crate::OrchestratorConfig;

/// Cooperative cancellation, checked between pipeline steps and between embed batches.
/// Cloning shares the same underlying flag.
#[derive(Debug, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned when a step bails out early because the token fired.
pub struct Cancelled;

/// Step a: split `doc.content` into chunks and persist them, unless chunk rows already
/// exist for this doc (re-entry: step a is a no-op because chunk rows are keyed by
/// deterministic `pointId`).
pub fn ensure_split(
    meta: &metadata_store::MetadataStore,
    doc: &Document,
    config: &OrchestratorConfig,
) -> Result<Vec<Chunk>, OrchestratorError> {
    let existing = meta.get_chunks_by_doc_id_paginated(
        &doc.doc_id,
        metadata_store::PageRequest::new(1, metadata_store::MAX_LIMIT).expect("static request is valid"),
    )?;
    if existing.total > 0 {
        return Ok(existing.data);
    }

    let base_name = Some(doc.name.clone());
    let content = String::from_utf8_lossy(&doc.content).into_owned();
    let opts = splitter::SplitOptions {
        strategy: config.splitter_default,
        base_name,
        ..Default::default()
    };
    let split_chunks = splitter::split(&content, &opts)?;

    let chunks: Vec<Chunk> = split_chunks
        .into_iter()
        .map(|c| {
            let point_id = PointId::new(doc.doc_id.clone(), c.chunk_index);
            Chunk {
                point_id,
                doc_id: doc.doc_id.clone(),
                collection_id: doc.collection_id.clone(),
                chunk_index: c.chunk_index,
                title: c.title,
                title_chain: c.title_chain,
                content_hash: rag_model::DocId::from_content(c.content.as_bytes()).as_str().to_string(),
                content: c.content,
                status: ChunkStatus::New,
            }
        })
        .collect();

    meta.add_chunks(&doc.doc_id, &chunks)?;
    Ok(chunks)
}

/// Step b: embed every chunk not yet observably present in the vector store, in batches
/// of `config.embed_batch_size`, then upsert. Re-entry only embeds the chunks whose
/// `pointId` is missing from the collection's point set.
pub fn ensure_embedded(
    vectors: &dyn VectorStore,
    embedder: &dyn embedding_provider::EmbeddingProvider,
    collection: &Collection,
    chunks: &[Chunk],
    config: &OrchestratorConfig,
    cancel: &CancellationToken,
) -> Result<(), OrchestratorError> {
    let existing: HashSet<PointId> = vectors
        .list_all_point_ids(&collection.collection_id)?
        .into_iter()
        .collect();

    let pending: Vec<&Chunk> = chunks.iter().filter(|c| !existing.contains(&c.point_id)).collect();

    for batch in pending.chunks(config.embed_batch_size.max(1)) {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vecs = embedder.embed_batch(&texts)?;
        let points: Vec<VectorPoint> = batch
            .iter()
            .zip(vecs.into_iter())
            .map(|(chunk, vector)| VectorPoint {
                point_id: chunk.point_id.clone(),
                vector,
                payload: VectorPayload {
                    doc_id: chunk.doc_id.clone(),
                    collection_id: chunk.collection_id.clone(),
                    chunk_index: chunk.chunk_index,
                    title: chunk.title.clone(),
                    title_chain: chunk.title_chain_serialized(),
                },
            })
            .collect();
        vectors.upsert_batch(&collection.collection_id, &points)?;
    }
    Ok(())
}

/// Step c: mark the document `COMPLETED` and every chunk `SYNCED` in one transaction.
pub fn finalise(meta: &metadata_store::MetadataStore, doc_id: &rag_model::DocId, now_ms: i64) -> Result<(), OrchestratorError> {
    meta.mark_doc_synced(doc_id, now_ms)?;
    Ok(())
}
