use std::sync::{Arc, Mutex};

use rag_model::{Chunk, ChunkStatus, Collection, Document, DocId, DocStatus, EpochMs, PointId, SyncEvent, SyncJob, SyncState, Transition};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::pagination::{Page, PageRequest};
use crate::schema::init_schema;
use crate::transaction::TransactionManager;
use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// SQLite-backed implementation of the metadata store. One connection shared behind a
/// mutex across the whole worker pool; every multi-statement write goes through
/// `transactions.execute_in_transaction`, which holds the mutex for the full
/// `SAVEPOINT`..`RELEASE` span so two workers can never interleave their savepoint
/// stacks on this connection.
pub struct MetadataStore {
    conn: Arc<Mutex<Connection>>,
    pub transactions: TransactionManager,
}

impl MetadataStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self { transactions: TransactionManager::new(conn.clone()), conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self { transactions: TransactionManager::new(conn.clone()), conn })
    }

    // ---- Collections ----------------------------------------------------

    pub fn create_collection(&self, name: &str, description: Option<&str>, now: EpochMs) -> Result<Collection, StoreError> {
        let collection_id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO collections (collection_id, name, description, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![collection_id, name, description, now],
        )?;
        Ok(Collection {
            collection_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_collection_by_id(&self, collection_id: &str) -> Result<Option<Collection>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT collection_id, name, description, created_at, updated_at FROM collections WHERE collection_id = ?1",
            params![collection_id],
            row_to_collection,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT collection_id, name, description, created_at, updated_at FROM collections WHERE name = ?1",
            params![name],
            row_to_collection,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_collections_paginated(
        &self,
        req: PageRequest,
        sort: SortField,
        order: SortOrder,
    ) -> Result<Page<Collection>, StoreError> {
        let column = match sort {
            SortField::Name => "name",
            SortField::CreatedAt => "created_at",
        };
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM collections", [], |r| r.get(0))?;
        let sql = format!(
            "SELECT collection_id, name, description, created_at, updated_at FROM collections ORDER BY {column} {direction} LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![req.limit, req.offset()], row_to_collection)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(rows, req, total.max(0) as u64))
    }

    /// Cascades to the collection's docs and chunks inside a single transaction.
    pub fn delete_collection(&self, collection_id: &str) -> Result<(), StoreError> {
        self.transactions.execute_in_transaction(|conn, _| {
            conn.execute(
                "DELETE FROM chunks WHERE collection_id = ?1",
                params![collection_id],
            )?;
            conn.execute(
                "DELETE FROM sync_jobs WHERE doc_id IN (SELECT doc_id FROM documents WHERE collection_id = ?1)",
                params![collection_id],
            )?;
            conn.execute("DELETE FROM documents WHERE collection_id = ?1", params![collection_id])?;
            conn.execute("DELETE FROM collections WHERE collection_id = ?1", params![collection_id])?;
            Ok(())
        })
    }

    // ---- Documents --------------------------------------------------------

    /// Two uploads of identical content collide on `doc_id`; the second call is a no-op
    /// that returns the existing row rather than an error.
    pub fn create_doc(
        &self,
        collection_id: &str,
        key: &str,
        name: &str,
        mime: &str,
        content: Vec<u8>,
        now: EpochMs,
    ) -> Result<Document, StoreError> {
        let doc_id = DocId::from_content(&content);
        if let Some(existing) = self.get_doc(&doc_id)? {
            return Ok(existing);
        }
        let size_bytes = content.len() as u64;
        let status = doc_status_str(DocStatus::New);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO documents (doc_id, collection_id, key, name, mime, size_bytes, content, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![doc_id.as_str(), collection_id, key, name, mime, size_bytes as i64, content, status, now],
        )
        .map_err(|e| map_unique_violation(e, || format!("document with key {key:?} already exists in this collection")))?;
        drop(conn);
        Ok(self.get_doc(&doc_id)?.expect("just inserted"))
    }

    pub fn get_doc(&self, doc_id: &DocId) -> Result<Option<Document>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT doc_id, collection_id, key, name, mime, size_bytes, content, status, created_at, updated_at
             FROM documents WHERE doc_id = ?1",
            params![doc_id.as_str()],
            row_to_document,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn soft_delete_doc(&self, doc_id: &DocId, now: EpochMs) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE documents SET status = ?1, updated_at = ?2 WHERE doc_id = ?3",
            params![doc_status_str(DocStatus::Deleted), now, doc_id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("document {doc_id}")));
        }
        Ok(())
    }

    /// Deletes its chunks, then hard-deletes the doc row, all inside one transaction.
    /// Vector deletion is the caller's responsibility (GC); this only removes the
    /// metadata-side rows.
    pub fn hard_delete_doc(&self, doc_id: &DocId) -> Result<(), StoreError> {
        self.transactions.execute_in_transaction(|conn, _| {
            conn.execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id.as_str()])?;
            conn.execute("DELETE FROM sync_jobs WHERE doc_id = ?1", params![doc_id.as_str()])?;
            let changed = conn.execute("DELETE FROM documents WHERE doc_id = ?1", params![doc_id.as_str()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("document {doc_id}")));
            }
            Ok(())
        })
    }

    /// Marks a document and all of its chunks complete in one transaction. Used by the
    /// orchestrator's `finalise` step, which needs exactly this pairing to be atomic.
    pub fn mark_doc_synced(&self, doc_id: &DocId, now: EpochMs) -> Result<(), StoreError> {
        self.transactions.execute_in_transaction(|conn, _| {
            let changed = conn.execute(
                "UPDATE documents SET status = ?1, updated_at = ?2 WHERE doc_id = ?3",
                params![doc_status_str(DocStatus::Completed), now, doc_id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("document {doc_id}")));
            }
            conn.execute(
                "UPDATE chunks SET status = ?1 WHERE doc_id = ?2",
                params![chunk_status_str(ChunkStatus::Synced), doc_id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn update_doc_status(&self, doc_id: &DocId, status: DocStatus, now: EpochMs) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE documents SET status = ?1, updated_at = ?2 WHERE doc_id = ?3",
            params![doc_status_str(status), now, doc_id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("document {doc_id}")));
        }
        Ok(())
    }

    pub fn list_deleted_docs(&self) -> Result<Vec<Document>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT doc_id, collection_id, key, name, mime, size_bytes, content, status, created_at, updated_at
             FROM documents WHERE status = ?1",
        )?;
        let rows = stmt
            .query_map(params![doc_status_str(DocStatus::Deleted)], row_to_document)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- Chunks -------------------------------------------------------------

    /// Atomic: inserts chunk rows and mirrors them into the FTS index in one
    /// transaction; the mirror is actually a SQLite trigger on `chunks`, so this just
    /// needs the insert to be transactional.
    pub fn add_chunks(&self, doc_id: &DocId, chunks: &[Chunk]) -> Result<(), StoreError> {
        self.transactions.execute_in_transaction(|conn, _| {
            for chunk in chunks {
                let chain = serde_json::to_string(&chunk.title_chain)?;
                conn.execute(
                    "INSERT INTO chunks (point_id, doc_id, collection_id, chunk_index, title, title_chain, content, content_hash, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        chunk.point_id.to_string(),
                        doc_id.as_str(),
                        chunk.collection_id,
                        chunk.chunk_index,
                        chunk.title,
                        chain,
                        chunk.content,
                        chunk.content_hash,
                        chunk_status_str(chunk.status),
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn delete_chunks_by_doc_id(&self, doc_id: &DocId) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id.as_str()])?)
    }

    pub fn delete_chunks_by_collection_id(&self, collection_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute("DELETE FROM chunks WHERE collection_id = ?1", params![collection_id])?)
    }

    pub fn delete_chunks_by_point_ids(&self, point_ids: &[PointId]) -> Result<usize, StoreError> {
        if point_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = point_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM chunks WHERE point_id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let values: Vec<String> = point_ids.iter().map(|p| p.to_string()).collect();
        Ok(stmt.execute(rusqlite::params_from_iter(values.iter()))?)
    }

    pub fn get_chunks_by_point_ids(&self, point_ids: &[PointId]) -> Result<Vec<Chunk>, StoreError> {
        if point_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = point_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT point_id, doc_id, collection_id, chunk_index, title, title_chain, content, content_hash, status
             FROM chunks WHERE point_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let values: Vec<String> = point_ids.iter().map(|p| p.to_string()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), row_to_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Set of point ids currently recorded for a collection's chunks — the metadata side
    /// of GC's double scan.
    pub fn list_chunk_point_ids_by_collection(&self, collection_id: &str) -> Result<Vec<PointId>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT point_id FROM chunks WHERE collection_id = ?1")?;
        let rows = stmt
            .query_map(params![collection_id], |row: &Row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|s| PointId::parse(&s).map_err(StoreError::from)).collect()
    }

    pub fn get_chunks_by_doc_id_paginated(&self, doc_id: &DocId, req: PageRequest) -> Result<Page<Chunk>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE doc_id = ?1",
            params![doc_id.as_str()],
            |r| r.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT point_id, doc_id, collection_id, chunk_index, title, title_chain, content, content_hash, status
             FROM chunks WHERE doc_id = ?1 ORDER BY chunk_index ASC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![doc_id.as_str(), req.limit, req.offset()], row_to_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(rows, req, total.max(0) as u64))
    }

    /// `MATCH`-based full-text search over `chunks_fts`, ranked by BM25 (lower is
    /// better, negated so higher is better downstream like the vector arm).
    pub fn fts_search(&self, query: &str, collection_id: Option<&str>, limit: u32) -> Result<Vec<(PointId, f64)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let rows: Vec<(String, f64)> = if let Some(cid) = collection_id {
            let mut stmt = conn.prepare(
                "SELECT point_id, bm25(chunks_fts) FROM chunks_fts
                 WHERE chunks_fts MATCH ?1 AND collection_id = ?2
                 ORDER BY bm25(chunks_fts) ASC LIMIT ?3",
            )?;
            stmt.query_map(params![query, cid, limit], |row: &Row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT point_id, bm25(chunks_fts) FROM chunks_fts
                 WHERE chunks_fts MATCH ?1
                 ORDER BY bm25(chunks_fts) ASC LIMIT ?2",
            )?;
            stmt.query_map(params![query, limit], |row: &Row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?
        };
        rows.into_iter()
            .map(|(pid, bm25)| Ok((PointId::parse(&pid)?, -bm25)))
            .collect()
    }

    // ---- Sync jobs ------------------------------------------------------------

    pub fn upsert_sync_job(&self, job: &SyncJob) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sync_jobs (sync_job_id, doc_id, status, retries, last_attempt_at, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(doc_id) DO UPDATE SET
                status = excluded.status,
                retries = excluded.retries,
                last_attempt_at = excluded.last_attempt_at,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
            params![
                job.sync_job_id,
                job.doc_id.as_str(),
                sync_state_str(job.status),
                job.retries,
                job.last_attempt_at,
                job.last_error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_sync_job(&self, doc_id: &DocId) -> Result<Option<SyncJob>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT sync_job_id, doc_id, status, retries, last_attempt_at, last_error, created_at, updated_at
             FROM sync_jobs WHERE doc_id = ?1",
            params![doc_id.as_str()],
            row_to_sync_job,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Appends a transition log row in the same transaction as the job-status update:
    /// every accepted transition writes a log entry alongside the job row update.
    pub fn append_transition(&self, job: &SyncJob, transition: &Transition) -> Result<(), StoreError> {
        self.transactions.execute_in_transaction(|conn, _| {
            conn.execute(
                "INSERT INTO sync_jobs (sync_job_id, doc_id, status, retries, last_attempt_at, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(doc_id) DO UPDATE SET
                    status = excluded.status,
                    retries = excluded.retries,
                    last_attempt_at = excluded.last_attempt_at,
                    last_error = excluded.last_error,
                    updated_at = excluded.updated_at",
                params![
                    job.sync_job_id,
                    job.doc_id.as_str(),
                    sync_state_str(job.status),
                    job.retries,
                    job.last_attempt_at,
                    job.last_error,
                    job.created_at,
                    job.updated_at,
                ],
            )?;
            conn.execute(
                "INSERT INTO sync_transitions (job_id, from_state, to_state, event, at, context)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    transition.job_id,
                    sync_state_str(transition.from),
                    sync_state_str(transition.to),
                    sync_event_str(transition.event),
                    transition.at,
                    transition.context,
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_sync_jobs_by_status(&self, status: SyncState) -> Result<Vec<SyncJob>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT sync_job_id, doc_id, status, retries, last_attempt_at, last_error, created_at, updated_at
             FROM sync_jobs WHERE status = ?1",
        )?;
        let rows = stmt
            .query_map(params![sync_state_str(status)], row_to_sync_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(ffi_err, _) if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Maps a `UNIQUE`/index constraint violation to `StoreError::Conflict` with a
/// caller-supplied message; anything else passes through as `StoreError::Sqlite`.
fn map_unique_violation(err: rusqlite::Error, message: impl FnOnce() -> String) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(message())
    } else {
        StoreError::from(err)
    }
}

fn row_to_collection(row: &Row) -> rusqlite::Result<Collection> {
    Ok(Collection {
        collection_id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    let doc_id: String = row.get(0)?;
    let status: String = row.get(7)?;
    Ok(Document {
        doc_id: DocId::parse(&doc_id).expect("doc_id column is always valid"),
        collection_id: row.get(1)?,
        key: row.get(2)?,
        name: row.get(3)?,
        mime: row.get(4)?,
        size_bytes: row.get::<_, i64>(5)? as u64,
        content: row.get(6)?,
        status: doc_status_from_str(&status),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<Chunk> {
    let point_id: String = row.get(0)?;
    let doc_id: String = row.get(1)?;
    let chain: String = row.get(5)?;
    let status: String = row.get(8)?;
    Ok(Chunk {
        point_id: PointId::parse(&point_id).expect("point_id column is always valid"),
        doc_id: DocId::parse(&doc_id).expect("doc_id column is always valid"),
        collection_id: row.get(2)?,
        chunk_index: row.get::<_, i64>(3)? as u32,
        title: row.get(4)?,
        title_chain: serde_json::from_str(&chain).unwrap_or_default(),
        content: row.get(6)?,
        content_hash: row.get(7)?,
        status: chunk_status_from_str(&status),
    })
}

fn row_to_sync_job(row: &Row) -> rusqlite::Result<SyncJob> {
    let doc_id: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(SyncJob {
        sync_job_id: row.get(0)?,
        doc_id: DocId::parse(&doc_id).expect("doc_id column is always valid"),
        status: sync_state_from_str(&status),
        retries: row.get::<_, i64>(3)? as u32,
        last_attempt_at: row.get(4)?,
        last_error: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn doc_status_str(s: DocStatus) -> &'static str {
    match s {
        DocStatus::New => "NEW",
        DocStatus::Processing => "PROCESSING",
        DocStatus::Completed => "COMPLETED",
        DocStatus::Failed => "FAILED",
        DocStatus::Deleted => "DELETED",
    }
}

fn doc_status_from_str(s: &str) -> DocStatus {
    match s {
        "PROCESSING" => DocStatus::Processing,
        "COMPLETED" => DocStatus::Completed,
        "FAILED" => DocStatus::Failed,
        "DELETED" => DocStatus::Deleted,
        _ => DocStatus::New,
    }
}

fn chunk_status_str(s: ChunkStatus) -> &'static str {
    match s {
        ChunkStatus::New => "NEW",
        ChunkStatus::Embedded => "EMBEDDED",
        ChunkStatus::Synced => "SYNCED",
        ChunkStatus::Failed => "FAILED",
    }
}

fn chunk_status_from_str(s: &str) -> ChunkStatus {
    match s {
        "EMBEDDED" => ChunkStatus::Embedded,
        "SYNCED" => ChunkStatus::Synced,
        "FAILED" => ChunkStatus::Failed,
        _ => ChunkStatus::New,
    }
}

fn sync_state_str(s: SyncState) -> &'static str {
    match s {
        SyncState::New => "NEW",
        SyncState::SplitOk => "SPLIT_OK",
        SyncState::EmbedOk => "EMBED_OK",
        SyncState::Synced => "SYNCED",
        SyncState::Failed => "FAILED",
        SyncState::Retrying => "RETRYING",
        SyncState::Dead => "DEAD",
    }
}

fn sync_state_from_str(s: &str) -> SyncState {
    match s {
        "SPLIT_OK" => SyncState::SplitOk,
        "EMBED_OK" => SyncState::EmbedOk,
        "SYNCED" => SyncState::Synced,
        "FAILED" => SyncState::Failed,
        "RETRYING" => SyncState::Retrying,
        "DEAD" => SyncState::Dead,
        _ => SyncState::New,
    }
}

fn sync_event_str(e: SyncEvent) -> &'static str {
    match e {
        SyncEvent::ChunksSaved => "CHUNKS_SAVED",
        SyncEvent::VectorsInserted => "VECTORS_INSERTED",
        SyncEvent::MetaUpdated => "META_UPDATED",
        SyncEvent::Error => "ERROR",
        SyncEvent::Retry => "RETRY",
        SyncEvent::RetriesExceeded => "RETRIES_EXCEEDED",
    }
}
