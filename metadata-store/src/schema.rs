//! Schema definition and migration. A single `CREATE TABLE IF NOT EXISTS` pass, run once
//! per connection; there is exactly one schema version so no migration table is needed
//! yet.

use rusqlite::Connection;

use crate::StoreError;

pub(crate) fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS collections (
            collection_id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
            doc_id TEXT PRIMARY KEY,
            collection_id TEXT NOT NULL REFERENCES collections(collection_id),
            key TEXT NOT NULL,
            name TEXT NOT NULL,
            mime TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            content BLOB NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection_id, status);

        -- (collection_id, key) is only unique among live docs: a soft-deleted doc must not
        -- block re-ingesting a new one under the same key.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_collection_key_active
            ON documents(collection_id, key) WHERE status <> 'DELETED';

        CREATE TABLE IF NOT EXISTS chunks (
            point_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL REFERENCES documents(doc_id),
            collection_id TEXT NOT NULL REFERENCES collections(collection_id),
            chunk_index INTEGER NOT NULL,
            title TEXT,
            title_chain TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL,
            UNIQUE (doc_id, chunk_index)
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id);
        CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
            point_id UNINDEXED,
            collection_id UNINDEXED,
            title,
            content,
            content='chunks',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
            INSERT INTO chunks_fts(rowid, point_id, collection_id, title, content)
            VALUES (new.rowid, new.point_id, new.collection_id, new.title, new.content);
        END;

        CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, point_id, collection_id, title, content)
            VALUES ('delete', old.rowid, old.point_id, old.collection_id, old.title, old.content);
        END;

        CREATE TABLE IF NOT EXISTS sync_jobs (
            sync_job_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL UNIQUE REFERENCES documents(doc_id),
            status TEXT NOT NULL,
            retries INTEGER NOT NULL,
            last_attempt_at INTEGER,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sync_jobs_status ON sync_jobs(status);

        CREATE TABLE IF NOT EXISTS sync_transitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL REFERENCES sync_jobs(sync_job_id),
            from_state TEXT NOT NULL,
            to_state TEXT NOT NULL,
            event TEXT NOT NULL,
            at INTEGER NOT NULL,
            context TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_transitions_job ON sync_transitions(job_id);
        ",
    )?;
    Ok(())
}
