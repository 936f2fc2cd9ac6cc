//! `SQLite` backend: schema, pragmas, and document/chunk persistence.
//!
//! The document store is authoritative; the vector index is a derived,
//! rebuildable cache over it. Iteration order matters: rebuilds and the
//! startup identity-map reconstruction both walk [`DocumentStore::list_entities`],
//! so positions assigned at rebuild time can be re-derived after a restart
//! without persisting the map itself. Rows are therefore always returned in
//! ascending id order (chunks in ascending `(document_id, chunk_index)`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::model::types::{Document, DocumentChunk, IndexEntity};

const SCHEMA_VERSION: i64 = 2;

/// Thread-safe handle over the documents database.
pub struct DocumentStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl DocumentStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open documents db at {}", path.display()))?;
        apply_pragmas(&conn)?;
        init_schema(&conn)?;
        info!(path = %path.display(), "opened document store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let version: i64 = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |r| {
                r.get(0)
            })
            .context("read schema_version")?;
        Ok(version)
    }

    // ---------------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------------

    pub fn insert_document(&self, doc: &Document) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (name, tags, summary, extracted_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                doc.name,
                serde_json::to_string(&doc.tags)?,
                doc.summary,
                doc.extracted_text,
                doc.created_at.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            ],
        )
        .context("insert document")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, tags, summary, extracted_text, created_at
             FROM documents WHERE id = ?1",
            params![id],
            row_to_document,
        )
        .optional()
        .context("get document")
    }

    /// All documents in ascending id order.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, tags, summary, extracted_text, created_at
             FROM documents ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_document)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a document row. Returns whether a row existed.
    pub fn delete_document(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .context("delete document")?;
        Ok(n > 0)
    }

    pub fn count_documents(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    // ---------------------------------------------------------------------
    // Chunks
    // ---------------------------------------------------------------------

    pub fn insert_chunk(&self, chunk: &DocumentChunk) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO document_chunks (document_id, chunk_index, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                chunk.document_id,
                chunk.chunk_index,
                chunk.content,
                chunk.created_at.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            ],
        )
        .context("insert chunk")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_chunk(&self, id: i64) -> Result<Option<DocumentChunk>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, document_id, chunk_index, content, created_at
             FROM document_chunks WHERE id = ?1",
            params![id],
            row_to_chunk,
        )
        .optional()
        .context("get chunk")
    }

    pub fn chunks_for_document(&self, document_id: i64) -> Result<Vec<DocumentChunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, document_id, chunk_index, content, created_at
             FROM document_chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
        )?;
        let rows = stmt
            .query_map(params![document_id], row_to_chunk)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_chunks_for_document(&self, document_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn
            .execute(
                "DELETE FROM document_chunks WHERE document_id = ?1",
                params![document_id],
            )
            .context("delete chunks for document")?;
        Ok(n)
    }

    pub fn delete_all_chunks(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn
            .execute("DELETE FROM document_chunks", [])
            .context("delete all chunks")?;
        Ok(n)
    }

    // ---------------------------------------------------------------------
    // Index view
    // ---------------------------------------------------------------------

    /// The entities the index layer sees, in the order positions are
    /// assigned: whole documents by ascending id, or every chunk row in
    /// ascending `(document_id, chunk_index)` when chunking is enabled.
    pub fn list_entities(&self, chunking: bool) -> Result<Vec<IndexEntity>> {
        let conn = self.conn.lock();
        if chunking {
            let mut stmt = conn.prepare(
                "SELECT id, document_id, content FROM document_chunks
                 ORDER BY document_id ASC, chunk_index ASC",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(IndexEntity {
                        id: r.get::<_, i64>(0)?.to_string(),
                        text: r.get(2)?,
                        parent_id: Some(r.get::<_, i64>(1)?.to_string()),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, extracted_text FROM documents ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(IndexEntity {
                        id: r.get::<_, i64>(0)?.to_string(),
                        text: r.get(1)?,
                        parent_id: None,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        }
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            summary TEXT NOT NULL DEFAULT '',
            extracted_text TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS document_chunks (
            id INTEGER PRIMARY KEY,
            document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_document
            ON document_chunks(document_id, chunk_index);",
    )
    .context("init schema")?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

fn row_to_document(r: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let tags_json: String = r.get(2)?;
    Ok(Document {
        id: Some(r.get(0)?),
        name: r.get(1)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        summary: r.get(3)?,
        extracted_text: r.get(4)?,
        created_at: Some(r.get(5)?),
    })
}

fn row_to_chunk(r: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentChunk> {
    Ok(DocumentChunk {
        id: Some(r.get(0)?),
        document_id: r.get(1)?,
        chunk_index: r.get(2)?,
        content: r.get(3)?,
        created_at: Some(r.get(4)?),
    })
}
