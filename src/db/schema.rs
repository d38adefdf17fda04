//! SQL DDL for the memory index.
//!
//! Defines the `meta`, `files`, `chunks`, and `embedding_cache` tables plus the
//! optional `chunks_fts` (FTS5) and `chunks_vec` (vec0) virtual tables. All DDL
//! uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// Core tables. Indexes on `source` are created by the v2 migration because
/// databases written before that column existed cannot index it yet.
const SCHEMA_SQL: &str = r#"
-- Singleton key/value records (schema version, index meta)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- One row per tracked source file
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    source TEXT NOT NULL DEFAULT 'memory',
    hash TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL
);

-- Chunk records, replaced wholesale whenever their file changes
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'memory',
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    hash TEXT NOT NULL,
    model TEXT NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);

-- Memoized provider output keyed by text hash and provider identity
CREATE TABLE IF NOT EXISTS embedding_cache (
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    provider_key TEXT NOT NULL,
    hash TEXT NOT NULL,
    embedding BLOB NOT NULL,
    dims INTEGER,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (provider, model, provider_key, hash)
);

CREATE INDEX IF NOT EXISTS idx_embedding_cache_updated_at ON embedding_cache(updated_at);
"#;

/// Full-text mirror of chunk text for keyword search.
const FTS_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    text,
    id UNINDEXED,
    path UNINDEXED,
    source UNINDEXED,
    start_line UNINDEXED,
    end_line UNINDEXED
);
"#;

/// Initialize the core tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

/// Create the vec0 table at a fixed width. A table that already exists keeps
/// whatever width it was created with; see [`recreate_vector_table`].
pub fn create_vector_table(conn: &Connection, dims: usize) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vec USING vec0(
            id TEXT PRIMARY KEY,
            embedding FLOAT[{dims}]
        );"
    ))
}

/// Drop and rebuild the vec0 table, e.g. after the embedding width changed.
pub fn recreate_vector_table(conn: &Connection, dims: usize) -> rusqlite::Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS chunks_vec;")?;
    create_vector_table(conn, dims)
}

pub fn create_fts_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(FTS_TABLE_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        create_fts_table(&conn).unwrap();
        create_vector_table(&conn, 8).unwrap();

        let tables = table_names(&conn);
        for expected in ["meta", "files", "chunks", "embedding_cache", "chunks_fts", "chunks_vec"] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        create_vector_table(&conn, 8).unwrap();
        create_vector_table(&conn, 8).unwrap();
        create_fts_table(&conn).unwrap();
        create_fts_table(&conn).unwrap();
    }

    #[test]
    fn vector_table_enforces_width() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        create_vector_table(&conn, 4).unwrap();

        let ok: Vec<u8> = [0.1f32, 0.2, 0.3, 0.4].iter().flat_map(|f| f.to_le_bytes()).collect();
        conn.execute(
            "INSERT INTO chunks_vec (id, embedding) VALUES ('a', ?1)",
            [&ok],
        )
        .unwrap();

        let wrong: Vec<u8> = [0.1f32, 0.2].iter().flat_map(|f| f.to_le_bytes()).collect();
        let err = conn.execute(
            "INSERT INTO chunks_vec (id, embedding) VALUES ('b', ?1)",
            [&wrong],
        );
        assert!(err.is_err(), "mismatched width must be rejected");

        recreate_vector_table(&conn, 2).unwrap();
        conn.execute(
            "INSERT INTO chunks_vec (id, embedding) VALUES ('b', ?1)",
            [&wrong],
        )
        .unwrap();
    }
}
