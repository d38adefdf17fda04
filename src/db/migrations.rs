//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `meta` and runs sequential migrations to bring
//! the database up to [`CURRENT_SCHEMA_VERSION`]. Also owns the persisted
//! [`IndexMeta`] record.

use rusqlite::{Connection, OptionalExtension};

use crate::memory::types::IndexMeta;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Key under which [`IndexMeta`] is stored as JSON.
const INDEX_META_KEY: &str = "memory_index_meta_v1";

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Read the stored index meta. A record that no longer parses is treated as
/// absent, which forces a rebuild on the next sync.
pub fn get_index_meta(conn: &Connection) -> rusqlite::Result<Option<IndexMeta>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            [INDEX_META_KEY],
            |row| row.get(0),
        )
        .optional()?;

    Ok(raw.and_then(|json| match serde_json::from_str(&json) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!(error = %e, "stored index meta is unreadable, ignoring");
            None
        }
    }))
}

/// Upsert the index meta record.
pub fn set_index_meta(conn: &Connection, meta: &IndexMeta) -> rusqlite::Result<()> {
    let json = serde_json::to_string(meta)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [INDEX_META_KEY, json.as_str()],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations. Each migration runs in a transaction.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        let tx = conn.unchecked_transaction()?;
        match next {
            2 => migrate_v1_to_v2(&tx)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }
        update_schema_version(&tx, next)?;
        tx.commit()?;
        version = next;
    }

    Ok(())
}

/// Migration v1 → v2: older databases predate the `source` column on
/// `files` and `chunks`. Add it where missing and index it.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    for table in ["files", "chunks"] {
        if ensure_column(conn, table, "source", "TEXT NOT NULL DEFAULT 'memory'")? {
            tracing::info!(table, "added missing source column");
        }
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_files_source ON files(source);
         CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);",
    )?;

    // An FTS table without `source` cannot be altered; drop it and forget the
    // index meta so the next sync rebuilds everything.
    let fts_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'chunks_fts')",
        [],
        |row| row.get(0),
    )?;
    if fts_exists && !column_names(conn, "chunks_fts")?.iter().any(|c| c == "source") {
        tracing::info!("dropping legacy full-text table");
        conn.execute_batch("DROP TABLE chunks_fts;")?;
        conn.execute("DELETE FROM meta WHERE key = ?1", [INDEX_META_KEY])?;
    }
    Ok(())
}

fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Add `column` to `table` unless it is already present. Returns `true` if added.
pub fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> rusqlite::Result<bool> {
    if column_names(conn, table)?.iter().any(|c| c == column) {
        return Ok(false);
    }

    conn.execute(
        &format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"),
        [],
    )?;
    Ok(true)
}
