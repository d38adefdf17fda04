//! SQLite connection setup for the memory index.
//!
//! Opens the database, registers sqlite-vec, creates the schema, runs migrations,
//! and probes which optional search structures (vector, full-text) are usable.
//! A missing capability degrades the index instead of failing startup.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Options fixed at the time the store is opened.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub vector_enabled: bool,
    pub fts_enabled: bool,
    /// Width of the `chunks_vec` embedding column.
    pub vector_dims: usize,
}

/// Optional search structures available on an open connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub vector: bool,
    pub fts: bool,
}

/// Open (or create) the index database at the given path with schema,
/// migrations, and capability probing applied.
pub fn open_database(path: impl AsRef<Path>, opts: StoreOptions) -> Result<(Connection, Capabilities)> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    if opts.vector_enabled {
        load_sqlite_vec();
    }

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_millis(5000))?;

    let caps = prepare(&conn, opts)?;
    tracing::info!(
        path = %path.display(),
        vector = caps.vector,
        fts = caps.fts,
        "index database initialized"
    );
    Ok((conn, caps))
}

/// Open an existing index for reading. Nothing is created: a missing file is
/// an error, and the schema is left as found.
pub fn open_database_read_only(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    load_sqlite_vec();
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )
    .with_context(|| format!("failed to open database at {} for reading", path.display()))?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(conn)
}

/// Open an in-memory database, used by tests and throwaway indexes.
pub fn open_memory_database(opts: StoreOptions) -> Result<(Connection, Capabilities)> {
    if opts.vector_enabled {
        load_sqlite_vec();
    }
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    let caps = prepare(&conn, opts)?;
    Ok((conn, caps))
}

fn prepare(conn: &Connection, opts: StoreOptions) -> Result<Capabilities> {
    schema::init_schema(conn).context("failed to initialize schema")?;
    migrations::run_migrations(conn).context("failed to run migrations")?;

    let vector = opts.vector_enabled && probe_vector(conn, opts.vector_dims);
    let fts = opts.fts_enabled && probe_fts(conn);
    Ok(Capabilities { vector, fts })
}

fn probe_vector(conn: &Connection, dims: usize) -> bool {
    if let Err(e) = vec_version(conn) {
        tracing::warn!(error = %e, "sqlite-vec unavailable, vector search disabled");
        return false;
    }
    match schema::create_vector_table(conn, dims) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, dims, "failed to create vector table, vector search disabled");
            false
        }
    }
}

fn probe_fts(conn: &Connection) -> bool {
    match schema::create_fts_table(conn) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "FTS5 unavailable, keyword search disabled");
            false
        }
    }
}

/// Version string reported by sqlite-vec, if the extension is loaded.
pub fn vec_version(conn: &Connection) -> rusqlite::Result<String> {
    conn.query_row("SELECT vec_version()", [], |r| r.get(0))
}

/// Result of [`check_database_health`].
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub schema_version: u32,
    pub sqlite_vec_version: Option<String>,
    pub file_count: u64,
    pub chunk_count: u64,
    pub cache_count: u64,
}

/// Run SQLite's integrity check and gather row counts.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    let schema_version = migrations::get_schema_version(conn)?;
    let count = |table: &str| -> Result<u64> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
        Ok(n as u64)
    };

    Ok(HealthReport {
        integrity_ok: integrity == "ok",
        integrity_details: integrity,
        schema_version,
        sqlite_vec_version: vec_version(conn).ok(),
        file_count: count("files")?,
        chunk_count: count("chunks")?,
        cache_count: count("embedding_cache")?,
    })
}
