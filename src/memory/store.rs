//! Write path and primitive CRUD over the index tables.
//!
//! [`replace_file`] is the per-file unit of work: it deletes every row the
//! path owns (chunks, vectors, full-text) and writes the new set inside one
//! transaction, so a crash leaves a file either fully old or fully new.
//! Vector rows are best-effort; a rejected insert is logged and the chunk is
//! kept without one.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;

use super::types::{ChunkRecord, FileEntry, MEMORY_SOURCE};
use super::{bytes_to_embedding, embedding_to_bytes, now_ms};
use crate::db::{schema, Capabilities};

/// Provider identity an embedding cache entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub provider: String,
    pub model: String,
    pub provider_key: String,
}

/// Rows written by [`replace_file`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub chunks_written: usize,
    pub vectors_written: usize,
    pub vectors_skipped: usize,
}

/// Stored content hash for a memory path, if the path is tracked.
pub fn get_file_hash(conn: &Connection, path: &str) -> Result<Option<String>> {
    let hash = conn
        .query_row(
            "SELECT hash FROM files WHERE path = ?1 AND source = ?2",
            params![path, MEMORY_SOURCE],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hash)
}

/// Every tracked memory path, sorted.
pub fn list_file_paths(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT path FROM files WHERE source = ?1 ORDER BY path")?;
    let paths = stmt
        .query_map([MEMORY_SOURCE], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(paths)
}

/// Chunks stored for `path`, in line order.
pub fn get_chunks_for_path(conn: &Connection, path: &str) -> Result<Vec<ChunkRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, path, source, start_line, end_line, hash, model, text, embedding, updated_at \
         FROM chunks WHERE path = ?1 AND source = ?2 ORDER BY start_line, end_line",
    )?;
    let rows = stmt
        .query_map(params![path, MEMORY_SOURCE], |row| {
            let blob: Vec<u8> = row.get(8)?;
            Ok(ChunkRecord {
                id: row.get(0)?,
                path: row.get(1)?,
                source: row.get(2)?,
                start_line: row.get::<_, i64>(3)? as usize,
                end_line: row.get::<_, i64>(4)? as usize,
                hash: row.get(5)?,
                model: row.get(6)?,
                text: row.get(7)?,
                embedding: bytes_to_embedding(&blob),
                updated_at: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of memory chunks, regardless of which file they belong to.
pub fn count_chunks(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chunks WHERE source = ?1",
        [MEMORY_SOURCE],
        |r| r.get(0),
    )?;
    Ok(n as u64)
}

/// Atomically replace everything stored for `entry.path` with `chunks`.
///
/// When `cache` is given, every chunk's embedding is also upserted into the
/// embedding cache, refreshing `updated_at` for entries that were reused.
pub fn replace_file(
    conn: &mut Connection,
    caps: Capabilities,
    entry: &FileEntry,
    chunks: &[ChunkRecord],
    cache: Option<&CacheKey>,
) -> Result<ReplaceOutcome> {
    let tx = conn.transaction()?;

    delete_file_rows(&tx, caps, &entry.path)?;
    upsert_file(&tx, entry)?;

    let mut outcome = ReplaceOutcome::default();
    for chunk in chunks {
        insert_chunk(&tx, chunk)?;
        outcome.chunks_written += 1;

        if caps.fts {
            insert_fts(&tx, chunk)?;
        }

        if caps.vector {
            match insert_vec(&tx, &chunk.id, &chunk.embedding) {
                Ok(()) => outcome.vectors_written += 1,
                Err(e) => {
                    tracing::warn!(
                        path = %chunk.path,
                        chunk_id = %chunk.id,
                        dims = chunk.embedding.len(),
                        error = %e,
                        "vector insert failed, chunk kept without vector"
                    );
                    outcome.vectors_skipped += 1;
                }
            }
        }

        if let Some(key) = cache {
            put_cached_embedding(&tx, key, &chunk.hash, &chunk.embedding)?;
        }
    }

    tx.commit()
        .with_context(|| format!("failed to commit index rows for {}", entry.path))?;
    Ok(outcome)
}

/// Remove a path and all rows derived from it. Returns the number of chunks removed.
pub fn remove_file(conn: &mut Connection, caps: Capabilities, path: &str) -> Result<usize> {
    let tx = conn.transaction()?;
    let removed = delete_file_rows(&tx, caps, path)?;
    tx.execute(
        "DELETE FROM files WHERE path = ?1 AND source = ?2",
        params![path, MEMORY_SOURCE],
    )?;
    tx.commit()?;
    Ok(removed)
}

/// Delete every memory-sourced row and rebuild the vector table at `vector_dims`.
///
/// The embedding cache is left alone; its entries are keyed by provider and
/// stay valid across a rebuild.
pub fn reset_memory_index(conn: &mut Connection, caps: Capabilities, vector_dims: usize) -> Result<()> {
    let tx = conn.transaction()?;
    if fts_table_exists(&tx)? {
        tx.execute("DELETE FROM chunks_fts WHERE source = ?1", [MEMORY_SOURCE])?;
    }
    tx.execute("DELETE FROM chunks WHERE source = ?1", [MEMORY_SOURCE])?;
    tx.execute("DELETE FROM files WHERE source = ?1", [MEMORY_SOURCE])?;
    if caps.vector {
        schema::recreate_vector_table(&tx, vector_dims)
            .context("failed to rebuild vector table")?;
    }
    tx.commit()?;
    Ok(())
}

fn delete_file_rows(tx: &Transaction, caps: Capabilities, path: &str) -> Result<usize> {
    if caps.vector {
        let ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM chunks WHERE path = ?1 AND source = ?2")?;
            let ids = stmt
                .query_map(params![path, MEMORY_SOURCE], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        let mut del = tx.prepare("DELETE FROM chunks_vec WHERE id = ?1")?;
        for id in &ids {
            del.execute([id])?;
        }
    }
    // Cleaned even when keyword search is switched off, so the table never
    // holds text for chunks that are gone.
    if caps.fts || fts_table_exists(tx)? {
        tx.execute(
            "DELETE FROM chunks_fts WHERE path = ?1 AND source = ?2",
            params![path, MEMORY_SOURCE],
        )?;
    }
    let removed = tx.execute(
        "DELETE FROM chunks WHERE path = ?1 AND source = ?2",
        params![path, MEMORY_SOURCE],
    )?;
    Ok(removed)
}

fn fts_table_exists(conn: &Connection) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'chunks_fts')",
        [],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn upsert_file(tx: &Transaction, entry: &FileEntry) -> Result<()> {
    tx.execute(
        "INSERT INTO files (path, source, hash, mtime, size) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(path) DO UPDATE SET \
           source = excluded.source, hash = excluded.hash, \
           mtime = excluded.mtime, size = excluded.size",
        params![
            entry.path,
            MEMORY_SOURCE,
            entry.hash,
            entry.mtime_ms,
            entry.size as i64
        ],
    )?;
    Ok(())
}

fn insert_chunk(tx: &Transaction, chunk: &ChunkRecord) -> Result<()> {
    tx.execute(
        "INSERT INTO chunks \
         (id, path, source, start_line, end_line, hash, model, text, embedding, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            chunk.id,
            chunk.path,
            chunk.source,
            chunk.start_line as i64,
            chunk.end_line as i64,
            chunk.hash,
            chunk.model,
            chunk.text,
            embedding_to_bytes(&chunk.embedding),
            chunk.updated_at
        ],
    )?;
    Ok(())
}

fn insert_fts(tx: &Transaction, chunk: &ChunkRecord) -> Result<()> {
    tx.execute(
        "INSERT INTO chunks_fts (text, id, path, source, start_line, end_line) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            chunk.text,
            chunk.id,
            chunk.path,
            chunk.source,
            chunk.start_line as i64,
            chunk.end_line as i64
        ],
    )?;
    Ok(())
}

fn insert_vec(tx: &Transaction, id: &str, embedding: &[f32]) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO chunks_vec (id, embedding) VALUES (?1, ?2)",
        params![id, embedding_to_bytes(embedding)],
    )?;
    Ok(())
}

// ── Embedding cache ──────────────────────────────────────────────────────────

/// Look up cached embeddings for `hashes`. Missing hashes are absent from the map.
pub fn get_cached_embeddings(
    conn: &Connection,
    key: &CacheKey,
    hashes: &[String],
) -> Result<HashMap<String, Vec<f32>>> {
    let mut stmt = conn.prepare(
        "SELECT embedding FROM embedding_cache \
         WHERE provider = ?1 AND model = ?2 AND provider_key = ?3 AND hash = ?4",
    )?;

    let mut found = HashMap::new();
    for hash in hashes {
        if found.contains_key(hash) {
            continue;
        }
        let blob: Option<Vec<u8>> = stmt
            .query_row(
                params![key.provider, key.model, key.provider_key, hash],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(blob) = blob {
            found.insert(hash.clone(), bytes_to_embedding(&blob));
        }
    }
    Ok(found)
}

fn put_cached_embedding(tx: &Transaction, key: &CacheKey, hash: &str, embedding: &[f32]) -> Result<()> {
    tx.execute(
        "INSERT INTO embedding_cache (provider, model, provider_key, hash, embedding, dims, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(provider, model, provider_key, hash) DO UPDATE SET \
           embedding = excluded.embedding, dims = excluded.dims, updated_at = excluded.updated_at",
        params![
            key.provider,
            key.model,
            key.provider_key,
            hash,
            embedding_to_bytes(embedding),
            embedding.len() as i64,
            now_ms()
        ],
    )?;
    Ok(())
}

/// Keep only the `max_entries` most recently used cache entries. Returns the number removed.
pub fn prune_embedding_cache(conn: &Connection, max_entries: usize) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM embedding_cache WHERE rowid IN ( \
           SELECT rowid FROM embedding_cache \
           ORDER BY updated_at DESC, rowid DESC LIMIT -1 OFFSET ?1)",
        [max_entries as i64],
    )?;
    Ok(removed)
}

pub fn count_cached_embeddings(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |r| r.get(0))?;
    Ok(n as u64)
}
