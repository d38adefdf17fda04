use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

use super::types::MEMORY_SOURCE;

/// Aggregate counts for the memory source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub file_count: u64,
    pub chunk_count: u64,
    /// Sum of tracked file sizes as last indexed.
    pub total_size_bytes: u64,
}

/// Count files, chunks, and bytes belonging to the memory source.
pub fn index_stats(conn: &Connection) -> Result<IndexStats> {
    let (file_count, total_size): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files WHERE source = ?1",
        [MEMORY_SOURCE],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let chunk_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chunks WHERE source = ?1",
        [MEMORY_SOURCE],
        |r| r.get(0),
    )?;

    Ok(IndexStats {
        file_count: file_count as u64,
        chunk_count: chunk_count as u64,
        total_size_bytes: total_size as u64,
    })
}
