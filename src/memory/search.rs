//! Read path: nearest-neighbor and keyword lookups over stored chunks.
//!
//! Vector search asks sqlite-vec for the `k` nearest chunk ids, then joins back
//! to `chunks` for text and location. Distances are L2 and map to a similarity
//! via `1 / (1 + distance)`, which lies in `(0, 1]` and falls as distance grows.
//! Keyword search goes through FTS5 and maps its BM25 rank onto `[0, 1)`.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

use super::embedding_to_bytes;
use super::types::MEMORY_SOURCE;

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub path: String,
    pub source: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f64,
    pub snippet: String,
}

/// Post-query filtering applied to both search modes.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_score: f64,
    pub snippet_max_chars: usize,
}

/// Similarity for an L2 distance. Negative or NaN distances are treated as zero.
pub fn distance_to_score(distance: f64) -> f64 {
    let d = if distance.is_nan() { 0.0 } else { distance.max(0.0) };
    1.0 / (1.0 + d)
}

/// Similarity for an FTS5 BM25 rank, where more negative means more relevant.
pub fn rank_to_score(rank: f64) -> f64 {
    let relevance = if rank.is_finite() { (-rank).max(0.0) } else { 0.0 };
    relevance / (1.0 + relevance)
}

/// K-nearest-neighbor search over `chunks_vec`.
///
/// Results come back in ascending distance, so scores are non-increasing.
/// Vector rows whose chunk no longer exists are skipped.
pub fn vector_search(conn: &Connection, query: &[f32], opts: SearchOptions) -> Result<Vec<SearchResult>> {
    if opts.limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT id, distance FROM chunks_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let hits: Vec<(String, f64)> = stmt
        .query_map(params![embedding_to_bytes(query), opts.limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    let rows = fetch_chunks(conn, &ids)?;

    let results = hits
        .iter()
        .filter_map(|(id, distance)| {
            let row = rows.get(id)?;
            Some(row.to_result(distance_to_score(*distance), opts.snippet_max_chars))
        })
        .filter(|r| r.score >= opts.min_score)
        .collect();
    Ok(results)
}

/// BM25 keyword search over `chunks_fts`. An empty query matches nothing.
///
/// Matches are joined back to `chunks` like vector hits, so a full-text row
/// whose chunk is gone never surfaces.
pub fn keyword_search(conn: &Connection, query: &str, opts: SearchOptions) -> Result<Vec<SearchResult>> {
    let fts_query = escape_fts_query(query);
    if fts_query.is_empty() || opts.limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT id, rank FROM chunks_fts \
         WHERE chunks_fts MATCH ?1 AND source = ?2 ORDER BY rank LIMIT ?3",
    )?;
    let hits: Vec<(String, f64)> = stmt
        .query_map(params![fts_query, MEMORY_SOURCE, opts.limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    let rows = fetch_chunks(conn, &ids)?;

    let results = hits
        .iter()
        .filter_map(|(id, rank)| {
            let row = rows.get(id)?;
            Some(row.to_result(rank_to_score(*rank), opts.snippet_max_chars))
        })
        .filter(|r| r.score >= opts.min_score)
        .collect();
    Ok(results)
}

/// Quote each whitespace-separated term so user text is never parsed as FTS5
/// syntax. Terms are implicitly ANDed.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.replace('"', ""))
        .filter(|word| !word.is_empty())
        .map(|word| format!("\"{word}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

struct ChunkRow {
    id: String,
    path: String,
    source: String,
    start_line: usize,
    end_line: usize,
    text: String,
}

impl ChunkRow {
    fn to_result(&self, score: f64, snippet_max_chars: usize) -> SearchResult {
        SearchResult {
            id: self.id.clone(),
            path: self.path.clone(),
            source: self.source.clone(),
            start_line: self.start_line,
            end_line: self.end_line,
            score,
            snippet: truncate_snippet(&self.text, snippet_max_chars),
        }
    }
}

/// Batch-fetch memory chunks by id.
fn fetch_chunks(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, ChunkRow>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT id, path, source, start_line, end_line, text FROM chunks \
         WHERE source = ?1 AND id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;

    let mut bound: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(ids.len() + 1);
    bound.push(&MEMORY_SOURCE);
    bound.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

    let rows = stmt
        .query_map(bound.as_slice(), |row| {
            Ok(ChunkRow {
                id: row.get(0)?,
                path: row.get(1)?,
                source: row.get(2)?,
                start_line: row.get::<_, i64>(3)? as usize,
                end_line: row.get::<_, i64>(4)? as usize,
                text: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(|r| (r.id.clone(), r)).collect())
}

/// Cut `text` to at most `max_chars` characters, appending `...` when cut.
/// A limit of zero disables truncation.
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
