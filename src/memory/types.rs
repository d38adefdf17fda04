//! Core record types for the memory index.
//!
//! [`FileEntry`] describes a tracked source file, [`Chunk`] is the transient
//! output of the chunker, [`ChunkRecord`] is what gets persisted, and
//! [`IndexMeta`] records the configuration an index was built with.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Source tag stored on every row this index owns.
pub const MEMORY_SOURCE: &str = "memory";

/// A tracked source file, rebuilt from disk on every sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Workspace-relative path with `/` separators (e.g. `memory/2024-05-01.md`).
    pub path: String,
    pub abs_path: PathBuf,
    /// Modification time in milliseconds since the Unix epoch. Informational only.
    pub mtime_ms: i64,
    pub size: u64,
    /// SHA-256 hex of the file's decoded text. The sole change signal.
    pub hash: String,
}

/// A contiguous, line-aligned slice of a file produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub text: String,
    /// SHA-256 hex of `text`.
    pub hash: String,
}

/// A chunk as stored in the `chunks` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub path: String,
    pub source: String,
    pub start_line: usize,
    pub end_line: usize,
    pub hash: String,
    pub model: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
}

/// The embedding and chunking configuration an index was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub provider: String,
    pub model: String,
    pub provider_key: String,
    pub chunk_tokens: usize,
    pub chunk_overlap: usize,
    /// Width of `chunks_vec`, or `None` when vector search is unavailable.
    pub vector_dims: Option<usize>,
    /// Whether `chunks_fts` was kept in step with `chunks`. Records written
    /// before this field existed read as `false`.
    #[serde(default)]
    pub full_text: bool,
}

/// Progress notification emitted after each per-file decision during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
    pub label: Option<String>,
}

/// Summary of one sync pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub chunks_embedded: usize,
    pub cache_hits: usize,
    /// `true` if the pass started by discarding an index built with a different configuration.
    pub rebuilt: bool,
}
