//! Content hashing and [`FileEntry`] construction for change detection.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

use super::discover::relative_path;
use super::types::FileEntry;

/// SHA-256 hex digest of `text`.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Read a note as text. Invalid UTF-8 is replaced rather than rejected so a
/// stray byte cannot make a file unindexable.
pub fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// Stat, read, and hash one file. Identical bytes always give an identical hash.
pub fn build_file_entry(workspace: &Path, abs_path: &Path) -> Result<FileEntry> {
    read_file_entry(workspace, abs_path).map(|(entry, _)| entry)
}

/// Like [`build_file_entry`], also returning the decoded text so callers that
/// go on to chunk the file read it only once.
pub fn read_file_entry(workspace: &Path, abs_path: &Path) -> Result<(FileEntry, String)> {
    let metadata = std::fs::metadata(abs_path)
        .with_context(|| format!("failed to stat {}", abs_path.display()))?;
    let mtime_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let content = read_text(abs_path)?;

    let entry = FileEntry {
        path: relative_path(workspace, abs_path),
        abs_path: abs_path.to_path_buf(),
        mtime_ms,
        size: metadata.len(),
        hash: hash_text(&content),
    };
    Ok((entry, content))
}
