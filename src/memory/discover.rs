//! Memory source discovery and path normalization.
//!
//! A workspace's memory sources are a root note file (`MEMORY.md` or
//! `memory.md`) plus every `.md` file under the `memory/` subtree, plus any
//! configured extra paths. Discovery is read-only and never fails: missing
//! directories simply contribute nothing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Accepted names for the root note file, checked in this order.
pub const ROOT_NOTE_FILES: [&str; 2] = ["MEMORY.md", "memory.md"];

/// Name of the memory subtree under the workspace root.
pub const MEMORY_DIR: &str = "memory";

/// The one text extension recognized as a note.
pub const NOTE_EXTENSION: &str = "md";

/// Normalize a user- or watcher-supplied relative path: `\` becomes `/`, and
/// leading `/` and `./` segments plus a single leading `../` are stripped.
pub fn normalize_rel_path(path: &str) -> String {
    let mut s = path.trim().replace('\\', "/");
    loop {
        if let Some(rest) = s.strip_prefix('/') {
            s = rest.to_string();
        } else if let Some(rest) = s.strip_prefix("./") {
            s = rest.to_string();
        } else {
            break;
        }
    }
    if let Some(rest) = s.strip_prefix("../") {
        s = rest.to_string();
    }
    s
}

/// Whether a workspace-relative path names a memory source.
pub fn is_memory_path(rel: &str) -> bool {
    let rel = normalize_rel_path(rel);
    if ROOT_NOTE_FILES.contains(&rel.as_str()) {
        return true;
    }
    rel.strip_prefix(MEMORY_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| !rest.is_empty() && has_note_extension(Path::new(rest)))
}

pub fn has_note_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(NOTE_EXTENSION))
}

/// Workspace-relative key for `abs`, using `/` separators. Paths outside the
/// workspace keep their full path.
pub fn relative_path(workspace: &Path, abs: &Path) -> String {
    let rel = abs.strip_prefix(workspace).unwrap_or(abs);
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if rel.is_absolute() {
        // Root component renders as "/" and is already a separator.
        joined.replacen("//", "/", 1)
    } else {
        joined
    }
}

/// List every memory source file under `workspace`, deduplicated by real path.
pub fn list_memory_files(workspace: &Path, extra_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    for name in ROOT_NOTE_FILES {
        let path = workspace.join(name);
        if path.is_file() {
            candidates.push(path);
        }
    }

    walk_notes(&workspace.join(MEMORY_DIR), &mut candidates);

    for extra in extra_paths {
        let path = if extra.is_absolute() {
            extra.clone()
        } else {
            workspace.join(extra)
        };
        if path.is_dir() {
            walk_notes(&path, &mut candidates);
        } else if path.is_file() && has_note_extension(&path) {
            candidates.push(path);
        }
    }

    dedupe_by_real_path(candidates)
}

fn walk_notes(dir: &Path, out: &mut Vec<PathBuf>) {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "memory directory does not exist, skipping");
        return;
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        // `is_file` follows symlinks, so linked notes are included.
        if path.is_file() && has_note_extension(path) {
            out.push(path.to_path_buf());
        }
    }
}

/// Keep the first occurrence of each underlying file. A path whose real path
/// cannot be resolved is kept under its own name.
fn dedupe_by_real_path(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| {
            let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            seen.insert(key)
        })
        .collect()
}
