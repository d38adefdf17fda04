pub mod doctor;
pub mod search;
pub mod stats;
pub mod sync;
pub mod watch;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use memdex::config::MemdexConfig;
use memdex::embedding;
use memdex::memory::manager::IndexManager;
use memdex::memory::types::SyncProgress;

/// Build the configured provider and open the index.
pub fn open_manager(config: &MemdexConfig) -> Result<IndexManager> {
    let provider = embedding::create_provider(&config.embedding)
        .context("failed to create embedding provider")?;
    IndexManager::open(config.clone(), provider)
}

/// A file-count progress bar. Its length is set from the first progress event.
fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} {wide_msg}")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

/// Adapt a progress bar to the manager's progress callback.
fn progress_callback(pb: ProgressBar) -> impl Fn(SyncProgress) + Send + Sync {
    move |p: SyncProgress| {
        pb.set_length(p.total as u64);
        pb.set_position(p.completed as u64);
        if let Some(label) = p.label {
            pb.set_message(label);
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
