//! CLI `watch` command: sync, then keep the index current until Ctrl-C.

use anyhow::{Context, Result};

use memdex::config::MemdexConfig;

pub async fn watch(config: &MemdexConfig) -> Result<()> {
    let mut config = config.clone();
    config.sync.on_start = true;
    config.sync.watch = true;

    let manager = super::open_manager(&config)?;
    manager.start().await?;

    let stats = manager.stats().await;
    println!(
        "Watching {} ({} files, {} chunks). Press Ctrl-C to stop.",
        manager.workspace().display(),
        stats.file_count,
        stats.chunk_count
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    println!("Stopping...");
    manager.stop().await
}
