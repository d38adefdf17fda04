//! CLI `sync` and `reindex` commands.

use anyhow::Result;

use memdex::config::MemdexConfig;
use memdex::memory::manager::ProgressFn;
use memdex::memory::types::SyncReport;

/// Incrementally index the workspace and print a summary.
pub async fn sync(config: &MemdexConfig) -> Result<()> {
    run(config, false).await
}

/// Drop the index and re-embed every memory file.
pub async fn reindex(config: &MemdexConfig) -> Result<()> {
    run(config, true).await
}

async fn run(config: &MemdexConfig, full: bool) -> Result<()> {
    let manager = super::open_manager(config)?;

    println!(
        "{} {} ...",
        if full { "Reindexing" } else { "Syncing" },
        manager.workspace().display()
    );

    let pb = super::progress_bar()?;
    let callback = super::progress_callback(pb.clone());
    let progress: &ProgressFn = &callback;
    let result = if full {
        manager.reindex(Some(progress)).await
    } else {
        manager.sync(Some(progress)).await
    };
    pb.finish_and_clear();

    let report = result?;
    print_report(&report);
    manager.stop().await
}

fn print_report(report: &SyncReport) {
    if report.rebuilt {
        println!("Index rebuilt from scratch.");
    }
    println!("  Indexed:        {}", report.files_indexed);
    println!("  Unchanged:      {}", report.files_unchanged);
    println!("  Removed:        {}", report.files_removed);
    println!("  Failed:         {}", report.files_failed);
    println!("  Chunks embedded: {}", report.chunks_embedded);
    println!("  Cache hits:     {}", report.cache_hits);
}
