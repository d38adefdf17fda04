//! CLI `doctor` command: capabilities, schema, configuration drift, and integrity.

use anyhow::{Context, Result};

use memdex::config::MemdexConfig;
use memdex::db::{self, migrations, StoreOptions};
use memdex::memory::types::IndexMeta;

pub(crate) fn store_options(config: &MemdexConfig) -> StoreOptions {
    StoreOptions {
        vector_enabled: config.index.vector_enabled,
        fts_enabled: config.index.fts_enabled,
        vector_dims: config.embedding.dimensions,
    }
}

/// Run diagnostics and print a health report.
pub async fn doctor(config: &MemdexConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `memdex sync` to build the index.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!("Memdex Health Report");
    println!("====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", super::format_bytes(file_size));
    println!("Workspace:         {}", config.resolved_workspace().display());

    // The provider needs an API key; diagnostics should still run without one.
    match super::open_manager(config) {
        Ok(manager) => {
            let status = manager.status().await?;
            let report = manager.health().await?;
            manager.stop().await?;

            println!("Schema version:    {}", status.schema_version);
            println!(
                "sqlite-vec:        {}",
                report.sqlite_vec_version.as_deref().unwrap_or("(unavailable)")
            );
            println!("Vector search:     {}", on_off(status.capabilities.vector));
            println!("Keyword search:    {}", on_off(status.capabilities.fts));
            println!();
            print_meta(status.stored_meta.as_ref(), &status.expected_meta);
            if status.drifted {
                println!("  WARNING: configuration changed; the next sync will rebuild the index.");
            } else if status.stored_meta.is_some() {
                println!("  Status:          OK (match)");
            }
            print_counts(report.file_count, report.chunk_count, report.cache_count);
            print_integrity(report.integrity_ok, &report.integrity_details);
        }
        Err(e) => {
            println!("Embedding provider: ERROR ({e:#})");
            let (conn, caps) = db::open_database(&db_path, store_options(config))
                .context("failed to open database (may be corrupt)")?;
            let report = db::check_database_health(&conn).context("failed to run health check")?;
            let stored = migrations::get_index_meta(&conn)?;

            println!("Schema version:    {}", report.schema_version);
            println!("Vector search:     {}", on_off(caps.vector));
            println!("Keyword search:    {}", on_off(caps.fts));
            println!();
            println!("Index built with:");
            println!("  {}", describe(stored.as_ref()));
            print_counts(report.file_count, report.chunk_count, report.cache_count);
            print_integrity(report.integrity_ok, &report.integrity_details);
        }
    }

    Ok(())
}

fn print_meta(stored: Option<&IndexMeta>, expected: &IndexMeta) {
    println!("Embedding:");
    println!("  Stored:          {}", describe(stored));
    println!("  Configured:      {}", describe(Some(expected)));
}

fn describe(meta: Option<&IndexMeta>) -> String {
    match meta {
        Some(m) => format!(
            "{}/{} (chunks {}+{}, dims {}, full-text {})",
            m.provider,
            m.model,
            m.chunk_tokens,
            m.chunk_overlap,
            m.vector_dims.map_or_else(|| "-".to_string(), |d| d.to_string()),
            if m.full_text { "on" } else { "off" }
        ),
        None => "(not set)".to_string(),
    }
}

fn print_counts(files: u64, chunks: u64, cached: u64) {
    println!();
    println!("Row counts:");
    println!("  Files:           {files}");
    println!("  Chunks:          {chunks}");
    println!("  Cached vectors:  {cached}");
    println!();
}

fn print_integrity(ok: bool, details: &str) {
    if ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({details})");
        println!();
        println!("Recovery: delete the database file and run `memdex reindex`.");
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "available"
    } else {
        "unavailable (degraded)"
    }
}
