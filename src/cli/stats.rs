use anyhow::Result;

use memdex::config::MemdexConfig;
use memdex::db::{self, migrations};
use memdex::memory::stats::{index_stats, IndexStats};

/// Display index statistics. Reads the database directly, so no embedding
/// provider (or API key) is needed. The database is never created or
/// upgraded here.
pub fn stats(config: &MemdexConfig, json: bool) -> Result<()> {
    let db_path = config.resolved_db_path();
    if !db_path.exists() {
        if json {
            println!("{}", serde_json::to_string_pretty(&IndexStats::default())?);
        } else {
            println!("No index at {}. Run `memdex sync` to build one.", db_path.display());
        }
        return Ok(());
    }

    let conn = db::open_database_read_only(&db_path)?;
    let version = migrations::get_schema_version(&conn)?;
    anyhow::ensure!(
        version >= migrations::CURRENT_SCHEMA_VERSION,
        "index at {} uses schema v{version}; run `memdex sync` to upgrade it",
        db_path.display()
    );
    let stats = index_stats(&conn)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Memory Index Statistics");
    println!("{}", "=".repeat(40));
    println!("  Files:           {}", stats.file_count);
    println!("  Chunks:          {}", stats.chunk_count);
    println!("  Indexed size:    {}", super::format_bytes(stats.total_size_bytes));
    Ok(())
}
