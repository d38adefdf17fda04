use anyhow::Result;

use memdex::config::MemdexConfig;

/// Run a one-shot search from the terminal.
pub async fn search(config: &MemdexConfig, query: &str, top_k: Option<usize>, keyword: bool, json: bool) -> Result<()> {
    let manager = super::open_manager(config)?;
    let top_k = top_k.unwrap_or(config.search.max_results);

    let results = if keyword {
        manager.keyword_search(query, top_k).await
    } else {
        manager.search(query, top_k).await
    };
    manager.stop().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", results.len());
    for (i, result) in results.iter().enumerate() {
        println!(
            "  {}. {}:{}-{} (score: {:.4})",
            i + 1,
            result.path,
            result.start_line,
            result.end_line,
            result.score
        );
        for line in result.snippet.lines().take(6) {
            println!("     {line}");
        }
        println!();
    }

    Ok(())
}
