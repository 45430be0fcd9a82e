//! Cache CLI commands

use anyhow::Result;
use clap::Subcommand;

use super::output::Output;
use crate::storage::{Config, DiskCache};

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache location and contents
    Status,

    /// Remove every cached artifact
    Clear,
}

pub fn run(cmd: &CacheCommands, config: &Config, output: &Output) -> Result<()> {
    let cache = DiskCache::new(config.cache_dir()?);
    match cmd {
        CacheCommands::Status => status(&cache, output),
        CacheCommands::Clear => clear(&cache, output),
    }
}

fn status(cache: &DiskCache, output: &Output) -> Result<()> {
    let stats = cache.stats()?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "path": cache.root().display().to_string(),
            "artifacts": stats.artifacts,
            "temporaries": stats.temporaries,
            "bytes": stats.bytes,
        }));
    } else {
        println!("Cache Status");
        println!("{}", "=".repeat(40));
        println!("Path: {}", cache.root().display());
        println!("Artifacts: {}", stats.artifacts);
        println!("Size: {}", format_bytes(stats.bytes));

        if stats.temporaries > 0 {
            println!();
            println!(
                "{} unfinished conversion file(s); run 'dcmview cache clear' to remove them.",
                stats.temporaries
            );
        }
    }

    Ok(())
}

fn clear(cache: &DiskCache, output: &Output) -> Result<()> {
    output.verbose_ctx("cache", &format!("Clearing {}", cache.root().display()));
    let removed = cache.clear()?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "cleared": true,
            "removed": removed,
        }));
    } else {
        output.success(&format!("Removed {} cached file(s)", removed));
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
