//! The `photosift cache` command.

use crate::config::Config;
use artifact_cache::ArtifactPipeline;
use clap::{Args, Subcommand};

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Show entry counts and usage for each cache
    Stats,

    /// Delete every cached artifact
    Clear,
}

pub fn execute(config: &Config, args: CacheArgs) -> anyhow::Result<()> {
    let pipeline = ArtifactPipeline::with_default_decoder(&config.cache)?;

    match args.command {
        CacheCommand::Stats => {
            println!("Cache root: {}", config.cache.cache_dir.display());
            for stats in pipeline.stats() {
                println!(
                    "{:<10} {:>7} entries {:>10} / {:>10} ({:.1}%)",
                    stats.kind.to_string(),
                    stats.entry_count,
                    format_bytes(stats.size_bytes),
                    format_bytes(stats.capacity_bytes),
                    stats.usage_percent()
                );
            }
        }

        CacheCommand::Clear => {
            let removed = pipeline.clear_all()?;
            tracing::info!("Cleared {} cached artifacts", removed);
            println!("Removed {} cached artifacts", removed);
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(512 * 1024 * 1024), "512.0 MiB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0 GiB");
    }
}
