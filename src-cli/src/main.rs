//! photosift - triage large photo folders from the command line.
//!
//! Thumbnails, previews and metadata are cached on disk across runs; the
//! analysis commands run on a bounded worker pool and store their findings
//! in a per-folder annotation database.
//!
//! # Usage
//!
//! ```bash
//! # Warm the thumbnail cache for a folder
//! photosift scan ~/Pictures/2024-wedding
//!
//! # Score sharpness, then report which image to look at after hiding blurry ones
//! photosift blur ~/Pictures/2024-wedding --anchor ~/Pictures/2024-wedding/DSC_0412.NEF
//!
//! # Rate two keepers, then straighten sideways shots in place
//! photosift rate ~/Pictures/2024-wedding --stars 5 DSC_0412.NEF DSC_0413.NEF
//! photosift rotation ~/Pictures/2024-wedding --apply
//!
//! # Cache maintenance
//! photosift cache stats
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;
mod config;
mod logging;

use config::Config;

/// photosift - cached previews and background analysis for photo libraries.
#[derive(Parser, Debug)]
#[command(name = "photosift")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Worker pool size for batch jobs
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Purge all caches before running
    #[arg(long, global = true)]
    clear_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate thumbnails for every image in a folder
    Scan(cli::jobs::FolderArgs),

    /// Read star ratings and colour labels from XMP metadata
    Ratings(cli::jobs::FolderArgs),

    /// Score sharpness and flag blurry images
    Blur(cli::jobs::BlurArgs),

    /// Suggest rotations for sideways or upside-down images, optionally applying them
    Rotation(cli::jobs::RotationArgs),

    /// Write a star rating into image files
    Rate(cli::jobs::RateArgs),

    /// Write a colour label into image files
    Label(cli::jobs::LabelArgs),

    /// Group visually similar images
    Similar(cli::jobs::SimilarArgs),

    /// Inspect or clear the artifact caches
    Cache(cli::cache::CacheArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(workers) = cli.workers {
        config.jobs.workers = Some(workers);
    }
    if cli.clear_cache {
        config.cache.clear_on_start = true;
    }
    config.validate()?;

    logging::init_from_config(&config.logging, cli.verbose, cli.json_logs);
    tracing::debug!("photosift v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Scan(args) => cli::jobs::scan(&config, args),
        Commands::Ratings(args) => cli::jobs::ratings(&config, args),
        Commands::Blur(args) => cli::jobs::blur(&config, args),
        Commands::Rotation(args) => cli::jobs::rotation(&config, args),
        Commands::Rate(args) => cli::jobs::rate(&config, args),
        Commands::Label(args) => cli::jobs::label(&config, args),
        Commands::Similar(args) => cli::jobs::similar(&config, args),
        Commands::Cache(args) => cli::cache::execute(&config, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let parsed = Cli::try_parse_from([
            "photosift", "blur", "/photos", "--threshold", "50", "--workers", "2", "--clear-cache",
        ])
        .unwrap();
        assert_eq!(parsed.workers, Some(2));
        assert!(parsed.clear_cache);
        match parsed.command {
            Commands::Blur(args) => {
                assert_eq!(args.folder.dir, PathBuf::from("/photos"));
                assert_eq!(args.threshold, Some(50.0));
                assert!(args.anchor.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rate_needs_stars_or_clear() {
        let parsed = Cli::try_parse_from(["photosift", "rate", "/photos", "--stars", "4", "a.jpg", "b.jpg"])
            .unwrap();
        match parsed.command {
            Commands::Rate(args) => {
                assert_eq!(args.stars, Some(4));
                assert_eq!(args.files.len(), 2);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["photosift", "rate", "/photos", "a.jpg"]).is_err());
        assert!(Cli::try_parse_from(["photosift", "rate", "/photos", "--stars", "6", "a.jpg"]).is_err());
        assert!(
            Cli::try_parse_from(["photosift", "label", "/photos", "--label", "Red", "--clear", "a.jpg"])
                .is_err()
        );
    }

    #[test]
    fn test_rotation_anchor_requires_apply() {
        assert!(Cli::try_parse_from(["photosift", "rotation", "/photos", "--anchor", "/photos/a.jpg"]).is_err());
        let parsed =
            Cli::try_parse_from(["photosift", "rotation", "/photos", "--apply", "--anchor", "/photos/a.jpg"])
                .unwrap();
        assert!(matches!(parsed.command, Commands::Rotation(args) if args.apply));
    }

    #[test]
    fn test_cache_subcommands() {
        let parsed = Cli::try_parse_from(["photosift", "cache", "clear"]).unwrap();
        assert!(matches!(
            parsed.command,
            Commands::Cache(cli::cache::CacheArgs {
                command: cli::cache::CacheCommand::Clear
            })
        ));
    }
}
