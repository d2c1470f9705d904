//! Configuration loading for the `photosift` binary.
//!
//! Read from `{config_dir}/photosift/config.toml` (or `--config`). A missing
//! file yields the defaults; a malformed or out-of-range one is an error.

use artifact_cache::CacheConfig;
use batch_jobs::JobConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Highest accepted `jobs.workers` override
pub const MAX_WORKERS: usize = 64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub jobs: JobConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.config/photosift/config.toml` on Linux, the platform config dir elsewhere.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photosift")
            .join("config.toml")
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Check configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("cache.thumbnail_capacity_bytes", self.cache.thumbnail_capacity_bytes),
            ("cache.preview_capacity_bytes", self.cache.preview_capacity_bytes),
            ("cache.metadata_capacity_bytes", self.cache.metadata_capacity_bytes),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }
        if self.cache.flush_every == 0 {
            return Err(ConfigError::ValidationError(
                "cache.flush_every must be > 0".into(),
            ));
        }
        if let Some(workers) = self.jobs.workers {
            if !(1..=MAX_WORKERS).contains(&workers) {
                return Err(ConfigError::ValidationError(format!(
                    "jobs.workers must be between 1 and {MAX_WORKERS}"
                )));
            }
        }
        if !self.jobs.blur_threshold.is_finite() || self.jobs.blur_threshold < 0.0 {
            return Err(ConfigError::ValidationError(
                "jobs.blur_threshold must be >= 0".into(),
            ));
        }
        let dimensions = [
            ("jobs.blur_max_dimension", self.jobs.blur_max_dimension),
            ("jobs.preview_max_dimension", self.jobs.preview_max_dimension),
            ("jobs.thumbnail_max_dimension", self.jobs.thumbnail_max_dimension),
        ];
        for (name, value) in dimensions {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }
        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of trace, debug, info, warn, error (got {:?})",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.jobs.blur_threshold, 100.0);
        assert_eq!(config.cache.flush_every, 64);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[jobs]\nworkers = 3\nblur_threshold = 80.0\n\n[logging]\nformat = \"json\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.jobs.workers, Some(3));
        assert_eq!(config.jobs.blur_threshold, 80.0);
        assert_eq!(config.jobs.blur_max_dimension, 640);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[jobs\nworkers = ").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load_from(&dir.path().join("absent.toml")),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.cache.preview_capacity_bytes = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("preview_capacity_bytes"));
    }

    #[test]
    fn test_validate_rejects_worker_override_out_of_range() {
        let mut config = Config::default();
        config.jobs.workers = Some(0);
        assert!(config.validate().is_err());
        config.jobs.workers = Some(MAX_WORKERS + 1);
        assert!(config.validate().is_err());
        config.jobs.workers = Some(MAX_WORKERS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_threshold() {
        let mut config = Config::default();
        config.jobs.blur_threshold = -1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("blur_threshold"));
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let mut config = Config::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_to_toml() {
        let toml = Config::default().to_toml().unwrap();
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("[jobs]"));
        assert!(toml.contains("[logging]"));
    }
}
