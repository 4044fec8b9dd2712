use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::uploader::retry::RetryConfig;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunk_size: u64, // bytes, also the direct-upload threshold
    pub max_zip_size: u64,
    pub parallel_uploads: usize,
    pub max_chunk_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub hash_poll_interval_ms: u64,
    pub hash_max_attempts: u32,
    pub progress_poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 100 * MIB,
            max_zip_size: 1024 * MIB,
            parallel_uploads: 3,
            max_chunk_attempts: 3,
            retry_base_delay_ms: 1000,
            hash_poll_interval_ms: 1000,
            hash_max_attempts: 120,
            progress_poll_interval_secs: 5,
            request_timeout_secs: 600,
            log_level: "info".to_string(),
        }
    }
}

/// Tunables of the upload engine, derived from [`Config`] and the command line.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: u64,
    pub max_zip_size: u64,
    pub parallel_uploads: usize,
    pub retry: RetryConfig,
    pub hash_poll_interval: Duration,
    pub hash_max_attempts: u32,
    pub progress_poll_interval: Duration,
    /// Build every request but never send chunk bytes.
    pub dry_run: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Config::default().upload_options(false)
    }
}

impl Config {
    pub fn upload_options(&self, dry_run: bool) -> UploadOptions {
        UploadOptions {
            chunk_size: self.chunk_size,
            max_zip_size: self.max_zip_size,
            parallel_uploads: self.parallel_uploads,
            retry: RetryConfig {
                max_attempts: self.max_chunk_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                ..RetryConfig::default()
            },
            hash_poll_interval: Duration::from_millis(self.hash_poll_interval_ms),
            hash_max_attempts: self.hash_max_attempts,
            progress_poll_interval: Duration::from_secs(self.progress_poll_interval_secs),
            dry_run,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

pub fn default_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("agora-uploader");
    Ok(config_dir.join("config.json"))
}

/// Load the configuration from `path`, or from the default location.
///
/// A missing file yields the defaults. A file that cannot be parsed is
/// reported and replaced by the defaults; a parsed file must pass
/// [`validate_config`].
pub fn load_config(path: Option<&Path>) -> AppResult<Config> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        if path.is_some() {
            return Err(AppError::Config(format!(
                "Config file {} does not exist",
                config_path.display()
            )));
        }
        return Ok(Config::default());
    }

    let config_str = fs::read_to_string(&config_path)?;
    let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        log::warn!(
            "Failed to parse config file {}: {}. Using defaults.",
            config_path.display(),
            e
        );
        Config::default()
    });

    validate_config(&config)?;
    log::debug!("Loaded configuration from {}", config_path.display());
    Ok(config)
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    if config.chunk_size == 0 {
        return Err(AppError::validation("chunk_size", "Must be greater than 0"));
    }

    if config.max_zip_size == 0 {
        return Err(AppError::validation("max_zip_size", "Must be greater than 0"));
    }

    if config.parallel_uploads == 0 || config.parallel_uploads > 32 {
        return Err(AppError::validation(
            "parallel_uploads",
            "Must be between 1 and 32",
        ));
    }

    if config.max_chunk_attempts == 0 || config.max_chunk_attempts > 10 {
        return Err(AppError::validation(
            "max_chunk_attempts",
            "Must be between 1 and 10",
        ));
    }

    if config.hash_max_attempts == 0 {
        return Err(AppError::validation(
            "hash_max_attempts",
            "Must be greater than 0",
        ));
    }

    if config.progress_poll_interval_secs == 0 {
        return Err(AppError::validation(
            "progress_poll_interval_secs",
            "Must be at least 1 second",
        ));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());

        let options = config.upload_options(false);
        assert_eq!(options.chunk_size, 100 * 1024 * 1024);
        assert_eq!(options.max_zip_size, 1024 * 1024 * 1024);
        assert_eq!(options.parallel_uploads, 3);
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.progress_poll_interval, Duration::from_secs(5));
        assert!(!options.dry_run);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.chunk_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.parallel_uploads = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"chunk_size": 1048576, "log_level": "debug"}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.parallel_uploads, 3);
        assert_eq!(config.log_level_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_load_unparsable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.chunk_size, Config::default().chunk_size);
    }

    #[test]
    fn test_load_missing_explicit_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
