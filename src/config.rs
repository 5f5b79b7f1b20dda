//! Configuration module
//!
//! Reads `AppConfig` from a TOML file. Every section and field has a
//! default, so a partial file (or none) is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::transaction::SwallowedFailurePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Default config location: `~/.config/nested-tx/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nested-tx")
        .join("config.toml")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseSection,
    pub logging: LoggingConfig,
    pub transaction: TransactionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// SeaORM connection URL
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite://./nested_tx.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
    /// Write to daily files in this directory instead of stdout
    pub directory: Option<PathBuf>,
    /// File name prefix for daily files
    pub prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
            prefix: "nested-tx-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSection {
    pub swallowed_failure: SwallowedFailurePolicy,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `DATABASE_URL` on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.database.url = url;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg.database.url, "sqlite://./nested_tx.db?mode=rwc");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        assert!(cfg.logging.directory.is_none());
        assert_eq!(
            cfg.transaction.swallowed_failure,
            SwallowedFailurePolicy::Reject
        );
    }

    #[test]
    fn test_full_file() {
        let cfg = AppConfig::parse(
            r#"
            [database]
            url = "sqlite::memory:"

            [logging]
            level = "debug"
            format = "json"
            directory = "/var/log/nested-tx/"
            prefix = "app-"

            [transaction]
            swallowed_failure = "allow"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.database.url, "sqlite::memory:");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(
            cfg.logging.directory.as_deref(),
            Some(Path::new("/var/log/nested-tx/"))
        );
        assert_eq!(cfg.logging.prefix, "app-");
        assert_eq!(
            cfg.transaction.swallowed_failure,
            SwallowedFailurePolicy::Allow
        );
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let result = AppConfig::parse("[transaction]\nswallowed_failure = \"maybe\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let path = Path::new("/definitely/not/here/config.toml");
        match AppConfig::load(path) {
            Err(ConfigError::Io { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected Io error, got {:?}", other),
        }
    }
}
