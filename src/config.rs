//! Runner configuration
//!
//! [`TidemarkConfig`] is read from `config/tidemark.toml` (optional) and
//! overlaid by `TIDEMARK__*` environment variables, e.g.
//! `TIDEMARK__MIGRATION_KEY=orders` or `TIDEMARK__FILE_EXTENSIONS=yml,json`.

use crate::migration::file::{DEFAULT_FILE_EXTENSIONS, DEFAULT_MIGRATIONS_DIR};
use crate::migration::state_index::DEFAULT_HISTORY_INDEX;
use config::{Config, ConfigError, Environment, File};
use log::warn;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config/tidemark.toml";

const ENV_PREFIX: &str = "TIDEMARK";

#[derive(Debug, Clone, Deserialize)]
pub struct TidemarkConfig {
    /// When false, startup migrations are skipped
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub migration_key: String,
    #[serde(default)]
    pub migration_user: Option<String>,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_lock_idle_millis")]
    pub lock_idle_millis: u64,
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_history_index")]
    pub history_index: String,
    #[serde(default = "default_file_extensions")]
    pub file_extensions: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MIGRATIONS_DIR)
}

fn default_lock_idle_millis() -> u64 {
    100
}

fn default_lock_timeout_seconds() -> u64 {
    300 // five minutes per migration
}

fn default_request_timeout_seconds() -> u64 {
    60
}

fn default_history_index() -> String {
    DEFAULT_HISTORY_INDEX.to_string()
}

fn default_file_extensions() -> Vec<String> {
    DEFAULT_FILE_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

impl Default for TidemarkConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            url: default_url(),
            migration_key: String::new(),
            migration_user: None,
            migrations_dir: default_migrations_dir(),
            username: None,
            password: None,
            lock_idle_millis: default_lock_idle_millis(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
            history_index: default_history_index(),
            file_extensions: default_file_extensions(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("file_extensions")
}

impl TidemarkConfig {
    /// Load from `config/tidemark.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from `path` (optional) overlaid by environment variables, then validate
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read_from(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load_from`](Self::load_from) without validation, for callers that
    /// apply overrides first
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let builder = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(environment());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // a present but unreadable file is reported, then env is tried alone
                if path.exists() {
                    warn!("Failed to load config file {}, falling back to env: {}", path.display(), err);
                }
                Config::builder().add_source(environment()).build().map_err(|env_err| {
                    ConfigError::Message(format!(
                        "Failed to load configuration from file and env: {}, then env-only error: {}",
                        err, env_err
                    ))
                })?
            }
        };

        let config: TidemarkConfig = settings.try_deserialize().map_err(|e| {
            ConfigError::Message(format!(
                "Tidemark configuration could not be loaded from file or environment: {}",
                e
            ))
        })?;

        Ok(config)
    }

    /// Reject settings the runner cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.migration_key.trim().is_empty() {
            return Err(ConfigError::Message("migration_key must be set and non-empty".to_string()));
        }
        if self.file_extensions.iter().all(|e| e.trim().trim_start_matches('.').is_empty()) {
            return Err(ConfigError::Message("file_extensions must name at least one extension".to_string()));
        }
        if self.lock_idle_millis == 0 {
            return Err(ConfigError::Message("lock_idle_millis must be positive".to_string()));
        }
        Ok(())
    }

    pub fn lock_idle(&self) -> Duration {
        Duration::from_millis(self.lock_idle_millis)
    }

    /// Values past the clock's range wait without a deadline
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TidemarkConfig::default();
        assert!(config.enabled);
        assert_eq!(config.url, "http://localhost:9200");
        assert_eq!(config.migrations_dir, PathBuf::from("es.migration"));
        assert_eq!(config.history_index, ".tidemark");
        assert_eq!(config.lock_idle(), Duration::from_millis(100));
        assert_eq!(config.lock_timeout(), Duration::from_secs(300));
        assert_eq!(config.file_extensions, vec!["yml".to_string(), "yaml".to_string()]);
    }

    #[test]
    fn test_validate_requires_migration_key() {
        let config = TidemarkConfig::default();
        assert!(config.validate().is_err());

        let config = TidemarkConfig {
            migration_key: "orders".to_string(),
            ..TidemarkConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_idle_and_no_extensions() {
        let base = TidemarkConfig {
            migration_key: "orders".to_string(),
            ..TidemarkConfig::default()
        };

        let zero_idle = TidemarkConfig {
            lock_idle_millis: 0,
            ..base.clone()
        };
        assert!(zero_idle.validate().is_err());

        let no_extensions = TidemarkConfig {
            file_extensions: Vec::new(),
            ..base.clone()
        };
        assert!(no_extensions.validate().is_err());

        let blank_extensions = TidemarkConfig {
            file_extensions: vec![String::new(), ".".to_string()],
            ..base
        };
        assert!(blank_extensions.validate().is_err());
    }

    #[test]
    fn test_huge_lock_timeout_is_valid() {
        let config = TidemarkConfig {
            migration_key: "orders".to_string(),
            lock_timeout_seconds: u64::MAX,
            ..TidemarkConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_timeout(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tidemark.toml");
        fs::write(
            &path,
            r#"
url = "http://search.internal:9200"
migration_key = "catalog"
migration_user = "deployer"
migrations_dir = "db/es"
lock_timeout_seconds = 30
file_extensions = ["yml"]
"#,
        )
        .unwrap();

        let config = TidemarkConfig::load_from(&path).unwrap();
        assert_eq!(config.url, "http://search.internal:9200");
        assert_eq!(config.migration_key, "catalog");
        assert_eq!(config.migration_user.as_deref(), Some("deployer"));
        assert_eq!(config.migrations_dir, PathBuf::from("db/es"));
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.file_extensions, vec!["yml".to_string()]);
        assert_eq!(config.lock_idle_millis, 100);
    }

    #[test]
    fn test_load_from_file_without_key_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tidemark.toml");
        fs::write(&path, "url = \"http://localhost:9200\"\n").unwrap();

        assert!(TidemarkConfig::load_from(&path).is_err());
    }
}
