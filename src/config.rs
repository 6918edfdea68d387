// Feature Store Configuration
//
// Defines where the warehouse lives, which cache backend to construct, where
// the lookup API listens and how often batch passes are re-run.

use crate::cache::CacheBackendKind;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::error::FeatureStoreError {
    fn from(err: ConfigError) -> Self {
        crate::error::FeatureStoreError::Config(err.to_string())
    }
}

/// Main feature store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureStoreConfig {
    pub warehouse: WarehouseConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub batch: BatchConfig,
}

/// Warehouse gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// SQLite warehouse database file
    pub path: PathBuf,

    /// Maximum pooled connections
    pub pool_size: usize,

    /// Deadline per warehouse query (in seconds)
    #[serde(with = "serde_duration")]
    pub query_timeout: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data_warehouse.db"),
            pool_size: 4,
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Feature cache backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,

    /// Database file, required for the sqlite backend
    pub path: Option<PathBuf>,
}

/// Lookup API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 4000).into(),
        }
    }
}

/// Batch pass scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Interval between passes after the startup pass (in seconds, 0 disables)
    #[serde(with = "serde_duration")]
    pub refresh_interval: Duration,

    /// Maximum duration of one scheduled pass (in seconds)
    #[serde(with = "serde_duration")]
    pub max_duration: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::ZERO,
            max_duration: Duration::from_secs(1800), // 30 minutes
        }
    }
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl FeatureStoreConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: FeatureStoreConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warehouse.pool_size == 0 || self.warehouse.pool_size > 64 {
            return Err(ConfigError::ValidationError(
                "warehouse: pool_size must be between 1 and 64".to_string(),
            ));
        }

        if self.warehouse.query_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "warehouse: query_timeout must be at least 1 second".to_string(),
            ));
        }

        if self.cache.backend == CacheBackendKind::Sqlite && self.cache.path.is_none() {
            return Err(ConfigError::ValidationError(
                "cache: path is required for the sqlite backend".to_string(),
            ));
        }

        if !self.batch.refresh_interval.is_zero() {
            if self.batch.refresh_interval < Duration::from_secs(60) {
                return Err(ConfigError::ValidationError(
                    "batch: refresh_interval must be 0 or at least 60 seconds".to_string(),
                ));
            }
            if self.batch.max_duration.is_zero() {
                return Err(ConfigError::ValidationError(
                    "batch: max_duration must be at least 1 second".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FeatureStoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert!(config.batch.refresh_interval.is_zero());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = FeatureStoreConfig::from_toml(
            r#"
            [warehouse]
            path = "/var/lib/warehouse.db"

            [batch]
            refresh_interval = 3600
            "#,
        )
        .unwrap();

        assert_eq!(config.warehouse.path, PathBuf::from("/var/lib/warehouse.db"));
        assert_eq!(config.warehouse.pool_size, 4);
        assert_eq!(config.batch.refresh_interval, Duration::from_secs(3600));
        assert_eq!(config.server.addr.port(), 4000);
    }

    #[test]
    fn test_sqlite_backend_requires_path() {
        let result = FeatureStoreConfig::from_toml(
            r#"
            [cache]
            backend = "sqlite"
            "#,
        );
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("path is required for the sqlite backend"));
    }

    #[test]
    fn test_validate_refresh_interval_too_short() {
        let mut config = FeatureStoreConfig::default();
        config.batch.refresh_interval = Duration::from_secs(5);

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("refresh_interval must be 0 or at least 60 seconds"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("feature-store.toml");

        let mut config = FeatureStoreConfig::default();
        config.cache.backend = CacheBackendKind::Sqlite;
        config.cache.path = Some(dir.path().join("cache.db"));
        config.to_file(&path).unwrap();

        let loaded = FeatureStoreConfig::from_file(&path).unwrap();
        assert_eq!(loaded.cache.backend, CacheBackendKind::Sqlite);
        assert_eq!(loaded.cache.path, config.cache.path);
    }
}
