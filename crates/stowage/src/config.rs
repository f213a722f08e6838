//! Configuration for the store manager.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_store::{DirectoryMedium, MemoryMedium, StorageMedium, DEFAULT_BUSY_TIMEOUT};

use crate::error::{Result, StowageError};

/// Longest accepted logical store name.
pub const MAX_NAME_LEN: usize = 64;

/// Deployment environment. Development stores never share storage with
/// production ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

/// Configuration for a [`StoreManager`](crate::StoreManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one database file per store; `None` keeps stores
    /// in memory.
    pub data_dir: Option<PathBuf>,
    pub environment: Environment,
    /// Log every executed statement at debug level.
    pub log_statements: bool,
    /// SQLite busy timeout for file-backed stores.
    pub busy_timeout: Duration,
    /// How long `get_store` waits before giving up with `Timeout`.
    pub init_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            environment: Environment::Production,
            log_statements: false,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            init_timeout: None,
        }
    }
}

impl StoreConfig {
    /// In-memory stores.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed stores under `data_dir`.
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    /// Switch environment; development also turns on statement logging.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self.log_statements = environment == Environment::Development;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    pub fn with_log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Storage key for a logical store name.
    ///
    /// Development stores get a `-dev` suffix, which logical names may not
    /// end with themselves.
    pub fn storage_key(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        Ok(match self.environment {
            Environment::Development => format!("{}{}", name, DEV_SUFFIX),
            Environment::Production => name.to_string(),
        })
    }

    /// Build the medium this configuration describes.
    pub(crate) fn medium(&self) -> Arc<dyn StorageMedium> {
        match &self.data_dir {
            Some(dir) => Arc::new(DirectoryMedium::new(dir).with_busy_timeout(self.busy_timeout)),
            None => Arc::new(MemoryMedium::new()),
        }
    }
}

const DEV_SUFFIX: &str = "-dev";

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !name.to_ascii_lowercase().ends_with(DEV_SUFFIX);

    if valid {
        Ok(())
    } else {
        Err(StowageError::InvalidStoreName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_by_environment() {
        let prod = StoreConfig::in_memory();
        assert_eq!(prod.storage_key("contacts").unwrap(), "contacts");

        let dev = StoreConfig::in_memory().with_environment(Environment::Development);
        assert_eq!(dev.storage_key("contacts").unwrap(), "contacts-dev");
        assert!(dev.log_statements);
    }

    #[test]
    fn test_rejects_bad_names() {
        let config = StoreConfig::default();
        let long = "x".repeat(MAX_NAME_LEN + 1);
        for bad in ["", "../etc", "a b", "name.db", long.as_str()] {
            assert!(matches!(
                config.storage_key(bad),
                Err(StowageError::InvalidStoreName(_))
            ));
        }
        assert!(config.storage_key("remix-contacts_2").is_ok());
    }

    #[test]
    fn test_environments_cannot_share_a_key() {
        let prod = StoreConfig::in_memory();
        let dev = StoreConfig::in_memory().with_environment(Environment::Development);

        for reserved in ["contacts-dev", "contacts-DEV", "-dev"] {
            assert!(matches!(
                prod.storage_key(reserved),
                Err(StowageError::InvalidStoreName(_))
            ));
            assert!(matches!(
                dev.storage_key(reserved),
                Err(StowageError::InvalidStoreName(_))
            ));
        }
        assert_ne!(
            prod.storage_key("contacts-devices").unwrap(),
            dev.storage_key("contacts").unwrap()
        );
        assert_eq!(dev.storage_key("dev").unwrap(), "dev-dev");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"data_dir": "/tmp/stores", "environment": "development"}"#)
                .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/stores")));
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.busy_timeout, DEFAULT_BUSY_TIMEOUT);
        assert!(config.init_timeout.is_none());
    }
}
