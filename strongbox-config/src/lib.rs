//! Configuration management for Strongbox services

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable holding the comma-separated list of base64 encryption keys
pub const ENCRYPTION_KEY_ENV: &str = "SSO_SECRETS_ENCRYPTION_KEY";

/// Prefix for every other Strongbox setting (`STRONGBOX_STORAGE_ROOT`, ...)
pub const ENV_PREFIX: &str = "STRONGBOX";

/// Name of the folder holding container files, below the external storage folder
pub const SECRETS_FOLDER: &str = "secrets";

/// Configuration errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0} is not set or empty")]
    MissingEncryptionKey(&'static str),
}

/// Secrets service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    /// Server storage root
    pub storage_root: PathBuf,
    /// Sub-folder of the storage root used for external (persistent) data
    pub external_storage: String,
    /// Expiry of the cross-process write lock, in milliseconds
    pub lock_expiry_ms: u64,
    pub log_level: Option<String>,
    /// Emit JSON log lines instead of human-readable console output
    pub log_json: bool,
    /// Raw value of `SSO_SECRETS_ENCRYPTION_KEY`, untouched
    #[serde(skip)]
    pub encryption_keys: Option<String>,
}

impl SecretsConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, SettingsError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .set_default("storage_root", "./storage")?
            .set_default("external_storage", "external-volume")?
            .set_default("lock_expiry_ms", 10_000_i64)?
            .set_default("log_level", "info")?
            .set_default("log_json", false)?
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let mut loaded: SecretsConfig = settings.try_deserialize()?;
        loaded.encryption_keys = env::var(ENCRYPTION_KEY_ENV)
            .ok()
            .filter(|keys| !keys.trim().is_empty());

        Ok(loaded)
    }

    /// Build a configuration for an explicit storage root, without reading the environment
    pub fn for_storage_root(storage_root: impl Into<PathBuf>, encryption_keys: &str) -> Self {
        Self {
            storage_root: storage_root.into(),
            external_storage: "external-volume".to_string(),
            lock_expiry_ms: 10_000,
            log_level: None,
            log_json: false,
            encryption_keys: Some(encryption_keys.to_string()),
        }
    }

    /// Folder holding one encrypted file per container
    pub fn secrets_dir(&self) -> PathBuf {
        self.storage_root
            .join(&self.external_storage)
            .join(SECRETS_FOLDER)
    }

    /// Raw encryption key list, failing when it was never configured
    pub fn encryption_keys(&self) -> Result<&str, SettingsError> {
        self.encryption_keys
            .as_deref()
            .ok_or(SettingsError::MissingEncryptionKey(ENCRYPTION_KEY_ENV))
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_dir_layout() {
        let config = SecretsConfig::for_storage_root("/srv/data", "a2V5");
        assert_eq!(
            config.secrets_dir(),
            PathBuf::from("/srv/data/external-volume/secrets")
        );
    }

    #[test]
    fn test_missing_encryption_keys() {
        let mut config = SecretsConfig::for_storage_root("/srv/data", "a2V5");
        config.encryption_keys = None;
        assert!(matches!(
            config.encryption_keys(),
            Err(SettingsError::MissingEncryptionKey(ENCRYPTION_KEY_ENV))
        ));
        assert_eq!(config.log_level(), "info");
        assert!(!config.log_json);
    }
}
