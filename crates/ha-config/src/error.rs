//! Error types for configuration loading and validation

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::schema::SchemaError;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Secret not defined in any secrets.yaml up to the config directory
    #[error("secret '{key}' not defined")]
    SecretNotFound { key: String },

    /// Secrets file exists but is not a mapping
    #[error("secrets file {path} is not a dictionary")]
    InvalidSecretsFile { path: PathBuf },

    /// `!secret` used in a file outside the config directory
    #[error("secrets can only be used inside the config directory, not in {path}")]
    SecretOutsideConfigDir { path: PathBuf },

    /// Invalid include path
    #[error("invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    /// Directory not found for include_dir_*
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// Circular include detected
    #[error("circular include detected: {path}")]
    CircularInclude { path: PathBuf },

    /// Environment variable not found
    #[error("environment variable '{var}' not set")]
    EnvVarNotFound { var: String },

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// The root of a configuration file is not a mapping
    #[error("The configuration file {file} does not contain a dictionary")]
    NotAMapping { file: String },

    /// Schema validation failed
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Integration configuration could not be validated
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),

    /// A blocking task was cancelled or panicked
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Translatable error raised when integration configuration is invalid
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConfigValidationError {
    pub message: String,
    pub translation_domain: String,
    pub translation_key: String,
    pub translation_placeholders: BTreeMap<String, String>,
}

impl ConfigValidationError {
    pub fn new(message: impl Into<String>, translation_key: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            translation_domain: ha_core::DOMAIN.to_string(),
            translation_key: translation_key.into(),
            translation_placeholders: BTreeMap::new(),
        }
    }

    pub fn with_placeholder(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.translation_placeholders.insert(key.into(), value.into());
        self
    }
}
