//! Secrets lookup for Home Assistant configuration
//!
//! A `!secret` is resolved from the `secrets.yaml` next to the file that
//! requests it, then from each parent directory up to the configuration
//! root. Secrets files are read lazily and cached per directory.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Name of the secrets file
pub const SECRET_YAML: &str = "secrets.yaml";

/// Secrets store rooted at the configuration directory
#[derive(Debug, Clone)]
pub struct Secrets {
    config_dir: PathBuf,
    /// Parsed secrets per directory; missing files cache as empty
    cache: HashMap<PathBuf, Mapping>,
    /// Set by `logger: debug` in a secrets file
    log_lookups: bool,
}

impl Secrets {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            cache: HashMap::new(),
            log_lookups: false,
        }
    }

    /// Resolve `key` for a file located at `requester`
    pub fn get(&mut self, requester: &Path, key: &str) -> ConfigResult<Value> {
        if !requester.starts_with(&self.config_dir) {
            return Err(ConfigError::SecretOutsideConfigDir {
                path: requester.to_path_buf(),
            });
        }

        let mut dir = requester.parent();
        while let Some(current) = dir {
            if !current.starts_with(&self.config_dir) {
                break;
            }

            let secrets = self.load_dir(current)?;
            if let Some(value) = secrets.get(key) {
                let value = value.clone();
                if self.log_lookups {
                    debug!("Secret {} retrieved from secrets.yaml in folder {:?}", key, current);
                }
                return Ok(value);
            }

            dir = current.parent();
        }

        Err(ConfigError::SecretNotFound {
            key: key.to_string(),
        })
    }

    fn load_dir(&mut self, dir: &Path) -> ConfigResult<&Mapping> {
        if !self.cache.contains_key(dir) {
            let secrets = self.read_file(&dir.join(SECRET_YAML))?;
            self.cache.insert(dir.to_path_buf(), secrets);
        }
        Ok(&self.cache[dir])
    }

    fn read_file(&mut self, path: &Path) -> ConfigResult<Mapping> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Mapping::new()),
            Err(e) => {
                return Err(ConfigError::ReadFile {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let value: Value = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut secrets = match value {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            _ => {
                return Err(ConfigError::InvalidSecretsFile {
                    path: path.to_path_buf(),
                })
            }
        };

        if let Some(logger) = secrets.remove("logger") {
            let level = match &logger {
                Value::String(s) => s.to_lowercase(),
                other => crate::annotation::key_to_string(other).to_lowercase(),
            };
            if level == "debug" {
                self.log_lookups = true;
            } else {
                error!(
                    "Error in secrets.yaml: 'logger: debug' expected, but 'logger: {}' found",
                    level
                );
            }
        }

        debug!("Loaded {} secrets from {:?}", secrets.len(), path);
        Ok(secrets)
    }

    /// The configuration root
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Whether a secrets file enabled lookup logging
    pub fn log_lookups(&self) -> bool {
        self.log_lookups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_secrets_file(dir: &Path, content: &str) {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(SECRET_YAML);
        let mut file = fs::File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_secrets() {
        let dir = TempDir::new().unwrap();
        create_secrets_file(
            dir.path(),
            r#"
api_key: secret123
port: 8080
enabled: true
"#,
        );

        let mut secrets = Secrets::new(dir.path());
        let requester = dir.path().join("configuration.yaml");
        assert_eq!(
            secrets.get(&requester, "api_key").unwrap(),
            Value::String("secret123".into())
        );
        assert_eq!(secrets.get(&requester, "port").unwrap(), Value::from(8080u64));
        assert_eq!(secrets.get(&requester, "enabled").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_nested_secrets_fall_back_to_parent() {
        let dir = TempDir::new().unwrap();
        create_secrets_file(dir.path(), "shared: root\noverridden: root\n");
        create_secrets_file(&dir.path().join("packages"), "overridden: nested\n");

        let mut secrets = Secrets::new(dir.path());
        let requester = dir.path().join("packages").join("pkg.yaml");
        assert_eq!(
            secrets.get(&requester, "overridden").unwrap(),
            Value::String("nested".into())
        );
        assert_eq!(
            secrets.get(&requester, "shared").unwrap(),
            Value::String("root".into())
        );
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        create_secrets_file(dir.path(), "key: value\n");

        let mut secrets = Secrets::new(dir.path());
        let result = secrets.get(&dir.path().join("configuration.yaml"), "nonexistent");
        assert!(matches!(result, Err(ConfigError::SecretNotFound { .. })));
    }

    #[test]
    fn test_no_secrets_file() {
        let dir = TempDir::new().unwrap();
        let mut secrets = Secrets::new(dir.path());
        let result = secrets.get(&dir.path().join("configuration.yaml"), "anything");
        assert!(matches!(result, Err(ConfigError::SecretNotFound { .. })));
    }

    #[test]
    fn test_requester_outside_config_dir() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let mut secrets = Secrets::new(dir.path());
        let result = secrets.get(&other.path().join("x.yaml"), "key");
        assert!(matches!(result, Err(ConfigError::SecretOutsideConfigDir { .. })));
    }

    #[test]
    fn test_logger_entry_is_not_a_secret() {
        let dir = TempDir::new().unwrap();
        create_secrets_file(dir.path(), "logger: debug\nkey: value\n");

        let mut secrets = Secrets::new(dir.path());
        let requester = dir.path().join("configuration.yaml");
        assert!(secrets.get(&requester, "key").is_ok());
        assert!(secrets.log_lookups());
        assert!(matches!(
            secrets.get(&requester, "logger"),
            Err(ConfigError::SecretNotFound { .. })
        ));
    }
}
