//! Configuration directory lifecycle
//!
//! Creating the default configuration, loading `configuration.yaml` with
//! packages merged, upgrading the directory after a version change and the
//! safe-mode marker. Filesystem work runs on the blocking pool.

use serde_yaml::{Mapping, Value};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::annotation::{mapping_get, ConfigTree};
use crate::error::{ConfigError, ConfigResult};
use crate::integration::IntegrationLoader;
use crate::loader::YamlLoader;
use crate::packages::{merge_packages_config, PackageError, CONF_PACKAGES};
use crate::secrets::{Secrets, SECRET_YAML};
use crate::validation::is_falsy;

pub const YAML_CONFIG_FILE: &str = "configuration.yaml";
pub const VERSION_FILE: &str = ".HA_VERSION";
pub const CONFIG_DIR_NAME: &str = ".homeassistant";
pub const SAFE_MODE_FILENAME: &str = "safe-mode";

pub const AUTOMATION_CONFIG_PATH: &str = "automations.yaml";
pub const SCRIPT_CONFIG_PATH: &str = "scripts.yaml";
pub const SCENE_CONFIG_PATH: &str = "scenes.yaml";

/// Version assumed when the version file is missing
const UNVERSIONED: &str = "0.7.7";

pub const DEFAULT_CONFIG: &str = "
# Loads default set of integrations. Do not remove.
default_config:

# Load frontend themes from the themes folder
frontend:
  themes: !include_dir_merge_named themes

automation: !include automations.yaml
script: !include scripts.yaml
scene: !include scenes.yaml
";

pub const DEFAULT_SECRETS: &str = "
# Use this file to store secrets like usernames and passwords.
# Learn more at https://www.home-assistant.io/docs/configuration/secrets/
some_password: welcome
";

const TTS_PRE_92: &str = "
tts:
  - platform: google
";

const TTS_92: &str = "
tts:
  - platform: google_translate
    service_name: google_say
";

/// `~/.homeassistant`
pub fn default_config_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(CONFIG_DIR_NAME)
}

/// Whether we are running inside a Docker container
pub fn is_docker_env() -> bool {
    Path::new("/.dockerenv").exists()
}

fn write_file(path: &Path, content: &str) -> ConfigResult<()> {
    fs::write(path, content).map_err(|e| ConfigError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_if_missing(path: &Path, content: &str) -> ConfigResult<()> {
    if path.is_file() {
        return Ok(());
    }
    write_file(path, content)
}

fn write_default_config(config_dir: &Path) -> ConfigResult<()> {
    write_file(&config_dir.join(YAML_CONFIG_FILE), DEFAULT_CONFIG)?;
    write_if_missing(&config_dir.join(SECRET_YAML), DEFAULT_SECRETS)?;
    write_file(&config_dir.join(VERSION_FILE), ha_core::VERSION)?;
    write_if_missing(&config_dir.join(AUTOMATION_CONFIG_PATH), "[]")?;
    write_if_missing(&config_dir.join(SCRIPT_CONFIG_PATH), "")?;
    write_if_missing(&config_dir.join(SCENE_CONFIG_PATH), "")?;
    Ok(())
}

/// Write the default configuration into `config_dir`
///
/// Returns whether it was written; failures are logged.
pub async fn create_default_config(config_dir: &Path) -> ConfigResult<bool> {
    let dir = config_dir.to_path_buf();
    let result = tokio::task::spawn_blocking(move || write_default_config(&dir)).await?;
    match result {
        Ok(()) => Ok(true),
        Err(e) => {
            error!("Unable to create default configuration file: {}", e);
            Ok(false)
        }
    }
}

/// Make sure `configuration.yaml` exists, creating the defaults if not
pub async fn ensure_config_exists(config_dir: &Path) -> ConfigResult<bool> {
    if config_dir.join(YAML_CONFIG_FILE).is_file() {
        return Ok(true);
    }
    info!(
        "Unable to find configuration. Creating default one in {}",
        config_dir.display()
    );
    create_default_config(config_dir).await
}

/// Load a configuration file whose root must be a mapping
///
/// Empty top-level values become empty mappings.
pub fn load_yaml_config_file(config_path: &Path, secrets: Option<Secrets>) -> ConfigResult<ConfigTree> {
    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut loader = match secrets {
        Some(secrets) => YamlLoader::with_secrets(&config_dir, secrets),
        None => YamlLoader::new(&config_dir),
    };
    let file_name = config_path.file_name().map(Path::new).unwrap_or(config_path);
    let mut tree = loader.load_tree(file_name)?;

    let Value::Mapping(root) = &mut tree.data else {
        let file = config_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let err = ConfigError::NotAMapping { file };
        error!("{}", err);
        return Err(err);
    };

    for (_, value) in root.iter_mut() {
        if is_falsy(value) {
            *value = Value::Mapping(Mapping::new());
        }
    }
    Ok(tree)
}

/// Load `configuration.yaml` from `config_dir` and merge its packages
pub async fn hass_config_yaml(
    config_dir: &Path,
    loader: &dyn IntegrationLoader,
) -> ConfigResult<(ConfigTree, Vec<PackageError>)> {
    let dir = config_dir.to_path_buf();
    let mut config = tokio::task::spawn_blocking(move || {
        let secrets = Secrets::new(&dir);
        load_yaml_config_file(&dir.join(YAML_CONFIG_FILE), Some(secrets))
    })
    .await??;

    let packages = config
        .as_mapping()
        .and_then(|root| mapping_get(root, ha_core::DOMAIN))
        .and_then(Value::as_mapping)
        .and_then(|core| mapping_get(core, CONF_PACKAGES))
        .filter(|packages| !packages.is_null())
        .cloned()
        .unwrap_or_else(|| Value::Mapping(Mapping::new()));

    let errors = merge_packages_config(loader, &mut config, &packages).await?;
    Ok((config, errors))
}

/// Numeric components of a version, ignoring pre-release suffixes
fn version_parts(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

fn version_lt(version: &str, other: &str) -> bool {
    let (a, b) = (version_parts(version), version_parts(other));
    let len = a.len().max(b.len());
    for i in 0..len {
        match a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0)) {
            Ordering::Less => return true,
            Ordering::Greater => return false,
            Ordering::Equal => {}
        }
    }
    false
}

fn remove_deps(config_dir: &Path) {
    let lib_path = config_dir.join("deps");
    if lib_path.is_dir() {
        if let Err(e) = fs::remove_dir_all(&lib_path) {
            error!("Unable to remove {}: {}", lib_path.display(), e);
        }
    }
}

fn upgrade_config_dir(config_dir: &Path, current: &str) -> ConfigResult<()> {
    let version_path = config_dir.join(VERSION_FILE);
    let conf_version = match fs::read_to_string(&version_path) {
        Ok(content) => content.lines().next().unwrap_or_default().trim().to_string(),
        Err(_) => UNVERSIONED.to_string(),
    };

    if conf_version == current {
        return Ok(());
    }

    info!(
        "Upgrading configuration directory from {} to {}",
        conf_version, current
    );

    if version_lt(&conf_version, "0.50") {
        remove_deps(config_dir);
    }

    if version_lt(&conf_version, "0.92") {
        let config_path = config_dir.join(YAML_CONFIG_FILE);
        let config_raw = fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadFile {
            path: config_path.clone(),
            source: e,
        })?;
        if config_raw.contains(TTS_PRE_92) {
            info!("Migrating google tts to google_translate tts");
            if let Err(e) = write_file(&config_path, &config_raw.replace(TTS_PRE_92, TTS_92)) {
                error!("Migrating to google_translate tts failed: {}", e);
            }
        }
    }

    if version_lt(&conf_version, "0.94") && is_docker_env() {
        remove_deps(config_dir);
    }

    write_file(&version_path, current)
}

/// Upgrade the configuration directory after a version change
pub async fn process_ha_config_upgrade(config_dir: &Path) -> ConfigResult<()> {
    let dir = config_dir.to_path_buf();
    tokio::task::spawn_blocking(move || upgrade_config_dir(&dir, ha_core::VERSION)).await?
}

/// Whether safe mode was requested; the marker is consumed
pub async fn safe_mode_enabled(config_dir: &Path) -> ConfigResult<bool> {
    let marker = config_dir.join(SAFE_MODE_FILENAME);
    tokio::task::spawn_blocking(move || {
        if !marker.exists() {
            return Ok(false);
        }
        fs::remove_file(&marker).map_err(|e| ConfigError::WriteFile {
            path: marker.clone(),
            source: e,
        })?;
        Ok(true)
    })
    .await?
}

/// Request safe mode for the next start
pub async fn enable_safe_mode(config_dir: &Path) -> ConfigResult<()> {
    let marker = config_dir.join(SAFE_MODE_FILENAME);
    tokio::task::spawn_blocking(move || write_file(&marker, "")).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_default_config() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SECRET_YAML), "mine: 1").unwrap();

        assert!(ensure_config_exists(dir.path()).await.unwrap());
        assert_eq!(
            fs::read_to_string(dir.path().join(YAML_CONFIG_FILE)).unwrap(),
            DEFAULT_CONFIG
        );
        assert_eq!(fs::read_to_string(dir.path().join(SECRET_YAML)).unwrap(), "mine: 1");
        assert_eq!(
            fs::read_to_string(dir.path().join(AUTOMATION_CONFIG_PATH)).unwrap(),
            "[]"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join(VERSION_FILE)).unwrap(),
            ha_core::VERSION
        );
        assert!(dir.path().join(SCENE_CONFIG_PATH).is_file());
    }

    #[test]
    fn test_load_yaml_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(YAML_CONFIG_FILE);
        fs::write(&path, "light:\nsensor: []\nswitch:\n  - platform: demo\n").unwrap();

        let tree = load_yaml_config_file(&path, None).unwrap();
        assert_eq!(tree.data["light"], Value::Mapping(Mapping::new()));
        assert_eq!(tree.data["sensor"], Value::Mapping(Mapping::new()));
        assert!(tree.data["switch"].is_sequence());

        fs::write(&path, "- a\n- b\n").unwrap();
        let err = load_yaml_config_file(&path, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The configuration file configuration.yaml does not contain a dictionary"
        );
    }

    #[test]
    fn test_version_compare() {
        assert!(version_lt("0.7.7", "0.50"));
        assert!(version_lt("0.49.1", "0.50"));
        assert!(!version_lt("0.92", "0.92"));
        assert!(!version_lt("2024.1.0b1", "0.94"));
    }

    #[test]
    fn test_upgrade_migrates_tts() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("deps")).unwrap();
        fs::write(
            dir.path().join(YAML_CONFIG_FILE),
            format!("homeassistant:\n{}", TTS_PRE_92),
        )
        .unwrap();

        upgrade_config_dir(dir.path(), "2024.1.0").unwrap();

        let config = fs::read_to_string(dir.path().join(YAML_CONFIG_FILE)).unwrap();
        assert!(config.contains("google_translate"));
        assert!(!dir.path().join("deps").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join(VERSION_FILE)).unwrap(),
            "2024.1.0"
        );
    }

    #[test]
    fn test_upgrade_same_version_is_noop() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(VERSION_FILE), "2024.1.0\n").unwrap();
        fs::create_dir(dir.path().join("deps")).unwrap();
        upgrade_config_dir(dir.path(), "2024.1.0").unwrap();
        assert!(dir.path().join("deps").exists());
    }

    #[tokio::test]
    async fn test_safe_mode_marker_is_consumed() {
        let dir = TempDir::new().unwrap();
        assert!(!safe_mode_enabled(dir.path()).await.unwrap());
        enable_safe_mode(dir.path()).await.unwrap();
        assert!(safe_mode_enabled(dir.path()).await.unwrap());
        assert!(!safe_mode_enabled(dir.path()).await.unwrap());
    }

    #[test]
    fn test_default_config_dir() {
        assert!(default_config_dir().ends_with(CONFIG_DIR_NAME));
    }
}
