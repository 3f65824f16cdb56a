//! Runtime core configuration
//!
//! Live values derived from the `homeassistant:` section. The configuration
//! engine assigns these fields directly after validating the section.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::unit_system::UnitSystem;

/// Where the location settings came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    #[default]
    Default,
    Discovered,
    Storage,
    Yaml,
}

/// Runtime configuration of the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `configuration.yaml`
    pub config_dir: PathBuf,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters
    pub elevation: i64,
    pub time_zone: String,
    pub units: UnitSystem,
    pub internal_url: Option<String>,
    pub external_url: Option<String>,
    /// ISO 4217 currency code
    pub currency: String,
    /// ISO 3166 country code
    pub country: Option<String>,
    pub language: String,
    /// Named media source directories
    pub media_dirs: BTreeMap<String, String>,
    pub allowlist_external_dirs: BTreeSet<String>,
    /// Allowed URL prefixes, each ending with `/`
    pub allowlist_external_urls: BTreeSet<String>,
    pub legacy_templates: bool,
    pub config_source: ConfigSource,
    /// Custom integrations are skipped for this run
    pub safe_mode: bool,
}

impl Config {
    /// Create a configuration with default values rooted at `config_dir`
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            location_name: "Home".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0,
            time_zone: "UTC".to_string(),
            units: UnitSystem::metric(),
            internal_url: None,
            external_url: None,
            currency: "EUR".to_string(),
            country: None,
            language: "en".to_string(),
            media_dirs: BTreeMap::new(),
            allowlist_external_dirs: BTreeSet::new(),
            allowlist_external_urls: BTreeSet::new(),
            legacy_templates: false,
            config_source: ConfigSource::Default,
            safe_mode: false,
        }
    }

    /// Build a path relative to the config directory
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.config_dir.join(relative)
    }

    /// Set the time zone
    pub fn set_time_zone(&mut self, time_zone: impl Into<String>) {
        self.time_zone = time_zone.into();
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("/config")
    }
}
