//! Shared fixtures for the ha-config integration tests
//!
//! Registers a small set of fake integrations covering every way an
//! integration can validate its configuration.

#![allow(dead_code)]

mod integrations;

pub use integrations::*;

use ha_config::{ConfigTree, Value};
use std::path::Path;

/// Parse YAML into an unannotated tree
pub fn tree(yaml: &str) -> ConfigTree {
    ConfigTree::new(yaml_value(yaml))
}

pub fn yaml_value(yaml: &str) -> Value {
    serde_yaml::from_str(yaml).unwrap_or_else(|e| panic!("invalid test YAML: {}", e))
}

/// Write `files` (relative path, content) below `dir`
pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
    }
}
