//! Configuration engine for Home Assistant
//!
//! Loads `configuration.yaml` with Home Assistant's custom tags, merges
//! packages into the root configuration, validates the configuration of
//! each integration and applies the `homeassistant:` section to the hub.
//!
//! Supported YAML tags:
//!
//! - `!include path` - Include another YAML file
//! - `!include_dir_list dir` - Include all YAML files in a directory as a list
//! - `!include_dir_merge_list dir` - Merge lists from all YAML files
//! - `!include_dir_named dir` - Include all YAML files as a mapping
//! - `!include_dir_merge_named dir` - Merge mappings from all YAML files
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! Every loaded tree carries [`Annotations`] so validation errors can point
//! at the file and line that produced the offending value.
//!
//! # Example
//!
//! ```ignore
//! use ha_config::{hass_config_yaml, process_component_config, IntegrationRegistry};
//!
//! let registry = IntegrationRegistry::new();
//! let (config, package_errors) = hass_config_yaml(config_dir, &registry).await?;
//!
//! let light = registry.get_integration("light").await?;
//! let validated = process_component_config(&registry, &config, light.as_ref(), false).await?;
//! ```

mod annotation;
mod component;
mod core_config;
mod error;
mod files;
mod generated;
mod humanize;
mod integration;
mod loader;
mod packages;
mod registry;
mod report;
mod schema;
mod secrets;
pub mod validation;

pub use annotation::{
    find_annotation, format_path, get_by_path, key_to_string, Annotations, ConfigPath,
    ConfigTree, PathSegment, SourceLocation,
};
pub use component::{
    config_per_platform, config_without_domain, extract_domain_configs,
    pre_process_component_config, process_component_config, ConfigException,
    ConfigExceptionInfo, TranslationKey, CONF_PLATFORM,
};
pub use core_config::{
    core_config_schema, customize_config_schema, process_ha_core_config,
    ISSUE_COUNTRY_NOT_CONFIGURED, ISSUE_HISTORIC_CURRENCY,
};
pub use error::{ConfigError, ConfigResult, ConfigValidationError};
pub use files::{
    create_default_config, default_config_dir, enable_safe_mode, ensure_config_exists,
    hass_config_yaml, is_docker_env, load_yaml_config_file, process_ha_config_upgrade,
    safe_mode_enabled, SAFE_MODE_FILENAME, VERSION_FILE, YAML_CONFIG_FILE,
};
pub use humanize::{
    format_homeassistant_error, format_schema_error, humanize_error, stringify_invalid,
    value_repr, MAX_VALIDATION_ERROR_ITEM_LENGTH,
};
pub use integration::{
    resolve_config_validator, Component, ComponentCapabilities, ConfigValidator, Integration,
    IntegrationLoader, LoadError, MergeStrategy, Platform, ValidatorError,
};
pub use loader::{load_yaml, load_yaml_annotated, load_yaml_string, YamlLoader};
pub use packages::{merge_packages_config, packages_config_schema, PackageError, CONF_PACKAGES};
pub use registry::{IntegrationRegistry, SchemaComponent, SchemaPlatform, StaticIntegration};
pub use report::{log_config_validator_error, log_schema_error, notify_setup_error};
pub use schema::{
    ComponentSchema, Extra, Invalid, MapSchema, Schema, SchemaError, SchemaShape,
    MSG_EXTRA_KEYS, MSG_REQUIRED_KEY,
};
pub use secrets::{Secrets, SECRET_YAML};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
