//! Integration capabilities consumed by configuration processing
//!
//! Integrations are looked up by domain through an [`IntegrationLoader`].
//! What an integration offers for configuration (a custom validator, a
//! whole-config schema, platform schemas) is resolved once per pass into
//! [`ComponentCapabilities`] instead of probing repeatedly.

use async_trait::async_trait;
use serde_yaml::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::annotation::ConfigTree;
use crate::schema::{ComponentSchema, Schema, SchemaError, SchemaShape};

/// Failure to load an integration or one of its modules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("Integration '{0}' not found.")]
    IntegrationNotFound(String),

    #[error("Requirements for {domain} not found: {requirements:?}.")]
    RequirementsNotFound {
        domain: String,
        requirements: Vec<String>,
    },

    #[error("No module named '{module}'")]
    ModuleNotFound { module: String },

    #[error("Error importing {module}: {reason}")]
    Import { module: String, reason: String },
}

impl LoadError {
    /// Module the error refers to, if any
    pub fn module(&self) -> Option<&str> {
        match self {
            LoadError::ModuleNotFound { module } | LoadError::Import { module, .. } => {
                Some(module)
            }
            _ => None,
        }
    }
}

/// Failure reported by an integration's own config validator
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// Structurally invalid configuration
    #[error(transparent)]
    Invalid(#[from] SchemaError),

    /// Semantically invalid configuration
    #[error("{0}")]
    Domain(String),

    /// Anything else
    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

/// How packages are merged into a domain's configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    List,
    Dict,
    /// Shape could not be determined, merged like a dict
    Unknown,
}

/// The config validation platform of an integration
#[async_trait]
pub trait ConfigValidator: Send + Sync {
    /// Merge strategy for packages targeting this domain
    fn package_merge_hint(&self) -> MergeStrategy {
        MergeStrategy::Dict
    }

    /// Validate the complete configuration, returning its normalized form
    async fn validate_config(&self, config: &ConfigTree) -> Result<Value, ValidatorError>;
}

/// Schemas declared by an integration's component module
pub trait Component: Send + Sync {
    /// Schema validating the complete configuration
    fn config_schema(&self) -> Option<&ComponentSchema> {
        None
    }

    /// Schema every platform entry of this domain must satisfy
    fn platform_schema(&self) -> Option<&Schema> {
        None
    }

    /// Base platform schema, preferred over [`Component::platform_schema`]
    fn platform_schema_base(&self) -> Option<&Schema> {
        None
    }
}

/// A platform an integration provides for another domain
pub trait Platform: Send + Sync {
    fn platform_schema(&self) -> Option<&Schema> {
        None
    }
}

/// A loaded integration
pub trait Integration: Send + Sync {
    fn domain(&self) -> &str;

    /// Documentation URL
    fn documentation(&self) -> Option<&str> {
        None
    }

    /// Module path, used to tell a missing module from a broken one
    fn pkg_path(&self) -> String {
        format!("homeassistant.components.{}", self.domain())
    }

    fn get_component(&self) -> Result<Arc<dyn Component>, LoadError>;

    /// The `config` platform; `ModuleNotFound` for `<pkg_path>.config`
    /// means the integration has none
    fn get_config_validator(&self) -> Result<Option<Arc<dyn ConfigValidator>>, LoadError>;

    /// The platform this integration provides for `domain`
    fn get_platform(&self, domain: &str) -> Result<Arc<dyn Platform>, LoadError>;
}

/// Source of integrations by domain
#[async_trait]
pub trait IntegrationLoader: Send + Sync {
    /// Load an integration, installing its requirements
    async fn get_integration(&self, domain: &str) -> Result<Arc<dyn Integration>, LoadError>;
}

/// Resolve the config validator, treating an absent `config` module as none
pub fn resolve_config_validator(
    integration: &dyn Integration,
) -> Result<Option<Arc<dyn ConfigValidator>>, LoadError> {
    match integration.get_config_validator() {
        Err(LoadError::ModuleNotFound { module })
            if module == format!("{}.config", integration.pkg_path()) =>
        {
            Ok(None)
        }
        other => other,
    }
}

/// What an integration offers for configuration, resolved once
#[derive(Clone)]
pub struct ComponentCapabilities {
    pub component: Arc<dyn Component>,
    pub config_validator: Option<Arc<dyn ConfigValidator>>,
}

impl ComponentCapabilities {
    pub fn has_custom_validator(&self) -> bool {
        self.config_validator.is_some()
    }

    pub fn has_whole_schema(&self) -> bool {
        self.component.config_schema().is_some()
    }

    pub fn has_platform_schema(&self) -> bool {
        self.platform_schema().is_some()
    }

    /// Base platform schema, falling back to the plain platform schema
    pub fn platform_schema(&self) -> Option<&Schema> {
        self.component
            .platform_schema_base()
            .or_else(|| self.component.platform_schema())
    }

    /// Merge strategy for packages
    ///
    /// A validator hint of `List` wins, then a platform schema means
    /// `List`, then the shape the whole-config schema declares for the domain.
    pub fn merge_strategy(&self) -> MergeStrategy {
        if let Some(validator) = &self.config_validator {
            if validator.package_merge_hint() == MergeStrategy::List {
                return MergeStrategy::List;
            }
        }
        if self.component.platform_schema().is_some() {
            return MergeStrategy::List;
        }
        match self.component.config_schema().map(ComponentSchema::domain_shape) {
            Some(SchemaShape::List) => MergeStrategy::List,
            Some(SchemaShape::Mapping) => MergeStrategy::Dict,
            _ => MergeStrategy::Unknown,
        }
    }
}
