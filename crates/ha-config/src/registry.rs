//! In-process integration registry
//!
//! An [`IntegrationLoader`] over integrations registered at runtime. Used by
//! the `hass-check-config` binary and by tests; integrations can also be
//! registered as failing to model missing requirements or broken modules.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::integration::{
    Component, ConfigValidator, Integration, IntegrationLoader, LoadError, Platform,
};
use crate::schema::{ComponentSchema, Schema};

/// Component declaring its schemas up front
#[derive(Debug, Clone, Default)]
pub struct SchemaComponent {
    config_schema: Option<ComponentSchema>,
    platform_schema: Option<Schema>,
    platform_schema_base: Option<Schema>,
}

impl SchemaComponent {
    /// A component without any schema; its configuration passes through
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_schema(mut self, schema: ComponentSchema) -> Self {
        self.config_schema = Some(schema);
        self
    }

    pub fn with_platform_schema(mut self, schema: impl Into<Schema>) -> Self {
        self.platform_schema = Some(schema.into());
        self
    }

    pub fn with_platform_schema_base(mut self, schema: impl Into<Schema>) -> Self {
        self.platform_schema_base = Some(schema.into());
        self
    }
}

impl Component for SchemaComponent {
    fn config_schema(&self) -> Option<&ComponentSchema> {
        self.config_schema.as_ref()
    }

    fn platform_schema(&self) -> Option<&Schema> {
        self.platform_schema.as_ref()
    }

    fn platform_schema_base(&self) -> Option<&Schema> {
        self.platform_schema_base.as_ref()
    }
}

/// Platform with an optional schema of its own
#[derive(Debug, Clone, Default)]
pub struct SchemaPlatform {
    schema: Option<Schema>,
}

impl SchemaPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: impl Into<Schema>) -> Self {
        Self {
            schema: Some(schema.into()),
        }
    }
}

impl Platform for SchemaPlatform {
    fn platform_schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }
}

/// Integration assembled from parts
#[derive(Clone)]
pub struct StaticIntegration {
    domain: String,
    documentation: Option<String>,
    component: Result<Arc<dyn Component>, LoadError>,
    config_validator: Result<Option<Arc<dyn ConfigValidator>>, LoadError>,
    platforms: HashMap<String, Arc<dyn Platform>>,
}

impl StaticIntegration {
    pub fn new(domain: impl Into<String>, component: impl Component + 'static) -> Self {
        let domain = domain.into();
        Self {
            documentation: Some(format!(
                "https://www.home-assistant.io/integrations/{}",
                domain
            )),
            domain,
            component: Ok(Arc::new(component)),
            config_validator: Ok(None),
            platforms: HashMap::new(),
        }
    }

    pub fn with_documentation(mut self, url: Option<String>) -> Self {
        self.documentation = url;
        self
    }

    pub fn with_config_validator(mut self, validator: impl ConfigValidator + 'static) -> Self {
        self.config_validator = Ok(Some(Arc::new(validator)));
        self
    }

    /// Provide a platform for another domain
    pub fn with_platform(mut self, domain: impl Into<String>, platform: impl Platform + 'static) -> Self {
        self.platforms.insert(domain.into(), Arc::new(platform));
        self
    }

    /// Make loading the component module fail
    pub fn with_component_error(mut self, error: LoadError) -> Self {
        self.component = Err(error);
        self
    }

    /// Make loading the `config` platform fail
    pub fn with_config_validator_error(mut self, error: LoadError) -> Self {
        self.config_validator = Err(error);
        self
    }
}

impl Integration for StaticIntegration {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn documentation(&self) -> Option<&str> {
        self.documentation.as_deref()
    }

    fn get_component(&self) -> Result<Arc<dyn Component>, LoadError> {
        self.component.clone()
    }

    fn get_config_validator(&self) -> Result<Option<Arc<dyn ConfigValidator>>, LoadError> {
        match &self.config_validator {
            Ok(Some(validator)) => Ok(Some(validator.clone())),
            Ok(None) => Err(LoadError::ModuleNotFound {
                module: format!("{}.config", self.pkg_path()),
            }),
            Err(e) => Err(e.clone()),
        }
    }

    fn get_platform(&self, domain: &str) -> Result<Arc<dyn Platform>, LoadError> {
        self.platforms
            .get(domain)
            .cloned()
            .ok_or_else(|| LoadError::ModuleNotFound {
                module: format!("{}.{}", self.pkg_path(), domain),
            })
    }
}

/// Registry of integrations by domain
#[derive(Default)]
pub struct IntegrationRegistry {
    integrations: DashMap<String, Arc<dyn Integration>>,
    failures: DashMap<String, LoadError>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, integration: impl Integration + 'static) {
        let domain = integration.domain().to_string();
        debug!("Registered integration: {}", domain);
        self.failures.remove(&domain);
        self.integrations.insert(domain, Arc::new(integration));
    }

    /// Make loading `domain` fail with `error`
    pub fn register_failure(&self, domain: impl Into<String>, error: LoadError) {
        let domain = domain.into();
        self.integrations.remove(&domain);
        self.failures.insert(domain, error);
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.integrations.contains_key(domain)
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}

#[async_trait]
impl IntegrationLoader for IntegrationRegistry {
    async fn get_integration(&self, domain: &str) -> Result<Arc<dyn Integration>, LoadError> {
        if let Some(error) = self.failures.get(domain) {
            return Err(error.clone());
        }
        self.integrations
            .get(domain)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LoadError::IntegrationNotFound(domain.to_string()))
    }
}
