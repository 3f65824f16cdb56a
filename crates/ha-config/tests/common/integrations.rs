//! Fake integrations

use async_trait::async_trait;
use ha_config::validation::{positive_int, string};
use ha_config::{
    ComponentSchema, ConfigTree, ConfigValidator, Extra, IntegrationRegistry, Invalid, LoadError,
    MapSchema, MergeStrategy, Schema, SchemaComponent, SchemaPlatform, StaticIntegration,
    ValidatorError, Value,
};

/// Validator for `automation` that requires an alias on every entry
pub struct AutomationValidator;

#[async_trait]
impl ConfigValidator for AutomationValidator {
    fn package_merge_hint(&self) -> MergeStrategy {
        MergeStrategy::List
    }

    async fn validate_config(&self, config: &ConfigTree) -> Result<Value, ValidatorError> {
        let entries = config
            .data
            .get("automation")
            .and_then(Value::as_sequence)
            .cloned()
            .unwrap_or_default();
        for entry in &entries {
            if entry.get("alias").is_none() {
                return Err(ValidatorError::Domain("Automation is missing an alias".into()));
            }
        }
        Ok(config.data.clone())
    }
}

/// Validator failing with something that is neither a schema nor a domain error
pub struct FlakyValidator;

#[async_trait]
impl ConfigValidator for FlakyValidator {
    async fn validate_config(&self, _config: &ConfigTree) -> Result<Value, ValidatorError> {
        Err(anyhow::anyhow!("connection reset").context("loading remote schema").into())
    }
}

/// Entries without a platform are allowed, e.g. template-style sensors
pub fn sensor_platform_base() -> MapSchema {
    MapSchema::new()
        .optional("platform", string())
        .optional("name", string())
        .extra(Extra::Allow)
}

/// `http` declares a whole-config schema with a mapping section
pub fn http_integration() -> StaticIntegration {
    let section = MapSchema::new()
        .optional("server_port", positive_int())
        .optional("ssl_certificate", string());
    let schema = MapSchema::new().required("http", section).extra(Extra::Allow);
    StaticIntegration::new(
        "http",
        SchemaComponent::new().with_config_schema(ComponentSchema::new("http", schema)),
    )
}

/// `sensor` validates every platform entry against a base schema
pub fn sensor_integration() -> StaticIntegration {
    StaticIntegration::new(
        "sensor",
        SchemaComponent::new()
            .with_platform_schema(sensor_platform_base())
            .with_platform_schema_base(sensor_platform_base()),
    )
}

/// `demo` provides a strict sensor platform
pub fn demo_integration() -> StaticIntegration {
    let platform = MapSchema::new()
        .required("platform", string())
        .required("name", string())
        .optional("unit", string());
    StaticIntegration::new("demo", SchemaComponent::new())
        .with_platform("sensor", SchemaPlatform::with_schema(platform))
}

/// `panicky` provides a sensor platform whose validator panics
pub fn panicky_integration() -> StaticIntegration {
    let platform = Schema::func("explode", |_: &Value| -> Result<Value, Invalid> {
        panic!("validator exploded")
    });
    StaticIntegration::new("panicky", SchemaComponent::new())
        .with_platform("sensor", SchemaPlatform::with_schema(platform))
}

pub fn registry() -> IntegrationRegistry {
    let registry = IntegrationRegistry::new();
    registry.register(http_integration());
    registry.register(sensor_integration());
    registry.register(demo_integration());
    registry.register(panicky_integration());
    registry.register(StaticIntegration::new("template", SchemaComponent::new()).with_platform(
        "sensor",
        SchemaPlatform::new(),
    ));
    registry.register(
        StaticIntegration::new("light", SchemaComponent::new())
            .with_documentation(Some("https://www.home-assistant.io/integrations/light".into())),
    );
    registry.register(
        StaticIntegration::new("automation", SchemaComponent::new())
            .with_config_validator(AutomationValidator),
    );
    registry.register(
        StaticIntegration::new("remote_schema", SchemaComponent::new())
            .with_config_validator(FlakyValidator),
    );
    registry.register_failure(
        "broken",
        LoadError::RequirementsNotFound {
            domain: "broken".into(),
            requirements: vec!["pybroken==1.0".into()],
        },
    );
    registry
}
