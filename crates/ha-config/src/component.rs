//! Per-integration configuration processing
//!
//! [`pre_process_component_config`] validates the configuration of one
//! integration and collects every failure as a [`ConfigExceptionInfo`]
//! instead of stopping at the first one. [`process_component_config`]
//! logs those records and optionally turns them into a single
//! [`ConfigValidationError`].

use futures::FutureExt;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

use crate::annotation::{key_to_string, mapping_get, Annotations, ConfigTree, PathSegment};
use crate::error::{ConfigError, ConfigResult, ConfigValidationError};
use crate::humanize::{format_homeassistant_error, format_schema_error};
use crate::integration::{
    resolve_config_validator, ComponentCapabilities, Integration, IntegrationLoader, LoadError,
    ValidatorError,
};
use crate::schema::{Schema, SchemaError};
use crate::validation::is_falsy;

/// Key naming the platform of a platform entry
pub const CONF_PLATFORM: &str = "platform";

/// Classification of a configuration failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslationKey {
    ComponentImportErr,
    ConfigPlatformImportErr,
    ConfigValidationErr,
    ConfigValidatorUnknownErr,
    ConfigSchemaUnknownErr,
    PlatformConfigValidationErr,
    PlatformComponentLoadErr,
    PlatformValidatorUnknownErr,
    PlatformSchemaValidatorErr,
    IntegrationConfigError,
}

impl TranslationKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationKey::ComponentImportErr => "component_import_err",
            TranslationKey::ConfigPlatformImportErr => "config_platform_import_err",
            TranslationKey::ConfigValidationErr => "config_validation_err",
            TranslationKey::ConfigValidatorUnknownErr => "config_validator_unknown_err",
            TranslationKey::ConfigSchemaUnknownErr => "config_schema_unknown_err",
            TranslationKey::PlatformConfigValidationErr => "platform_config_validation_err",
            TranslationKey::PlatformComponentLoadErr => "platform_component_load_err",
            TranslationKey::PlatformValidatorUnknownErr => "platform_validator_unknown_err",
            TranslationKey::PlatformSchemaValidatorErr => "platform_schema_validator_err",
            TranslationKey::IntegrationConfigError => "integration_config_error",
        }
    }
}

impl fmt::Display for TranslationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error behind a [`ConfigExceptionInfo`]
#[derive(Debug)]
pub enum ConfigException {
    Schema(SchemaError),
    Domain(String),
    Load(LoadError),
    Unknown(anyhow::Error),
}

impl fmt::Display for ConfigException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigException::Schema(e) => e.fmt(f),
            ConfigException::Domain(message) => f.write_str(message),
            ConfigException::Load(e) => e.fmt(f),
            ConfigException::Unknown(e) => write!(f, "{:#}", e),
        }
    }
}

impl From<ValidatorError> for ConfigException {
    fn from(error: ValidatorError) -> Self {
        match error {
            ValidatorError::Invalid(e) => ConfigException::Schema(e),
            ValidatorError::Domain(message) => ConfigException::Domain(message),
            ValidatorError::Unknown(e) => ConfigException::Unknown(e),
        }
    }
}

/// One configuration failure
///
/// Records without `log_message` always carry `p_name` and `p_config`,
/// which are used to render the message.
#[derive(Debug)]
pub struct ConfigExceptionInfo {
    pub error: ConfigException,
    pub translation_key: TranslationKey,
    pub log_message: Option<String>,
    pub p_name: Option<String>,
    pub p_config: Option<ConfigTree>,
    /// Documentation link overriding the integration's own
    pub p_integration_link: Option<String>,
    /// Log the error details along with the message
    pub log_exception: bool,
}

impl ConfigExceptionInfo {
    /// Record with a precomputed log message
    pub fn with_message(
        error: ConfigException,
        translation_key: TranslationKey,
        log_message: impl Into<String>,
    ) -> Self {
        Self {
            error,
            translation_key,
            log_message: Some(log_message.into()),
            p_name: None,
            p_config: None,
            p_integration_link: None,
            log_exception: false,
        }
    }

    /// Record rendered from the offending configuration
    pub fn for_config(
        error: ConfigException,
        translation_key: TranslationKey,
        p_name: impl Into<String>,
        p_config: ConfigTree,
    ) -> Self {
        Self {
            error,
            translation_key,
            log_message: None,
            p_name: Some(p_name.into()),
            p_config: Some(p_config),
            p_integration_link: None,
            log_exception: false,
        }
    }

    fn logging_exception(mut self) -> Self {
        self.log_exception = true;
        self
    }

    fn with_p_name(mut self, p_name: impl Into<String>) -> Self {
        self.p_name = Some(p_name.into());
        self
    }

    fn with_link(mut self, link: Option<&str>) -> Self {
        self.p_integration_link = link.map(String::from);
        self
    }
}

/// Outcome of [`pre_process_component_config`]
pub type PreProcessed = (Option<ConfigTree>, Vec<ConfigExceptionInfo>);

fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "validator panicked".to_string());
    anyhow::anyhow!(message)
}

/// Run a schema, turning a panic inside a validator into an error
fn run_schema(schema: &Schema, value: &Value) -> Result<Result<Value, SchemaError>, anyhow::Error> {
    catch_unwind(AssertUnwindSafe(|| schema.validate(value))).map_err(panic_error)
}

fn terminal(record: ConfigExceptionInfo) -> PreProcessed {
    (None, vec![record])
}

/// Validate the configuration of `integration`
///
/// The first matching strategy wins: a custom config validator, then a
/// whole-config schema, then per-platform schemas, then pass-through.
/// Platform validation keeps going after failures and returns the entries
/// that validated together with every failure.
pub async fn pre_process_component_config(
    loader: &dyn IntegrationLoader,
    config: &ConfigTree,
    integration: &dyn Integration,
) -> PreProcessed {
    let domain = integration.domain();

    let component = match integration.get_component() {
        Ok(component) => component,
        Err(e) => {
            let message = format!("Unable to import {}: {}", domain, e);
            return terminal(ConfigExceptionInfo::with_message(
                ConfigException::Load(e),
                TranslationKey::ComponentImportErr,
                message,
            ));
        }
    };

    let config_validator = match resolve_config_validator(integration) {
        Ok(validator) => validator,
        Err(e) => {
            let message = format!("Error importing config platform {}: {}", domain, e);
            return terminal(ConfigExceptionInfo::with_message(
                ConfigException::Load(e),
                TranslationKey::ConfigPlatformImportErr,
                message,
            ));
        }
    };

    let capabilities = ComponentCapabilities {
        component,
        config_validator,
    };

    if let Some(validator) = &capabilities.config_validator {
        let outcome = AssertUnwindSafe(validator.validate_config(config))
            .catch_unwind()
            .await
            .map_err(panic_error);
        return match outcome {
            Ok(Ok(validated)) => (
                Some(ConfigTree::with_annotations(validated, config.annotations.clone())),
                Vec::new(),
            ),
            Ok(Err(ValidatorError::Invalid(e))) => terminal(ConfigExceptionInfo::for_config(
                ConfigException::Schema(e),
                TranslationKey::ConfigValidationErr,
                domain,
                config.clone(),
            )),
            Ok(Err(ValidatorError::Domain(message))) => terminal(
                ConfigExceptionInfo::for_config(
                    ConfigException::Domain(message),
                    TranslationKey::ConfigValidationErr,
                    domain,
                    config.clone(),
                )
                .logging_exception(),
            ),
            Ok(Err(ValidatorError::Unknown(e))) | Err(e) => terminal(
                ConfigExceptionInfo::with_message(
                    ConfigException::Unknown(e),
                    TranslationKey::ConfigValidatorUnknownErr,
                    format!("Unknown error calling {} config validator", domain),
                )
                .logging_exception(),
            ),
        };
    }

    if let Some(schema) = capabilities.component.config_schema() {
        return match run_schema(schema.schema(), &config.data) {
            Ok(Ok(validated)) => (
                Some(ConfigTree::with_annotations(validated, config.annotations.clone())),
                Vec::new(),
            ),
            Ok(Err(e)) => terminal(ConfigExceptionInfo::for_config(
                ConfigException::Schema(e),
                TranslationKey::ConfigValidationErr,
                domain,
                config.clone(),
            )),
            Err(e) => terminal(
                ConfigExceptionInfo::with_message(
                    ConfigException::Unknown(e),
                    TranslationKey::ConfigSchemaUnknownErr,
                    format!("Unknown error calling {} CONFIG_SCHEMA", domain),
                )
                .logging_exception(),
            ),
        };
    }

    let Some(platform_schema) = capabilities.platform_schema() else {
        return (Some(config.clone()), Vec::new());
    };

    let mut platforms: Vec<(Value, Annotations)> = Vec::new();
    let mut exceptions = Vec::new();

    for (p_name, p_config) in config_per_platform(config, domain) {
        let validated = match run_schema(platform_schema, &p_config.data) {
            Ok(Ok(validated)) => validated,
            Ok(Err(e)) => {
                exceptions.push(ConfigExceptionInfo::for_config(
                    ConfigException::Schema(e),
                    TranslationKey::PlatformConfigValidationErr,
                    domain,
                    p_config,
                ));
                continue;
            }
            Err(e) => {
                let name = p_name.clone().unwrap_or_else(|| "None".to_string());
                exceptions.push(
                    ConfigExceptionInfo::with_message(
                        ConfigException::Unknown(e),
                        TranslationKey::PlatformValidatorUnknownErr,
                        format!(
                            "Unknown error validating {} platform config with {} component platform schema",
                            name, domain
                        ),
                    )
                    .with_p_name(name),
                );
                continue;
            }
        };

        // Entries without a platform key are not resolved any further
        let Some(p_name) = p_name else {
            platforms.push((validated, p_config.annotations));
            continue;
        };

        let p_integration = match loader.get_integration(&p_name).await {
            Ok(p_integration) => p_integration,
            Err(e) => {
                let message = format!("Platform error: {} - {}", domain, e);
                exceptions.push(ConfigExceptionInfo::with_message(
                    ConfigException::Load(e),
                    TranslationKey::PlatformComponentLoadErr,
                    message,
                ));
                continue;
            }
        };

        let platform = match p_integration.get_platform(domain) {
            Ok(platform) => platform,
            Err(e) => {
                let message = format!("Platform error: {} - {}", domain, e);
                exceptions.push(
                    ConfigExceptionInfo::with_message(
                        ConfigException::Load(e),
                        TranslationKey::PlatformComponentLoadErr,
                        message,
                    )
                    .logging_exception(),
                );
                continue;
            }
        };

        let validated = match platform.platform_schema() {
            None => validated,
            Some(schema) => match run_schema(schema, &p_config.data) {
                Ok(Ok(validated)) => validated,
                Ok(Err(e)) => {
                    exceptions.push(
                        ConfigExceptionInfo::for_config(
                            ConfigException::Schema(e),
                            TranslationKey::PlatformConfigValidationErr,
                            format!("{}.{}", domain, p_name),
                            p_config,
                        )
                        .with_link(p_integration.documentation()),
                    );
                    continue;
                }
                Err(e) => {
                    exceptions.push(
                        ConfigExceptionInfo::with_message(
                            ConfigException::Unknown(e),
                            TranslationKey::PlatformSchemaValidatorErr,
                            format!(
                                "Unknown error validating config for {} platform for {} component with PLATFORM_SCHEMA",
                                p_name, domain
                            ),
                        )
                        .with_p_name(p_name.clone())
                        .logging_exception(),
                    );
                    continue;
                }
            },
        };

        debug!("Validated {} platform {}", domain, p_name);
        platforms.push((validated, p_config.annotations));
    }

    (Some(replace_domain(config, domain, platforms)), exceptions)
}

/// `config` without any entry for `domain`, with `platforms` under `domain`
fn replace_domain(config: &ConfigTree, domain: &str, platforms: Vec<(Value, Annotations)>) -> ConfigTree {
    let removed = extract_domain_configs(&config.data, domain);
    let domain_path = vec![PathSegment::Key(domain.to_string())];
    let key_location = config.annotations.get(&domain_path).cloned();

    let mut annotations = config.annotations.clone();
    for key in &removed {
        annotations.remove_subtree(&[PathSegment::Key(key.clone())]);
    }
    if let Some(location) = key_location {
        annotations.insert(domain_path.clone(), location);
    }

    let mut items = Vec::with_capacity(platforms.len());
    for (index, (value, item_annotations)) in platforms.into_iter().enumerate() {
        let mut item_path = domain_path.clone();
        item_path.push(PathSegment::Index(index));
        annotations.graft(&item_path, &item_annotations, 0);
        items.push(value);
    }

    let mut data = config_without_domain(&config.data, domain);
    if let Value::Mapping(map) = &mut data {
        map.insert(Value::String(domain.to_string()), Value::Sequence(items));
    }
    ConfigTree::with_annotations(data, annotations)
}

/// Validate, log every failure and optionally raise
///
/// With `raise_on_failure`, a single failure is raised with its own
/// translation key; several are raised as one `integration_config_error`.
pub async fn process_component_config(
    loader: &dyn IntegrationLoader,
    config: &ConfigTree,
    integration: &dyn Integration,
    raise_on_failure: bool,
) -> ConfigResult<Option<ConfigTree>> {
    let (parsed, exceptions) = pre_process_component_config(loader, config, integration).await;
    log_and_raise(integration, &exceptions, raise_on_failure)?;
    Ok(parsed)
}

fn log_and_raise(
    integration: &dyn Integration,
    exceptions: &[ConfigExceptionInfo],
    raise_on_failure: bool,
) -> ConfigResult<()> {
    let domain = integration.domain();
    // (record, message, config_file, line)
    let mut config_errors: Vec<(&ConfigExceptionInfo, String, String, String)> = Vec::new();
    let mut general_errors: Vec<&ConfigExceptionInfo> = Vec::new();

    for record in exceptions {
        let link = record
            .p_integration_link
            .as_deref()
            .or_else(|| integration.documentation());
        let log_message = match &record.log_message {
            Some(message) => {
                general_errors.push(record);
                message.clone()
            }
            None => {
                let p_name = record.p_name.as_deref().unwrap_or(domain);
                let empty = ConfigTree::default();
                let p_config = record.p_config.as_ref().unwrap_or(&empty);
                let message = match &record.error {
                    ConfigException::Schema(e) => format_schema_error(e, p_name, p_config, link),
                    other => format_homeassistant_error(&other.to_string(), p_name, link),
                };
                let (file, line) = match p_config.location() {
                    Some(location) => (location.file.display().to_string(), location.line.to_string()),
                    None => ("?".to_string(), "?".to_string()),
                };
                config_errors.push((record, message.clone(), file, line));
                message
            }
        };

        if record.log_exception {
            error!("{}\n{:?}", log_message, record.error);
        } else {
            error!("{}", log_message);
        }
    }

    if !raise_on_failure || exceptions.is_empty() {
        return Ok(());
    }

    let count = exceptions.len().to_string();
    let raised = match (config_errors.as_slice(), general_errors.as_slice()) {
        ([(record, message, file, line)], []) => {
            ConfigValidationError::new(message.clone(), record.translation_key.as_str())
                .with_placeholder("domain", domain)
                .with_placeholder("p_name", record.p_name.clone().unwrap_or_default())
                .with_placeholder("error", record.error.to_string())
                .with_placeholder("errors", count)
                .with_placeholder("config_file", file.clone())
                .with_placeholder("line", line.clone())
        }
        ([], [record]) => ConfigValidationError::new(
            record.log_message.clone().unwrap_or_default(),
            record.translation_key.as_str(),
        )
        .with_placeholder("domain", domain)
        .with_placeholder("error", record.error.to_string())
        .with_placeholder("errors", count),
        _ => ConfigValidationError::new(
            format!(
                "Failed to process component config for integration {} due to multiple errors ({}), check the logs for more information.",
                domain, count
            ),
            TranslationKey::IntegrationConfigError.as_str(),
        )
        .with_placeholder("domain", domain)
        .with_placeholder("errors", count),
    };

    Err(ConfigError::Validation(raised))
}

fn domain_pattern(domain: &str) -> Option<Regex> {
    Regex::new(&format!("^{}(| .+)$", regex::escape(domain))).ok()
}

/// Top-level keys holding configuration for `domain`, e.g. `light` and
/// `light kitchen`
pub fn extract_domain_configs(config: &Value, domain: &str) -> Vec<String> {
    let (Some(map), Some(pattern)) = (config.as_mapping(), domain_pattern(domain)) else {
        return Vec::new();
    };
    map.keys()
        .map(key_to_string)
        .filter(|key| pattern.is_match(key))
        .collect()
}

/// `config` with every key for `domain` removed
pub fn config_without_domain(config: &Value, domain: &str) -> Value {
    let filter = extract_domain_configs(config, domain);
    match config {
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .filter(|(k, _)| !filter.contains(&key_to_string(k)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Mapping>(),
        ),
        other => other.clone(),
    }
}

/// Every platform entry for `domain` with its platform name
///
/// Single mappings count as one entry; empty sections are skipped. Each
/// entry is returned as a sub-tree carrying its own annotations.
pub fn config_per_platform(config: &ConfigTree, domain: &str) -> Vec<(Option<String>, ConfigTree)> {
    let mut entries = Vec::new();
    for key in extract_domain_configs(&config.data, domain) {
        let key_path = vec![PathSegment::Key(key.clone())];
        let Some(section) = config.get(&key_path) else {
            continue;
        };
        if is_falsy(section) {
            continue;
        }

        let paths: Vec<Vec<PathSegment>> = match section {
            Value::Sequence(seq) => (0..seq.len())
                .map(|i| vec![PathSegment::Key(key.clone()), PathSegment::Index(i)])
                .collect(),
            _ => vec![key_path],
        };

        for path in paths {
            let Some(item) = config.subtree(&path) else {
                continue;
            };
            let platform = item
                .data
                .as_mapping()
                .and_then(|map| mapping_get(map, CONF_PLATFORM))
                .filter(|p| !p.is_null())
                .map(key_to_string);
            entries.push((platform, item));
        }
    }
    entries
}
