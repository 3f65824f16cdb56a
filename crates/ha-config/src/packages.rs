//! Package merging
//!
//! Packages are named configuration fragments declared under
//! `homeassistant: packages:`. Each package entry is merged into the root
//! configuration before integrations validate it. Whether a domain's
//! entries are concatenated as a list or merged key by key follows from the
//! integration's [`MergeStrategy`].

use serde_yaml::{Mapping, Value};
use std::fmt;
use tracing::{error, warn};

use crate::annotation::{key_to_string, Annotations, ConfigPath, ConfigTree, PathSegment, SourceLocation};
use crate::error::{ConfigError, ConfigResult};
use crate::integration::{resolve_config_validator, ComponentCapabilities, IntegrationLoader, MergeStrategy};
use crate::schema::{Invalid, MapSchema, Schema, SchemaShape};
use crate::validation::{is_falsy, schema_with_slug_keys, string, to_list};

/// Key of the package table inside the core section
pub const CONF_PACKAGES: &str = "packages";

/// Path of the package table in the root configuration
pub fn packages_path() -> ConfigPath {
    vec![
        PathSegment::Key(ha_core::DOMAIN.to_string()),
        PathSegment::Key(CONF_PACKAGES.to_string()),
    ]
}

/// Package names must be slugs; each package is a mapping whose entries
/// are a mapping, a list or empty
pub fn packages_config_schema() -> Schema {
    let component_config = Schema::func_with_shape("component_config", SchemaShape::Unknown, |v| {
        match v {
            Value::Mapping(_) | Value::Sequence(_) | Value::Null => Ok(v.clone()),
            _ => Err(Invalid::new("expected a dictionary, a list or None")),
        }
    });
    schema_with_slug_keys(MapSchema::new().keys(string(), component_config))
}

/// A package entry that could not be merged
#[derive(Debug, Clone, PartialEq)]
pub struct PackageError {
    pub package: String,
    /// Entry key, including any free-text suffix
    pub component: String,
    pub message: String,
    /// Where the package is declared
    pub location: Option<SourceLocation>,
}

impl fmt::Display for PackageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Package {} setup failed. Integration {} {}",
            self.package, self.component, self.message
        )?;
        match &self.location {
            Some(location) => write!(f, " (See {}:{}).", location.file.display(), location.line),
            None => write!(f, " (See ?:?)."),
        }
    }
}

/// Merge `packages` into `config`, mutating it
///
/// Source annotations of package entries are looked up below
/// `homeassistant -> packages` and carried over to the merged nodes.
/// Problems with individual entries are logged and returned; only a
/// malformed package table fails the whole call.
pub async fn merge_packages_config(
    loader: &dyn IntegrationLoader,
    config: &mut ConfigTree,
    packages: &Value,
) -> ConfigResult<Vec<PackageError>> {
    let packages = packages_config_schema().validate(packages)?;
    let mut errors = Vec::new();

    let root_location = config.location().cloned();
    let ConfigTree { data, annotations } = config;
    if data.is_null() {
        *data = Value::Mapping(Mapping::new());
    }
    let root = data.as_mapping_mut().ok_or_else(|| ConfigError::NotAMapping {
        file: root_location
            .as_ref()
            .map(|l| l.file.display().to_string())
            .unwrap_or_else(|| "configuration".to_string()),
    })?;

    let Some(packages) = packages.as_mapping() else {
        return Ok(errors);
    };

    for (pack_key, pack_conf) in packages {
        let pack_name = key_to_string(pack_key);
        let Some(pack_conf) = pack_conf.as_mapping() else {
            continue;
        };

        let mut pack_path = packages_path();
        pack_path.push(PathSegment::Key(pack_name.clone()));
        let location = annotations.get(&pack_path).cloned().or_else(|| root_location.clone());
        let mut report = |component: &str, message: String| {
            let err = PackageError {
                package: pack_name.clone(),
                component: component.to_string(),
                message,
                location: location.clone(),
            };
            error!("{}", err);
            errors.push(err);
        };

        for (comp_key, comp_conf) in pack_conf {
            let comp_name = key_to_string(comp_key);
            if comp_name == ha_core::DOMAIN {
                continue;
            }
            // Entries may carry a free-text suffix, e.g. "sensor living room"
            let domain = comp_name.split(' ').next().unwrap_or_default();

            let integration = match loader.get_integration(domain).await {
                Ok(integration) => integration,
                Err(e) => {
                    report(&comp_name, e.to_string());
                    continue;
                }
            };
            let component = match integration.get_component() {
                Ok(component) => component,
                Err(e) => {
                    report(&comp_name, e.to_string());
                    continue;
                }
            };
            let capabilities = ComponentCapabilities {
                component,
                config_validator: match resolve_config_validator(integration.as_ref()) {
                    Ok(validator) => validator,
                    Err(e) => {
                        warn!("Unable to load config validator for {}: {}", domain, e);
                        None
                    }
                },
            };

            let target = vec![PathSegment::Key(comp_name.clone())];
            let mut source = pack_path.clone();
            source.push(PathSegment::Key(comp_name.clone()));

            if capabilities.merge_strategy() == MergeStrategy::List {
                concat_lists(root, comp_key, comp_conf, &target, &source, annotations);
                continue;
            }

            let empty = Mapping::new();
            let comp_map = match comp_conf {
                Value::Null => &empty,
                Value::Mapping(map) => map,
                _ => {
                    report(&comp_name, "cannot be merged. Expected a dict.".to_string());
                    continue;
                }
            };

            let existing = root.entry(comp_key.clone()).or_insert(Value::Null);
            if existing.is_null() {
                *existing = Value::Mapping(Mapping::new());
                copy_location(annotations, &source, &target);
            }
            let Some(existing) = existing.as_mapping_mut() else {
                report(&comp_name, "cannot be merged. Dict expected in main config.".to_string());
                continue;
            };

            let mut target = target;
            if let Some(duplicate) =
                recursive_merge(existing, comp_map, &mut target, &mut source, annotations)
            {
                report(&comp_name, format!("has duplicate key '{}'", duplicate));
            }
        }
    }

    Ok(errors)
}

/// Merge `package` into `conf`, returning the first conflicting key
///
/// Differing scalars keep the value already present in `conf`.
fn recursive_merge(
    conf: &mut Mapping,
    package: &Mapping,
    target: &mut ConfigPath,
    source: &mut ConfigPath,
    annotations: &mut Annotations,
) -> Option<String> {
    let mut duplicate = None;

    for (key, pack_conf) in package {
        let key_str = key_to_string(key);
        target.push(PathSegment::Key(key_str.clone()));
        source.push(PathSegment::Key(key_str.clone()));

        let conflict = match pack_conf {
            Value::Mapping(pack_map) if pack_map.is_empty() => None,
            Value::Mapping(pack_map) => {
                let existing = conf.entry(key.clone()).or_insert(Value::Null);
                if existing.is_null() {
                    *existing = Value::Mapping(Mapping::new());
                    copy_location(annotations, source, target);
                }
                match existing.as_mapping_mut() {
                    Some(existing) => recursive_merge(existing, pack_map, target, source, annotations),
                    None => Some(key_str),
                }
            }
            Value::Sequence(_) => {
                concat_lists(conf, key, pack_conf, target, source, annotations);
                None
            }
            _ => {
                let differs = conf
                    .get(key)
                    .filter(|existing| !existing.is_null())
                    .map(|existing| existing != pack_conf);
                match differs {
                    Some(differs) => differs.then_some(key_str),
                    None => {
                        conf.insert(key.clone(), pack_conf.clone());
                        let moved = annotations.subtree(source);
                        annotations.graft(target, &moved, 0);
                        None
                    }
                }
            }
        };

        if duplicate.is_none() {
            duplicate = conflict;
        }

        target.pop();
        source.pop();
    }

    duplicate
}

/// Replace `conf[key]` with the existing entries followed by the package
/// entries, empty entries dropped; annotations are re-keyed to the new
/// positions
fn concat_lists(
    conf: &mut Mapping,
    key: &Value,
    pack_conf: &Value,
    target: &[PathSegment],
    source: &[PathSegment],
    annotations: &mut Annotations,
) {
    let existing = conf.get(key).cloned().unwrap_or(Value::Null);

    let mut items: Vec<(Value, Annotations)> = Vec::new();
    for (value, path) in [(existing, target), (pack_conf.clone(), source)] {
        let is_seq = value.is_sequence();
        for (i, item) in to_list(value).into_iter().enumerate() {
            let item_annotations = if is_seq {
                let mut item_path = path.to_vec();
                item_path.push(PathSegment::Index(i));
                annotations.subtree(&item_path)
            } else {
                annotations.subtree(path)
            };
            items.push((item, item_annotations));
        }
    }
    items.retain(|(item, _)| !is_falsy(item));

    let key_location = annotations
        .get(target)
        .or_else(|| annotations.get(source))
        .cloned();
    annotations.remove_subtree(target);
    if let Some(location) = key_location {
        annotations.insert(target.to_vec(), location);
    }

    let mut merged = Vec::with_capacity(items.len());
    for (index, (item, item_annotations)) in items.into_iter().enumerate() {
        let mut item_path = target.to_vec();
        item_path.push(PathSegment::Index(index));
        annotations.graft(&item_path, &item_annotations, 0);
        merged.push(item);
    }

    conf.insert(key.clone(), Value::Sequence(merged));
}

fn copy_location(annotations: &mut Annotations, from: &[PathSegment], to: &[PathSegment]) {
    if annotations.get(to).is_none() {
        if let Some(location) = annotations.get(from).cloned() {
            annotations.insert(to.to_vec(), location);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_path;
    use crate::integration::LoadError;
    use crate::registry::{IntegrationRegistry, SchemaComponent, StaticIntegration};

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn registry() -> IntegrationRegistry {
        let registry = IntegrationRegistry::new();
        registry.register(StaticIntegration::new(
            "sensor",
            SchemaComponent::new().with_platform_schema(Schema::Any),
        ));
        registry.register(StaticIntegration::new("http", SchemaComponent::new()));
        registry
    }

    #[tokio::test]
    async fn test_merge_into_empty_root_is_identity() {
        let packages = yaml("pkg:\n  http:\n    port: 80\n    cors:\n      - a\n");
        let mut config = ConfigTree::new(yaml("{}"));
        let errors = merge_packages_config(&registry(), &mut config, &packages).await.unwrap();
        assert!(errors.is_empty());
        assert_eq!(config.data, yaml("http:\n  port: 80\n  cors:\n    - a\n"));
    }

    #[tokio::test]
    async fn test_duplicate_scalar_keeps_first_value() {
        let packages = yaml("one:\n  http:\n    port: 80\ntwo:\n  http:\n    port: 81\n    ssl: true\n");
        let mut config = ConfigTree::new(yaml("{}"));
        let errors = merge_packages_config(&registry(), &mut config, &packages).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].package, "two");
        assert_eq!(
            errors[0].to_string(),
            "Package two setup failed. Integration http has duplicate key 'port' (See ?:?)."
        );
        assert_eq!(config.data, yaml("http:\n  port: 80\n  ssl: true\n"));
    }

    #[tokio::test]
    async fn test_identical_scalar_is_not_a_conflict() {
        let packages = yaml("one:\n  http:\n    port: 80\ntwo:\n  http:\n    port: 80\n");
        let mut config = ConfigTree::new(yaml("{}"));
        let errors = merge_packages_config(&registry(), &mut config, &packages).await.unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_list_strategy_concatenates_and_drops_falsy() {
        let packages = yaml("one:\n  sensor:\n    - platform: a\n    - {}\ntwo:\n  sensor:\n    platform: b\n");
        let mut config = ConfigTree::new(yaml("sensor: []"));
        let errors = merge_packages_config(&registry(), &mut config, &packages).await.unwrap();
        assert!(errors.is_empty());
        assert_eq!(config.data, yaml("sensor:\n  - platform: a\n  - platform: b\n"));
    }

    #[tokio::test]
    async fn test_annotations_follow_merged_items() {
        let mut annotations = Annotations::new();
        let pkg_item = config_path!["homeassistant", "packages", "pkg", "sensor", 0, "platform"];
        annotations.insert(pkg_item, SourceLocation::new("packages/pkg.yaml", 2));
        let root = yaml("homeassistant:\n  packages:\n    pkg:\n      sensor:\n        - platform: b\nsensor:\n  - platform: a\n");
        let packages = root["homeassistant"]["packages"].clone();
        let mut config = ConfigTree::with_annotations(root, annotations);

        merge_packages_config(&registry(), &mut config, &packages).await.unwrap();
        assert_eq!(
            config.annotations.get(&config_path!["sensor", 1, "platform"]),
            Some(&SourceLocation::new("packages/pkg.yaml", 2))
        );
    }

    #[tokio::test]
    async fn test_entry_suffix_and_load_failures() {
        let packages = yaml("pkg:\n  sensor kitchen:\n    - platform: a\n  unknown_domain:\n    x: 1\n  http: [1]\n");
        let mut config = ConfigTree::new(yaml("{}"));
        let errors = merge_packages_config(&registry(), &mut config, &packages).await.unwrap();

        assert_eq!(config.data["sensor kitchen"], yaml("- platform: a"));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].component, "unknown_domain");
        assert_eq!(errors[1].message, "cannot be merged. Expected a dict.");
    }

    #[tokio::test]
    async fn test_dict_expected_in_main_config() {
        let packages = yaml("pkg:\n  http:\n    port: 80\n");
        let mut config = ConfigTree::new(yaml("http: [1]"));
        let errors = merge_packages_config(&registry(), &mut config, &packages).await.unwrap();
        assert_eq!(errors[0].message, "cannot be merged. Dict expected in main config.");
    }

    #[tokio::test]
    async fn test_only_first_conflict_per_level_is_reported() {
        let packages = yaml("one:\n  http:\n    a: 1\n    b: 1\ntwo:\n  http:\n    a: 2\n    b: 2\n    c: 3\n");
        let mut config = ConfigTree::new(yaml("{}"));
        let errors = merge_packages_config(&registry(), &mut config, &packages).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "has duplicate key 'a'");
        assert_eq!(config.data, yaml("http:\n  a: 1\n  b: 1\n  c: 3\n"));
    }

    #[tokio::test]
    async fn test_nested_conflict_reports_inner_key() {
        let packages = yaml(
            "one:\n  http:\n    cors:\n      origin: a\n      max_age: 1\n\
             two:\n  http:\n    cors:\n      origin: b\n      max_age: 2\n      methods: [GET]\n    port: 80\n",
        );
        let mut config = ConfigTree::new(yaml("{}"));
        let errors = merge_packages_config(&registry(), &mut config, &packages).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].package, "two");
        assert_eq!(errors[0].message, "has duplicate key 'origin'");
        assert_eq!(
            config.data,
            yaml("http:\n  cors:\n    origin: a\n    max_age: 1\n    methods: [GET]\n  port: 80\n")
        );
    }

    #[tokio::test]
    async fn test_empty_package_is_rejected() {
        let packages = yaml("pkg:\n");
        let mut config = ConfigTree::new(yaml("{}"));
        let result = merge_packages_config(&registry(), &mut config, &packages).await;
        let Err(ConfigError::Schema(err)) = &result else {
            panic!("expected a schema error, got {:?}", result);
        };
        assert_eq!(err.errors()[0].message, "expected a dictionary");
        assert_eq!(err.errors()[0].path, config_path!["pkg"]);
    }

    #[tokio::test]
    async fn test_broken_config_validator_falls_back_to_component() {
        let registry = registry();
        registry.register(
            StaticIntegration::new("mqtt", SchemaComponent::new()).with_config_validator_error(
                LoadError::Import {
                    module: "homeassistant.components.mqtt.config".into(),
                    reason: "boom".into(),
                },
            ),
        );
        let packages = yaml("pkg:\n  mqtt:\n    broker: localhost\n");
        let mut config = ConfigTree::new(yaml("{}"));
        let errors = merge_packages_config(&registry, &mut config, &packages).await.unwrap();
        assert!(errors.is_empty());
        assert_eq!(config.data, yaml("mqtt:\n  broker: localhost\n"));
    }

    #[tokio::test]
    async fn test_invalid_package_name_fails() {
        let packages = yaml("Bad Name:\n  http: {}\n");
        let mut config = ConfigTree::new(yaml("{}"));
        let result = merge_packages_config(&registry(), &mut config, &packages).await;
        assert!(matches!(result, Err(ConfigError::Schema(_))));
    }
}
