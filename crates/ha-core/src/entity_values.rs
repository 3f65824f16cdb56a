//! Customize tables
//!
//! Attribute overrides keyed by exact entity ID, by domain, or by glob
//! pattern. Lookups layer domain values first, then every matching glob in
//! declaration order, then the exact entity values.

use glob::Pattern;
use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::entity_id::split_entity_id;

/// Per-entity attribute overrides
#[derive(Debug, Clone, Default)]
pub struct EntityValues {
    exact: Mapping,
    domain: Mapping,
    glob: Vec<(Pattern, Mapping)>,
}

impl EntityValues {
    /// Build the tables; each value must be a mapping of attributes
    pub fn new(exact: Mapping, domain: Mapping, glob: Mapping) -> Self {
        let glob = glob
            .into_iter()
            .filter_map(|(key, values)| {
                let pattern_str = key.as_str()?;
                match Pattern::new(pattern_str) {
                    Ok(pattern) => Some((pattern, as_mapping(values))),
                    Err(e) => {
                        warn!("Ignoring invalid customize glob '{}': {}", pattern_str, e);
                        None
                    }
                }
            })
            .collect();

        Self { exact, domain, glob }
    }

    /// Resolve the overrides applying to `entity_id`
    pub fn get(&self, entity_id: &str) -> Mapping {
        let mut result = Mapping::new();

        if let Some((domain, _)) = split_entity_id(entity_id) {
            if let Some(values) = self.domain.get(domain) {
                extend(&mut result, values);
            }
        }

        for (pattern, values) in &self.glob {
            if pattern.matches(entity_id) {
                for (k, v) in values {
                    result.insert(k.clone(), v.clone());
                }
            }
        }

        if let Some(values) = self.exact.get(entity_id) {
            extend(&mut result, values);
        }

        result
    }

    /// Whether no overrides are configured
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.domain.is_empty() && self.glob.is_empty()
    }
}

fn as_mapping(value: Value) -> Mapping {
    match value {
        Value::Mapping(map) => map,
        _ => Mapping::new(),
    }
}

fn extend(target: &mut Mapping, values: &Value) {
    if let Value::Mapping(map) = values {
        for (k, v) in map {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Mapping {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_layering_order() {
        let values = EntityValues::new(
            yaml("light.kitchen: {friendly_name: Exact}"),
            yaml("light: {friendly_name: Domain, icon: 'mdi:bulb'}"),
            yaml("'light.kit*': {friendly_name: Glob, hidden: true}"),
        );

        let result = values.get("light.kitchen");
        assert_eq!(result.get("friendly_name"), Some(&Value::from("Exact")));
        assert_eq!(result.get("icon"), Some(&Value::from("mdi:bulb")));
        assert_eq!(result.get("hidden"), Some(&Value::from(true)));

        let other = values.get("light.bedroom");
        assert_eq!(other.get("friendly_name"), Some(&Value::from("Domain")));
        assert!(other.get("hidden").is_none());
    }

    #[test]
    fn test_no_match() {
        let values = EntityValues::new(Mapping::new(), Mapping::new(), Mapping::new());
        assert!(values.is_empty());
        assert!(values.get("switch.fan").is_empty());
    }
}
