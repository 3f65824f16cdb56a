//! User facing rendering of validation errors

use serde_yaml::Value;

use crate::annotation::{format_path, get_by_path, ConfigTree};
use crate::schema::{Invalid, SchemaError, MSG_EXTRA_KEYS, MSG_REQUIRED_KEY};

/// Longest rendering of an offending value before it is truncated
pub const MAX_VALIDATION_ERROR_ITEM_LENGTH: usize = 500;

fn docs_suffix(domain: &str, link: Option<&str>) -> Option<String> {
    match link {
        Some(link) if domain != ha_core::DOMAIN => Some(format!("Please check the docs at {}", link)),
        _ => None,
    }
}

/// Render a single failure with domain, source location and docs link
pub fn stringify_invalid(
    error: &Invalid,
    domain: &str,
    config: &ConfigTree,
    link: Option<&str>,
    max_sub_error_length: usize,
) -> String {
    let mut prefix = format!("Invalid config for [{}]", domain);
    let suffix = docs_suffix(domain, link)
        .map(|s| format!(". {}", s))
        .unwrap_or_default();
    if let Some(location) = config.find_annotation(&error.path) {
        prefix.push_str(&format!(" at {}, line {}", location.file.display(), location.line));
    }
    let path = format_path(&error.path);
    let last = error.path.last().map(ToString::to_string).unwrap_or_default();

    if error.message == MSG_EXTRA_KEYS {
        return format!(
            "{}: '{}' is an invalid option for [{}], check: {}{}",
            prefix, last, domain, path, suffix
        );
    }
    if error.message == MSG_REQUIRED_KEY {
        return format!("{}: required key '{}' not provided{}.", prefix, last, suffix);
    }

    let mut output = error.message.clone();
    if let Some(error_type) = &error.error_type {
        output.push_str(" for ");
        output.push_str(error_type);
    }
    let mut summary = get_by_path(&config.data, &error.path)
        .map(value_repr)
        .unwrap_or_else(|| "None".to_string());
    if summary.chars().count() > max_sub_error_length {
        summary = summary
            .chars()
            .take(max_sub_error_length.saturating_sub(3))
            .collect::<String>()
            + "...";
    }
    format!("{}: {} '{}', got {}{}.", prefix, output, path, summary, suffix)
}

/// Render every failure of `error`, sorted, one per line
pub fn humanize_error(
    error: &SchemaError,
    domain: &str,
    config: &ConfigTree,
    link: Option<&str>,
    max_sub_error_length: usize,
) -> String {
    let mut messages: Vec<String> = error
        .errors()
        .iter()
        .map(|e| stringify_invalid(e, domain, config, link, max_sub_error_length))
        .collect();
    messages.sort();
    messages.join("\n")
}

/// Format a schema error raised while validating `domain`
pub fn format_schema_error(
    error: &SchemaError,
    domain: &str,
    config: &ConfigTree,
    link: Option<&str>,
) -> String {
    humanize_error(error, domain, config, link, MAX_VALIDATION_ERROR_ITEM_LENGTH)
}

/// Format a domain error raised by an integration's own validator
pub fn format_homeassistant_error(error: &str, domain: &str, link: Option<&str>) -> String {
    let mut message = format!("Invalid config for [{}]: {}", domain, error);
    if let Some(suffix) = docs_suffix(domain, link) {
        message.push(' ');
        message.push_str(&suffix);
        message.push('.');
    }
    message
}

/// Render a value the way validation messages quote it
pub fn value_repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Sequence(seq) => {
            let items: Vec<String> = seq.iter().map(value_repr).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Mapping(map) => {
            let items: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", value_repr(k), value_repr(v)))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
        Value::Tagged(tagged) => format!("{} {}", tagged.tag, value_repr(&tagged.value)),
    }
}
