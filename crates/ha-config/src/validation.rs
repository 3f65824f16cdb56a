//! Reusable validators for configuration schemas

use serde_yaml::{Mapping, Value};
use std::path::Path;
use std::str::FromStr;

use crate::annotation::key_to_string;
use crate::generated::{ACTIVE_CURRENCIES, COUNTRIES, HISTORIC_CURRENCIES, LANGUAGES};
use crate::schema::{Invalid, MapSchema, Schema, SchemaShape};

/// Whether a value counts as empty: null, false, zero, `""`, `[]` or `{}`
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Sequence(seq) => seq.is_empty(),
        Value::Mapping(map) => map.is_empty(),
        Value::Tagged(tagged) => is_falsy(&tagged.value),
    }
}

/// Drop empty items
pub fn remove_falsy(items: Vec<Value>) -> Vec<Value> {
    items.into_iter().filter(|v| !is_falsy(v)).collect()
}

/// Wrap a value in a list unless it already is one; null becomes `[]`
pub fn to_list(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Sequence(seq) => seq,
        other => vec![other],
    }
}

pub fn ensure_list() -> Schema {
    Schema::func_with_shape("ensure_list", SchemaShape::List, |v| {
        Ok(Value::Sequence(to_list(v.clone())))
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Scalar coerced to text; null and collections are rejected
pub fn string() -> Schema {
    Schema::func("string", |v| match v {
        Value::Null => Err(Invalid::new("string value is None")),
        Value::Sequence(_) | Value::Mapping(_) => Err(Invalid::new("value should be a string")),
        other => scalar_text(other)
            .map(Value::String)
            .ok_or_else(|| Invalid::new("expected str")),
    })
}

pub fn boolean() -> Schema {
    Schema::func("boolean", |v| match v {
        Value::Bool(_) => Ok(v.clone()),
        Value::Number(n) => Ok(Value::Bool(n.as_f64() != Some(0.0))),
        Value::String(s) => match s.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" | "enable" => Ok(Value::Bool(true)),
            "0" | "false" | "no" | "off" | "disable" => Ok(Value::Bool(false)),
            _ => Err(Invalid::new(format!("invalid boolean value {}", s))),
        },
        other => Err(Invalid::new(format!(
            "invalid boolean value {}",
            key_to_string(other)
        ))),
    })
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integer from a number or numeric string; floats truncate
pub fn coerce_int() -> Schema {
    Schema::func("coerce_int", |v| {
        let parsed = match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        parsed.map(Value::from).ok_or_else(|| Invalid::new("expected int"))
    })
}

pub fn positive_int() -> Schema {
    Schema::all(vec![
        coerce_int(),
        Schema::func("positive_int", |v| match v.as_i64() {
            Some(n) if n >= 0 => Ok(v.clone()),
            _ => Err(Invalid::new("value must be at least 0")),
        }),
    ])
}

fn coordinate(name: &'static str, limit: f64, message: &'static str) -> Schema {
    Schema::func(name, move |v| {
        let value = as_f64(v).ok_or_else(|| Invalid::new(message))?;
        if (-limit..=limit).contains(&value) {
            Ok(Value::from(value))
        } else {
            Err(Invalid::new(message))
        }
    })
}

pub fn latitude() -> Schema {
    coordinate("latitude", 90.0, "invalid latitude")
}

pub fn longitude() -> Schema {
    coordinate("longitude", 180.0, "invalid longitude")
}

/// Absolute http(s) URL
pub fn url() -> Schema {
    Schema::func("url", |v| {
        let text = scalar_text(v).ok_or_else(|| Invalid::new("invalid url"))?;
        match url::Url::parse(&text) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(Value::String(text)),
            _ => Err(Invalid::new("invalid url")),
        }
    })
}

/// Path component of a URL, empty when the URL does not parse
pub fn url_path(text: &str) -> String {
    url::Url::parse(text)
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}

/// IANA time zone identifier
pub fn time_zone() -> Schema {
    Schema::func("time_zone", |v| {
        let text = scalar_text(v).unwrap_or_default();
        match chrono_tz::Tz::from_str(&text) {
            Ok(_) => Ok(Value::String(text)),
            Err(_) => Err(Invalid::new(
                "Invalid time zone passed in. Valid options can be found here: \
                 http://en.wikipedia.org/wiki/List_of_tz_database_time_zones",
            )),
        }
    })
}

/// Membership in a fixed list
pub fn one_of(name: &'static str, allowed: &'static [&'static str], message: &'static str) -> Schema {
    Schema::func(name, move |v| match v.as_str() {
        Some(s) if allowed.contains(&s) => Ok(v.clone()),
        _ => Err(Invalid::new(message)),
    })
}

/// Rejects the listed values
pub fn not_in(rejected: Vec<String>, message: impl Into<String>) -> Schema {
    let message = message.into();
    Schema::func("not_in", move |v| match v.as_str() {
        Some(s) if rejected.iter().any(|r| r == s) => Err(Invalid::new(message.clone())),
        _ => Ok(v.clone()),
    })
}

pub fn currency() -> Schema {
    one_of("currency", ACTIVE_CURRENCIES, "invalid ISO 4217 formatted currency")
}

pub fn historic_currency() -> Schema {
    one_of(
        "historic_currency",
        HISTORIC_CURRENCIES,
        "invalid ISO 4217 formatted historic currency",
    )
}

pub fn is_historic_currency(code: &str) -> bool {
    HISTORIC_CURRENCIES.contains(&code)
}

pub fn country() -> Schema {
    one_of("country", COUNTRIES, "invalid ISO 3166 formatted country")
}

pub fn language() -> Schema {
    one_of("language", LANGUAGES, "invalid language code")
}

/// Lowercase identifier with runs of other characters collapsed to `_`
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

pub fn slug() -> Schema {
    Schema::func("slug", |v| {
        let text = match v {
            Value::Null => return Err(Invalid::new("Slug should not be None")),
            other => scalar_text(other).ok_or_else(|| Invalid::new("expected str"))?,
        };
        let slugified = slugify(&text);
        if !text.is_empty() && slugified == text {
            Ok(Value::String(text))
        } else {
            Err(Invalid::new(format!("invalid slug {} (try {})", text, slugified)))
        }
    })
}

/// Mapping whose keys must be slugs
pub fn schema_with_slug_keys(value_schema: impl Into<Schema>) -> Schema {
    MapSchema::new().keys(slug(), value_schema).into()
}

pub fn entity_id() -> Schema {
    Schema::func("entity_id", |v| {
        let text = scalar_text(v).unwrap_or_default().to_lowercase();
        if ha_core::valid_entity_id(&text) {
            Ok(Value::String(text))
        } else {
            Err(Invalid::new(format!(
                "Entity ID {} is an invalid entity ID",
                key_to_string(v)
            )))
        }
    })
}

pub fn is_dir() -> Schema {
    Schema::func("is_dir", |v| match v.as_str() {
        Some(path) if Path::new(path).is_dir() => Ok(v.clone()),
        Some(_) => Err(Invalid::new("not a directory")),
        None => Err(Invalid::new("expected str")),
    })
}

/// `C`/`F` to the unit symbol
pub fn temperature_unit() -> Schema {
    Schema::func("temperature_unit", |v| {
        match v.as_str().map(str::to_uppercase).as_deref() {
            Some("C") => Ok(Value::String("°C".to_string())),
            Some("F") => Ok(Value::String("°F".to_string())),
            _ => Err(Invalid::new("invalid temperature unit (expected C or F)")),
        }
    })
}

/// Unit system preset name, normalized
pub fn unit_system() -> Schema {
    Schema::func("unit_system", |v| {
        let name = v.as_str().ok_or_else(|| Invalid::new("expected str"))?;
        ha_core::validate_unit_system(name)
            .map(|n| Value::String(n.to_string()))
            .map_err(|e| Invalid::new(e.to_string()))
    })
}

/// Mapping or null, null becoming `{}`
pub fn dict_or_empty() -> Schema {
    Schema::func_with_shape("dict", SchemaShape::Mapping, |v| match v {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        Value::Mapping(_) => Ok(v.clone()),
        _ => Err(Invalid::new("expected a dictionary")),
    })
}
