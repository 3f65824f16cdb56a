//! Declarative configuration schemas
//!
//! A [`Schema`] both validates and normalizes a configuration value. Errors
//! carry the path of the offending node so they can be attributed to a file
//! and line. Every schema also declares its [`SchemaShape`], which is what
//! package merging uses to decide between list and mapping merges.

use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::annotation::{key_to_string, ConfigPath, PathSegment};

/// Message for keys not declared by a strict mapping schema
pub const MSG_EXTRA_KEYS: &str = "extra keys not allowed";

/// Message for missing required keys
pub const MSG_REQUIRED_KEY: &str = "required key not provided";

const ERROR_TYPE_DICT_VALUE: &str = "dictionary value";

/// A single validation failure
#[derive(Debug, Clone, PartialEq)]
pub struct Invalid {
    pub message: String,
    /// Path from the validated root to the offending node
    pub path: ConfigPath,
    /// What kind of node failed, e.g. `dictionary value`
    pub error_type: Option<String>,
}

impl Invalid {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
            error_type: None,
        }
    }

    /// Set the path of the failure
    pub fn at(mut self, path: ConfigPath) -> Self {
        self.path = path;
        self
    }

    fn prefixed(mut self, prefix: &[PathSegment]) -> Self {
        let mut path = prefix.to_vec();
        path.append(&mut self.path);
        self.path = path;
        self
    }
}

impl fmt::Display for Invalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(error_type) = &self.error_type {
            write!(f, " for {}", error_type)?;
        }
        if !self.path.is_empty() {
            f.write_str(" @ data")?;
            for segment in &self.path {
                match segment {
                    PathSegment::Key(key) => write!(f, "['{}']", key)?,
                    PathSegment::Index(index) => write!(f, "[{}]", index)?,
                }
            }
        }
        Ok(())
    }
}

impl std::error::Error for Invalid {}

/// Outcome of a failed validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("{0}")]
    Invalid(Invalid),
    #[error("{}", first_message(.0))]
    Multiple(Vec<Invalid>),
}

fn first_message(errors: &[Invalid]) -> String {
    errors.first().map(ToString::to_string).unwrap_or_default()
}

impl SchemaError {
    /// All individual failures
    pub fn errors(&self) -> &[Invalid] {
        match self {
            SchemaError::Invalid(invalid) => std::slice::from_ref(invalid),
            SchemaError::Multiple(errors) => errors,
        }
    }

    fn from_errors(mut errors: Vec<Invalid>) -> Self {
        if errors.len() == 1 {
            SchemaError::Invalid(errors.remove(0))
        } else {
            SchemaError::Multiple(errors)
        }
    }
}

impl From<Invalid> for SchemaError {
    fn from(invalid: Invalid) -> Self {
        SchemaError::Invalid(invalid)
    }
}

/// Structural shape a schema accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaShape {
    List,
    Mapping,
    Scalar,
    Unknown,
}

/// What a mapping schema does with undeclared keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extra {
    #[default]
    Prevent,
    Allow,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Required,
    Optional,
    Remove,
}

/// Validation function wrapped by [`Schema::func`]
pub type ValidatorFn = Arc<dyn Fn(&Value) -> Result<Value, Invalid> + Send + Sync>;

/// A declarative validator
#[derive(Clone)]
pub enum Schema {
    /// Accept any value unchanged
    Any,
    /// Accept only null
    Null,
    Func {
        name: &'static str,
        shape: SchemaShape,
        validate: ValidatorFn,
    },
    Map(MapSchema),
    /// Every item validated against the inner schema
    Seq(Box<Schema>),
    /// Chain: the output of each schema feeds the next
    All(Vec<Schema>),
    /// First schema that accepts the value wins
    AnyOf(Vec<Schema>),
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Any => f.write_str("Any"),
            Schema::Null => f.write_str("Null"),
            Schema::Func { name, .. } => write!(f, "Func({})", name),
            Schema::Map(map) => map.fmt(f),
            Schema::Seq(item) => f.debug_list().entry(item).finish(),
            Schema::All(schemas) => f.debug_tuple("All").field(schemas).finish(),
            Schema::AnyOf(schemas) => f.debug_tuple("AnyOf").field(schemas).finish(),
        }
    }
}

impl Schema {
    /// Scalar validator from a function
    pub fn func<F>(name: &'static str, validate: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, Invalid> + Send + Sync + 'static,
    {
        Self::func_with_shape(name, SchemaShape::Scalar, validate)
    }

    /// Validator from a function with an explicit shape
    pub fn func_with_shape<F>(name: &'static str, shape: SchemaShape, validate: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, Invalid> + Send + Sync + 'static,
    {
        Schema::Func {
            name,
            shape,
            validate: Arc::new(validate),
        }
    }

    pub fn seq(item: impl Into<Schema>) -> Self {
        Schema::Seq(Box::new(item.into()))
    }

    pub fn all(schemas: Vec<Schema>) -> Self {
        Schema::All(schemas)
    }

    pub fn any_of(schemas: Vec<Schema>) -> Self {
        Schema::AnyOf(schemas)
    }

    /// Validate and normalize `value`
    pub fn validate(&self, value: &Value) -> Result<Value, SchemaError> {
        let mut path = Vec::new();
        self.check(value, &mut path).map_err(SchemaError::from_errors)
    }

    /// Declared shape of accepted values
    pub fn shape(&self) -> SchemaShape {
        match self {
            Schema::Any => SchemaShape::Unknown,
            Schema::Null => SchemaShape::Scalar,
            Schema::Func { shape, .. } => *shape,
            Schema::Map(_) => SchemaShape::Mapping,
            Schema::Seq(_) => SchemaShape::List,
            Schema::All(schemas) => schemas
                .iter()
                .map(Schema::shape)
                .find(|shape| *shape != SchemaShape::Unknown)
                .unwrap_or(SchemaShape::Unknown),
            Schema::AnyOf(schemas) => {
                let mut shapes = schemas.iter().map(Schema::shape);
                match shapes.next() {
                    Some(first) if shapes.all(|s| s == first) => first,
                    _ => SchemaShape::Unknown,
                }
            }
        }
    }

    fn check(&self, value: &Value, path: &mut ConfigPath) -> Result<Value, Vec<Invalid>> {
        match self {
            Schema::Any => Ok(value.clone()),
            Schema::Null => {
                if value.is_null() {
                    Ok(Value::Null)
                } else {
                    Err(vec![Invalid::new("expected None").at(path.clone())])
                }
            }
            Schema::Func { validate, .. } => validate(value).map_err(|e| vec![e.prefixed(path)]),
            Schema::Map(map) => map.check(value, path),
            Schema::Seq(item) => {
                let seq = value
                    .as_sequence()
                    .ok_or_else(|| vec![Invalid::new("expected a list").at(path.clone())])?;
                let mut out = Vec::with_capacity(seq.len());
                let mut errors = Vec::new();
                for (i, v) in seq.iter().enumerate() {
                    path.push(PathSegment::Index(i));
                    match item.check(v, path) {
                        Ok(v) => out.push(v),
                        Err(e) => errors.extend(e),
                    }
                    path.pop();
                }
                if errors.is_empty() {
                    Ok(Value::Sequence(out))
                } else {
                    Err(errors)
                }
            }
            Schema::All(schemas) => {
                let mut current = value.clone();
                for schema in schemas {
                    current = schema.check(&current, path)?;
                }
                Ok(current)
            }
            Schema::AnyOf(schemas) => {
                let mut deepest: Option<Vec<Invalid>> = None;
                for schema in schemas {
                    match schema.check(value, path) {
                        Ok(v) => return Ok(v),
                        Err(errors) => {
                            let better = deepest
                                .as_ref()
                                .map_or(true, |best| max_depth(&errors) > max_depth(best));
                            if better {
                                deepest = Some(errors);
                            }
                        }
                    }
                }
                Err(deepest
                    .unwrap_or_else(|| vec![Invalid::new("no valid value").at(path.clone())]))
            }
        }
    }
}

fn max_depth(errors: &[Invalid]) -> usize {
    errors.iter().map(|e| e.path.len()).max().unwrap_or(0)
}

/// A declared key of a [`MapSchema`]
#[derive(Debug, Clone)]
pub struct Field {
    key: String,
    presence: Presence,
    default: Option<Value>,
    schema: Schema,
    msg: Option<String>,
}

impl Field {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value used when the key is absent
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Mapping schema with declared keys
///
/// Keys are optional unless added with [`MapSchema::required`]. Output keys
/// keep input order; defaults for absent keys are appended.
#[derive(Debug, Clone, Default)]
pub struct MapSchema {
    fields: Vec<Field>,
    keyed: Option<Box<(Schema, Schema)>>,
    extra: Extra,
}

impl MapSchema {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_field(mut self, field: Field) -> Self {
        self.fields.retain(|f| f.key != field.key);
        self.fields.push(field);
        self
    }

    pub fn required(self, key: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.with_field(Field {
            key: key.into(),
            presence: Presence::Required,
            default: None,
            schema: schema.into(),
            msg: None,
        })
    }

    /// Required key with a custom message when missing
    pub fn required_msg(
        self,
        key: impl Into<String>,
        schema: impl Into<Schema>,
        msg: impl Into<String>,
    ) -> Self {
        self.with_field(Field {
            key: key.into(),
            presence: Presence::Required,
            default: None,
            schema: schema.into(),
            msg: Some(msg.into()),
        })
    }

    pub fn optional(self, key: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.with_field(Field {
            key: key.into(),
            presence: Presence::Optional,
            default: None,
            schema: schema.into(),
            msg: None,
        })
    }

    /// Optional key; `default` is validated and inserted when absent
    pub fn optional_default(
        self,
        key: impl Into<String>,
        default: Value,
        schema: impl Into<Schema>,
    ) -> Self {
        self.with_field(Field {
            key: key.into(),
            presence: Presence::Optional,
            default: Some(default),
            schema: schema.into(),
            msg: None,
        })
    }

    /// Key accepted on input but dropped from the output
    pub fn remove(self, key: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.with_field(Field {
            key: key.into(),
            presence: Presence::Remove,
            default: None,
            schema: schema.into(),
            msg: None,
        })
    }

    /// Schema for keys that are not declared
    pub fn keys(mut self, key_schema: impl Into<Schema>, value_schema: impl Into<Schema>) -> Self {
        self.keyed = Some(Box::new((key_schema.into(), value_schema.into())));
        self
    }

    pub fn extra(mut self, extra: Extra) -> Self {
        self.extra = extra;
        self
    }

    /// Add the declared keys of `other`, replacing keys declared in both
    pub fn extend(self, other: MapSchema) -> Self {
        let mut merged = other.fields.into_iter().fold(self, MapSchema::with_field);
        if other.keyed.is_some() {
            merged.keyed = other.keyed;
        }
        merged
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }

    fn check(&self, value: &Value, path: &mut ConfigPath) -> Result<Value, Vec<Invalid>> {
        let map = match value {
            Value::Mapping(map) => map,
            _ => return Err(vec![Invalid::new("expected a dictionary").at(path.clone())]),
        };

        let mut out = Mapping::new();
        let mut errors = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for (k, v) in map {
            let key = key_to_string(k);
            path.push(PathSegment::Key(key.clone()));

            if let Some(field) = self.field(&key) {
                seen.insert(field.key.as_str());
                if field.presence != Presence::Remove {
                    match field.schema.check(v, path) {
                        Ok(validated) => {
                            out.insert(k.clone(), validated);
                        }
                        Err(e) => errors.extend(as_value_errors(e, path.len())),
                    }
                }
            } else if let Some(keyed) = &self.keyed {
                let (key_schema, value_schema) = keyed.as_ref();
                match key_schema.check(k, path) {
                    Ok(validated_key) => match value_schema.check(v, path) {
                        Ok(validated) => {
                            out.insert(validated_key, validated);
                        }
                        Err(e) => errors.extend(as_value_errors(e, path.len())),
                    },
                    Err(e) => errors.extend(e),
                }
            } else {
                match self.extra {
                    Extra::Prevent => errors.push(Invalid::new(MSG_EXTRA_KEYS).at(path.clone())),
                    Extra::Allow => {
                        out.insert(k.clone(), v.clone());
                    }
                    Extra::Remove => {}
                }
            }

            path.pop();
        }

        for field in &self.fields {
            if seen.contains(field.key.as_str()) {
                continue;
            }
            path.push(PathSegment::Key(field.key.clone()));
            match (field.presence, &field.default) {
                (Presence::Required, _) => {
                    let msg = field.msg.as_deref().unwrap_or(MSG_REQUIRED_KEY);
                    errors.push(Invalid::new(msg).at(path.clone()));
                }
                (Presence::Optional, Some(default)) => match field.schema.check(default, path) {
                    Ok(validated) => {
                        out.insert(Value::String(field.key.clone()), validated);
                    }
                    Err(e) => errors.extend(e),
                },
                _ => {}
            }
            path.pop();
        }

        if errors.is_empty() {
            Ok(Value::Mapping(out))
        } else {
            Err(errors)
        }
    }
}

/// Tag failures of a mapping value itself as `dictionary value`
fn as_value_errors(errors: Vec<Invalid>, key_depth: usize) -> impl Iterator<Item = Invalid> {
    errors.into_iter().map(move |mut e| {
        if e.path.len() <= key_depth {
            e.error_type = Some(ERROR_TYPE_DICT_VALUE.to_string());
        }
        e
    })
}

impl From<MapSchema> for Schema {
    fn from(map: MapSchema) -> Self {
        Schema::Map(map)
    }
}

/// Whole-configuration schema of an integration
///
/// Validates the complete configuration and knows which key holds the
/// integration's own section, so the shape of that section can be reported
/// without inspecting the schema's internals.
#[derive(Debug, Clone)]
pub struct ComponentSchema {
    domain: String,
    schema: Schema,
    shape: Option<SchemaShape>,
}

impl ComponentSchema {
    pub fn new(domain: impl Into<String>, schema: impl Into<Schema>) -> Self {
        Self {
            domain: domain.into(),
            schema: schema.into(),
            shape: None,
        }
    }

    /// Declare the shape of the domain section explicitly
    pub fn with_shape(mut self, shape: SchemaShape) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn validate(&self, config: &Value) -> Result<Value, SchemaError> {
        self.schema.validate(config)
    }

    /// Shape of the domain section
    ///
    /// An explicit shape wins. Otherwise a declared default is normalized
    /// through the schema and its result classified; without a default the
    /// declared structure of the domain key decides.
    pub fn domain_shape(&self) -> SchemaShape {
        if let Some(shape) = self.shape {
            return shape;
        }

        let map = match &self.schema {
            Schema::Map(map) => map,
            Schema::All(schemas) => match schemas.iter().find_map(|s| match s {
                Schema::Map(map) => Some(map),
                _ => None,
            }) {
                Some(map) => map,
                None => return SchemaShape::Unknown,
            },
            _ => return SchemaShape::Unknown,
        };

        let Some(field) = map.field(&self.domain) else {
            return SchemaShape::Unknown;
        };

        if let Some(default) = field.default() {
            let mut probe = Mapping::new();
            probe.insert(Value::String(self.domain.clone()), default.clone());
            return match self.schema.validate(&Value::Mapping(probe)) {
                Ok(normalized) => match normalized.get(self.domain.as_str()) {
                    Some(Value::Mapping(_)) => SchemaShape::Mapping,
                    Some(Value::Sequence(_)) => SchemaShape::List,
                    _ => SchemaShape::Unknown,
                },
                Err(_) => SchemaShape::Unknown,
            };
        }

        field.schema().shape()
    }
}
