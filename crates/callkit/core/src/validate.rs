//! Argument validation against an input schema.
//!
//! Validation never stops at the first problem: every missing field, type
//! mismatch and constraint violation is collected and returned together.

use crate::descriptor::{
    Definitions, PrimitiveKind, RecordDescriptor, TypeDescriptor, TypeKind, number_value,
};
use crate::error::ValidationFailed;
use crate::schema::InputSchema;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// What to do with fields the schema does not declare.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFields {
    /// Drop them silently.
    #[default]
    Ignore,
    /// Report each one as an error.
    Reject,
}

/// The rule a value violated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationErrorKind {
    MissingRequired,
    TypeMismatch,
    UnknownField,
    Enum,
    Minimum,
    ExclusiveMinimum,
    Maximum,
    ExclusiveMaximum,
    MinLength,
    MaxLength,
    Pattern,
    MinItems,
    MaxItems,
}

/// A single violation, located by field path (`a.b`, `items[2]`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        path: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validated arguments, ordered like the input schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Arguments {
    values: IndexMap<String, Value>,
}

/// Failure to decode a validated argument into a Rust type.
#[derive(Error, Debug)]
pub enum ArgumentError {
    #[error("missing argument `{0}`")]
    Missing(String),

    #[error("argument `{name}` could not be decoded: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Raw value of an argument.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Decode an argument without consuming it.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArgumentError> {
        decode(name, self.values.get(name).cloned())
    }

    /// Decode and remove an argument. An absent argument decodes from
    /// `null`, so `Option` targets yield `None`.
    pub fn take<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, ArgumentError> {
        decode(name, self.values.shift_remove(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values.into_iter().collect()
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: Option<Value>) -> Result<T, ArgumentError> {
    match value {
        Some(value) => serde_json::from_value(value).map_err(|source| ArgumentError::Decode {
            name: name.to_string(),
            source,
        }),
        None => serde_json::from_value(Value::Null)
            .map_err(|_| ArgumentError::Missing(name.to_string())),
    }
}

impl IntoIterator for Arguments {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl FromIterator<(String, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Checks a candidate argument mapping against an input record.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    record: &'a RecordDescriptor,
    definitions: &'a Definitions,
    unknown_fields: UnknownFields,
}

impl<'a> Validator<'a> {
    pub fn new(input: &'a InputSchema) -> Self {
        Self::for_record(input.record(), input.definitions())
    }

    /// Validator for any record whose references resolve in `definitions`.
    pub fn for_record(record: &'a RecordDescriptor, definitions: &'a Definitions) -> Self {
        Self {
            record,
            definitions,
            unknown_fields: UnknownFields::default(),
        }
    }

    pub fn mode(mut self, unknown_fields: UnknownFields) -> Self {
        self.unknown_fields = unknown_fields;
        self
    }

    /// Validate `input`, filling defaults for omitted optional fields.
    pub fn validate(&self, input: &Map<String, Value>) -> Result<Arguments, ValidationFailed> {
        let mut errors = Vec::new();
        let fields = self.fields(self.record, input, "", Coercion::Lax, &mut errors);
        if errors.is_empty() {
            Ok(fields.into_iter().collect())
        } else {
            Err(ValidationFailed::new(errors))
        }
    }

    /// Validate a single value against a descriptor.
    pub fn validate_value(
        &self,
        ty: &TypeDescriptor,
        value: &Value,
    ) -> Result<Value, ValidationFailed> {
        let mut errors = Vec::new();
        match self.check(ty, value, "", Coercion::Lax, &mut errors) {
            Some(v) if errors.is_empty() => Ok(v),
            _ => Err(ValidationFailed::new(errors)),
        }
    }

    fn fields(
        &self,
        record: &RecordDescriptor,
        input: &Map<String, Value>,
        path: &str,
        coercion: Coercion,
        errors: &mut Vec<ValidationError>,
    ) -> Map<String, Value> {
        for name in &record.required {
            if !input.contains_key(name) && record.fields.contains_key(name) {
                errors.push(ValidationError::new(
                    join(path, name),
                    ValidationErrorKind::MissingRequired,
                    "field required",
                ));
            }
        }

        let mut out = Map::new();
        for (name, field) in &record.fields {
            match input.get(name) {
                Some(value) => {
                    let field_path = join(path, name);
                    if let Some(v) = self.check(&field.ty, value, &field_path, coercion, errors) {
                        out.insert(name.clone(), v);
                    }
                }
                None => {
                    if let Some(default) = &field.default {
                        out.insert(name.clone(), default.clone());
                    }
                }
            }
        }

        if record.closed || self.unknown_fields == UnknownFields::Reject {
            for name in input.keys().filter(|k| !record.fields.contains_key(*k)) {
                errors.push(ValidationError::new(
                    join(path, name),
                    ValidationErrorKind::UnknownField,
                    "extra fields not permitted",
                ));
            }
        }
        out
    }

    /// Check one value, pushing violations. Returns the coerced value when
    /// the shape matched; constraint violations are reported but the value
    /// is still returned.
    fn check(
        &self,
        ty: &TypeDescriptor,
        value: &Value,
        path: &str,
        coercion: Coercion,
        errors: &mut Vec<ValidationError>,
    ) -> Option<Value> {
        let coerced = match &ty.kind {
            TypeKind::Any => Some(value.clone()),
            TypeKind::Primitive(kind) => coerce(*kind, value, coercion),
            TypeKind::Optional(inner) => {
                if value.is_null() {
                    return Some(Value::Null);
                }
                return self.check(inner, value, path, coercion, errors);
            }
            TypeKind::Enum(allowed) => {
                if let Some(found) = allowed.iter().find(|a| literal_eq(a, value)) {
                    Some(found.clone())
                } else {
                    errors.push(ValidationError::new(
                        path,
                        ValidationErrorKind::Enum,
                        format!("input should be one of {}", render_literals(allowed)),
                    ));
                    return None;
                }
            }
            TypeKind::Sequence(item) => {
                let Value::Array(items) = value else {
                    return mismatch(path, ty, errors);
                };
                let mut out = Vec::with_capacity(items.len());
                let before = errors.len();
                for (i, v) in items.iter().enumerate() {
                    let item_path = format!("{path}[{i}]");
                    if let Some(v) = self.check(item, v, &item_path, coercion, errors) {
                        out.push(v);
                    }
                }
                if errors.len() > before {
                    return None;
                }
                Some(Value::Array(out))
            }
            TypeKind::Mapping { key, value: inner } => {
                let Value::Object(entries) = value else {
                    return mismatch(path, ty, errors);
                };
                let before = errors.len();
                let mut out = Map::new();
                for (k, v) in entries {
                    let entry_path = join(path, k);
                    if *key == PrimitiveKind::Integer && k.parse::<i64>().is_err() {
                        errors.push(ValidationError::new(
                            entry_path,
                            ValidationErrorKind::TypeMismatch,
                            "key should be a valid integer",
                        ));
                        continue;
                    }
                    if let Some(v) = self.check(inner, v, &entry_path, coercion, errors) {
                        out.insert(k.clone(), v);
                    }
                }
                if errors.len() > before {
                    return None;
                }
                Some(Value::Object(out))
            }
            TypeKind::Union(variants) => self.union(variants, value, path, coercion, errors, ty),
            TypeKind::Record(record) => self.record(record, value, path, coercion, errors, ty),
            TypeKind::Reference(name) => match self.definitions.get(name) {
                Some(record) => self.record(record, value, path, coercion, errors, ty),
                None => {
                    errors.push(ValidationError::new(
                        path,
                        ValidationErrorKind::TypeMismatch,
                        format!("unknown definition `{name}`"),
                    ));
                    return None;
                }
            },
        };

        let Some(coerced) = coerced else {
            if matches!(ty.kind, TypeKind::Primitive(_)) {
                return mismatch(path, ty, errors);
            }
            return None;
        };
        if let Some(violation) = first_violation(ty, &coerced, path) {
            errors.push(violation);
        }
        Some(coerced)
    }

    fn record(
        &self,
        record: &RecordDescriptor,
        value: &Value,
        path: &str,
        coercion: Coercion,
        errors: &mut Vec<ValidationError>,
        ty: &TypeDescriptor,
    ) -> Option<Value> {
        let Value::Object(input) = value else {
            return mismatch(path, ty, errors);
        };
        let before = errors.len();
        let out = self.fields(record, input, path, coercion, errors);
        (errors.len() == before).then_some(Value::Object(out))
    }

    fn union(
        &self,
        variants: &[TypeDescriptor],
        value: &Value,
        path: &str,
        coercion: Coercion,
        errors: &mut Vec<ValidationError>,
        ty: &TypeDescriptor,
    ) -> Option<Value> {
        let passes: &[Coercion] = match coercion {
            Coercion::Strict => &[Coercion::Strict],
            Coercion::Lax => &[Coercion::Strict, Coercion::Lax],
        };
        for pass in passes {
            for variant in variants {
                let mut scratch = Vec::new();
                if let Some(v) = self.check(variant, value, path, *pass, &mut scratch)
                    && scratch.is_empty()
                {
                    return Some(v);
                }
            }
        }
        mismatch(path, ty, errors)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Coercion {
    Strict,
    Lax,
}

fn coerce(kind: PrimitiveKind, value: &Value, coercion: Coercion) -> Option<Value> {
    let lax = coercion == Coercion::Lax;
    match (kind, value) {
        (PrimitiveKind::Null, Value::Null) => Some(Value::Null),
        (PrimitiveKind::String, Value::String(_)) => Some(value.clone()),
        (PrimitiveKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (PrimitiveKind::Boolean, Value::String(s)) if lax => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (PrimitiveKind::Boolean, Value::Number(n)) if lax => match n.as_f64() {
            Some(v) if v == 0.0 => Some(Value::Bool(false)),
            Some(v) if v == 1.0 => Some(Value::Bool(true)),
            _ => None,
        },
        (PrimitiveKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
            Some(value.clone())
        }
        (PrimitiveKind::Integer, Value::Number(n)) if lax => n
            .as_f64()
            .filter(|v| v.fract() == 0.0 && v.abs() < 9_007_199_254_740_992.0)
            .map(number_value),
        (PrimitiveKind::Integer, Value::String(s)) if lax => s
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| s.parse::<u64>().map(Value::from))
            .ok(),
        (PrimitiveKind::Number, Value::Number(_)) => Some(value.clone()),
        (PrimitiveKind::Number, Value::String(s)) if lax => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn literal_eq(allowed: &Value, value: &Value) -> bool {
    match (allowed, value) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => allowed == value,
    }
}

fn render_literals(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn mismatch(path: &str, ty: &TypeDescriptor, errors: &mut Vec<ValidationError>) -> Option<Value> {
    errors.push(ValidationError::new(
        path,
        ValidationErrorKind::TypeMismatch,
        format!("input should be a valid {}", ty.shape_name()),
    ));
    None
}

/// First violated constraint, checked in a fixed order.
fn first_violation(ty: &TypeDescriptor, value: &Value, path: &str) -> Option<ValidationError> {
    use ValidationErrorKind as K;
    let c = &ty.constraints;
    let violation = |kind, message: String| Some(ValidationError::new(path, kind, message));

    if let (Some(range), Value::Number(n)) = (ty.range, value)
        && let Some(v) = n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
    {
        if v < range.min {
            return violation(
                K::Minimum,
                format!("input should be greater than or equal to {}", range.min),
            );
        }
        if v > range.max {
            return violation(
                K::Maximum,
                format!("input should be less than or equal to {}", range.max),
            );
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = c.minimum.filter(|m| n < *m) {
            return violation(
                K::Minimum,
                format!("input should be greater than or equal to {}", number_value(min)),
            );
        }
        if let Some(min) = c.exclusive_minimum.filter(|m| n <= *m) {
            return violation(
                K::ExclusiveMinimum,
                format!("input should be greater than {}", number_value(min)),
            );
        }
        if let Some(max) = c.maximum.filter(|m| n > *m) {
            return violation(
                K::Maximum,
                format!("input should be less than or equal to {}", number_value(max)),
            );
        }
        if let Some(max) = c.exclusive_maximum.filter(|m| n >= *m) {
            return violation(
                K::ExclusiveMaximum,
                format!("input should be less than {}", number_value(max)),
            );
        }
    }

    if let Value::String(s) = value {
        let len = s.chars().count() as u64;
        if let Some(min) = c.min_length.filter(|m| len < *m) {
            return violation(
                K::MinLength,
                format!("string should have at least {min} characters"),
            );
        }
        if let Some(max) = c.max_length.filter(|m| len > *m) {
            return violation(
                K::MaxLength,
                format!("string should have at most {max} characters"),
            );
        }
        if let Some(pattern) = c.pattern.as_ref().filter(|p| !p.is_match(s)) {
            return violation(
                K::Pattern,
                format!("string should match pattern '{}'", pattern.as_str()),
            );
        }
    }

    if let Value::Array(items) = value {
        let len = items.len() as u64;
        if let Some(min) = c.min_items.filter(|m| len < *m) {
            return violation(K::MinItems, format!("list should have at least {min} items"));
        }
        if let Some(max) = c.max_items.filter(|m| len > *m) {
            return violation(K::MaxItems, format!("list should have at most {max} items"));
        }
    }
    None
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}
