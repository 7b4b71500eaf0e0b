//! Type descriptors and the compiler that builds them.
//!
//! An [`Annotation`] is a JSON Schema node, produced by `schemars` for a Rust
//! type or written by hand. [`DescriptorCompiler`] normalizes it into a
//! [`TypeDescriptor`]. Named object shapes are registered once in a shared
//! [`Definitions`] table and referenced by name afterwards, so repeated and
//! recursive records never get inlined twice.

use crate::error::SchemaError;
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use schemars::generate::{SchemaGenerator, SchemaSettings};
use schemars::{JsonSchema, Schema};
use serde_json::{Map, Value, json};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Names reserved for the synthesized top-level schemas.
pub(crate) const RESERVED_DEFINITIONS: [&str; 2] = ["Input", "Output"];

/// Keywords whose semantics the compiler does not model.
const UNSUPPORTED_KEYWORDS: [&str; 8] = [
    "not",
    "if",
    "then",
    "else",
    "patternProperties",
    "dependentSchemas",
    "$dynamicRef",
    "prefixItems",
];

/// Pattern emitted as `propertyNames` for integer-keyed mappings.
const INTEGER_KEY_PATTERN: &str = "^-?[0-9]+$";

/// Scalar kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Integer,
    Number,
    String,
    Boolean,
    Null,
}

impl PrimitiveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Number => "number",
            PrimitiveKind::String => "string",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Null => "null",
        }
    }

    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(PrimitiveKind::Integer),
            "number" => Some(PrimitiveKind::Number),
            "string" => Some(PrimitiveKind::String),
            "boolean" => Some(PrimitiveKind::Boolean),
            "null" => Some(PrimitiveKind::Null),
            _ => None,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, PrimitiveKind::Integer | PrimitiveKind::Number)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled string pattern. Compares by source text.
#[derive(Clone, Debug)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, SchemaError> {
        Regex::new(pattern)
            .map(Pattern)
            .map_err(|e| SchemaError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Constraint attributes attached to a descriptor.
///
/// Numeric bounds apply to integer and number primitives, length and
/// pattern to strings, item counts to sequences.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Constraints {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub pattern: Option<Pattern>,
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self == &Constraints::default()
    }

    /// Overlay `other` on top of `self`; set values in `other` win.
    pub fn merge(&mut self, other: &Constraints) {
        fn pick<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        pick(&mut self.minimum, &other.minimum);
        pick(&mut self.maximum, &other.maximum);
        pick(&mut self.exclusive_minimum, &other.exclusive_minimum);
        pick(&mut self.exclusive_maximum, &other.exclusive_maximum);
        pick(&mut self.min_length, &other.min_length);
        pick(&mut self.max_length, &other.max_length);
        pick(&mut self.pattern, &other.pattern);
        pick(&mut self.min_items, &other.min_items);
        pick(&mut self.max_items, &other.max_items);
    }

    fn first_numeric(&self) -> Option<&'static str> {
        [
            (self.minimum.is_some(), "minimum"),
            (self.maximum.is_some(), "maximum"),
            (self.exclusive_minimum.is_some(), "exclusiveMinimum"),
            (self.exclusive_maximum.is_some(), "exclusiveMaximum"),
        ]
        .into_iter()
        .find_map(|(set, name)| set.then_some(name))
    }

    fn first_string(&self) -> Option<&'static str> {
        [
            (self.min_length.is_some(), "minLength"),
            (self.max_length.is_some(), "maxLength"),
            (self.pattern.is_some(), "pattern"),
        ]
        .into_iter()
        .find_map(|(set, name)| set.then_some(name))
    }

    fn first_items(&self) -> Option<&'static str> {
        [
            (self.min_items.is_some(), "minItems"),
            (self.max_items.is_some(), "maxItems"),
        ]
        .into_iter()
        .find_map(|(set, name)| set.then_some(name))
    }

    fn check_applicable(&self, ty: &TypeDescriptor) -> Result<(), SchemaError> {
        let (numeric, string, items) = match &ty.kind {
            TypeKind::Primitive(p) if p.is_numeric() => (true, false, false),
            TypeKind::Primitive(PrimitiveKind::String) => (false, true, false),
            TypeKind::Sequence(_) => (false, false, true),
            _ => (false, false, false),
        };
        let offending = [
            (numeric, self.first_numeric()),
            (string, self.first_string()),
            (items, self.first_items()),
        ]
        .into_iter()
        .find_map(|(allowed, found)| if allowed { None } else { found });

        match offending {
            Some(constraint) => Err(SchemaError::InapplicableConstraint {
                constraint,
                shape: ty.shape_name(),
            }),
            None => Ok(()),
        }
    }

    fn read(obj: &Map<String, Value>) -> Result<Self, SchemaError> {
        let float = |key: &str| obj.get(key).and_then(Value::as_f64);
        let count = |key: &str| obj.get(key).and_then(Value::as_u64);
        let pattern = match obj.get("pattern").and_then(Value::as_str) {
            Some(p) => Some(Pattern::new(p)?),
            None => None,
        };
        Ok(Constraints {
            minimum: float("minimum"),
            maximum: float("maximum"),
            exclusive_minimum: float("exclusiveMinimum"),
            exclusive_maximum: float("exclusiveMaximum"),
            min_length: count("minLength"),
            max_length: count("maxLength"),
            pattern,
            min_items: count("minItems"),
            max_items: count("maxItems"),
        })
    }

    fn write(&self, obj: &mut Map<String, Value>) {
        let floats = [
            ("minimum", self.minimum),
            ("maximum", self.maximum),
            ("exclusiveMinimum", self.exclusive_minimum),
            ("exclusiveMaximum", self.exclusive_maximum),
        ];
        for (key, value) in floats {
            if let Some(v) = value {
                obj.insert(key.into(), number_value(v));
            }
        }
        let counts = [
            ("minLength", self.min_length),
            ("maxLength", self.max_length),
            ("minItems", self.min_items),
            ("maxItems", self.max_items),
        ];
        for (key, value) in counts {
            if let Some(v) = value {
                obj.insert(key.into(), Value::from(v));
            }
        }
        if let Some(p) = &self.pattern {
            obj.insert("pattern".into(), Value::String(p.as_str().to_string()));
        }
    }
}

/// Render an `f64` bound, preferring an integer literal when exact.
pub(crate) fn number_value(v: f64) -> Value {
    const SAFE: f64 = 9_007_199_254_740_992.0;
    if v.is_finite() && v.fract() == 0.0 && v.abs() < SAFE {
        Value::from(v as i64)
    } else {
        Value::from(v)
    }
}

/// The shape of a descriptor.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    /// Any JSON value; no constraints emitted.
    Any,
    Primitive(PrimitiveKind),
    Optional(Box<TypeDescriptor>),
    Sequence(Box<TypeDescriptor>),
    Mapping {
        key: PrimitiveKind,
        value: Box<TypeDescriptor>,
    },
    Enum(Vec<Value>),
    Union(Vec<TypeDescriptor>),
    Record(RecordDescriptor),
    /// A record registered in the enclosing [`Definitions`].
    Reference(String),
}

/// Bounds of a fixed-width integer, taken from the schema's `format`.
/// Checked during validation but not rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntegerRange {
    pub min: i128,
    pub max: i128,
}

impl IntegerRange {
    pub fn from_format(format: &str) -> Option<Self> {
        let (min, max) = match format {
            "int8" => (i128::from(i8::MIN), i128::from(i8::MAX)),
            "int16" => (i128::from(i16::MIN), i128::from(i16::MAX)),
            "int32" => (i128::from(i32::MIN), i128::from(i32::MAX)),
            "int64" | "int" => (i128::from(i64::MIN), i128::from(i64::MAX)),
            "uint8" => (0, i128::from(u8::MAX)),
            "uint16" => (0, i128::from(u16::MAX)),
            "uint32" => (0, i128::from(u32::MAX)),
            "uint64" | "uint" => (0, i128::from(u64::MAX)),
            _ => return None,
        };
        Some(Self { min, max })
    }
}

/// Normalized description of a parameter or return type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDescriptor {
    pub kind: TypeKind,
    pub constraints: Constraints,
    pub description: Option<String>,
    pub range: Option<IntegerRange>,
}

impl TypeDescriptor {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            constraints: Constraints::default(),
            description: None,
            range: None,
        }
    }

    pub fn any() -> Self {
        Self::new(TypeKind::Any)
    }

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::new(TypeKind::Primitive(kind))
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        Self::new(TypeKind::Optional(Box::new(inner)))
    }

    pub fn sequence(item: TypeDescriptor) -> Self {
        Self::new(TypeKind::Sequence(Box::new(item)))
    }

    pub fn mapping(key: PrimitiveKind, value: TypeDescriptor) -> Self {
        Self::new(TypeKind::Mapping {
            key,
            value: Box::new(value),
        })
    }

    pub fn enumeration(values: Vec<Value>) -> Self {
        Self::new(TypeKind::Enum(values))
    }

    pub fn union(variants: Vec<TypeDescriptor>) -> Self {
        Self::new(TypeKind::Union(variants))
    }

    pub fn record(record: RecordDescriptor) -> Self {
        Self::new(TypeKind::Record(record))
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(TypeKind::Reference(name.into()))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Whether `null` is an accepted value.
    pub fn is_nullable(&self) -> bool {
        match &self.kind {
            TypeKind::Any | TypeKind::Optional(_) | TypeKind::Primitive(PrimitiveKind::Null) => {
                true
            }
            TypeKind::Enum(values) => values.iter().any(Value::is_null),
            TypeKind::Union(variants) => variants.iter().any(TypeDescriptor::is_nullable),
            _ => false,
        }
    }

    /// Short human-readable name of the shape, used in messages.
    pub fn shape_name(&self) -> String {
        match &self.kind {
            TypeKind::Any => "any value".to_string(),
            TypeKind::Primitive(p) => p.to_string(),
            TypeKind::Optional(inner) => format!("optional {}", inner.shape_name()),
            TypeKind::Sequence(item) => format!("array of {}", item.shape_name()),
            TypeKind::Mapping { value, .. } => format!("map of {}", value.shape_name()),
            TypeKind::Enum(_) => "enum".to_string(),
            TypeKind::Union(_) => "union".to_string(),
            TypeKind::Record(r) => r.title.clone().unwrap_or_else(|| "object".to_string()),
            TypeKind::Reference(name) => name.clone(),
        }
    }

    /// Render as a JSON Schema node.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        match &self.kind {
            TypeKind::Any => {}
            TypeKind::Primitive(p) => {
                obj.insert("type".into(), json!(p.as_str()));
            }
            TypeKind::Optional(inner) => {
                obj.insert("anyOf".into(), json!([inner.to_json(), {"type": "null"}]));
            }
            TypeKind::Sequence(item) => {
                obj.insert("type".into(), json!("array"));
                obj.insert("items".into(), item.to_json());
            }
            TypeKind::Mapping { key, value } => {
                obj.insert("type".into(), json!("object"));
                obj.insert("additionalProperties".into(), value.to_json());
                if *key == PrimitiveKind::Integer {
                    obj.insert(
                        "propertyNames".into(),
                        json!({ "pattern": INTEGER_KEY_PATTERN }),
                    );
                }
            }
            TypeKind::Enum(values) => {
                if let Some(t) = homogeneous_type(values) {
                    obj.insert("type".into(), json!(t));
                }
                obj.insert("enum".into(), Value::Array(values.clone()));
            }
            TypeKind::Union(variants) => {
                let rendered = variants.iter().map(TypeDescriptor::to_json).collect();
                obj.insert("anyOf".into(), Value::Array(rendered));
            }
            TypeKind::Record(record) => record.write_into(&mut obj, false),
            TypeKind::Reference(name) => {
                obj.insert("$ref".into(), json!(format!("#/$defs/{name}")));
            }
        }
        if let Some(description) = &self.description {
            obj.insert("description".into(), json!(description));
        }
        self.constraints.write(&mut obj);
        Value::Object(obj)
    }
}

fn homogeneous_type(values: &[Value]) -> Option<&'static str> {
    let kind = |v: &Value| match v {
        Value::String(_) => Some("string"),
        Value::Bool(_) => Some("boolean"),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some("integer"),
        Value::Number(_) => Some("number"),
        _ => None,
    };
    let first = kind(values.first()?)?;
    values.iter().all(|v| kind(v) == Some(first)).then_some(first)
}

/// One field of a record.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub ty: TypeDescriptor,
    pub default: Option<Value>,
}

impl Field {
    pub fn new(ty: TypeDescriptor) -> Self {
        Self { ty, default: None }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn description(&self) -> Option<&str> {
        self.ty.description.as_deref()
    }
}

/// A structured record: ordered fields plus the set of required names.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordDescriptor {
    pub title: Option<String>,
    pub description: Option<String>,
    pub fields: IndexMap<String, Field>,
    pub required: IndexSet<String>,
    /// Unknown fields are rejected regardless of validation mode.
    pub closed: bool,
}

impl RecordDescriptor {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Append a field; declaration order is preserved.
    pub fn field(mut self, name: impl Into<String>, field: Field, required: bool) -> Self {
        let name = name.into();
        if required {
            self.required.insert(name.clone());
        }
        self.fields.insert(name, field);
        self
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }

    /// Render as a JSON Schema object, optionally tagging each property
    /// with its declaration index as `x-order`.
    pub fn to_json(&self, with_order: bool) -> Value {
        let mut obj = Map::new();
        self.write_into(&mut obj, with_order);
        Value::Object(obj)
    }

    fn write_into(&self, obj: &mut Map<String, Value>, with_order: bool) {
        obj.insert("type".into(), json!("object"));
        if let Some(title) = &self.title {
            obj.insert("title".into(), json!(title));
        }
        if let Some(description) = &self.description {
            obj.insert("description".into(), json!(description));
        }
        let mut properties = Map::new();
        for (order, (name, field)) in self.fields.iter().enumerate() {
            let mut node = field.ty.to_json();
            if let Value::Object(map) = &mut node {
                if let Some(default) = &field.default {
                    map.insert("default".into(), default.clone());
                }
                if with_order {
                    map.insert("x-order".into(), Value::from(order));
                }
            }
            properties.insert(name.clone(), node);
        }
        obj.insert("properties".into(), Value::Object(properties));
        if !self.required.is_empty() {
            let required = self.required.iter().cloned().map(Value::String).collect();
            obj.insert("required".into(), Value::Array(required));
        }
        if self.closed {
            obj.insert("additionalProperties".into(), Value::Bool(false));
        }
    }
}

/// Shared table of named record shapes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Definitions {
    records: IndexMap<String, RecordDescriptor>,
}

impl Definitions {
    pub fn get(&self, name: &str) -> Option<&RecordDescriptor> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecordDescriptor)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render every definition, in registration order.
    pub fn to_json(&self) -> Map<String, Value> {
        self.records
            .iter()
            .map(|(name, record)| (name.clone(), record.to_json(false)))
            .collect()
    }
}

/// A type annotation: a JSON Schema node plus a label used in errors.
#[derive(Clone)]
pub struct Annotation {
    label: Cow<'static, str>,
    source: AnnotationSource,
}

#[derive(Clone)]
enum AnnotationSource {
    Type(fn(&mut SchemaGenerator) -> Schema),
    Schema(Value),
}

fn subschema<T: JsonSchema + ?Sized>(generator: &mut SchemaGenerator) -> Schema {
    generator.subschema_for::<T>()
}

impl Annotation {
    /// Annotation for a Rust type, generated through `schemars`.
    pub fn of<T: JsonSchema + ?Sized>() -> Self {
        Self {
            label: Cow::Borrowed(std::any::type_name::<T>()),
            source: AnnotationSource::Type(subschema::<T>),
        }
    }

    /// Annotation from a hand-written JSON Schema node. A `$defs` table on
    /// the node is used to resolve its references.
    pub fn from_schema(label: impl Into<Cow<'static, str>>, schema: Value) -> Self {
        Self {
            label: label.into(),
            source: AnnotationSource::Schema(schema),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            AnnotationSource::Type(_) => "type",
            AnnotationSource::Schema(_) => "schema",
        };
        f.debug_struct("Annotation")
            .field("label", &self.label)
            .field("source", &source)
            .finish()
    }
}

/// Compiles annotations into descriptors, sharing one definitions table.
///
/// Use one compiler per function so the Input and Output schemas share the
/// same definitions.
pub struct DescriptorCompiler {
    generator: SchemaGenerator,
    /// Source `$defs` keyed by scope and name. Generated types share
    /// [`GENERATED_SCOPE`]; every hand-written schema gets its own scope.
    source_defs: HashMap<(usize, String), Value>,
    aliases: HashMap<(usize, String), String>,
    /// Source name and shape of every registered record.
    origins: HashMap<String, (String, Value)>,
    inlining: HashSet<(usize, String)>,
    scope: usize,
    last_scope: usize,
    definitions: Definitions,
}

const GENERATED_SCOPE: usize = 0;

impl Default for DescriptorCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DescriptorCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorCompiler")
            .field("definitions", &self.definitions)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

impl DescriptorCompiler {
    pub fn new() -> Self {
        Self {
            generator: SchemaSettings::draft2020_12().into_generator(),
            source_defs: HashMap::new(),
            aliases: HashMap::new(),
            origins: HashMap::new(),
            inlining: HashSet::new(),
            scope: GENERATED_SCOPE,
            last_scope: GENERATED_SCOPE,
            definitions: Definitions::default(),
        }
    }

    /// Compile one annotation. `constraints` override any constraint found
    /// in the annotation and land on the innermost non-optional shape.
    pub fn compile(
        &mut self,
        annotation: &Annotation,
        constraints: &Constraints,
    ) -> Result<TypeDescriptor, SchemaError> {
        let schema = match &annotation.source {
            AnnotationSource::Type(generate) => {
                self.scope = GENERATED_SCOPE;
                let schema = generate(&mut self.generator);
                for (name, def) in self.generator.definitions() {
                    self.source_defs
                        .entry((GENERATED_SCOPE, name.clone()))
                        .or_insert_with(|| def.clone());
                }
                schema.as_value().clone()
            }
            AnnotationSource::Schema(value) => {
                self.last_scope += 1;
                self.scope = self.last_scope;
                if let Some(defs) = value.get("$defs").and_then(Value::as_object) {
                    for (name, def) in defs {
                        self.source_defs
                            .insert((self.scope, name.clone()), def.clone());
                    }
                }
                value.clone()
            }
        };
        let mut ty = self.node(annotation.label(), &schema)?;
        apply_constraints(&mut ty, constraints)?;
        Ok(ty)
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    pub fn into_definitions(self) -> Definitions {
        self.definitions
    }

    fn node(&mut self, label: &str, schema: &Value) -> Result<TypeDescriptor, SchemaError> {
        match schema {
            Value::Bool(true) => Ok(TypeDescriptor::any()),
            Value::Bool(false) => Err(SchemaError::unsupported(
                label,
                "the `false` schema accepts no value",
            )),
            Value::Object(obj) => self.object_node(label, obj),
            other => Err(SchemaError::unsupported(
                label,
                format!("schema must be an object or boolean, found {other}"),
            )),
        }
    }

    fn object_node(
        &mut self,
        label: &str,
        obj: &Map<String, Value>,
    ) -> Result<TypeDescriptor, SchemaError> {
        if let Some(keyword) = UNSUPPORTED_KEYWORDS.iter().find(|k| obj.contains_key(**k)) {
            return Err(SchemaError::unsupported(
                label,
                format!("`{keyword}` is not supported"),
            ));
        }
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let constraints = Constraints::read(obj)?;

        let mut ty = if let Some(reference) = obj.get("$ref") {
            let reference = reference
                .as_str()
                .ok_or_else(|| SchemaError::unsupported(label, "`$ref` must be a string"))?;
            self.resolve_ref(label, reference)?
        } else if let Some(all_of) = obj.get("allOf") {
            match all_of.as_array().map(Vec::as_slice) {
                Some([single]) => self.node(label, single)?,
                _ => {
                    return Err(SchemaError::unsupported(
                        label,
                        "`allOf` with more than one schema is not supported",
                    ));
                }
            }
        } else {
            TypeDescriptor::new(self.kind_of(label, obj)?)
        };

        if description.is_some() {
            ty.description = description;
        }
        if let Some(range) = obj
            .get("format")
            .and_then(Value::as_str)
            .and_then(IntegerRange::from_format)
        {
            attach_range(&mut ty, range);
        }
        apply_constraints(&mut ty, &constraints)?;
        Ok(ty)
    }

    fn kind_of(&mut self, label: &str, obj: &Map<String, Value>) -> Result<TypeKind, SchemaError> {
        if let Some(variants) = obj.get("anyOf").or_else(|| obj.get("oneOf")) {
            let variants = variants
                .as_array()
                .ok_or_else(|| SchemaError::unsupported(label, "`anyOf` must be an array"))?;
            return self.variants(label, variants);
        }
        if let Some(values) = obj.get("enum") {
            let values = values
                .as_array()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    SchemaError::unsupported(label, "`enum` must be a non-empty array")
                })?;
            return Ok(enum_kind(values.clone()));
        }
        if let Some(value) = obj.get("const") {
            return Ok(TypeKind::Enum(vec![value.clone()]));
        }
        match obj.get("type") {
            Some(Value::String(name)) => self.single_type(label, name, obj),
            Some(Value::Array(names)) => {
                let mut nullable = false;
                let mut kinds = Vec::new();
                for name in names {
                    let name = name
                        .as_str()
                        .ok_or_else(|| {
                            SchemaError::unsupported(label, "`type` entries must be strings")
                        })?;
                    if name == "null" {
                        nullable = true;
                    } else {
                        kinds.push(TypeDescriptor::new(self.single_type(label, name, obj)?));
                    }
                }
                let inner = match kinds.len() {
                    0 => return Ok(TypeKind::Primitive(PrimitiveKind::Null)),
                    1 => kinds.remove(0),
                    _ => TypeDescriptor::union(kinds),
                };
                Ok(if nullable {
                    TypeKind::Optional(Box::new(inner))
                } else {
                    inner.kind
                })
            }
            Some(other) => Err(SchemaError::unsupported(
                label,
                format!("`type` must be a string or array, found {other}"),
            )),
            None if obj.contains_key("properties") => {
                Ok(TypeKind::Record(self.record(label, obj)?))
            }
            None if obj.contains_key("items") => self.single_type(label, "array", obj),
            None => Ok(TypeKind::Any),
        }
    }

    fn single_type(
        &mut self,
        label: &str,
        name: &str,
        obj: &Map<String, Value>,
    ) -> Result<TypeKind, SchemaError> {
        if let Some(primitive) = PrimitiveKind::from_type_name(name) {
            return Ok(TypeKind::Primitive(primitive));
        }
        match name {
            "array" => {
                let item = match obj.get("items") {
                    None => TypeDescriptor::any(),
                    Some(Value::Array(_)) => {
                        return Err(SchemaError::unsupported(
                            label,
                            "tuple arrays are not supported",
                        ));
                    }
                    Some(items) => self.node(&format!("{label}[]"), items)?,
                };
                Ok(TypeKind::Sequence(Box::new(item)))
            }
            "object" => {
                if obj.contains_key("properties") {
                    return Ok(TypeKind::Record(self.record(label, obj)?));
                }
                match obj.get("additionalProperties") {
                    Some(Value::Bool(false)) => Ok(TypeKind::Record(self.record(label, obj)?)),
                    Some(value) => {
                        let key = mapping_key(label, obj.get("propertyNames"))?;
                        let value = self.node(&format!("{label}{{}}"), value)?;
                        Ok(TypeKind::Mapping {
                            key,
                            value: Box::new(value),
                        })
                    }
                    None => Ok(TypeKind::Mapping {
                        key: mapping_key(label, obj.get("propertyNames"))?,
                        value: Box::new(TypeDescriptor::any()),
                    }),
                }
            }
            other => Err(SchemaError::unsupported(
                label,
                format!("unknown type `{other}`"),
            )),
        }
    }

    fn variants(&mut self, label: &str, variants: &[Value]) -> Result<TypeKind, SchemaError> {
        let mut nullable = false;
        let mut compiled = Vec::new();
        for variant in variants {
            if is_null_schema(variant) {
                nullable = true;
                continue;
            }
            compiled.push(self.node(label, variant)?);
        }

        let inner = match compiled.len() {
            0 => return Ok(TypeKind::Primitive(PrimitiveKind::Null)),
            1 => compiled.remove(0),
            _ if compiled.iter().all(|v| matches!(v.kind, TypeKind::Enum(_))) => {
                let mut merged: Vec<Value> = Vec::new();
                for variant in compiled {
                    if let TypeKind::Enum(values) = variant.kind {
                        for value in values {
                            if !merged.contains(&value) {
                                merged.push(value);
                            }
                        }
                    }
                }
                TypeDescriptor::enumeration(merged)
            }
            _ => TypeDescriptor::union(compiled),
        };
        Ok(if nullable {
            TypeKind::Optional(Box::new(inner))
        } else {
            inner.kind
        })
    }

    fn record(
        &mut self,
        label: &str,
        obj: &Map<String, Value>,
    ) -> Result<RecordDescriptor, SchemaError> {
        let required: IndexSet<String> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let mut record = RecordDescriptor {
            title: obj.get("title").and_then(Value::as_str).map(str::to_owned),
            description: obj
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_owned),
            closed: obj.get("additionalProperties") == Some(&Value::Bool(false)),
            ..RecordDescriptor::default()
        };

        if let Some(properties) = obj.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                let ty = self.node(&format!("{label}.{name}"), property)?;
                let field = Field {
                    ty,
                    default: property.get("default").cloned(),
                };
                record = record.field(name.clone(), field, required.contains(name));
            }
        }
        Ok(record)
    }

    fn resolve_ref(&mut self, label: &str, reference: &str) -> Result<TypeDescriptor, SchemaError> {
        let name = reference
            .strip_prefix("#/$defs/")
            .or_else(|| reference.strip_prefix("#/definitions/"))
            .map(|n| n.replace("~1", "/").replace("~0", "~"))
            .ok_or_else(|| SchemaError::UnresolvedReference(reference.to_string()))?;

        let key = (self.scope, name.clone());
        if let Some(registered) = self.aliases.get(&key) {
            return Ok(TypeDescriptor::reference(registered.clone()));
        }
        let def = self
            .source_defs
            .get(&key)
            .cloned()
            .ok_or_else(|| SchemaError::UnresolvedReference(name.clone()))?;

        if let Some(obj) = def.as_object().filter(|o| is_record_schema(o)) {
            // A self-contained shape seen before under the same name is reused.
            if !contains_ref(&def)
                && let Some(registered) = self.registered_as(&name, &def)
            {
                self.aliases.insert(key, registered.clone());
                return Ok(TypeDescriptor::reference(registered));
            }
            let registered = self.reserve_name(&name);
            self.aliases.insert(key.clone(), registered.clone());
            self.origins
                .insert(registered.clone(), (name.clone(), def.clone()));
            // Placeholder keeps first-encounter order and breaks recursion.
            self.definitions
                .records
                .insert(registered.clone(), RecordDescriptor::default());
            let mut record = self.record(&name, obj)?;
            record.title = Some(registered.clone());
            self.definitions.records.insert(registered.clone(), record);
            return Ok(TypeDescriptor::reference(registered));
        }

        if !self.inlining.insert(key.clone()) {
            return Err(SchemaError::unsupported(
                label,
                format!("recursive type `{name}` must be an object"),
            ));
        }
        let compiled = self.node(&name, &def);
        self.inlining.remove(&key);
        compiled
    }

    fn registered_as(&self, name: &str, def: &Value) -> Option<String> {
        self.origins
            .iter()
            .find(|(_, (source, shape))| source == name && shape == def)
            .map(|(registered, _)| registered.clone())
    }

    fn reserve_name(&self, name: &str) -> String {
        let taken = |n: &str| RESERVED_DEFINITIONS.contains(&n) || self.definitions.contains(n);
        if !taken(name) {
            return name.to_string();
        }
        (2..)
            .map(|i| format!("{name}{i}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

fn attach_range(ty: &mut TypeDescriptor, range: IntegerRange) {
    match &mut ty.kind {
        TypeKind::Primitive(PrimitiveKind::Integer) => ty.range = Some(range),
        TypeKind::Optional(inner) => attach_range(inner, range),
        _ => {}
    }
}

fn apply_constraints(
    ty: &mut TypeDescriptor,
    constraints: &Constraints,
) -> Result<(), SchemaError> {
    if constraints.is_empty() {
        return Ok(());
    }
    if let TypeKind::Optional(inner) = &mut ty.kind {
        return apply_constraints(inner, constraints);
    }
    constraints.check_applicable(ty)?;
    ty.constraints.merge(constraints);
    Ok(())
}

fn enum_kind(values: Vec<Value>) -> TypeKind {
    if values.iter().any(Value::is_null) {
        let rest: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
        if rest.is_empty() {
            return TypeKind::Primitive(PrimitiveKind::Null);
        }
        return TypeKind::Optional(Box::new(TypeDescriptor::enumeration(rest)));
    }
    TypeKind::Enum(values)
}

fn mapping_key(label: &str, names: Option<&Value>) -> Result<PrimitiveKind, SchemaError> {
    let Some(names) = names.and_then(Value::as_object) else {
        return Ok(PrimitiveKind::String);
    };
    let integer_format = names
        .get("format")
        .and_then(Value::as_str)
        .is_some_and(|f| f.starts_with("int") || f.starts_with("uint"));
    match names.get("type").and_then(Value::as_str) {
        Some("integer") => Ok(PrimitiveKind::Integer),
        Some("string") | None if integer_format => Ok(PrimitiveKind::Integer),
        Some("string") | None => Ok(PrimitiveKind::String),
        Some(other) => Err(SchemaError::unsupported(
            label,
            format!("mapping keys must be strings or integers, found {other}"),
        )),
    }
}

fn is_null_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("null") && schema.get("enum").is_none()
}

fn contains_ref(value: &Value) -> bool {
    match value {
        Value::Object(obj) => obj.contains_key("$ref") || obj.values().any(contains_ref),
        Value::Array(items) => items.iter().any(contains_ref),
        _ => false,
    }
}

fn is_record_schema(obj: &Map<String, Value>) -> bool {
    let unioned =
        obj.contains_key("anyOf") || obj.contains_key("oneOf") || obj.contains_key("enum");
    !unioned && obj.contains_key("properties")
}
