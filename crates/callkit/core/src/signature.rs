//! Function declarations and the signature extractor.
//!
//! Rust has no runtime signature reflection, so a function describes itself
//! with a [`FunctionDecl`]: its name, doc text, parameters in declaration
//! order and an optional return annotation. The `#[function]` attribute
//! builds one from an ordinary `fn`.

use crate::descriptor::{
    Annotation, Constraints, DescriptorCompiler, Pattern, RecordDescriptor, TypeDescriptor,
    TypeKind,
};
use crate::docs;
use crate::error::SchemaError;
use crate::validate::Validator;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Declaration of one parameter.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    name: String,
    annotation: Annotation,
    default: Option<Result<Value, String>>,
    description: Option<String>,
    constraints: Constraints,
    pattern: Option<String>,
}

impl ParamDecl {
    pub fn new(name: impl Into<String>, annotation: Annotation) -> Self {
        Self {
            name: name.into(),
            annotation,
            default: None,
            description: None,
            constraints: Constraints::default(),
            pattern: None,
        }
    }

    /// Parameter whose type is described by `T`'s JSON Schema.
    pub fn of<T: JsonSchema + ?Sized>(name: impl Into<String>) -> Self {
        Self::new(name, Annotation::of::<T>())
    }

    /// Default used when the argument is omitted. A parameter with a
    /// default is not required.
    pub fn default_value(mut self, value: impl Serialize) -> Self {
        self.default = Some(serde_json::to_value(value).map_err(|e| e.to_string()));
        self
    }

    /// Description that takes precedence over the doc comment entry.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn minimum(mut self, bound: f64) -> Self {
        self.constraints.minimum = Some(bound);
        self
    }

    pub fn maximum(mut self, bound: f64) -> Self {
        self.constraints.maximum = Some(bound);
        self
    }

    pub fn exclusive_minimum(mut self, bound: f64) -> Self {
        self.constraints.exclusive_minimum = Some(bound);
        self
    }

    pub fn exclusive_maximum(mut self, bound: f64) -> Self {
        self.constraints.exclusive_maximum = Some(bound);
        self
    }

    pub fn min_length(mut self, len: u64) -> Self {
        self.constraints.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: u64) -> Self {
        self.constraints.max_length = Some(len);
        self
    }

    /// Regular expression the string must match (unanchored search).
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn min_items(mut self, count: u64) -> Self {
        self.constraints.min_items = Some(count);
        self
    }

    pub fn max_items(mut self, count: u64) -> Self {
        self.constraints.max_items = Some(count);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Declaration of a callable: name, documentation, parameters and return.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    name: String,
    doc: String,
    description: Option<String>,
    params: Vec<ParamDecl>,
    returns: Option<Annotation>,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            description: None,
            params: Vec::new(),
            returns: None,
        }
    }

    /// Rustdoc-style documentation. See [`docs`](crate::docs) for the format.
    pub fn doc(mut self, text: impl Into<String>) -> Self {
        self.doc = text.into();
        self
    }

    /// Description that replaces the doc summary.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Append a parameter. Declaration order is preserved.
    pub fn param(mut self, param: ParamDecl) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns<T: JsonSchema + ?Sized>(self) -> Self {
        self.returns_annotation(Annotation::of::<T>())
    }

    pub fn returns_annotation(mut self, annotation: Annotation) -> Self {
        self.returns = Some(annotation);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamDecl] {
        &self.params
    }
}

/// One parameter after extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub ty: TypeDescriptor,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Declaration index, starting at zero.
    pub order: usize,
}

impl ParameterSpec {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Result of [`extract`].
#[derive(Debug, Clone)]
pub struct ExtractedSignature {
    pub name: String,
    pub summary: String,
    pub params: Vec<ParameterSpec>,
    pub output: TypeDescriptor,
}

/// Build the parameter table for `decl`, compiling every annotation with
/// `compiler` so they share one definitions table.
pub fn extract(
    decl: &FunctionDecl,
    compiler: &mut DescriptorCompiler,
) -> Result<ExtractedSignature, SchemaError> {
    let doc = docs::parse(&decl.doc);
    let mut seen = HashSet::new();
    let mut params = Vec::with_capacity(decl.params.len());

    for (order, param) in decl.params.iter().enumerate() {
        if !seen.insert(param.name.as_str()) {
            return Err(SchemaError::DuplicateParameter(param.name.clone()));
        }

        let mut constraints = param.constraints.clone();
        if let Some(pattern) = &param.pattern {
            constraints.pattern = Some(Pattern::new(pattern)?);
        }
        let mut ty = compiler.compile(&param.annotation, &constraints)?;

        let default = match &param.default {
            Some(Ok(value)) => {
                let record = RecordDescriptor::default();
                let checked = Validator::for_record(&record, compiler.definitions())
                    .validate_value(&ty, value)
                    .map_err(|failed| SchemaError::InvalidDefault {
                        name: param.name.clone(),
                        reason: failed.to_string(),
                    })?;
                Some(checked)
            }
            Some(Err(reason)) => {
                return Err(SchemaError::InvalidDefault {
                    name: param.name.clone(),
                    reason: reason.clone(),
                });
            }
            None if matches!(ty.kind, TypeKind::Optional(_)) => Some(Value::Null),
            None => None,
        };

        let description = param
            .description
            .clone()
            .or_else(|| doc.params.get(&param.name).cloned())
            .filter(|d| !d.is_empty());
        if description.is_some() {
            ty.description.clone_from(&description);
        }

        params.push(ParameterSpec {
            name: param.name.clone(),
            ty,
            default,
            description,
            order,
        });
    }

    let mut output = match &decl.returns {
        Some(annotation) => compiler.compile(annotation, &Constraints::default())?,
        None => TypeDescriptor::any(),
    };
    if let Some(returns) = doc.returns {
        output.description = Some(returns);
    }

    Ok(ExtractedSignature {
        name: decl.name.clone(),
        summary: decl.description.clone().unwrap_or(doc.summary),
        params,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PrimitiveKind;
    use serde_json::json;

    fn extract_one(decl: FunctionDecl) -> Result<ExtractedSignature, SchemaError> {
        extract(&decl, &mut DescriptorCompiler::new())
    }

    #[test]
    fn test_descriptions_follow_precedence() {
        let decl = FunctionDecl::new("greet")
            .doc(
                "Greet someone.\n\n# Arguments\n\n\
                 * `name` - From docs\n\
                 * `times` - How often\n\
                 * `ghost` - Not a parameter",
            )
            .param(ParamDecl::of::<String>("name").description("Explicit"))
            .param(ParamDecl::of::<u32>("times"))
            .param(ParamDecl::of::<bool>("loud"));
        let sig = extract_one(decl).unwrap();

        assert_eq!(sig.summary, "Greet someone.");
        assert_eq!(sig.params[0].description.as_deref(), Some("Explicit"));
        assert_eq!(sig.params[1].description.as_deref(), Some("How often"));
        assert_eq!(sig.params[2].description, None);
        assert_eq!(sig.params.len(), 3);
    }

    #[test]
    fn test_required_is_independent_of_position() {
        let decl = FunctionDecl::new("f")
            .param(ParamDecl::of::<i64>("a").default_value(1))
            .param(ParamDecl::of::<i64>("b"));
        let sig = extract_one(decl).unwrap();
        assert!(!sig.params[0].is_required());
        assert_eq!(sig.params[0].default, Some(json!(1)));
        assert!(sig.params[1].is_required());
    }

    #[test]
    fn test_option_gets_implicit_null_default() {
        let decl = FunctionDecl::new("f").param(ParamDecl::of::<Option<String>>("note"));
        let sig = extract_one(decl).unwrap();
        assert_eq!(sig.params[0].default, Some(Value::Null));
    }

    #[test]
    fn test_duplicate_parameter() {
        let decl = FunctionDecl::new("f")
            .param(ParamDecl::of::<i64>("a"))
            .param(ParamDecl::of::<String>("a"));
        assert_eq!(
            extract_one(decl).unwrap_err(),
            SchemaError::DuplicateParameter("a".into())
        );
    }

    #[test]
    fn test_invalid_default() {
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);
        let decl = FunctionDecl::new("f").param(ParamDecl::of::<i64>("a").default_value(bad));
        assert!(matches!(
            extract_one(decl),
            Err(SchemaError::InvalidDefault { ref name, .. }) if name == "a"
        ));
    }

    #[test]
    fn test_default_must_satisfy_annotation() {
        let decl = FunctionDecl::new("f").param(ParamDecl::of::<i64>("y").default_value("abc"));
        assert!(matches!(
            extract_one(decl),
            Err(SchemaError::InvalidDefault { name, .. }) if name == "y"
        ));

        let decl = FunctionDecl::new("f")
            .param(ParamDecl::of::<i64>("y").exclusive_minimum(0.0).default_value(0));
        assert!(matches!(extract_one(decl), Err(SchemaError::InvalidDefault { .. })));

        let decl = FunctionDecl::new("f").param(ParamDecl::of::<i64>("y").default_value("3"));
        assert_eq!(extract_one(decl).unwrap().params[0].default, Some(json!(3)));
    }

    #[test]
    fn test_missing_return_is_any() {
        let sig = extract_one(FunctionDecl::new("f")).unwrap();
        assert_eq!(sig.output.kind, TypeKind::Any);
    }

    #[test]
    fn test_returns_doc_describes_output() {
        let decl = FunctionDecl::new("f")
            .doc("Compute.\n\n# Returns\n\nThe answer")
            .returns::<f64>();
        let sig = extract_one(decl).unwrap();
        assert_eq!(sig.output.kind, TypeKind::Primitive(PrimitiveKind::Number));
        assert_eq!(sig.output.description.as_deref(), Some("The answer"));
    }

    #[test]
    fn test_explicit_description_replaces_summary() {
        let decl = FunctionDecl::new("f").doc("From docs.").description("Explicit.");
        assert_eq!(extract_one(decl).unwrap().summary, "Explicit.");
    }

    #[test]
    fn test_constraints_are_compiled() {
        let decl = FunctionDecl::new("f")
            .param(ParamDecl::of::<String>("code").pattern("^[a-z]+$").max_length(8));
        let sig = extract_one(decl).unwrap();
        let c = &sig.params[0].ty.constraints;
        assert_eq!(c.max_length, Some(8));
        assert_eq!(c.pattern.as_ref().map(Pattern::as_str), Some("^[a-z]+$"));

        let bad = FunctionDecl::new("f").param(ParamDecl::of::<String>("code").pattern("["));
        assert!(matches!(
            extract_one(bad),
            Err(SchemaError::InvalidPattern { .. })
        ));
    }
}
