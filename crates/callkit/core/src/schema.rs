//! Schema synthesis: Input/Output schemas and the exchange document.

use crate::descriptor::{Definitions, Field, RecordDescriptor, TypeDescriptor, TypeKind};
use crate::signature::ParameterSpec;
use indexmap::IndexSet;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Record describing a function's parameters, named `Input`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSchema {
    record: RecordDescriptor,
    definitions: Arc<Definitions>,
}

impl InputSchema {
    pub fn record(&self) -> &RecordDescriptor {
        &self.record
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    /// Standalone JSON Schema: the record plus the definitions it references.
    pub fn to_json(&self) -> Value {
        let mut obj = as_object(self.record.to_json(false));
        let mut names = IndexSet::new();
        for field in self.record.fields.values() {
            collect_references(&field.ty, &self.definitions, &mut names);
        }
        if !names.is_empty() {
            let defs: Map<String, Value> = names
                .iter()
                .filter_map(|name| {
                    self.definitions
                        .get(name)
                        .map(|record| (name.clone(), record.to_json(false)))
                })
                .collect();
            obj.insert("$defs".into(), Value::Object(defs));
        }
        Value::Object(obj)
    }
}

/// Descriptor of a function's return value, named `Output`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    ty: TypeDescriptor,
    definitions: Arc<Definitions>,
}

impl OutputSchema {
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("title".into(), json!("Output"));
        for (key, value) in as_object(self.ty.to_json()) {
            if key != "title" {
                obj.insert(key, value);
            }
        }
        Value::Object(obj)
    }
}

/// Everything synthesized for one function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSchemas {
    pub input: InputSchema,
    pub output: OutputSchema,
    document: Value,
}

impl FunctionSchemas {
    /// The combined exchange document.
    pub fn document(&self) -> &Value {
        &self.document
    }
}

/// Compose parameters and output into schemas and the exchange document.
///
/// The document has the function name as `title`, the summary as
/// `description` when non-empty, and `Input`, `Output` plus every shared
/// definition under `$defs`.
pub fn synthesize(
    name: &str,
    summary: &str,
    params: &[ParameterSpec],
    output: TypeDescriptor,
    definitions: Definitions,
) -> FunctionSchemas {
    let mut record = RecordDescriptor::new("Input");
    for param in params {
        let field = Field {
            ty: param.ty.clone(),
            default: param.default.clone(),
        };
        record = record.field(param.name.clone(), field, param.is_required());
    }

    let definitions = Arc::new(definitions);
    let input = InputSchema {
        record,
        definitions: Arc::clone(&definitions),
    };
    let output = OutputSchema {
        ty: output,
        definitions: Arc::clone(&definitions),
    };

    let mut defs = Map::new();
    defs.insert("Input".into(), input.record.to_json(true));
    defs.insert("Output".into(), output.to_json());
    defs.extend(definitions.to_json());

    let mut document = Map::new();
    document.insert("title".into(), json!(name));
    if !summary.is_empty() {
        document.insert("description".into(), json!(summary));
    }
    document.insert("$defs".into(), Value::Object(defs));

    FunctionSchemas {
        input,
        output,
        document: Value::Object(document),
    }
}

fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Names of all definitions reachable from `ty`, in first-seen order.
fn collect_references(ty: &TypeDescriptor, defs: &Definitions, out: &mut IndexSet<String>) {
    match &ty.kind {
        TypeKind::Reference(name) => {
            if out.insert(name.clone())
                && let Some(record) = defs.get(name)
            {
                for field in record.fields.values() {
                    collect_references(&field.ty, defs, out);
                }
            }
        }
        TypeKind::Optional(inner) | TypeKind::Sequence(inner) => {
            collect_references(inner, defs, out);
        }
        TypeKind::Mapping { value, .. } => collect_references(value, defs, out),
        TypeKind::Union(variants) => {
            for variant in variants {
                collect_references(variant, defs, out);
            }
        }
        TypeKind::Record(record) => {
            for field in record.fields.values() {
                collect_references(&field.ty, defs, out);
            }
        }
        TypeKind::Any | TypeKind::Primitive(_) | TypeKind::Enum(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Constraints, DescriptorCompiler, PrimitiveKind};
    use crate::signature::{FunctionDecl, ParamDecl, extract};
    use schemars::JsonSchema;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Point {
        x: f64,
        y: f64,
    }

    fn build(decl: FunctionDecl) -> FunctionSchemas {
        let mut compiler = DescriptorCompiler::new();
        let sig = extract(&decl, &mut compiler).unwrap();
        synthesize(
            &sig.name,
            &sig.summary,
            &sig.params,
            sig.output,
            compiler.into_definitions(),
        )
    }

    #[test]
    fn test_divide_document() {
        let schemas = build(
            FunctionDecl::new("divide")
                .doc(
                    "Divide two numbers.\n\n\
                     # Arguments\n\n\
                     * `x` - The dividend\n\n\
                     # Returns\n\n\
                     The quotient",
                )
                .param(ParamDecl::of::<i64>("x"))
                .param(ParamDecl::of::<i64>("y").exclusive_minimum(0.0).default_value(1))
                .returns::<f64>(),
        );

        assert_eq!(
            schemas.document(),
            &json!({
                "title": "divide",
                "description": "Divide two numbers.",
                "$defs": {
                    "Input": {
                        "type": "object",
                        "title": "Input",
                        "properties": {
                            "x": {
                                "type": "integer",
                                "description": "The dividend",
                                "x-order": 0
                            },
                            "y": {
                                "type": "integer",
                                "exclusiveMinimum": 0,
                                "default": 1,
                                "x-order": 1
                            }
                        },
                        "required": ["x"]
                    },
                    "Output": {
                        "title": "Output",
                        "type": "number",
                        "description": "The quotient"
                    }
                }
            })
        );
    }

    #[test]
    fn test_field_order_is_declaration_order() {
        let schemas = build(
            FunctionDecl::new("f")
                .param(ParamDecl::of::<String>("zeta"))
                .param(ParamDecl::of::<String>("alpha"))
                .param(ParamDecl::of::<String>("mid")),
        );
        let props = schemas.document()["$defs"]["Input"]["properties"]
            .as_object()
            .unwrap();
        let names: Vec<&str> = props.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_shared_definitions_in_document() {
        let schemas = build(
            FunctionDecl::new("midpoint")
                .param(ParamDecl::of::<Point>("a"))
                .param(ParamDecl::of::<Point>("b"))
                .returns::<Point>(),
        );
        let defs = schemas.document()["$defs"].as_object().unwrap();
        let names: Vec<&str> = defs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Input", "Output", "Point"]);
        assert_eq!(defs["Input"]["properties"]["a"]["$ref"], "#/$defs/Point");
        assert_eq!(defs["Output"]["$ref"], "#/$defs/Point");
    }

    #[test]
    fn test_standalone_input_includes_referenced_definitions() {
        let schemas = build(FunctionDecl::new("f").param(ParamDecl::of::<Vec<Point>>("points")));
        let input = schemas.input.to_json();
        assert_eq!(input["title"], "Input");
        assert_eq!(input["properties"]["points"]["items"]["$ref"], "#/$defs/Point");
        assert!(input["$defs"]["Point"].is_object());
        assert!(input["properties"]["points"].get("x-order").is_none());
    }

    #[test]
    fn test_untyped_output_is_any() {
        let schemas = build(FunctionDecl::new("f"));
        assert_eq!(schemas.document()["$defs"]["Output"], json!({"title": "Output"}));
        assert_eq!(schemas.document().get("description"), None);
    }

    #[test]
    fn test_rendering_is_byte_identical() {
        let decl = || {
            FunctionDecl::new("f")
                .param(ParamDecl::of::<Point>("p"))
                .param(ParamDecl::of::<Option<String>>("label"))
        };
        let a = serde_json::to_string(build(decl()).document()).unwrap();
        let b = serde_json::to_string(build(decl()).document()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_input_record_matches_params() {
        let schemas = build(FunctionDecl::new("f").param(ParamDecl::of::<bool>("flag")));
        let field = &schemas.input.record().fields["flag"];
        assert_eq!(field.ty.kind, TypeKind::Primitive(PrimitiveKind::Boolean));
        assert_eq!(field.ty.constraints, Constraints::default());
        assert!(schemas.input.record().is_required("flag"));
    }
}
