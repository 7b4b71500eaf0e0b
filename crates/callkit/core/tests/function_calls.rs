//! Tests for calling `#[function]` callables through `WrappedFunction`.
//!
//! These tests cover positional and keyword binding, defaults, coercion,
//! complete error listings and propagation of the function's own errors.

use callkit_core::{
    CallError, UnknownFields, ValidationErrorKind, WrappedFunction, function,
};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

// =============================================================================
// Test Function Definitions
// =============================================================================

#[derive(Debug, thiserror::Error)]
#[error("cannot divide {0} by zero")]
struct DivideByZero(i64);

/// Integer division.
///
/// # Arguments
///
/// * `x` - The dividend
/// * `y` - The divisor
#[function]
fn quotient(x: i64, #[param(default = 1)] y: i64) -> Result<i64, DivideByZero> {
    if y == 0 {
        return Err(DivideByZero(x));
    }
    Ok(x / y)
}

/// Look up tags for a key.
#[function]
async fn lookup(
    #[param(pattern = "^[a-z]+$")] key: String,
    #[param(min_items = 1, max_items = 3)] tags: Vec<String>,
    #[param(minimum = 1, maximum = 10)] limit: u32,
) -> anyhow::Result<Vec<String>> {
    tokio::task::yield_now().await;
    Ok(tags
        .into_iter()
        .take(limit as usize)
        .map(|t| format!("{key}:{t}"))
        .collect())
}

/// Tune a run.
#[function]
fn settings(
    count: i64,
    ratio: f64,
    #[param(default = true)] enabled: bool,
    label: Option<String>,
) -> String {
    format!("{count}:{ratio}:{enabled}:{}", label.unwrap_or_default())
}

fn kwargs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

// =============================================================================
// Binding and Defaults
// =============================================================================

#[tokio::test]
async fn test_keyword_call_uses_default() {
    let f = WrappedFunction::wrap(QuotientFunction).unwrap();
    let out = f.call_kwargs(kwargs(json!({"x": 7}))).await.unwrap();
    assert_eq!(out, json!(7));
}

#[tokio::test]
async fn test_positional_and_keyword_mix() {
    let f = WrappedFunction::wrap(QuotientFunction).unwrap();
    let out = f.call(vec![json!(9)], kwargs(json!({"y": 3}))).await.unwrap();
    assert_eq!(out, json!(3));

    let err = f
        .call(vec![json!(9)], kwargs(json!({"x": 3})))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::DuplicateArgument(ref n) if n == "x"));

    let err = f
        .call(vec![json!(1), json!(2), json!(3)], Map::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallError::TooManyArguments {
            expected: 2,
            received: 3
        }
    ));
}

#[tokio::test]
async fn test_lax_coercion_of_numeric_strings() {
    let f = WrappedFunction::wrap(QuotientFunction).unwrap();
    let out = f
        .call_kwargs(kwargs(json!({"x": "12", "y": "4"})))
        .await
        .unwrap();
    assert_eq!(out, json!(3));
}

// =============================================================================
// Validation Failures
// =============================================================================

#[tokio::test]
async fn test_every_violation_is_listed() {
    let f = WrappedFunction::wrap(LookupFunction).unwrap();
    let err = f
        .call_kwargs(kwargs(json!({"key": "Bad Key", "tags": [], "limit": 0})))
        .await
        .unwrap_err();
    let failed = err.validation().unwrap();
    let kinds: Vec<ValidationErrorKind> = failed.errors.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ValidationErrorKind::Pattern,
            ValidationErrorKind::MinItems,
            ValidationErrorKind::Minimum,
        ]
    );
    assert_eq!(failed.paths(), vec!["key", "tags", "limit"]);
    assert_eq!(
        failed.errors[2].message,
        "input should be greater than or equal to 1"
    );
}

#[tokio::test]
async fn test_missing_required_reported_first() {
    let f = WrappedFunction::wrap(LookupFunction).unwrap();
    let err = f
        .call_kwargs(kwargs(json!({"limit": 50})))
        .await
        .unwrap_err();
    let failed = err.validation().unwrap();
    assert_eq!(failed.paths(), vec!["key", "tags", "limit"]);
    assert_eq!(failed.errors[0].kind, ValidationErrorKind::MissingRequired);
    assert_eq!(failed.errors[0].message, "field required");
    assert_eq!(failed.errors[2].kind, ValidationErrorKind::Maximum);
}

#[tokio::test]
async fn test_unknown_fields_policy() {
    let f = WrappedFunction::wrap(QuotientFunction).unwrap();
    let args = kwargs(json!({"x": 4, "z": true}));

    assert_eq!(f.call_kwargs(args.clone()).await.unwrap(), json!(4));

    let err = f
        .call_with(UnknownFields::Reject, Vec::new(), args)
        .await
        .unwrap_err();
    let failed = err.validation().unwrap();
    assert_eq!(failed.paths(), vec!["z"]);
    assert_eq!(failed.errors[0].kind, ValidationErrorKind::UnknownField);
}

// =============================================================================
// Function Errors
// =============================================================================

#[tokio::test]
async fn test_function_error_is_propagated() {
    let f = WrappedFunction::wrap(QuotientFunction).unwrap();
    let err = f
        .call_kwargs(kwargs(json!({"x": 5, "y": 0})))
        .await
        .unwrap_err();
    let CallError::Function(inner) = err else {
        panic!("expected a function error");
    };
    assert_eq!(inner.to_string(), "cannot divide 5 by zero");
    assert!(inner.downcast_ref::<DivideByZero>().is_some());
}

#[tokio::test]
async fn test_async_function_call() {
    let f = WrappedFunction::wrap(LookupFunction).unwrap();
    let out = f
        .call_kwargs(kwargs(json!({"key": "k", "tags": ["a", "b", "c"], "limit": 2})))
        .await
        .unwrap();
    assert_eq!(out, json!(["k:a", "k:b"]));
}

#[tokio::test]
async fn test_batch_entries_are_independent() {
    let f = WrappedFunction::wrap(QuotientFunction).unwrap();
    let results = f
        .call_batch(vec![
            kwargs(json!({"x": 8, "y": 2})),
            kwargs(json!({"y": 2})),
            kwargs(json!({"x": 1, "y": 0})),
            kwargs(json!({"x": 3})),
        ])
        .await;
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap(), &json!(4));
    assert!(results[1].as_ref().unwrap_err().validation().is_some());
    assert!(matches!(results[2], Err(CallError::Function(_))));
    assert_eq!(results[3].as_ref().unwrap(), &json!(3));
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_keyword_order_does_not_matter(x in -1000i64..1000, y in 1i64..50, swap in any::<bool>()) {
        let f = WrappedFunction::wrap(QuotientFunction).unwrap();
        let mut map = Map::new();
        if swap {
            map.insert("y".into(), json!(y));
            map.insert("x".into(), json!(x));
        } else {
            map.insert("x".into(), json!(x));
            map.insert("y".into(), json!(y));
        }
        let args = f.validate(UnknownFields::Ignore, &map).unwrap();
        let names: Vec<&str> = args.names().collect();
        prop_assert_eq!(names, vec!["x", "y"]);
        prop_assert_eq!(args.value("x"), Some(&json!(x)));
    }

    #[test]
    fn prop_one_missing_required_per_omitted_field(omit in prop::collection::vec(any::<bool>(), 3)) {
        let f = WrappedFunction::wrap(LookupFunction).unwrap();
        let full = [("key", json!("abc")), ("tags", json!(["t"])), ("limit", json!(3))];
        let mut map = Map::new();
        let mut omitted = Vec::new();
        for ((name, value), skip) in full.into_iter().zip(&omit) {
            if *skip {
                omitted.push(name);
            } else {
                map.insert(name.into(), value);
            }
        }

        match f.validate(UnknownFields::Ignore, &map) {
            Ok(_) => prop_assert!(omitted.is_empty()),
            Err(failed) => {
                prop_assert!(failed
                    .errors
                    .iter()
                    .all(|e| e.kind == ValidationErrorKind::MissingRequired));
                prop_assert_eq!(failed.paths(), omitted);
            }
        }
    }

    #[test]
    fn prop_validated_arguments_revalidate_unchanged(
        count in -100_000i64..100_000,
        count_form in 0u8..3,
        ratio in -1000.0f64..1000.0,
        ratio_as_text in any::<bool>(),
        enabled in prop::option::of(0u8..6),
        label in prop::option::of("[a-z ]{0,8}"),
    ) {
        let f = WrappedFunction::wrap(SettingsFunction).unwrap();
        let mut map = Map::new();
        let count = match count_form {
            0 => json!(count),
            1 => json!(count.to_string()),
            _ => json!(count as f64),
        };
        map.insert("count".into(), count);
        let ratio = if ratio_as_text { json!(ratio.to_string()) } else { json!(ratio) };
        map.insert("ratio".into(), ratio);
        if let Some(form) = enabled {
            let value = match form {
                0 => json!(true),
                1 => json!(false),
                2 => json!("true"),
                3 => json!("false"),
                4 => json!(0),
                _ => json!(1),
            };
            map.insert("enabled".into(), value);
        }
        if let Some(label) = label {
            map.insert("label".into(), json!(label));
        }

        let first = f.validate(UnknownFields::Ignore, &map).unwrap().into_map();
        let second = f.validate(UnknownFields::Ignore, &first);
        prop_assert!(second.is_ok(), "validated arguments were rejected: {:?}", second);
        prop_assert_eq!(second.unwrap().into_map(), first);
    }
}
