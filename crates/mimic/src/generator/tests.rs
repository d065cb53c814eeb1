//! Tests for the generator module.

use super::*;
use crate::schema::{validate, ParseOptions, Parser};
use serde_json::json;

fn registry(schema: Value) -> (SchemaRegistry, SchemaId) {
    SchemaRegistry::from_value(&schema).unwrap()
}

fn generate(schema: Value, seed: u64) -> Result<Value, GenerationError> {
    let (registry, id) = registry(schema);
    let mut generator = Generator::new(&registry, GeneratorOptions::seeded(seed));
    generator.generate(&GenerationRequest::new(id))
}

fn order_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "email", "tags", "price"],
        "properties": {
            "id": {"type": "integer", "minimum": 1, "maximum": 10},
            "email": {"type": "string", "format": "email"},
            "code": {"type": "string", "pattern": "^[A-Z]{3}\\d{2}$"},
            "price": {"type": "number", "exclusiveMinimum": 0, "maximum": 5, "multipleOf": 0.5},
            "tags": {
                "type": "array",
                "items": {"type": "string", "enum": ["a", "b", "c"]},
                "uniqueItems": true,
                "minItems": 1,
                "maxItems": 3
            },
            "secret": {"type": "string", "writeOnly": true},
            "status": {"type": "string", "nullable": true, "minLength": 2, "maxLength": 4},
            "createdAt": {"type": "string", "format": "date-time"}
        },
        "additionalProperties": false
    })
}

// ============================================================================
// Determinism and conformance
// ============================================================================

#[test]
fn test_same_seed_same_value() {
    let first = generate(order_schema(), 42).unwrap();
    let second = generate(order_schema(), 42).unwrap();
    assert_eq!(first, second);
    assert_eq!(serde_json::to_vec(&first).unwrap(), serde_json::to_vec(&second).unwrap());
}

#[test]
fn test_generated_values_validate() {
    let (registry, id) = registry(order_schema());
    for seed in 0..50 {
        let mut generator = Generator::new(&registry, GeneratorOptions::seeded(seed));
        let value = generator.generate(&GenerationRequest::new(id)).unwrap();
        if let Err(e) = validate(&registry, &value, id) {
            panic!("seed {seed}: {value} failed: {e}");
        }
        assert!(value.get("secret").is_none());
    }
}

#[test]
fn test_minimum_tighter_than_exclusive_minimum() {
    let schema = json!({"type": "integer", "minimum": 10, "exclusiveMinimum": 5, "maximum": 12});
    for seed in 0..30 {
        let value = generate(schema.clone(), seed).unwrap();
        assert!((10..=12).contains(&value.as_i64().unwrap()), "seed {seed}: {value}");
    }
}

#[test]
fn test_seed_is_reported() {
    let (registry, _) = registry(json!({"type": "string"}));
    let generator = Generator::new(&registry, GeneratorOptions::seeded(9));
    assert_eq!(generator.seed(), 9);
}

// ============================================================================
// Structure
// ============================================================================

#[test]
fn test_self_referencing_items_terminate() {
    let schema = json!({"type": "array", "items": {"$ref": "#"}});
    for seed in 0..10 {
        let value = generate(schema.clone(), seed).unwrap();
        assert!(value.is_array());
    }
}

#[test]
fn test_recursive_object_stops_at_empty_skeleton() {
    let (registry, id) = registry(json!({"type": "object", "properties": {"child": {"$ref": "#"}}}));
    let parser = Parser::new(&registry, ParseOptions::default());
    for seed in 0..50 {
        let value = Generator::new(&registry, GeneratorOptions::seeded(seed))
            .generate(&GenerationRequest::new(id))
            .unwrap();
        if let Err(e) = parser.parse(&value, id) {
            panic!("seed {seed}: {value} failed: {e}");
        }
    }

    let options = GeneratorOptions {
        seed: Some(1),
        max_depth: 0,
        cancel: None,
    };
    let value = Generator::new(&registry, options).generate(&GenerationRequest::new(id)).unwrap();
    assert_eq!(value, json!({}));
}

#[test]
fn test_nullable_recursion_ends_in_null() {
    let schema = json!({
        "$ref": "#/$defs/node",
        "$defs": {
            "node": {
                "type": "object",
                "nullable": true,
                "required": ["child"],
                "properties": {"child": {"$ref": "#/$defs/node"}}
            }
        }
    });
    let (registry, id) = registry(schema);
    let options = GeneratorOptions {
        seed: Some(1),
        max_depth: 3,
        cancel: None,
    };
    let value = Generator::new(&registry, options).generate(&GenerationRequest::new(id)).unwrap();
    let mut node = &value;
    let mut depth = 0;
    while let Some(child) = node.get("child") {
        node = child;
        depth += 1;
    }
    assert!(node.is_null(), "{value}");
    assert!(depth <= 3, "{value}");
    assert!(validate(&registry, &value, id).is_ok(), "{value}");
}

#[test]
fn test_required_array_keeps_min_items_at_depth_limit() {
    let schema = json!({
        "type": "object",
        "required": ["children"],
        "properties": {
            "children": {"type": "array", "minItems": 1, "items": {"type": "integer"}}
        }
    });
    let (registry, id) = registry(schema);
    let options = GeneratorOptions {
        seed: Some(4),
        max_depth: 0,
        cancel: None,
    };
    let value = Generator::new(&registry, options).generate(&GenerationRequest::new(id)).unwrap();
    assert_eq!(value["children"].as_array().unwrap().len(), 1);
    assert!(validate(&registry, &value, id).is_ok(), "{value}");
}

#[test]
fn test_free_form_object_synthesizes_keys() {
    for seed in 0..10 {
        let value = generate(json!({"type": "object"}), seed).unwrap();
        let len = value.as_object().unwrap().len();
        assert!((3..=8).contains(&len), "{value}");
    }
}

#[test]
fn test_dictionary_values_follow_additional_schema() {
    let schema = json!({"type": "object", "additionalProperties": {"type": "integer", "minimum": 5, "maximum": 6}});
    let value = generate(schema, 3).unwrap();
    let map = value.as_object().unwrap();
    assert!(!map.is_empty());
    assert!(map.values().all(|v| matches!(v.as_i64(), Some(5 | 6))));
}

#[test]
fn test_all_of_carries_pattern_properties() {
    let schema = json!({
        "allOf": [
            {"type": "object", "minProperties": 2, "properties": {}},
            {"patternProperties": {"^x-": {"type": "integer", "minimum": 7, "maximum": 7}}, "additionalProperties": false}
        ]
    });
    let (registry, id) = registry(schema);
    let generator = Generator::new(&registry, GeneratorOptions::seeded(11));
    let schema = generator.effective(id, &Walk::default(), &mut Vec::new()).unwrap();
    assert!(schema.pattern_property("x-rate").is_some());
    assert!(schema.pattern_property("rate").is_none());
}

#[test]
fn test_all_of_merges_members() {
    let schema = json!({
        "allOf": [
            {"$ref": "#/$defs/named"},
            {"type": "object", "required": ["size"], "properties": {"size": {"type": "integer"}}}
        ],
        "$defs": {
            "named": {"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}}
        }
    });
    let value = generate(schema, 5).unwrap();
    assert!(value["name"].is_string());
    assert!(value["size"].is_i64());
}

#[test]
fn test_all_of_without_shared_type() {
    let schema = json!({"allOf": [{"type": "string"}, {"type": "integer"}]});
    let err = generate(schema, 0).unwrap_err();
    assert!(matches!(err, GenerationError::NoSharedType { .. }));
}

#[test]
fn test_one_of_matches_exactly_one_branch() {
    let schema = json!({
        "oneOf": [
            {"type": "string", "maxLength": 3},
            {"type": "string", "minLength": 6, "maxLength": 8}
        ]
    });
    for seed in 0..5 {
        let value = generate(schema.clone(), seed).unwrap();
        let len = value.as_str().unwrap().chars().count();
        assert!(len <= 3 || (6..=8).contains(&len), "{value}");
    }
}

#[test]
fn test_unique_items_exhausted() {
    let schema = json!({"type": "array", "items": {"type": "boolean"}, "minItems": 3, "uniqueItems": true});
    let err = generate(schema, 0).unwrap_err();
    match err {
        GenerationError::CannotFillUnique { wanted, found, .. } => {
            assert_eq!(wanted, 3);
            assert_eq!(found, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Primitives
// ============================================================================

#[test]
fn test_exclusive_integer_bounds() {
    let schema = json!({"type": "integer", "exclusiveMinimum": 1, "exclusiveMaximum": 3});
    for seed in 0..10 {
        assert_eq!(generate(schema.clone(), seed).unwrap(), json!(2));
    }
}

#[test]
fn test_empty_range_is_unsatisfiable() {
    let schema = json!({"type": "integer", "minimum": 5, "maximum": 2});
    assert!(matches!(generate(schema, 0), Err(GenerationError::Unsatisfiable { .. })));
}

#[test]
fn test_enum_and_const() {
    let value = generate(json!({"enum": ["x", "y"]}), 1).unwrap();
    assert!(value == json!("x") || value == json!("y"));
    assert_eq!(generate(json!({"const": {"a": 1}}), 1).unwrap(), json!({"a": 1}));
}

#[test]
fn test_name_drives_string_content() {
    let (registry, id) = registry(json!({"type": "string"}));
    let mut generator = Generator::new(&registry, GeneratorOptions::seeded(4));
    let value = generator.generate(&GenerationRequest::new(id).named("email")).unwrap();
    assert!(crate::schema::check_string_format("email", value.as_str().unwrap()).is_ok());
}

#[test]
fn test_cancelled_generation() {
    let (registry, id) = registry(json!({"type": "string"}));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let options = GeneratorOptions {
        seed: Some(0),
        cancel: Some(cancel),
        ..Default::default()
    };
    let err = Generator::new(&registry, options).generate(&GenerationRequest::new(id)).unwrap_err();
    assert!(matches!(err, GenerationError::Cancelled));
}
