//! Value comparison helpers and the non-coercing validation entry point.

use super::error::ValidationError;
use super::parser::{ParseOptions, Parser};
use super::registry::SchemaRegistry;
use super::types::SchemaId;
use serde_json::{Number, Value};

/// Validate without coercion.
pub fn validate(registry: &SchemaRegistry, value: &Value, id: SchemaId) -> Result<(), ValidationError> {
    Parser::new(registry, ParseOptions::default())
        .parse(value, id)
        .map(|_| ())
}

/// Deep equality with numeric awareness: `1`, `1.0` and `1u64` are equal.
/// Object key order is ignored.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(a, b)| deep_equal(a, b)),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| deep_equal(v, w)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Index pair of the first duplicate, if any.
pub fn find_duplicate(items: &[Value]) -> Option<(usize, usize)> {
    for (i, a) in items.iter().enumerate() {
        for (j, b) in items.iter().enumerate().skip(i + 1) {
            if deep_equal(a, b) {
                return Some((i, j));
            }
        }
    }
    None
}

/// True if `value` deep-equals any candidate.
pub fn contains_value(candidates: &[Value], value: &Value) -> bool {
    candidates.iter().any(|c| deep_equal(c, value))
}
