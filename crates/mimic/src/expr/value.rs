//! Dynamic values of the expression language.

use super::ast::Expr;
use super::error::ExpressionError;
use super::eval::Evaluator;
use indexmap::IndexMap;
use serde_json::Number;
use std::fmt;
use std::sync::Arc;

/// Signature of a function implemented in Rust.
pub type NativeFn = fn(&mut Evaluator<'_>, Vec<Value>) -> Result<Value, ExpressionError>;

#[derive(Debug, Clone)]
pub struct Native {
    pub name: String,
    pub func: NativeFn,
}

/// A closure together with the local bindings visible where it was created.
#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Arc<Expr>,
    pub captured: IndexMap<String, Value>,
}

#[derive(Debug, Clone)]
pub enum Function {
    Native(Native),
    Closure(Arc<Closure>),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Native(native) => &native.name,
            Function::Closure(_) => "closure",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    Function(Function),
}

impl Value {
    /// Kind name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Member lookup on a map. A field missing under its own name is also tried
    /// title-cased (`outputs` → `Outputs`).
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(name).or_else(|| map.get(&title_case(name))),
            _ => None,
        }
    }

    /// Plain-JSON rendering; functions become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Function(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(n) => Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        }
    }

    /// Equality across kinds: numbers compare by value, containers deeply,
    /// functions never equal anything.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => self.as_f64() == other.as_f64(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y)),
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.loose_eq(w)))
            }
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Map(map.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::from(&value)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

/// Text form used by string interpolation: strings are unquoted, `null` is
/// empty, containers render as JSON.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Array(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
            Value::Function(function) => write!(f, "<function {}>", function.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion_keeps_order() {
        let source = json!({"z": 1, "a": [true, null, 1.5, "s"]});
        let value = Value::from(&source);
        match &value {
            Value::Map(map) => assert_eq!(map.keys().collect::<Vec<_>>(), vec!["z", "a"]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn test_field_title_case_fallback() {
        let value = Value::from(json!({"Outputs": {"greet": "hi"}}));
        assert_eq!(value.field("outputs").and_then(|o| o.field("greet")), Some(&Value::from("hi")));
        assert!(value.field("missing").is_none());
    }

    #[test]
    fn test_loose_eq_and_display() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::from("1"));
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(json!([1, "a"])).to_string(), r#"[1,"a"]"#);
    }
}
