//! Function registry and built-in functions.

use super::error::ExpressionError;
use super::eval::Evaluator;
use super::value::{Function, Native, NativeFn, Value};
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use rand::Rng;

/// Functions resolvable by name from expressions.
#[derive(Debug, Clone, Default)]
pub struct Functions {
    table: IndexMap<String, Function>,
}

impl Functions {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in function.
    pub fn builtin() -> Self {
        let mut functions = Self::new();
        let builtins: [(&str, NativeFn); 17] = [
            ("find", find),
            ("findAll", find_all),
            ("any", any),
            ("all", all),
            ("format", format),
            ("now", now),
            ("randInt", rand_int),
            ("randFloat", rand_float),
            ("hasPrefix", has_prefix),
            ("hasSuffix", has_suffix),
            ("contains", contains),
            ("toLower", to_lower),
            ("toUpper", to_upper),
            ("len", len),
            ("join", join),
            ("toJSON", to_json),
            ("fromJSON", from_json),
        ];
        for (name, func) in builtins {
            functions.register(name, func);
        }
        functions
    }

    pub fn register(&mut self, name: &str, func: NativeFn) {
        self.table.insert(
            name.to_string(),
            Function::Native(Native {
                name: name.to_string(),
                func,
            }),
        );
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.table.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExpressionError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        return Err(ExpressionError::function(
            name,
            format!("expected {expected} arguments but got {}", args.len()),
        ));
    }
    Ok(())
}

fn string_arg<'v>(name: &str, args: &'v [Value], i: usize) -> Result<&'v str, ExpressionError> {
    args[i]
        .as_str()
        .ok_or_else(|| ExpressionError::function(name, format!("argument {} must be a string, got {}", i + 1, args[i].kind())))
}

fn int_arg(name: &str, args: &[Value], i: usize) -> Result<i64, ExpressionError> {
    match &args[i] {
        Value::Int(n) => Ok(*n),
        other => Err(ExpressionError::function(
            name,
            format!("argument {} must be an int, got {}", i + 1, other.kind()),
        )),
    }
}

fn float_arg(name: &str, args: &[Value], i: usize) -> Result<f64, ExpressionError> {
    args[i].as_f64().ok_or_else(|| {
        ExpressionError::function(name, format!("argument {} must be a number, got {}", i + 1, args[i].kind()))
    })
}

/// Items of a collection argument: array elements or map values.
fn collection(name: &str, value: Value) -> Result<Vec<Value>, ExpressionError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Map(map) => Ok(map.into_values().collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(ExpressionError::function(
            name,
            format!("expected an array or map, got {}", other.kind()),
        )),
    }
}

/// Split `(collection, predicate)` arguments and run the predicate per item.
fn filter(
    name: &str,
    evaluator: &mut Evaluator<'_>,
    args: Vec<Value>,
    mut visit: impl FnMut(Value, bool) -> bool,
) -> Result<(), ExpressionError> {
    arity(name, &args, 2, 2)?;
    let mut args = args.into_iter();
    let items = collection(name, args.next().unwrap_or_default())?;
    let Some(Value::Function(predicate)) = args.next() else {
        return Err(ExpressionError::function(name, "argument 2 must be a function"));
    };
    for item in items {
        let verdict = evaluator.call(&predicate, vec![item.clone()])?;
        let Some(matched) = verdict.as_bool() else {
            return Err(ExpressionError::function(
                name,
                format!("predicate must return a bool, got {}", verdict.kind()),
            ));
        };
        if !visit(item, matched) {
            break;
        }
    }
    Ok(())
}

// ============================================================================
// Collections
// ============================================================================

fn find(evaluator: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    let mut found = Value::Null;
    filter("find", evaluator, args, |item, matched| {
        if matched {
            found = item;
        }
        !matched
    })?;
    Ok(found)
}

fn find_all(evaluator: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    let mut found = Vec::new();
    filter("findAll", evaluator, args, |item, matched| {
        if matched {
            found.push(item);
        }
        true
    })?;
    Ok(Value::Array(found))
}

fn any(evaluator: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    let mut result = false;
    filter("any", evaluator, args, |_, matched| {
        result |= matched;
        !matched
    })?;
    Ok(Value::Bool(result))
}

fn all(evaluator: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    let mut result = true;
    filter("all", evaluator, args, |_, matched| {
        result &= matched;
        matched
    })?;
    Ok(Value::Bool(result))
}

fn len(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("len", &args, 1, 1)?;
    let n = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::Null => 0,
        other => return Err(ExpressionError::function("len", format!("{} has no length", other.kind()))),
    };
    Ok(Value::Int(n as i64))
}

fn join(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("join", &args, 1, 2)?;
    let separator = if args.len() == 2 { string_arg("join", &args, 1)? } else { "," };
    let Value::Array(items) = &args[0] else {
        return Ok(Value::String(args[0].to_string()));
    };
    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
    Ok(Value::String(parts.join(separator)))
}

// ============================================================================
// Strings
// ============================================================================

/// `format('{0} and {1}', a, b)`; `{}` takes the next argument, `{{`/`}}` escape.
fn format(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    if args.is_empty() {
        return Err(ExpressionError::function("format", "missing format string"));
    }
    let template = string_arg("format", &args, 0)?;
    let params = &args[1..];
    let mut out = String::with_capacity(template.len());
    let mut next = 0;
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => spec.push(c),
                        None => return Err(ExpressionError::function("format", "unclosed '{' in format string")),
                    }
                }
                let index = if spec.trim().is_empty() {
                    next += 1;
                    next - 1
                } else {
                    spec.trim()
                        .parse::<usize>()
                        .map_err(|_| ExpressionError::function("format", format!("invalid placeholder '{{{spec}}}'")))?
                };
                let value = params.get(index).ok_or_else(|| {
                    ExpressionError::function("format", format!("placeholder {{{index}}} has no argument"))
                })?;
                out.push_str(&value.to_string());
            }
            _ => out.push(ch),
        }
    }
    Ok(Value::String(out))
}

fn has_prefix(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("hasPrefix", &args, 2, 2)?;
    let (s, prefix) = (string_arg("hasPrefix", &args, 0)?, string_arg("hasPrefix", &args, 1)?);
    Ok(Value::Bool(s.starts_with(prefix)))
}

fn has_suffix(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("hasSuffix", &args, 2, 2)?;
    let (s, suffix) = (string_arg("hasSuffix", &args, 0)?, string_arg("hasSuffix", &args, 1)?);
    Ok(Value::Bool(s.ends_with(suffix)))
}

/// Substring test on strings, membership test on arrays, key test on maps.
fn contains(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("contains", &args, 2, 2)?;
    let found = match (&args[0], &args[1]) {
        (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
        (Value::Array(items), needle) => items.iter().any(|item| item.loose_eq(needle)),
        (Value::Map(map), Value::String(key)) => map.contains_key(key),
        (Value::Null, _) => false,
        (haystack, needle) => {
            return Err(ExpressionError::function(
                "contains",
                format!("cannot search {} for {}", haystack.kind(), needle.kind()),
            ))
        }
    };
    Ok(Value::Bool(found))
}

fn to_lower(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("toLower", &args, 1, 1)?;
    Ok(Value::String(string_arg("toLower", &args, 0)?.to_lowercase()))
}

fn to_upper(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("toUpper", &args, 1, 1)?;
    Ok(Value::String(string_arg("toUpper", &args, 0)?.to_uppercase()))
}

fn to_json(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("toJSON", &args, 1, 1)?;
    Ok(Value::String(args[0].to_json().to_string()))
}

fn from_json(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("fromJSON", &args, 1, 1)?;
    let text = string_arg("fromJSON", &args, 0)?;
    let parsed: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ExpressionError::function("fromJSON", e.to_string()))?;
    Ok(Value::from(parsed))
}

// ============================================================================
// Time and randomness
// ============================================================================

/// Current UTC time as RFC 3339.
fn now(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("now", &args, 0, 0)?;
    Ok(Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)))
}

/// `randInt(max)` or `randInt(min, max)`, end exclusive.
fn rand_int(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("randInt", &args, 0, 2)?;
    let (lo, hi) = match args.len() {
        0 => (0, i64::MAX),
        1 => (0, int_arg("randInt", &args, 0)?),
        _ => (int_arg("randInt", &args, 0)?, int_arg("randInt", &args, 1)?),
    };
    if lo >= hi {
        return Err(ExpressionError::function("randInt", format!("empty range [{lo}, {hi})")));
    }
    Ok(Value::Int(rand::thread_rng().gen_range(lo..hi)))
}

/// `randFloat()` in `[0, 1)`, `randFloat(max)` or `randFloat(min, max)`.
fn rand_float(_: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, ExpressionError> {
    arity("randFloat", &args, 0, 2)?;
    let (lo, hi) = match args.len() {
        0 => (0.0, 1.0),
        1 => (0.0, float_arg("randFloat", &args, 0)?),
        _ => (float_arg("randFloat", &args, 0)?, float_arg("randFloat", &args, 1)?),
    };
    if lo >= hi {
        return Err(ExpressionError::function("randFloat", format!("empty range [{lo}, {hi})")));
    }
    Ok(Value::Float(rand::thread_rng().gen_range(lo..hi)))
}
