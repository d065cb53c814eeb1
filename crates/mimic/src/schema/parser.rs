//! Coercing validator.
//!
//! [`Parser::parse`] walks a value and a schema in parallel, checks every constraint
//! and returns the coerced value: numeric and boolean strings are converted when the
//! options ask for it, integral floats become integers where the schema wants an
//! integer, and object keys are re-ordered to follow the schema's `properties`
//! declaration with undeclared keys appended in input order.

use super::error::{compact, ValidationError};
use super::format;
use super::registry::{DynamicScope, SchemaRegistry};
use super::types::{kind_of, AdditionalProperties, Schema, SchemaId, TypeTag};
use super::validate::{contains_value, deep_equal, find_duplicate};
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use std::collections::HashSet;

/// Nesting limit for schema walks whose value does not shrink (composition cycles).
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Accept `"12"` where a number or integer is expected.
    pub convert_string_to_number: bool,
    /// Accept `"true"`/`"false"` where a boolean is expected.
    pub convert_string_to_boolean: bool,
    /// Keep undeclared keys even when `additionalProperties` is `false`.
    pub allow_additional_in_closed: bool,
}

impl ParseOptions {
    /// Options for values that arrive as text (parameters, XML, forms).
    pub fn textual() -> Self {
        ParseOptions {
            convert_string_to_number: true,
            convert_string_to_boolean: true,
            allow_additional_in_closed: false,
        }
    }
}

struct State {
    scope: DynamicScope,
    depth: usize,
}

/// Validates and coerces values against schemas of one registry.
#[derive(Debug, Clone, Copy)]
pub struct Parser<'r> {
    registry: &'r SchemaRegistry,
    options: ParseOptions,
}

impl<'r> Parser<'r> {
    pub fn new(registry: &'r SchemaRegistry, options: ParseOptions) -> Self {
        Parser { registry, options }
    }

    pub fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    pub fn options(&self) -> ParseOptions {
        self.options
    }

    pub fn parse(&self, value: &Value, id: SchemaId) -> Result<Value, ValidationError> {
        let mut state = State {
            scope: DynamicScope::new(),
            depth: 0,
        };
        self.walk(value, id, &mut state)
    }

    pub fn matches(&self, value: &Value, id: SchemaId) -> bool {
        self.parse(value, id).is_ok()
    }

    fn fail(&self, id: SchemaId, value: &Value, message: impl Into<String>) -> ValidationError {
        ValidationError::new(message, compact(value), self.registry.fingerprint(id))
    }

    fn walk(&self, value: &Value, id: SchemaId, state: &mut State) -> Result<Value, ValidationError> {
        if state.depth >= MAX_DEPTH {
            return Err(self.fail(id, value, "schema nesting too deep"));
        }
        state.depth += 1;
        let pushed = state.scope.enter(self.registry, id);
        let result = self.walk_schema(value, id, state);
        state.scope.leave(pushed);
        state.depth -= 1;
        result
    }

    fn walk_schema(&self, value: &Value, id: SchemaId, state: &mut State) -> Result<Value, ValidationError> {
        let schema = self.registry.get(id);
        if schema.is_reference_only() {
            let target = self.registry.resolve_in(id, &state.scope);
            if target == id {
                return Err(self.fail(id, value, "unresolved reference"));
            }
            return self.walk(value, target, state);
        }
        if let Some(allowed) = schema.boolean {
            return if allowed {
                Ok(value.clone())
            } else {
                Err(self.fail(id, value, "value is not allowed by schema 'false'"))
            };
        }
        if value.is_null() && schema.nullable {
            return Ok(Value::Null);
        }

        let coerced = self.coerce(schema, value);
        let mut current = self.check_type(id, schema, &coerced)?;

        current = match current {
            Value::String(s) => {
                self.check_string(id, schema, &s)?;
                Value::String(s)
            }
            Value::Number(n) => {
                self.check_number(id, schema, &n)?;
                Value::Number(n)
            }
            Value::Array(items) => Value::Array(self.walk_array(id, schema, &items, state)?),
            Value::Object(map) => Value::Object(self.walk_object(id, schema, &map, state)?),
            other => other,
        };

        if !schema.enumeration.is_empty() && !contains_value(&schema.enumeration, &current) {
            let allowed = Value::Array(schema.enumeration.clone());
            return Err(self.fail(id, &current, format!("value must be one of {}", compact(&allowed))));
        }
        if let Some(constant) = &schema.constant {
            if !deep_equal(constant, &current) {
                return Err(self.fail(id, &current, format!("value must be equal to {}", compact(constant))));
            }
        }

        current = self.walk_composition(id, schema, current, state)?;
        self.check_unevaluated(id, schema, &mut current, state)?;
        Ok(current)
    }

    // ------------------------------------------------------------------------
    // Type and coercion
    // ------------------------------------------------------------------------

    fn coerce<'v>(&self, schema: &Schema, value: &'v Value) -> Cow<'v, Value> {
        let Value::String(s) = value else {
            return Cow::Borrowed(value);
        };
        if schema.types.is_empty() || schema.types.contains(TypeTag::String) {
            return Cow::Borrowed(value);
        }
        let text = s.trim();
        let numeric = schema.types.contains(TypeTag::Integer) || schema.types.contains(TypeTag::Number);
        if self.options.convert_string_to_number && numeric {
            if let Ok(i) = text.parse::<i64>() {
                return Cow::Owned(Value::Number(i.into()));
            }
            if let Ok(u) = text.parse::<u64>() {
                return Cow::Owned(Value::Number(u.into()));
            }
            if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
                return Cow::Owned(Value::Number(n));
            }
        }
        if self.options.convert_string_to_boolean && schema.types.contains(TypeTag::Boolean) {
            match text {
                "true" => return Cow::Owned(Value::Bool(true)),
                "false" => return Cow::Owned(Value::Bool(false)),
                _ => {}
            }
        }
        Cow::Borrowed(value)
    }

    fn check_type(&self, id: SchemaId, schema: &Schema, value: &Value) -> Result<Value, ValidationError> {
        if schema.types.is_empty() {
            return Ok(value.clone());
        }
        let accepted = match value {
            Value::Null => schema.allows(TypeTag::Null),
            Value::Bool(_) => schema.types.contains(TypeTag::Boolean),
            Value::String(_) => schema.types.contains(TypeTag::String),
            Value::Array(_) => schema.types.contains(TypeTag::Array),
            Value::Object(_) => schema.types.contains(TypeTag::Object),
            Value::Number(n) if n.is_i64() || n.is_u64() => schema.allows(TypeTag::Integer),
            Value::Number(n) => {
                if schema.types.contains(TypeTag::Number) {
                    true
                } else if schema.types.contains(TypeTag::Integer) {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    if f.fract() == 0.0 && f.abs() < 9.0e15 {
                        return Ok(Value::Number((f as i64).into()));
                    }
                    false
                } else {
                    false
                }
            }
        };
        if !accepted {
            let expected: Vec<&str> = schema.types.iter().map(|t| t.as_str()).collect();
            return Err(self.fail(
                id,
                value,
                format!(
                    "invalid type, expected {} but got {}",
                    expected.join(" or "),
                    kind_of(value)
                ),
            ));
        }
        Ok(value.clone())
    }

    // ------------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------------

    fn check_string(&self, id: SchemaId, schema: &Schema, s: &str) -> Result<(), ValidationError> {
        let value = || Value::String(s.to_string());
        let length = s.chars().count() as u64;
        if let Some(min) = schema.min_length {
            if length < min {
                return Err(self.fail(id, &value(), format!("length must be at least {min} but got {length}")));
            }
        }
        if let Some(max) = schema.max_length {
            if length > max {
                return Err(self.fail(id, &value(), format!("length must be at most {max} but got {length}")));
            }
        }
        if let Some(pattern) = &schema.pattern {
            if !pattern.is_match(s) {
                return Err(self.fail(
                    id,
                    &value(),
                    format!("value does not match pattern '{}'", pattern.source),
                ));
            }
        }
        if let Some(name) = &schema.format {
            format::check_string(name, s).map_err(|reason| self.fail(id, &value(), reason))?;
        }
        Ok(())
    }

    fn check_number(&self, id: SchemaId, schema: &Schema, n: &Number) -> Result<(), ValidationError> {
        let value = || Value::Number(n.clone());
        let x = n.as_f64().unwrap_or(f64::NAN);
        if let Some((min, exclusive)) = schema.lower_bound() {
            if exclusive && x <= min {
                return Err(self.fail(id, &value(), format!("value must be greater than {min}")));
            }
            if !exclusive && x < min {
                return Err(self.fail(id, &value(), format!("value must be greater than or equal to {min}")));
            }
        }
        if let Some((max, exclusive)) = schema.upper_bound() {
            if exclusive && x >= max {
                return Err(self.fail(id, &value(), format!("value must be less than {max}")));
            }
            if !exclusive && x > max {
                return Err(self.fail(id, &value(), format!("value must be less than or equal to {max}")));
            }
        }
        if let Some(m) = schema.multiple_of {
            if m > 0.0 {
                let q = x / m;
                if (q - q.round()).abs() > 1e-9 {
                    return Err(self.fail(id, &value(), format!("value must be a multiple of {m}")));
                }
            }
        }
        if let Some(name) = &schema.format {
            format::check_number(name, x).map_err(|reason| self.fail(id, &value(), reason))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------------

    fn walk_array(
        &self,
        id: SchemaId,
        schema: &Schema,
        items: &[Value],
        state: &mut State,
    ) -> Result<Vec<Value>, ValidationError> {
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let sub = schema.prefix_items.get(i).copied().or(schema.items);
            let parsed = match sub {
                Some(sub) => self.walk(item, sub, state).map_err(|e| e.in_item(i))?,
                None => item.clone(),
            };
            out.push(parsed);
        }

        let whole = || Value::Array(items.to_vec());
        let count = out.len() as u64;
        if let Some(min) = schema.min_items {
            if count < min {
                return Err(self.fail(id, &whole(), format!("array must have at least {min} items but has {count}")));
            }
        }
        if let Some(max) = schema.max_items {
            if count > max {
                return Err(self.fail(id, &whole(), format!("array must have at most {max} items but has {count}")));
            }
        }
        if schema.unique_items {
            if let Some((first, second)) = find_duplicate(&out) {
                return Err(self.fail(
                    id,
                    &whole(),
                    format!("array items must be unique, item {second} equals item {first}"),
                ));
            }
        }
        if let Some(contains) = schema.contains {
            let found = out
                .iter()
                .filter(|item| self.walk(item, contains, state).is_ok())
                .count() as u64;
            let min = schema.min_contains.unwrap_or(1);
            if found < min {
                return Err(self.fail(
                    id,
                    &whole(),
                    format!("array must contain at least {min} matching item(s) but has {found}"),
                ));
            }
            if let Some(max) = schema.max_contains {
                if found > max {
                    return Err(self.fail(
                        id,
                        &whole(),
                        format!("array must contain at most {max} matching item(s) but has {found}"),
                    ));
                }
            }
        }
        Ok(out)
    }

    fn walk_object(
        &self,
        id: SchemaId,
        schema: &Schema,
        map: &Map<String, Value>,
        state: &mut State,
    ) -> Result<Map<String, Value>, ValidationError> {
        let whole = || Value::Object(map.clone());

        if let Some(names) = schema.property_names {
            for key in map.keys() {
                self.walk(&Value::String(key.clone()), names, state).map_err(|e| {
                    self.fail(id, &whole(), format!("invalid property name '{key}': {}", e.message))
                })?;
            }
        }

        let mut out = Map::new();
        for (name, prop) in &schema.properties {
            if let Some(v) = map.get(name) {
                let parsed = self.walk(v, *prop, state).map_err(|e| e.in_property(name))?;
                out.insert(name.clone(), parsed);
            }
        }
        for (key, v) in map {
            if schema.properties.contains_key(key) {
                continue;
            }
            let parsed = if let Some(pattern) = schema.pattern_property(key) {
                self.walk(v, pattern, state).map_err(|e| e.in_property(key))?
            } else {
                match schema.additional_properties {
                    Some(AdditionalProperties::Schema(additional)) => {
                        self.walk(v, additional, state).map_err(|e| e.in_property(key))?
                    }
                    Some(AdditionalProperties::Bool(false)) if !self.options.allow_additional_in_closed => {
                        return Err(self.fail(
                            id,
                            &whole(),
                            format!("property '{key}' not defined and the schema does not allow additional properties"),
                        ));
                    }
                    _ => v.clone(),
                }
            };
            out.insert(key.clone(), parsed);
        }

        for name in &schema.required {
            if !map.contains_key(name) {
                return Err(self.fail(id, &whole(), format!("required property '{name}' not found")));
            }
        }
        for (key, dependencies) in &schema.dependent_required {
            if !map.contains_key(key) {
                continue;
            }
            if let Some(missing) = dependencies.iter().find(|d| !map.contains_key(*d)) {
                return Err(self.fail(
                    id,
                    &whole(),
                    format!("property '{missing}' is required when '{key}' is present"),
                ));
            }
        }
        for (key, dependent) in &schema.dependent_schemas {
            if map.contains_key(key) {
                self.walk(&Value::Object(out.clone()), *dependent, state)?;
            }
        }

        let count = map.len() as u64;
        if let Some(min) = schema.min_properties {
            if count < min {
                return Err(self.fail(id, &whole(), format!("object must have at least {min} properties but has {count}")));
            }
        }
        if let Some(max) = schema.max_properties {
            if count > max {
                return Err(self.fail(id, &whole(), format!("object must have at most {max} properties but has {count}")));
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Composition
    // ------------------------------------------------------------------------

    fn walk_composition(
        &self,
        id: SchemaId,
        schema: &Schema,
        mut current: Value,
        state: &mut State,
    ) -> Result<Value, ValidationError> {
        for member in self.registry.all_of(id) {
            current = self.walk(&current, member, state)?;
        }

        if !schema.any_of.is_empty() {
            let mut matched = Vec::new();
            let mut causes = Vec::new();
            for branch in &schema.any_of {
                match self.walk(&current, *branch, state) {
                    Ok(v) => {
                        let done = !v.is_object();
                        matched.push(v);
                        if done {
                            break;
                        }
                    }
                    Err(e) => causes.push(e),
                }
            }
            if matched.is_empty() {
                return Err(self
                    .fail(id, &current, "value does not match any schema of 'anyOf'")
                    .with_causes(causes));
            }
            current = merge_matches(matched);
        }

        if !schema.one_of.is_empty() {
            let mut matched = None;
            let mut causes = Vec::new();
            for branch in &schema.one_of {
                match self.walk(&current, *branch, state) {
                    Ok(v) => {
                        if matched.is_some() {
                            return Err(self.fail(id, &current, "value matches more than one schema of 'oneOf'"));
                        }
                        matched = Some(v);
                    }
                    Err(e) => causes.push(e),
                }
            }
            current = match matched {
                Some(v) => v,
                None => {
                    return Err(self
                        .fail(id, &current, "value does not match any schema of 'oneOf'")
                        .with_causes(causes))
                }
            };
        }

        if let Some(not) = schema.not {
            if self.walk(&current, not, state).is_ok() {
                return Err(self.fail(id, &current, "value must not be valid against the schema in 'not'"));
            }
        }

        if let Some(condition) = schema.if_schema {
            let branch = if self.walk(&current, condition, state).is_ok() {
                schema.then_schema
            } else {
                schema.else_schema
            };
            if let Some(branch) = branch {
                current = self.walk(&current, branch, state)?;
            }
        }
        Ok(current)
    }

    fn check_unevaluated(
        &self,
        id: SchemaId,
        schema: &Schema,
        current: &mut Value,
        state: &mut State,
    ) -> Result<(), ValidationError> {
        match current {
            Value::Object(map) => {
                let Some(unevaluated) = schema.unevaluated_properties else {
                    return Ok(());
                };
                let mut evaluated = HashSet::new();
                self.evaluated_keys(id, map, state, &mut evaluated, 0);
                let keys: Vec<String> = map.keys().filter(|k| !evaluated.contains(*k)).cloned().collect();
                for key in keys {
                    let Some(v) = map.get(&key) else { continue };
                    let parsed = self.walk(v, unevaluated, state).map_err(|e| {
                        if self.registry.get(unevaluated).boolean == Some(false) {
                            self.fail(id, v, format!("property '{key}' not defined and unevaluated properties are not allowed"))
                        } else {
                            e.in_property(&key)
                        }
                    })?;
                    map.insert(key, parsed);
                }
                Ok(())
            }
            Value::Array(items) => {
                let Some(unevaluated) = schema.unevaluated_items else {
                    return Ok(());
                };
                let evaluated = self.evaluated_items(id, state, 0);
                for i in evaluated..items.len() {
                    items[i] = self.walk(&items[i], unevaluated, state).map_err(|e| e.in_item(i))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Keys covered by `properties`, `patternProperties` or `additionalProperties`
    /// of the schema and every subschema that applied to the value.
    fn evaluated_keys(
        &self,
        id: SchemaId,
        map: &Map<String, Value>,
        state: &mut State,
        out: &mut HashSet<String>,
        depth: usize,
    ) {
        if depth > 32 {
            return;
        }
        let id = self.registry.resolve_in(id, &state.scope);
        let schema = self.registry.get(id);
        let value = Value::Object(map.clone());
        for key in map.keys() {
            if schema.properties.contains_key(key)
                || schema.pattern_property(key).is_some()
                || matches!(
                    schema.additional_properties,
                    Some(AdditionalProperties::Schema(_)) | Some(AdditionalProperties::Bool(true))
                )
            {
                out.insert(key.clone());
            }
        }
        for member in self.registry.all_of(id) {
            self.evaluated_keys(member, map, state, out, depth + 1);
        }
        for branch in schema.any_of.iter().chain(&schema.one_of) {
            if self.walk(&value, *branch, state).is_ok() {
                self.evaluated_keys(*branch, map, state, out, depth + 1);
            }
        }
        if let Some(condition) = schema.if_schema {
            if self.walk(&value, condition, state).is_ok() {
                self.evaluated_keys(condition, map, state, out, depth + 1);
                if let Some(then) = schema.then_schema {
                    self.evaluated_keys(then, map, state, out, depth + 1);
                }
            } else if let Some(otherwise) = schema.else_schema {
                self.evaluated_keys(otherwise, map, state, out, depth + 1);
            }
        }
        for (key, dependent) in &schema.dependent_schemas {
            if map.contains_key(key) {
                self.evaluated_keys(*dependent, map, state, out, depth + 1);
            }
        }
    }

    fn evaluated_items(&self, id: SchemaId, state: &mut State, depth: usize) -> usize {
        if depth > 32 {
            return 0;
        }
        let id = self.registry.resolve_in(id, &state.scope);
        let schema = self.registry.get(id);
        let own = if schema.items.is_some() {
            usize::MAX
        } else {
            schema.prefix_items.len()
        };
        self.registry
            .all_of(id)
            .into_iter()
            .map(|member| self.evaluated_items(member, state, depth + 1))
            .fold(own, usize::max)
    }
}

/// Merge the outputs of matching `anyOf` branches: object keys accumulate, the
/// first branch wins for conflicting keys and for non-object values.
fn merge_matches(mut matched: Vec<Value>) -> Value {
    let mut first = matched.remove(0);
    if let Value::Object(target) = &mut first {
        for other in matched {
            if let Value::Object(map) = other {
                for (k, v) in map {
                    target.entry(k).or_insert(v);
                }
            }
        }
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_with(schema: Value, value: Value, options: ParseOptions) -> Result<Value, ValidationError> {
        let (registry, id) = SchemaRegistry::from_value(&schema).unwrap();
        Parser::new(&registry, options).parse(&value, id)
    }

    fn parse(schema: Value, value: Value) -> Result<Value, ValidationError> {
        parse_with(schema, value, ParseOptions::default())
    }

    #[test]
    fn test_null_rejected_for_string_property() {
        let err = parse(
            json!({"type": "object", "properties": {"foo": {"type": "string"}}}),
            json!({"foo": null}),
        )
        .unwrap_err();
        assert_eq!(err.pointer, "/foo");
        assert!(err.message.contains("invalid type, expected string but got null"));
    }

    #[test]
    fn test_nullable_accepts_null() {
        let value = parse(json!({"type": "number", "nullable": true}), Value::Null).unwrap();
        assert_eq!(value, Value::Null);
        assert!(parse(json!({"type": ["number", "null"]}), Value::Null).is_ok());
    }

    #[test]
    fn test_string_conversion_only_when_enabled() {
        let schema = json!({"type": "integer"});
        assert!(parse(schema.clone(), json!("12")).is_err());
        let value = parse_with(schema, json!("12"), ParseOptions::textual()).unwrap();
        assert_eq!(value, json!(12));

        let value = parse_with(json!({"type": "boolean"}), json!("true"), ParseOptions::textual()).unwrap();
        assert_eq!(value, json!(true));
    }

    #[test]
    fn test_integral_float_becomes_integer() {
        assert_eq!(parse(json!({"type": "integer"}), json!(3.0)).unwrap(), json!(3));
        assert!(parse(json!({"type": "integer"}), json!(3.5)).is_err());
    }

    #[test]
    fn test_numeric_bounds_both_drafts() {
        let draft4 = json!({"type": "number", "minimum": 1, "exclusiveMinimum": true});
        assert!(parse(draft4.clone(), json!(1)).is_err());
        assert!(parse(draft4, json!(1.5)).is_ok());

        let modern = json!({"type": "number", "exclusiveMaximum": 10});
        let err = parse(modern.clone(), json!(10)).unwrap_err();
        assert_eq!(err.message, "value must be less than 10");
        assert!(parse(modern, json!(9.99)).is_ok());

        assert!(parse(json!({"multipleOf": 0.5}), json!(2.5)).is_ok());
        assert!(parse(json!({"multipleOf": 0.5}), json!(2.3)).is_err());
    }

    #[test]
    fn test_minimum_and_numeric_exclusive_minimum_both_apply() {
        let schema = json!({"type": "number", "minimum": 10, "exclusiveMinimum": 5});
        let err = parse(schema.clone(), json!(7)).unwrap_err();
        assert_eq!(err.message, "value must be greater than or equal to 10");
        assert!(parse(schema, json!(10)).is_ok());

        let schema = json!({"type": "number", "minimum": 5, "exclusiveMinimum": 5, "maximum": 20, "exclusiveMaximum": 8});
        assert!(parse(schema.clone(), json!(5)).is_err());
        assert!(parse(schema.clone(), json!(8)).is_err());
        assert!(parse(schema, json!(6)).is_ok());
    }

    #[test]
    fn test_string_constraints() {
        let schema = json!({"type": "string", "minLength": 2, "maxLength": 4, "pattern": "^[a-z]+$"});
        assert!(parse(schema.clone(), json!("abc")).is_ok());
        assert!(parse(schema.clone(), json!("a")).is_err());
        assert!(parse(schema.clone(), json!("abcde")).is_err());
        let err = parse(schema, json!("AB")).unwrap_err();
        assert!(err.message.contains("pattern"));
    }

    #[test]
    fn test_properties_reordered_and_extras_appended() {
        let value = parse(
            json!({"type": "object", "properties": {"a": {}, "b": {}}}),
            json!({"z": 1, "b": 2, "a": 3}),
        )
        .unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["a", "b", "z"]);
    }

    #[test]
    fn test_closed_object_rejects_unknown_property() {
        let schema = json!({"type": "object", "properties": {"a": {}}, "additionalProperties": false});
        let err = parse(schema.clone(), json!({"a": 1, "b": 2})).unwrap_err();
        assert!(err.message.contains("property 'b' not defined"));
        let options = ParseOptions {
            allow_additional_in_closed: true,
            ..Default::default()
        };
        assert!(parse_with(schema, json!({"a": 1, "b": 2}), options).is_ok());
    }

    #[test]
    fn test_required_and_dependent_required() {
        let schema = json!({
            "type": "object",
            "required": ["id"],
            "dependentRequired": {"card": ["billing"]}
        });
        let err = parse(schema.clone(), json!({})).unwrap_err();
        assert_eq!(err.message, "required property 'id' not found");
        let err = parse(schema, json!({"id": 1, "card": "x"})).unwrap_err();
        assert!(err.message.contains("'billing' is required"));
    }

    #[test]
    fn test_unique_items_and_contains() {
        let unique = json!({"type": "array", "uniqueItems": true});
        assert!(parse(unique.clone(), json!([1, 2])).is_ok());
        assert!(parse(unique, json!([{"a": 1}, {"a": 1.0}])).is_err());

        let contains = json!({"contains": {"type": "string"}, "minContains": 2});
        assert!(parse(contains.clone(), json!(["a", 1, "b"])).is_ok());
        assert!(parse(contains, json!(["a", 1])).is_err());
    }

    #[test]
    fn test_one_of_matching_both_branches() {
        let schema = json!({
            "oneOf": [
                {"type": "object", "properties": {"a": {"type": "string"}}},
                {"type": "object", "properties": {"b": {"type": "string"}}}
            ]
        });
        let err = parse(schema, json!({"a": "x"})).unwrap_err();
        assert!(err.message.contains("matches more than one"));
    }

    #[test]
    fn test_any_of_merges_object_branches() {
        let schema = json!({
            "anyOf": [
                {"type": "object", "properties": {"n": {"type": "integer"}}},
                {"type": "object", "properties": {"s": {"type": "string"}}}
            ]
        });
        let value = parse_with(schema, json!({"n": "5", "s": "x"}), ParseOptions::textual()).unwrap();
        assert_eq!(value, json!({"n": 5, "s": "x"}));
    }

    #[test]
    fn test_any_of_reports_causes() {
        let err = parse(json!({"anyOf": [{"type": "string"}, {"type": "boolean"}]}), json!(1)).unwrap_err();
        assert_eq!(err.causes.len(), 2);
    }

    #[test]
    fn test_enum_const_not_and_conditionals() {
        assert!(parse(json!({"enum": [1, "a"]}), json!(1.0)).is_ok());
        assert!(parse(json!({"enum": [1, "a"]}), json!("b")).is_err());
        assert!(parse(json!({"const": {"a": 1}}), json!({"a": 1})).is_ok());
        assert!(parse(json!({"not": {"type": "string"}}), json!("x")).is_err());

        let conditional = json!({
            "if": {"properties": {"kind": {"const": "a"}}},
            "then": {"required": ["a"]},
            "else": {"required": ["b"]}
        });
        assert!(parse(conditional.clone(), json!({"kind": "a", "a": 1})).is_ok());
        assert!(parse(conditional, json!({"kind": "x", "a": 1})).is_err());
    }

    #[test]
    fn test_unevaluated_properties_sees_all_of() {
        let schema = json!({
            "allOf": [{"properties": {"a": {}}}],
            "properties": {"b": {}},
            "unevaluatedProperties": false
        });
        assert!(parse(schema.clone(), json!({"a": 1, "b": 2})).is_ok());
        let err = parse(schema, json!({"a": 1, "c": 2})).unwrap_err();
        assert!(err.message.contains("'c'"));
    }

    #[test]
    fn test_recursive_schema_parses_finite_value() {
        let schema = json!({
            "type": "object",
            "properties": {"children": {"type": "array", "items": {"$ref": "#"}}}
        });
        assert!(parse(schema, json!({"children": [{"children": []}, {}]})).is_ok());
    }

    #[test]
    fn test_nested_error_pointer() {
        let schema = json!({
            "type": "object",
            "properties": {"items": {"type": "array", "items": {"type": "integer"}}}
        });
        let err = parse(schema, json!({"items": [1, "x"]})).unwrap_err();
        assert_eq!(err.pointer, "/items/1");
        assert!(err.schema.contains("type=integer"));
    }
}
