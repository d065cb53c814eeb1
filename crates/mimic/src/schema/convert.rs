//! Conversion from the OpenAPI schema model to plain JSON Schema 2020-12.
//!
//! References are inlined. A schema reached again while it is still being converted
//! is emitted once under `$defs` and referenced as `#/$defs/<name>`; cycles back to
//! the root become `{"$ref": "#"}`.

use super::registry::SchemaRegistry;
use super::types::{AdditionalProperties, Bound, SchemaId};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

const DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

/// Convert `id` and everything reachable from it.
pub fn to_json_schema(registry: &SchemaRegistry, id: SchemaId) -> Value {
    let root = registry.resolve(id);
    let mut converter = Converter {
        registry,
        root,
        stack: Vec::new(),
        cyclic: HashMap::new(),
        defs: Map::new(),
        done: HashMap::new(),
    };
    match converter.convert(root) {
        Value::Object(map) => {
            let mut out = Map::new();
            out.insert("$schema".to_string(), Value::String(DIALECT.to_string()));
            out.extend(map);
            if !converter.defs.is_empty() {
                out.insert("$defs".to_string(), Value::Object(converter.defs));
            }
            Value::Object(out)
        }
        other => other,
    }
}

struct Converter<'r> {
    registry: &'r SchemaRegistry,
    root: SchemaId,
    stack: Vec<SchemaId>,
    cyclic: HashMap<SchemaId, String>,
    defs: Map<String, Value>,
    done: HashMap<SchemaId, Value>,
}

impl Converter<'_> {
    fn convert(&mut self, id: SchemaId) -> Value {
        let id = self.registry.resolve(id);
        if id == self.root && !self.stack.is_empty() {
            return json!({"$ref": "#"});
        }
        if let Some(done) = self.done.get(&id) {
            return done.clone();
        }
        if self.stack.contains(&id) || self.cyclic.contains_key(&id) {
            let name = self.def_name(id);
            return json!({"$ref": format!("#/$defs/{name}")});
        }

        self.stack.push(id);
        let value = self.convert_schema(id);
        self.stack.pop();

        if let Some(name) = self.cyclic.get(&id).cloned() {
            self.defs.insert(name.clone(), value);
            return json!({"$ref": format!("#/$defs/{name}")});
        }
        self.done.insert(id, value.clone());
        value
    }

    fn def_name(&mut self, id: SchemaId) -> String {
        if let Some(name) = self.cyclic.get(&id) {
            return name.clone();
        }
        let base = self
            .registry
            .get(id)
            .name
            .clone()
            .unwrap_or_else(|| format!("schema{}", id.0));
        let mut name = base.clone();
        let mut n = 1;
        while self.cyclic.values().any(|v| *v == name) {
            n += 1;
            name = format!("{base}{n}");
        }
        self.cyclic.insert(id, name.clone());
        name
    }

    fn list(&mut self, ids: &[SchemaId]) -> Value {
        Value::Array(ids.iter().map(|id| self.convert(*id)).collect())
    }

    fn map(&mut self, entries: &indexmap::IndexMap<String, SchemaId>) -> Value {
        let mut out = Map::new();
        for (key, id) in entries {
            out.insert(key.clone(), self.convert(*id));
        }
        Value::Object(out)
    }

    fn convert_schema(&mut self, id: SchemaId) -> Value {
        let schema = self.registry.get(id).clone();
        if let Some(b) = schema.boolean {
            return Value::Bool(b);
        }
        let mut out = Map::new();

        let mut types: Vec<Value> = schema.types.iter().map(|t| Value::String(t.as_str().to_string())).collect();
        if schema.nullable && !types.is_empty() && !types.iter().any(|t| t == "null") {
            types.push(Value::String("null".to_string()));
        }
        match types.len() {
            0 => {}
            1 => {
                out.insert("type".into(), types.remove(0));
            }
            _ => {
                out.insert("type".into(), Value::Array(types));
            }
        }

        if let Some(title) = &schema.title {
            out.insert("title".into(), json!(title));
        }
        if let Some(description) = &schema.description {
            out.insert("description".into(), json!(description));
        }

        let mut all_of = schema.all_of.clone();
        if schema.ref_has_siblings {
            if let Some(target) = schema.reference.as_ref().and_then(|r| r.target()) {
                all_of.insert(0, target);
            }
        }
        if !all_of.is_empty() {
            let v = self.list(&all_of);
            out.insert("allOf".into(), v);
        }
        if !schema.any_of.is_empty() {
            let v = self.list(&schema.any_of);
            out.insert("anyOf".into(), v);
        }
        if !schema.one_of.is_empty() {
            let v = self.list(&schema.one_of);
            out.insert("oneOf".into(), v);
        }
        for (keyword, sub) in [
            ("not", schema.not),
            ("if", schema.if_schema),
            ("then", schema.then_schema),
            ("else", schema.else_schema),
        ] {
            if let Some(sub) = sub {
                let v = self.convert(sub);
                out.insert(keyword.into(), v);
            }
        }

        // strings
        if let Some(pattern) = &schema.pattern {
            out.insert("pattern".into(), json!(pattern.source));
        }
        insert_opt(&mut out, "minLength", schema.min_length);
        insert_opt(&mut out, "maxLength", schema.max_length);
        if let Some(format) = &schema.format {
            out.insert("format".into(), json!(format));
        }
        if let Some(media) = &schema.content_media_type {
            out.insert("contentMediaType".into(), json!(media));
        }
        if let Some(encoding) = &schema.content_encoding {
            out.insert("contentEncoding".into(), json!(encoding));
        }

        // numbers; Draft-04 boolean exclusives become numeric bounds
        insert_opt(&mut out, "multipleOf", schema.multiple_of);
        match (schema.minimum, schema.exclusive_minimum) {
            (Some(min), Some(Bound::Flag(true))) => insert_opt(&mut out, "exclusiveMinimum", Some(min)),
            (min, Some(Bound::Value(v))) => {
                insert_opt(&mut out, "minimum", min);
                insert_opt(&mut out, "exclusiveMinimum", Some(v));
            }
            (min, _) => insert_opt(&mut out, "minimum", min),
        }
        match (schema.maximum, schema.exclusive_maximum) {
            (Some(max), Some(Bound::Flag(true))) => insert_opt(&mut out, "exclusiveMaximum", Some(max)),
            (max, Some(Bound::Value(v))) => {
                insert_opt(&mut out, "maximum", max);
                insert_opt(&mut out, "exclusiveMaximum", Some(v));
            }
            (max, _) => insert_opt(&mut out, "maximum", max),
        }

        // arrays
        if let Some(items) = schema.items {
            let v = self.convert(items);
            out.insert("items".into(), v);
        }
        if !schema.prefix_items.is_empty() {
            let v = self.list(&schema.prefix_items);
            out.insert("prefixItems".into(), v);
        }
        if let Some(contains) = schema.contains {
            let v = self.convert(contains);
            out.insert("contains".into(), v);
        }
        insert_opt(&mut out, "minContains", schema.min_contains);
        insert_opt(&mut out, "maxContains", schema.max_contains);
        insert_opt(&mut out, "minItems", schema.min_items);
        insert_opt(&mut out, "maxItems", schema.max_items);
        if schema.unique_items {
            out.insert("uniqueItems".into(), Value::Bool(true));
        }
        if let Some(unevaluated) = schema.unevaluated_items {
            let v = self.convert(unevaluated);
            out.insert("unevaluatedItems".into(), v);
        }

        // objects
        if !schema.properties.is_empty() {
            let v = self.map(&schema.properties);
            out.insert("properties".into(), v);
        }
        if !schema.pattern_properties.is_empty() {
            let v = self.map(&schema.pattern_properties);
            out.insert("patternProperties".into(), v);
        }
        match schema.additional_properties {
            Some(AdditionalProperties::Bool(b)) => {
                out.insert("additionalProperties".into(), Value::Bool(b));
            }
            Some(AdditionalProperties::Schema(sub)) => {
                let v = self.convert(sub);
                out.insert("additionalProperties".into(), v);
            }
            None => {}
        }
        if let Some(unevaluated) = schema.unevaluated_properties {
            let v = self.convert(unevaluated);
            out.insert("unevaluatedProperties".into(), v);
        }
        if let Some(names) = schema.property_names {
            let v = self.convert(names);
            out.insert("propertyNames".into(), v);
        }
        insert_opt(&mut out, "minProperties", schema.min_properties);
        insert_opt(&mut out, "maxProperties", schema.max_properties);
        if !schema.required.is_empty() {
            out.insert("required".into(), json!(schema.required));
        }
        if !schema.dependent_required.is_empty() {
            out.insert("dependentRequired".into(), json!(schema.dependent_required));
        }
        if !schema.dependent_schemas.is_empty() {
            let v = self.map(&schema.dependent_schemas);
            out.insert("dependentSchemas".into(), v);
        }

        // values and annotations
        if !schema.enumeration.is_empty() {
            out.insert("enum".into(), Value::Array(schema.enumeration.clone()));
        }
        if let Some(constant) = &schema.constant {
            out.insert("const".into(), constant.clone());
        }
        if let Some(default) = &schema.default {
            out.insert("default".into(), default.clone());
        }
        if schema.deprecated {
            out.insert("deprecated".into(), Value::Bool(true));
        }
        if schema.read_only {
            out.insert("readOnly".into(), Value::Bool(true));
        }
        if schema.write_only {
            out.insert("writeOnly".into(), Value::Bool(true));
        }
        let mut examples = schema.examples.clone();
        if examples.is_empty() {
            if let Some(example) = &schema.example {
                examples.push(example.clone());
            }
        }
        if !examples.is_empty() {
            out.insert("examples".into(), Value::Array(examples));
        }
        if let Some(xml) = &schema.xml {
            if let Ok(v) = serde_json::to_value(xml) {
                out.insert("xml".into(), v);
            }
        }
        Value::Object(out)
    }
}

fn insert_opt<T: Into<Value>>(out: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        out.insert(key.to_string(), normalize_number(v.into()));
    }
}

/// Render integral floats as integers (`1.0` -> `1`).
fn normalize_number(value: Value) -> Value {
    match value.as_f64() {
        Some(f) if value.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(f as i64),
        _ => value,
    }
}
