//! Schema arena, document loading and `$ref` linking.
//!
//! Documents are loaded into a [`RegistryBuilder`], which allocates every schema it
//! walks into an arena and indexes it by `(document, JSON pointer)`. [`link`] then
//! resolves every pending reference, fetching external documents through a
//! [`Reader`], and [`build`] freezes the result into an immutable [`SchemaRegistry`]
//! that is shared by reference across requests.
//!
//! [`link`]: RegistryBuilder::link
//! [`build`]: RegistryBuilder::build

use super::error::{unescape_pointer, RefError};
use super::types::{
    AdditionalProperties, Bound, Location, Reference, ResourceId, Schema, SchemaId, TypeTag, Types,
    XmlBinding,
};
use crate::config::{NoReader, Reader};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Base URL used for documents loaded from memory.
pub const MEMORY_BASE: &str = "file:///memory/schema.json";

/// Guard against degenerate reference-only cycles (`a -> b -> a`).
const MAX_REFERENCE_HOPS: usize = 64;

// ============================================================================
// Raw keyword form
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTypes {
    One(String),
    Many(Vec<String>),
}

/// Keyword view of a schema object; sub-schemas stay raw and are loaded recursively.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSchema {
    #[serde(rename = "$id")]
    id: Option<String>,
    #[serde(rename = "$anchor")]
    anchor: Option<String>,
    #[serde(rename = "$dynamicAnchor")]
    dynamic_anchor: Option<String>,
    #[serde(rename = "$schema")]
    dialect: Option<String>,
    #[serde(rename = "$ref")]
    reference: Option<String>,
    #[serde(rename = "$dynamicRef")]
    dynamic_ref: Option<String>,

    #[serde(rename = "type")]
    types: Option<RawTypes>,
    nullable: Option<bool>,

    any_of: Option<Vec<Value>>,
    all_of: Option<Vec<Value>>,
    one_of: Option<Vec<Value>>,
    not: Option<Value>,
    #[serde(rename = "if")]
    if_schema: Option<Value>,
    #[serde(rename = "then")]
    then_schema: Option<Value>,
    #[serde(rename = "else")]
    else_schema: Option<Value>,

    pattern: Option<String>,
    min_length: Option<u64>,
    max_length: Option<u64>,
    format: Option<String>,
    content_media_type: Option<String>,
    content_encoding: Option<String>,

    multiple_of: Option<f64>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    exclusive_minimum: Option<Bound>,
    exclusive_maximum: Option<Bound>,

    items: Option<Value>,
    prefix_items: Option<Vec<Value>>,
    contains: Option<Value>,
    min_contains: Option<u64>,
    max_contains: Option<u64>,
    min_items: Option<u64>,
    max_items: Option<u64>,
    unique_items: Option<bool>,
    unevaluated_items: Option<Value>,
    #[serde(alias = "x-shuffleItems")]
    shuffle_items: Option<bool>,

    properties: Option<IndexMap<String, Value>>,
    pattern_properties: Option<IndexMap<String, Value>>,
    additional_properties: Option<Value>,
    unevaluated_properties: Option<Value>,
    property_names: Option<Value>,
    min_properties: Option<u64>,
    max_properties: Option<u64>,
    required: Option<Value>,
    dependent_required: Option<IndexMap<String, Vec<String>>>,
    dependent_schemas: Option<IndexMap<String, Value>>,

    #[serde(rename = "enum")]
    enumeration: Option<Vec<Value>>,
    #[serde(rename = "const", default, deserialize_with = "present")]
    constant: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    default: Option<Value>,

    title: Option<String>,
    description: Option<String>,
    deprecated: Option<bool>,
    read_only: Option<bool>,
    write_only: Option<bool>,
    examples: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    example: Option<Value>,

    xml: Option<XmlBinding>,
    #[serde(rename = "$defs")]
    defs: Option<IndexMap<String, Value>>,
    definitions: Option<IndexMap<String, Value>>,
}

/// Keeps explicit `null` distinct from an absent keyword.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Keywords that may sit next to `$ref` without turning it into a combined schema.
const REF_ANNOTATIONS: &[&str] = &[
    "$ref",
    "$dynamicRef",
    "$comment",
    "title",
    "description",
    "summary",
    "example",
    "examples",
    "deprecated",
    "readOnly",
    "writeOnly",
    "xml",
    "nullable",
];

// ============================================================================
// Documents and resources
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DocId(u32);

#[derive(Debug, Clone)]
struct Document {
    url: Url,
    value: Arc<Value>,
}

#[derive(Debug, Clone)]
struct Resource {
    base: Url,
    document: DocId,
    pointer: String,
}

/// Stack of schema resources entered while walking, used by `$dynamicRef`.
#[derive(Debug, Default, Clone)]
pub struct DynamicScope {
    stack: Vec<ResourceId>,
}

impl DynamicScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the resource of `id`. Returns true if a new resource was pushed, which
    /// must be passed back to [`leave`](Self::leave).
    pub fn enter(&mut self, registry: &SchemaRegistry, id: SchemaId) -> bool {
        match registry.get(id).resource {
            Some(resource) if self.stack.last() != Some(&resource) => {
                self.stack.push(resource);
                true
            }
            _ => false,
        }
    }

    pub fn leave(&mut self, pushed: bool) {
        if pushed {
            self.stack.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable arena of linked schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: Vec<Arc<Schema>>,
    documents: Vec<Document>,
    document_index: HashMap<String, DocId>,
    pointers: HashMap<(DocId, String), SchemaId>,
    resources: Vec<Resource>,
    resource_index: HashMap<String, ResourceId>,
    anchors: HashMap<(ResourceId, String), SchemaId>,
    dynamic_anchors: HashMap<(ResourceId, String), SchemaId>,
}

impl SchemaRegistry {
    /// Load a single in-memory schema document and link it.
    pub fn from_value(value: &Value) -> Result<(SchemaRegistry, SchemaId), RefError> {
        let mut builder = RegistryBuilder::new();
        let id = builder.load_root(MEMORY_BASE, value.clone())?;
        builder.link(&NoReader)?;
        Ok((builder.build(), id))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Schema by id. Ids are only ever produced by this registry or its builder.
    pub fn get(&self, id: SchemaId) -> &Schema {
        &self.schemas[id.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = SchemaId> {
        (0..self.schemas.len() as u32).map(SchemaId)
    }

    /// Follow reference-only schemas to their target.
    pub fn resolve(&self, id: SchemaId) -> SchemaId {
        self.resolve_in(id, &DynamicScope::default())
    }

    /// Follow reference-only schemas, resolving `$dynamicRef` against `scope`.
    pub fn resolve_in(&self, id: SchemaId, scope: &DynamicScope) -> SchemaId {
        let mut current = id;
        for _ in 0..MAX_REFERENCE_HOPS {
            let schema = self.get(current);
            if !schema.is_reference_only() {
                return current;
            }
            let Some(reference) = &schema.reference else {
                return current;
            };
            let Some(target) = reference.target() else {
                return current;
            };
            current = self.dynamic_target(reference, target, scope);
        }
        current
    }

    /// Outermost dynamic anchor with the reference's name wins, provided the static
    /// target is itself a dynamic anchor.
    ///
    /// The scope is searched from the entry resource inward (JSON Schema 2020-12
    /// `$dynamicRef` semantics), so a document that extends a recursive schema
    /// overrides the anchor of the schema it extends. The nearest enclosing anchor
    /// only applies when no outer resource declares the name.
    fn dynamic_target(&self, reference: &Reference, target: SchemaId, scope: &DynamicScope) -> SchemaId {
        let Some(name) = reference.dynamic_anchor() else {
            return target;
        };
        if self.get(target).dynamic_anchor.as_deref() != Some(name) {
            return target;
        }
        for resource in &scope.stack {
            if let Some(found) = self.dynamic_anchors.get(&(*resource, name.to_string())) {
                return *found;
            }
        }
        target
    }

    /// `allOf` members including a `$ref` target that carries sibling constraints.
    pub fn all_of(&self, id: SchemaId) -> Vec<SchemaId> {
        let schema = self.get(id);
        let mut members = Vec::with_capacity(schema.all_of.len() + 1);
        if schema.ref_has_siblings {
            if let Some(target) = schema.reference.as_ref().and_then(|r| r.target()) {
                members.push(target);
            }
        }
        members.extend(schema.all_of.iter().copied());
        members
    }

    /// Schema loaded from `url`, which may carry a JSON pointer fragment.
    pub fn lookup(&self, url: &str) -> Option<SchemaId> {
        let (doc, fragment) = url.split_once('#').unwrap_or((url, ""));
        let doc_id = self.document_index.get(doc)?;
        let pointer = urlencoding::decode(fragment).ok()?.into_owned();
        self.pointers.get(&(*doc_id, pointer)).copied()
    }

    /// Compact description of a schema for diagnostics, e.g.
    /// `schema type=object properties=[id, name] required=[id]`.
    pub fn fingerprint(&self, id: SchemaId) -> String {
        let id = self.resolve(id);
        let schema = self.get(id);
        let mut parts = vec!["schema".to_string()];
        if let Some(b) = schema.boolean {
            parts.push(b.to_string());
        }
        if let Some(name) = &schema.name {
            parts.push(format!("name={name}"));
        }
        if let Some(r) = &schema.reference {
            parts.push(format!("ref={}", r.uri));
        }
        if !schema.types.is_empty() {
            let types: Vec<&str> = schema.types.iter().map(|t| t.as_str()).collect();
            parts.push(format!("type={}", types.join("|")));
        }
        if schema.nullable {
            parts.push("nullable=true".to_string());
        }
        if let Some(format) = &schema.format {
            parts.push(format!("format={format}"));
        }
        if let Some(pattern) = &schema.pattern {
            parts.push(format!("pattern={}", pattern.source));
        }
        push_opt(&mut parts, "minLength", schema.min_length);
        push_opt(&mut parts, "maxLength", schema.max_length);
        push_opt(&mut parts, "minimum", schema.minimum);
        push_opt(&mut parts, "maximum", schema.maximum);
        match schema.exclusive_minimum {
            Some(Bound::Value(v)) => parts.push(format!("exclusiveMinimum={v}")),
            Some(Bound::Flag(true)) => parts.push("exclusiveMinimum=true".to_string()),
            _ => {}
        }
        match schema.exclusive_maximum {
            Some(Bound::Value(v)) => parts.push(format!("exclusiveMaximum={v}")),
            Some(Bound::Flag(true)) => parts.push("exclusiveMaximum=true".to_string()),
            _ => {}
        }
        push_opt(&mut parts, "multipleOf", schema.multiple_of);
        push_opt(&mut parts, "minItems", schema.min_items);
        push_opt(&mut parts, "maxItems", schema.max_items);
        if schema.unique_items {
            parts.push("uniqueItems=true".to_string());
        }
        if let Some(items) = schema.items {
            let items = self.get(self.resolve(items));
            if !items.types.is_empty() {
                let types: Vec<&str> = items.types.iter().map(|t| t.as_str()).collect();
                parts.push(format!("items={}", types.join("|")));
            }
        }
        if !schema.enumeration.is_empty() {
            let values: Vec<String> = schema.enumeration.iter().map(|v| v.to_string()).collect();
            parts.push(format!("enum=[{}]", values.join(", ")));
        }
        if !schema.properties.is_empty() {
            let names: Vec<&str> = schema.properties.keys().map(|k| k.as_str()).collect();
            parts.push(format!("properties=[{}]", names.join(", ")));
        }
        if !schema.required.is_empty() {
            parts.push(format!("required=[{}]", schema.required.join(", ")));
        }
        if schema.is_closed() {
            parts.push("free-form=false".to_string());
        }
        for (keyword, members) in [
            ("anyOf", &schema.any_of),
            ("allOf", &schema.all_of),
            ("oneOf", &schema.one_of),
        ] {
            if !members.is_empty() {
                parts.push(format!("{keyword}={}", members.len()));
            }
        }
        parts.join(" ")
    }
}

fn push_opt<T: std::fmt::Display>(parts: &mut Vec<String>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        parts.push(format!("{key}={v}"));
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Mutable phase of a registry: loading, linking and patching.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: SchemaRegistry,
    fetched: HashSet<String>,
}

impl From<SchemaRegistry> for RegistryBuilder {
    fn from(registry: SchemaRegistry) -> Self {
        let fetched = registry.document_index.keys().cloned().collect();
        RegistryBuilder { registry, fetched }
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to everything loaded so far.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn build(self) -> SchemaRegistry {
        self.registry
    }

    pub fn get(&self, id: SchemaId) -> &Schema {
        self.registry.get(id)
    }

    pub fn get_mut(&mut self, id: SchemaId) -> &mut Schema {
        Arc::make_mut(&mut self.registry.schemas[id.index()])
    }

    /// Add a programmatically built schema.
    pub fn add(&mut self, schema: Schema) -> SchemaId {
        let id = SchemaId(self.registry.schemas.len() as u32);
        self.registry.schemas.push(Arc::new(schema));
        id
    }

    /// Register a document without loading any schema from it.
    pub fn load_document(&mut self, url: &str, value: Value) -> Result<Url, RefError> {
        let url = Url::parse(url).map_err(|e| RefError::invalid(url, e.to_string()))?;
        let mut key = url.clone();
        key.set_fragment(None);
        self.register_document(key.clone(), value);
        Ok(key)
    }

    /// Register a document whose root is a schema and load that root.
    pub fn load_root(&mut self, url: &str, value: Value) -> Result<SchemaId, RefError> {
        let url = self.load_document(url, value)?;
        self.schema_at(url.as_str(), "")
    }

    /// Load the schema at `pointer` inside a registered document.
    pub fn schema_at(&mut self, url: &str, pointer: &str) -> Result<SchemaId, RefError> {
        let doc = *self
            .registry
            .document_index
            .get(url.split('#').next().unwrap_or(url))
            .ok_or_else(|| RefError::unresolved(url, "document not loaded"))?;
        self.load_pointer(doc, pointer, url)
    }

    fn register_document(&mut self, url: Url, value: Value) -> DocId {
        if let Some(existing) = self.registry.document_index.get(url.as_str()) {
            return *existing;
        }
        let id = DocId(self.registry.documents.len() as u32);
        self.registry.document_index.insert(url.to_string(), id);
        self.registry.documents.push(Document {
            url: url.clone(),
            value: Arc::new(value),
        });
        self.fetched.insert(url.to_string());
        self.resource_for(url, id, String::new());
        id
    }

    fn resource_for(&mut self, base: Url, document: DocId, pointer: String) -> ResourceId {
        let mut key = base.clone();
        key.set_fragment(None);
        if let Some(existing) = self.registry.resource_index.get(key.as_str()) {
            return *existing;
        }
        let id = ResourceId(self.registry.resources.len() as u32);
        self.registry.resource_index.insert(key.to_string(), id);
        self.registry.resources.push(Resource {
            base: key,
            document,
            pointer,
        });
        id
    }

    /// Navigate a document by pointer, tracking the innermost `$id` resource.
    fn load_pointer(&mut self, doc: DocId, pointer: &str, reference: &str) -> Result<SchemaId, RefError> {
        if let Some(id) = self.registry.pointers.get(&(doc, pointer.to_string())) {
            return Ok(*id);
        }
        let document = self.registry.documents[doc.0 as usize].clone();
        let mut resource = self.resource_for(document.url.clone(), doc, String::new());
        let mut base = document.url.clone();
        let mut current: &Value = &document.value;
        let mut walked = String::new();
        let mut name = None;
        if !pointer.is_empty() {
            if !pointer.starts_with('/') {
                return Err(RefError::MalformedPointer {
                    reference: reference.to_string(),
                    pointer: pointer.to_string(),
                });
            }
            let tokens: Vec<String> = pointer[1..].split('/').map(unescape_pointer).collect();
            for (i, token) in tokens.iter().enumerate() {
                // the target's own $id is handled when it is loaded
                if let Some(id) = current.get("$id").and_then(Value::as_str) {
                    if let Ok(joined) = base.join(id) {
                        base = joined;
                        resource = self.resource_for(base.clone(), doc, walked.clone());
                    }
                }
                current = match current {
                    Value::Object(map) => map.get(token.as_str()),
                    Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
                    _ => None,
                }
                .ok_or_else(|| RefError::unresolved(reference, format!("pointer '{pointer}' not found")))?;
                walked.push('/');
                walked.push_str(&super::error::escape_pointer(token));
                if i + 1 == tokens.len() && i > 0 {
                    let parent = tokens[i - 1].as_str();
                    if matches!(parent, "schemas" | "$defs" | "definitions") {
                        name = Some(token.clone());
                    }
                }
            }
        }
        let value = current.clone();
        self.load_value(doc, &value, pointer.to_string(), resource, name)
    }

    fn load_value(
        &mut self,
        doc: DocId,
        value: &Value,
        pointer: String,
        parent_resource: ResourceId,
        name: Option<String>,
    ) -> Result<SchemaId, RefError> {
        if let Some(id) = self.registry.pointers.get(&(doc, pointer.clone())) {
            return Ok(*id);
        }
        let document_url = self.registry.documents[doc.0 as usize].url.to_string();
        let location = Location {
            document: document_url.clone(),
            pointer: pointer.clone(),
        };
        let id = self.add(Schema::default());
        self.registry.pointers.insert((doc, pointer.clone()), id);

        let map = match value {
            Value::Bool(b) => {
                let schema = self.get_mut(id);
                schema.boolean = Some(*b);
                schema.location = location;
                schema.resource = Some(parent_resource);
                schema.name = name;
                return Ok(id);
            }
            Value::Object(map) => map,
            other => {
                return Err(RefError::invalid(
                    format!("{document_url}#{pointer}"),
                    format!("expected object or boolean, got {}", super::types::kind_of(other)),
                ))
            }
        };

        let raw = RawSchema::deserialize(value)
            .map_err(|e| RefError::invalid(format!("{document_url}#{pointer}"), e.to_string()))?;

        let resource = match &raw.id {
            Some(own) => {
                let base = self.registry.resources[parent_resource.0 as usize].base.clone();
                let joined = base
                    .join(own)
                    .map_err(|e| RefError::invalid(format!("{document_url}#{pointer}"), e.to_string()))?;
                self.resource_for(joined, doc, pointer.clone())
            }
            None => parent_resource,
        };
        if let Some(anchor) = &raw.anchor {
            self.registry.anchors.insert((resource, anchor.clone()), id);
        }
        if let Some(anchor) = &raw.dynamic_anchor {
            self.registry.anchors.entry((resource, anchor.clone())).or_insert(id);
            self.registry.dynamic_anchors.insert((resource, anchor.clone()), id);
        }

        let mut schema = Schema {
            id: raw.id.clone(),
            anchor: raw.anchor.clone(),
            dynamic_anchor: raw.dynamic_anchor.clone(),
            dialect: raw.dialect.clone(),
            location,
            resource: Some(resource),
            name,
            ..Default::default()
        };

        if let Some(r) = &raw.reference {
            schema.reference = Some(Reference::new(r.clone(), false));
        } else if let Some(r) = &raw.dynamic_ref {
            schema.reference = Some(Reference::new(r.clone(), true));
        }
        schema.ref_has_siblings =
            schema.reference.is_some() && map.keys().any(|k| !REF_ANNOTATIONS.contains(&k.as_str()));

        let at = |suffix: &str| format!("{pointer}/{suffix}");
        let invalid = |reason: String| RefError::invalid(format!("{document_url}#{pointer}"), reason);

        // types
        match raw.types {
            Some(RawTypes::One(t)) => {
                let tag = TypeTag::parse(&t).ok_or_else(|| invalid(format!("unknown type '{t}'")))?;
                schema.types = Types::single(tag);
            }
            Some(RawTypes::Many(list)) => {
                for t in list {
                    let tag = TypeTag::parse(&t).ok_or_else(|| invalid(format!("unknown type '{t}'")))?;
                    schema.types.insert(tag);
                }
            }
            None => {}
        }
        schema.nullable = raw.nullable.unwrap_or(false);

        // composition
        schema.any_of = self.load_list(doc, raw.any_of.as_deref(), &at("anyOf"), resource)?;
        schema.all_of = self.load_list(doc, raw.all_of.as_deref(), &at("allOf"), resource)?;
        schema.one_of = self.load_list(doc, raw.one_of.as_deref(), &at("oneOf"), resource)?;
        schema.not = self.load_opt(doc, raw.not.as_ref(), at("not"), resource)?;
        schema.if_schema = self.load_opt(doc, raw.if_schema.as_ref(), at("if"), resource)?;
        schema.then_schema = self.load_opt(doc, raw.then_schema.as_ref(), at("then"), resource)?;
        schema.else_schema = self.load_opt(doc, raw.else_schema.as_ref(), at("else"), resource)?;

        // strings
        if let Some(pattern) = &raw.pattern {
            schema
                .set_pattern(pattern)
                .map_err(|e| invalid(format!("invalid pattern '{pattern}': {e}")))?;
        }
        schema.min_length = raw.min_length;
        schema.max_length = raw.max_length;
        schema.format = raw.format;
        schema.content_media_type = raw.content_media_type;
        schema.content_encoding = raw.content_encoding;

        // numbers
        schema.multiple_of = raw.multiple_of;
        schema.minimum = raw.minimum;
        schema.maximum = raw.maximum;
        schema.exclusive_minimum = raw.exclusive_minimum;
        schema.exclusive_maximum = raw.exclusive_maximum;

        // arrays; Draft-04 tuple `items` is treated as `prefixItems`
        match &raw.items {
            Some(Value::Array(tuple)) => {
                schema.prefix_items = self.load_list(doc, Some(tuple.as_slice()), &at("items"), resource)?;
            }
            Some(items) => {
                schema.items = Some(self.load_value(doc, items, at("items"), resource, None)?);
            }
            None => {}
        }
        if raw.prefix_items.is_some() {
            schema.prefix_items = self.load_list(doc, raw.prefix_items.as_deref(), &at("prefixItems"), resource)?;
        }
        schema.contains = self.load_opt(doc, raw.contains.as_ref(), at("contains"), resource)?;
        schema.min_contains = raw.min_contains;
        schema.max_contains = raw.max_contains;
        schema.min_items = raw.min_items;
        schema.max_items = raw.max_items;
        schema.unique_items = raw.unique_items.unwrap_or(false);
        schema.unevaluated_items =
            self.load_opt(doc, raw.unevaluated_items.as_ref(), at("unevaluatedItems"), resource)?;
        schema.shuffle_items = raw.shuffle_items.unwrap_or(false);

        // objects
        if let Some(properties) = &raw.properties {
            for (key, value) in properties {
                let child = self.load_value(
                    doc,
                    value,
                    format!("{pointer}/properties/{}", super::error::escape_pointer(key)),
                    resource,
                    None,
                )?;
                schema.properties.insert(key.clone(), child);
            }
        }
        if let Some(patterns) = &raw.pattern_properties {
            for (key, value) in patterns {
                let child = self.load_value(
                    doc,
                    value,
                    format!("{pointer}/patternProperties/{}", super::error::escape_pointer(key)),
                    resource,
                    None,
                )?;
                schema
                    .add_pattern_property(key, child)
                    .map_err(|e| invalid(format!("invalid pattern property '{key}': {e}")))?;
            }
        }
        schema.additional_properties = match &raw.additional_properties {
            Some(Value::Bool(b)) => Some(AdditionalProperties::Bool(*b)),
            Some(value) => Some(AdditionalProperties::Schema(self.load_value(
                doc,
                value,
                at("additionalProperties"),
                resource,
                None,
            )?)),
            None => None,
        };
        schema.unevaluated_properties = self.load_opt(
            doc,
            raw.unevaluated_properties.as_ref(),
            at("unevaluatedProperties"),
            resource,
        )?;
        schema.property_names = self.load_opt(doc, raw.property_names.as_ref(), at("propertyNames"), resource)?;
        schema.min_properties = raw.min_properties;
        schema.max_properties = raw.max_properties;
        if let Some(Value::Array(required)) = &raw.required {
            schema.required = required
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
        schema.dependent_required = raw.dependent_required.unwrap_or_default();
        if let Some(dependent) = &raw.dependent_schemas {
            for (key, value) in dependent {
                let child = self.load_value(
                    doc,
                    value,
                    format!("{pointer}/dependentSchemas/{}", super::error::escape_pointer(key)),
                    resource,
                    None,
                )?;
                schema.dependent_schemas.insert(key.clone(), child);
            }
        }

        // values and annotations
        schema.enumeration = raw.enumeration.unwrap_or_default();
        schema.constant = raw.constant;
        schema.default = raw.default;
        schema.title = raw.title;
        schema.description = raw.description;
        schema.deprecated = raw.deprecated.unwrap_or(false);
        schema.read_only = raw.read_only.unwrap_or(false);
        schema.write_only = raw.write_only.unwrap_or(false);
        schema.examples = match raw.examples {
            Some(Value::Array(list)) => list,
            Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
            Some(other) => vec![other],
            None => Vec::new(),
        };
        schema.example = raw.example;
        schema.xml = raw.xml;

        for (keyword, defs) in [("$defs", &raw.defs), ("definitions", &raw.definitions)] {
            if let Some(defs) = defs {
                for (key, value) in defs {
                    let child = self.load_value(
                        doc,
                        value,
                        format!("{pointer}/{keyword}/{}", super::error::escape_pointer(key)),
                        resource,
                        Some(key.clone()),
                    )?;
                    schema.defs.insert(key.clone(), child);
                }
            }
        }

        *self.get_mut(id) = schema;
        Ok(id)
    }

    fn load_list(
        &mut self,
        doc: DocId,
        values: Option<&[Value]>,
        pointer: &str,
        resource: ResourceId,
    ) -> Result<Vec<SchemaId>, RefError> {
        let Some(values) = values else {
            return Ok(Vec::new());
        };
        values
            .iter()
            .enumerate()
            .map(|(i, v)| self.load_value(doc, v, format!("{pointer}/{i}"), resource, None))
            .collect()
    }

    fn load_opt(
        &mut self,
        doc: DocId,
        value: Option<&Value>,
        pointer: String,
        resource: ResourceId,
    ) -> Result<Option<SchemaId>, RefError> {
        value
            .map(|v| self.load_value(doc, v, pointer, resource, None))
            .transpose()
    }

    // ------------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------------

    /// Resolve every pending reference. Documents named by external references are
    /// fetched through `reader`, each at most once.
    pub fn link(&mut self, reader: &dyn Reader) -> Result<(), RefError> {
        let mut next = 0;
        while next < self.registry.schemas.len() {
            let id = SchemaId(next as u32);
            next += 1;
            let Some(reference) = self.registry.schemas[id.index()].reference.clone() else {
                continue;
            };
            if reference.target().is_some() {
                continue;
            }
            let target = self.resolve_reference(id, &reference.uri, reader)?;
            debug!("Resolved reference '{}' to {}", reference.uri, target);
            if let Some(r) = &self.registry.schemas[id.index()].reference {
                let _ = r.target.set(target);
            }
        }
        Ok(())
    }

    fn resolve_reference(&mut self, from: SchemaId, uri: &str, reader: &dyn Reader) -> Result<SchemaId, RefError> {
        let resource = self
            .registry
            .get(from)
            .resource
            .ok_or_else(|| RefError::unresolved(uri, "schema has no base URI"))?;
        let base = self.registry.resources[resource.0 as usize].base.clone();
        let target = base
            .join(uri)
            .map_err(|e| RefError::unresolved(uri, e.to_string()))?;
        let fragment = urlencoding::decode(target.fragment().unwrap_or(""))
            .map_err(|e| RefError::unresolved(uri, e.to_string()))?
            .into_owned();
        let mut document_url = target.clone();
        document_url.set_fragment(None);

        let resource = match self.registry.resource_index.get(document_url.as_str()) {
            Some(r) => *r,
            None => {
                if !self.fetched.insert(document_url.to_string()) {
                    return Err(RefError::unresolved(uri, "document could not be loaded"));
                }
                debug!("Fetching referenced document {}", document_url);
                let fetched = reader.read(&document_url)?;
                let doc = self.register_document(document_url.clone(), fetched.value);
                self.resource_for(document_url.clone(), doc, String::new())
            }
        };
        let Resource { document, pointer, .. } = self.registry.resources[resource.0 as usize].clone();

        if fragment.is_empty() {
            return self.load_pointer(document, &pointer, uri);
        }
        if fragment.starts_with('/') {
            return self.load_pointer(document, &format!("{pointer}{fragment}"), uri);
        }

        // named anchor, scoped to the resource
        if let Some(id) = self.registry.anchors.get(&(resource, fragment.clone())) {
            return Ok(*id);
        }
        let value = self.registry.documents[document.0 as usize].value.clone();
        let root = navigate(&value, &pointer).ok_or_else(|| RefError::unresolved(uri, "resource not found"))?;
        let found = find_anchor(root, &fragment, &pointer, true)
            .ok_or_else(|| RefError::unresolved(uri, format!("anchor '{fragment}' not found")))?;
        self.load_pointer(document, &found, uri)?;
        self.registry
            .anchors
            .get(&(resource, fragment.clone()))
            .copied()
            .ok_or_else(|| RefError::unresolved(uri, format!("anchor '{fragment}' not found")))
    }
}

fn navigate<'a>(value: &'a Value, pointer: &str) -> Option<&'a Value> {
    if pointer.is_empty() {
        return Some(value);
    }
    value.pointer(pointer)
}

/// Find the pointer of the object declaring `$anchor`/`$dynamicAnchor` == `name`
/// without crossing into nested resources.
fn find_anchor(value: &Value, name: &str, pointer: &str, is_root: bool) -> Option<String> {
    match value {
        Value::Object(map) => {
            if !is_root && map.contains_key("$id") {
                return None;
            }
            let declares = |key: &str| map.get(key).and_then(Value::as_str) == Some(name);
            if declares("$anchor") || declares("$dynamicAnchor") {
                return Some(pointer.to_string());
            }
            map.iter().find_map(|(k, v)| {
                find_anchor(v, name, &format!("{pointer}/{}", super::error::escape_pointer(k)), false)
            })
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_anchor(v, name, &format!("{pointer}/{i}"), false)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticReader;
    use serde_json::json;

    #[test]
    fn test_load_simple_schema() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "type": "object",
            "properties": {"b": {"type": "string"}, "a": {"type": "integer"}},
            "required": ["a"]
        }))
        .unwrap();
        let schema = registry.get(id);
        assert!(schema.types.is(TypeTag::Object));
        let keys: Vec<&String> = schema.properties.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(schema.required, vec!["a"]);
    }

    #[test]
    fn test_self_reference_terminates() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "type": "array",
            "items": {"$ref": "#"}
        }))
        .unwrap();
        let items = registry.get(id).items.unwrap();
        assert_eq!(registry.resolve(items), id);
    }

    #[test]
    fn test_pointer_reference_and_memoization() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "$defs": {"name": {"type": "string"}},
            "properties": {
                "first": {"$ref": "#/$defs/name"},
                "last": {"$ref": "#/$defs/name"}
            }
        }))
        .unwrap();
        let schema = registry.get(id);
        let first = registry.resolve(schema.properties["first"]);
        let last = registry.resolve(schema.properties["last"]);
        assert_eq!(first, last);
        assert_eq!(registry.get(first).name.as_deref(), Some("name"));
    }

    #[test]
    fn test_anchor_is_scoped_to_resource() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "$id": "https://example.com/root",
            "properties": {"a": {"$ref": "#item"}},
            "$defs": {
                "item": {"$anchor": "item", "type": "integer"},
                "other": {
                    "$id": "https://example.com/other",
                    "$defs": {"x": {"$anchor": "item", "type": "string"}}
                }
            }
        }))
        .unwrap();
        let a = registry.resolve(registry.get(id).properties["a"]);
        assert!(registry.get(a).types.is(TypeTag::Integer));
    }

    #[test]
    fn test_unresolved_reference_errors() {
        let err = SchemaRegistry::from_value(&json!({"$ref": "#/$defs/missing"})).unwrap_err();
        assert!(matches!(err, RefError::Unresolved { .. }));
    }

    #[test]
    fn test_external_reference_through_reader() {
        let reader = StaticReader::new().with(
            "https://example.com/common.json",
            json!({"definitions": {"id": {"type": "integer", "minimum": 1}}}),
        );
        let mut builder = RegistryBuilder::new();
        let id = builder
            .load_root(
                "https://example.com/api.json",
                json!({"properties": {"id": {"$ref": "common.json#/definitions/id"}}}),
            )
            .unwrap();
        builder.link(&reader).unwrap();
        let registry = builder.build();
        let target = registry.resolve(registry.get(id).properties["id"]);
        assert_eq!(registry.get(target).minimum, Some(1.0));
    }

    #[test]
    fn test_dynamic_ref_resolves_outermost_anchor() {
        let reader = StaticReader::new().with(
            "https://example.com/tree",
            json!({
                "$id": "https://example.com/tree",
                "$dynamicAnchor": "node",
                "type": "object",
                "properties": {
                    "children": {"type": "array", "items": {"$dynamicRef": "#node"}}
                }
            }),
        );
        let mut builder = RegistryBuilder::new();
        let strict = builder
            .load_root(
                "https://example.com/strict-tree",
                json!({
                    "$id": "https://example.com/strict-tree",
                    "$dynamicAnchor": "node",
                    "$ref": "tree",
                    "unevaluatedProperties": false
                }),
            )
            .unwrap();
        builder.link(&reader).unwrap();
        let registry = builder.build();

        let tree = registry.get(strict).reference.as_ref().unwrap().target().unwrap();
        let children = registry.get(tree).properties["children"];
        let items = registry.get(children).items.unwrap();

        let mut scope = DynamicScope::new();
        scope.enter(&registry, strict);
        scope.enter(&registry, tree);
        assert_eq!(registry.resolve_in(items, &scope), strict);
        assert_eq!(registry.resolve(items), tree);
    }

    #[test]
    fn test_ref_with_siblings_is_implicit_all_of() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "$defs": {"base": {"type": "string"}},
            "properties": {"a": {"$ref": "#/$defs/base", "maxLength": 3}}
        }))
        .unwrap();
        let a = registry.get(id).properties["a"];
        assert_eq!(registry.resolve(a), a);
        assert_eq!(registry.all_of(a).len(), 1);
    }

    #[test]
    fn test_fingerprint() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "type": "integer", "format": "int32", "minimum": 1
        }))
        .unwrap();
        assert_eq!(registry.fingerprint(id), "schema type=integer format=int32 minimum=1");
    }
}
