//! Type definitions for the schema model.
//!
//! A [`Schema`] is a plain record. Sub-schemas are stored as [`SchemaId`]s into the
//! owning [`SchemaRegistry`](super::SchemaRegistry) arena, so recursive and mutually
//! recursive schemas need no owning pointers.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

// ============================================================================
// Identifiers
// ============================================================================

/// Index of a schema inside a registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(pub(crate) u32);

impl SchemaId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a schema resource (a document root or a schema carrying `$id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub(crate) u32);

// ============================================================================
// Type set
// ============================================================================

/// JSON Schema type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl TypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Integer => "integer",
            TypeTag::Boolean => "boolean",
            TypeTag::Object => "object",
            TypeTag::Array => "array",
            TypeTag::Null => "null",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(TypeTag::String),
            "number" => Some(TypeTag::Number),
            "integer" => Some(TypeTag::Integer),
            "boolean" => Some(TypeTag::Boolean),
            "object" => Some(TypeTag::Object),
            "array" => Some(TypeTag::Array),
            "null" => Some(TypeTag::Null),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, duplicate-free set of type tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Types(Vec<TypeTag>);

impl Types {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(tag: TypeTag) -> Self {
        Types(vec![tag])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.0.contains(&tag)
    }

    /// Insert a tag, keeping the set duplicate-free. Returns true if it was added.
    pub fn insert(&mut self, tag: TypeTag) -> bool {
        if self.contains(tag) {
            return false;
        }
        self.0.push(tag);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.0.iter().copied()
    }

    /// Union in declaration order: existing tags first, new tags appended.
    pub fn union(&mut self, other: &Types) {
        for tag in other.iter() {
            self.insert(tag);
        }
    }

    /// True if the set is exactly one tag.
    pub fn is(&self, tag: TypeTag) -> bool {
        self.0.len() == 1 && self.0[0] == tag
    }

    pub fn first(&self) -> Option<TypeTag> {
        self.0.first().copied()
    }
}

impl fmt::Display for Types {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|t| t.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

impl FromIterator<TypeTag> for Types {
    fn from_iter<I: IntoIterator<Item = TypeTag>>(iter: I) -> Self {
        let mut types = Types::new();
        for tag in iter {
            types.insert(tag);
        }
        types
    }
}

// ============================================================================
// Keyword value types
// ============================================================================

/// Exclusive bound: Draft-04 boolean flag or 2020-12 number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Flag(bool),
    Value(f64),
}

/// `additionalProperties` either as a literal boolean or a sub-schema.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdditionalProperties {
    Bool(bool),
    Schema(SchemaId),
}

/// XML binding of a schema (OpenAPI `xml` object).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XmlBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub attribute: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wrapped: bool,
}

/// Compiled `pattern` keyword.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Pattern {
            source: source.to_string(),
            regex: Regex::new(source)?,
        })
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// `$ref` or `$dynamicRef` still to resolve, with its memoized target.
#[derive(Debug, Clone)]
pub struct Reference {
    /// Reference exactly as written in the document.
    pub uri: String,
    /// True for `$dynamicRef`.
    pub dynamic: bool,
    pub(crate) target: OnceLock<SchemaId>,
}

impl Reference {
    pub fn new(uri: impl Into<String>, dynamic: bool) -> Self {
        Reference {
            uri: uri.into(),
            dynamic,
            target: OnceLock::new(),
        }
    }

    /// Resolved target, if linking has already happened.
    pub fn target(&self) -> Option<SchemaId> {
        self.target.get().copied()
    }

    /// Anchor name of a `$dynamicRef` fragment (`#node` -> `node`).
    pub fn dynamic_anchor(&self) -> Option<&str> {
        if !self.dynamic {
            return None;
        }
        let fragment = self.uri.rsplit_once('#').map(|(_, f)| f)?;
        if fragment.is_empty() || fragment.starts_with('/') {
            None
        } else {
            Some(fragment)
        }
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri && self.dynamic == other.dynamic
    }
}

/// Where a schema was loaded from, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub document: String,
    pub pointer: String,
}

// ============================================================================
// Schema record
// ============================================================================

/// A JSON Schema / OpenAPI schema object.
///
/// `Option` fields record whether a keyword was explicitly present in the source,
/// which drives [`patch`](super::patch) semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    // identity
    pub boolean: Option<bool>,
    pub id: Option<String>,
    pub anchor: Option<String>,
    pub dynamic_anchor: Option<String>,
    pub dialect: Option<String>,
    pub reference: Option<Reference>,

    // type
    pub types: Types,
    pub nullable: bool,

    // composition
    pub any_of: Vec<SchemaId>,
    pub all_of: Vec<SchemaId>,
    pub one_of: Vec<SchemaId>,
    pub not: Option<SchemaId>,
    pub if_schema: Option<SchemaId>,
    pub then_schema: Option<SchemaId>,
    pub else_schema: Option<SchemaId>,

    // strings
    pub pattern: Option<Pattern>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub format: Option<String>,
    pub content_media_type: Option<String>,
    pub content_encoding: Option<String>,

    // numbers
    pub multiple_of: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<Bound>,
    pub exclusive_maximum: Option<Bound>,

    // arrays
    pub items: Option<SchemaId>,
    pub prefix_items: Vec<SchemaId>,
    pub contains: Option<SchemaId>,
    pub min_contains: Option<u64>,
    pub max_contains: Option<u64>,
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
    pub unique_items: bool,
    pub unevaluated_items: Option<SchemaId>,
    pub shuffle_items: bool,

    // objects
    pub properties: IndexMap<String, SchemaId>,
    pub pattern_properties: IndexMap<String, SchemaId>,
    pub(crate) pattern_property_regex: Vec<Pattern>,
    pub additional_properties: Option<AdditionalProperties>,
    pub unevaluated_properties: Option<SchemaId>,
    pub property_names: Option<SchemaId>,
    pub min_properties: Option<u64>,
    pub max_properties: Option<u64>,
    pub required: Vec<String>,
    pub dependent_required: IndexMap<String, Vec<String>>,
    pub dependent_schemas: IndexMap<String, SchemaId>,

    // values
    pub enumeration: Vec<Value>,
    pub constant: Option<Value>,
    pub default: Option<Value>,

    // annotations
    pub title: Option<String>,
    pub description: Option<String>,
    pub deprecated: bool,
    pub read_only: bool,
    pub write_only: bool,
    pub examples: Vec<Value>,
    pub example: Option<Value>,

    pub xml: Option<XmlBinding>,
    pub defs: IndexMap<String, SchemaId>,

    /// Component or definition name this schema was declared under.
    pub name: Option<String>,
    pub location: Location,
    pub(crate) resource: Option<ResourceId>,
    /// True when `$ref` appears next to constraint keywords.
    pub(crate) ref_has_siblings: bool,
}

impl Schema {
    /// Schema that accepts anything (`true` / `{}`).
    pub fn any() -> Self {
        Schema::default()
    }

    pub fn of_type(tag: TypeTag) -> Self {
        Schema {
            types: Types::single(tag),
            ..Default::default()
        }
    }

    /// True when the schema carries only a reference (annotations aside).
    pub fn is_reference_only(&self) -> bool {
        self.reference.is_some() && !self.ref_has_siblings
    }

    pub fn has_composition(&self) -> bool {
        !self.any_of.is_empty() || !self.all_of.is_empty() || !self.one_of.is_empty()
    }

    /// True if the type set admits `tag`, honoring OpenAPI `nullable` for `null`
    /// and treating `number` as covering `integer` values.
    pub fn allows(&self, tag: TypeTag) -> bool {
        if tag == TypeTag::Null && self.nullable {
            return true;
        }
        if self.types.is_empty() {
            return true;
        }
        self.types.contains(tag) || (tag == TypeTag::Integer && self.types.contains(TypeTag::Number))
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable || self.types.contains(TypeTag::Null)
    }

    /// Targets object values: explicit `object` type or object-only keywords.
    pub fn is_object(&self) -> bool {
        if !self.types.is_empty() {
            return self.types.contains(TypeTag::Object);
        }
        !self.properties.is_empty()
            || self.additional_properties.is_some()
            || !self.pattern_properties.is_empty()
    }

    /// Free-form: an object schema that admits keys not listed in `properties`.
    pub fn is_free_form(&self) -> bool {
        if !self.is_object() {
            return false;
        }
        match self.additional_properties {
            None | Some(AdditionalProperties::Bool(true)) => true,
            Some(AdditionalProperties::Bool(false)) => false,
            Some(AdditionalProperties::Schema(_)) => self.properties.is_empty(),
        }
    }

    /// Dictionary: an object schema whose `additionalProperties` is a typed schema.
    pub fn is_dictionary(&self) -> bool {
        self.is_object() && matches!(self.additional_properties, Some(AdditionalProperties::Schema(_)))
    }

    /// True when `additionalProperties` is literally `false`.
    pub fn is_closed(&self) -> bool {
        matches!(self.additional_properties, Some(AdditionalProperties::Bool(false)))
    }

    /// Schema for a key not listed in `properties`, when it is a schema.
    pub fn additional_schema(&self) -> Option<SchemaId> {
        match self.additional_properties {
            Some(AdditionalProperties::Schema(id)) => Some(id),
            _ => None,
        }
    }

    /// First `patternProperties` entry whose regex matches `key`.
    pub fn pattern_property(&self, key: &str) -> Option<SchemaId> {
        self.pattern_property_regex
            .iter()
            .zip(self.pattern_properties.values())
            .find(|(pattern, _)| pattern.is_match(key))
            .map(|(_, id)| *id)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// XML element or attribute name for a property declared under `key`.
    pub fn xml_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.xml
            .as_ref()
            .and_then(|x| x.name.as_deref())
            .unwrap_or(key)
    }

    pub fn is_xml_attribute(&self) -> bool {
        self.xml.as_ref().map(|x| x.attribute).unwrap_or(false)
    }

    pub fn is_xml_wrapped(&self) -> bool {
        self.xml.as_ref().map(|x| x.wrapped).unwrap_or(false)
    }

    /// Lower bound of a numeric schema and whether it is exclusive. With both
    /// `minimum` and a numeric `exclusiveMinimum`, the tighter one applies.
    pub fn lower_bound(&self) -> Option<(f64, bool)> {
        match (self.minimum, self.exclusive_minimum) {
            (Some(min), Some(Bound::Value(v))) if min > v => Some((min, false)),
            (_, Some(Bound::Value(v))) => Some((v, true)),
            (Some(min), Some(Bound::Flag(flag))) => Some((min, flag)),
            (Some(min), None) => Some((min, false)),
            _ => None,
        }
    }

    /// Upper bound of a numeric schema and whether it is exclusive.
    pub fn upper_bound(&self) -> Option<(f64, bool)> {
        match (self.maximum, self.exclusive_maximum) {
            (Some(max), Some(Bound::Value(v))) if max < v => Some((max, false)),
            (_, Some(Bound::Value(v))) => Some((v, true)),
            (Some(max), Some(Bound::Flag(flag))) => Some((max, flag)),
            (Some(max), None) => Some((max, false)),
            _ => None,
        }
    }

    /// Replace the `pattern` keyword.
    pub fn set_pattern(&mut self, source: &str) -> Result<(), regex::Error> {
        self.pattern = Some(Pattern::new(source)?);
        Ok(())
    }

    /// Add a `patternProperties` entry.
    pub fn add_pattern_property(&mut self, source: &str, id: SchemaId) -> Result<(), regex::Error> {
        let pattern = Pattern::new(source)?;
        if let Some(index) = self.pattern_properties.get_index_of(source) {
            self.pattern_property_regex[index] = pattern;
            self.pattern_properties.insert(source.to_string(), id);
        } else {
            self.pattern_properties.insert(source.to_string(), id);
            self.pattern_property_regex.push(pattern);
        }
        Ok(())
    }
}

/// Name of the JSON kind of a value, as used in error messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_union_dedupes_and_keeps_order() {
        let mut a: Types = [TypeTag::String, TypeTag::Null].into_iter().collect();
        let b: Types = [TypeTag::Null, TypeTag::Integer].into_iter().collect();
        a.union(&b);
        assert_eq!(a.to_string(), "string, null, integer");
    }

    #[test]
    fn test_free_form_and_dictionary() {
        let mut schema = Schema::of_type(TypeTag::Object);
        assert!(schema.is_free_form());
        assert!(!schema.is_dictionary());

        schema.properties.insert("a".into(), SchemaId(1));
        schema.additional_properties = Some(AdditionalProperties::Bool(false));
        assert!(!schema.is_free_form());
        assert!(schema.is_closed());

        schema.additional_properties = Some(AdditionalProperties::Schema(SchemaId(2)));
        assert!(schema.is_dictionary());
    }

    #[test]
    fn test_exclusive_bounds_both_drafts() {
        let draft4 = Schema {
            minimum: Some(1.0),
            exclusive_minimum: Some(Bound::Flag(true)),
            ..Default::default()
        };
        assert_eq!(draft4.lower_bound(), Some((1.0, true)));

        let modern = Schema {
            exclusive_maximum: Some(Bound::Value(10.0)),
            ..Default::default()
        };
        assert_eq!(modern.upper_bound(), Some((10.0, true)));
    }

    #[test]
    fn test_tighter_bound_wins() {
        let schema = Schema {
            minimum: Some(10.0),
            exclusive_minimum: Some(Bound::Value(5.0)),
            maximum: Some(20.0),
            exclusive_maximum: Some(Bound::Value(30.0)),
            ..Default::default()
        };
        assert_eq!(schema.lower_bound(), Some((10.0, false)));
        assert_eq!(schema.upper_bound(), Some((20.0, false)));

        let equal = Schema {
            minimum: Some(5.0),
            exclusive_minimum: Some(Bound::Value(5.0)),
            ..Default::default()
        };
        assert_eq!(equal.lower_bound(), Some((5.0, true)));
    }

    #[test]
    fn test_dynamic_anchor_fragment() {
        let r = Reference::new("tree#node", true);
        assert_eq!(r.dynamic_anchor(), Some("node"));
        let r = Reference::new("#/$defs/node", true);
        assert_eq!(r.dynamic_anchor(), None);
    }
}
