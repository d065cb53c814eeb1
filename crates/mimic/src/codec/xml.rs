//! XML codec.
//!
//! Decoding walks the element tree and the schema together: properties bound with
//! `xml.attribute` are read from attributes, everything else from child elements,
//! honoring `xml.name`, `xml.namespace` and `xml.wrapped`. The raw tree (all leaves
//! are strings) is then coerced by the schema parser with textual conversions on.
//!
//! Without a schema, elements become objects keyed by local name; repeated names
//! become arrays, attributes become string properties and namespace declarations
//! show up as `prefix -> uri` pseudo-properties.

use super::{
    declared_properties, declares, extra_schema, items_schema, property_schema, xml_binding, CodecError, SchemaHandle,
};
use crate::media::MediaType;
use crate::schema::{compact, ParseOptions, SchemaId, SchemaRegistry, TypeTag, ValidationError, XmlBinding};
use roxmltree::{Document, Node, NodeId};
use serde_json::{Map, Value};
use std::cell::Cell;
use std::collections::HashSet;

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const DEFAULT_ROOT: &str = "root";
const DEFAULT_ITEM: &str = "item";

// ============================================================================
// Decoding
// ============================================================================

pub(crate) fn unmarshal(handle: &SchemaHandle<'_>, body: &[u8], media: &MediaType) -> Result<Value, CodecError> {
    let text = std::str::from_utf8(body).map_err(|e| CodecError::malformed(media, e))?;
    let doc = Document::parse(text).map_err(|e| CodecError::malformed(media, e))?;
    let decoder = Decoder {
        handle,
        registry: handle.registry(),
    };
    let raw = decoder.element(doc.root_element(), handle.schema())?;
    handle.parse(&raw, ParseOptions::textual())
}

struct Decoder<'h, 'r> {
    handle: &'h SchemaHandle<'r>,
    registry: &'r SchemaRegistry,
}

impl Decoder<'_, '_> {
    fn element(&self, node: Node<'_, '_>, id: Option<SchemaId>) -> Result<Value, CodecError> {
        self.handle.check_cancelled()?;
        if node.attribute((XSI_NAMESPACE, "nil")) == Some("true") {
            return Ok(Value::Null);
        }
        let Some(id) = id.map(|i| self.registry.resolve(i)) else {
            return Ok(free_element(node));
        };
        if declares(self.registry, id, TypeTag::Array) {
            let item = items_schema(self.registry, id);
            let items = child_elements(node)
                .map(|child| self.element(child, item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::Array(items));
        }
        if declares(self.registry, id, TypeTag::Object) || !declared_properties(self.registry, id).is_empty() {
            return self.object(node, id);
        }
        let schema = self.registry.get(id);
        if schema.types.is_empty() && child_elements(node).next().is_some() {
            return Ok(free_element(node));
        }
        Ok(Value::String(text_of(node)))
    }

    fn object(&self, node: Node<'_, '_>, id: SchemaId) -> Result<Value, CodecError> {
        let owner = self.registry.get(id);
        let mut map = Map::new();
        let mut used_attributes: HashSet<String> = HashSet::new();
        let mut used_elements: HashSet<NodeId> = HashSet::new();

        for (key, site) in declared_properties(self.registry, id) {
            let binding = xml_binding(self.registry, site);
            let name = binding.and_then(|x| x.name.clone()).unwrap_or_else(|| key.clone());
            let namespace = binding.and_then(|x| x.namespace.as_deref());
            let pid = self.registry.resolve(site);

            if binding.is_some_and(|x| x.attribute) {
                if let Some(value) = find_attribute(node, &name, namespace) {
                    map.insert(key.clone(), Value::String(value.to_string()));
                    used_attributes.insert(name);
                    continue;
                }
                if owner.is_required(&key) {
                    return Err(self.invalid(id, node, format!("required attribute '{name}' not found")));
                }
                if let Some(child) = find_child(node, &name, namespace) {
                    if owner.is_closed() {
                        return Err(self.invalid(id, node, format!("property '{key}' must be an XML attribute")));
                    }
                    used_elements.insert(child.id());
                }
                continue;
            }

            if declares(self.registry, pid, TypeTag::Array) {
                let item = items_schema(self.registry, pid);
                if binding.is_some_and(|x| x.wrapped) {
                    if let Some(wrapper) = find_child(node, &name, namespace) {
                        used_elements.insert(wrapper.id());
                        let items = child_elements(wrapper)
                            .map(|child| self.element(child, item))
                            .collect::<Result<Vec<_>, _>>()?;
                        map.insert(key, Value::Array(items));
                    }
                    continue;
                }
                let item_name = item
                    .and_then(|i| xml_binding(self.registry, i))
                    .and_then(|x| x.name.clone())
                    .unwrap_or_else(|| name.clone());
                let children: Vec<Node<'_, '_>> = child_elements(node)
                    .filter(|c| element_matches(*c, &name, namespace) || element_matches(*c, &item_name, namespace))
                    .collect();
                if !children.is_empty() {
                    let mut items = Vec::with_capacity(children.len());
                    for child in children {
                        used_elements.insert(child.id());
                        items.push(self.element(child, item)?);
                    }
                    map.insert(key, Value::Array(items));
                }
                continue;
            }

            if let Some(child) = find_child(node, &name, namespace) {
                used_elements.insert(child.id());
                map.insert(key, self.element(child, Some(pid))?);
            }
        }

        for attribute in node.attributes() {
            if attribute.namespace() == Some(XSI_NAMESPACE) || used_attributes.contains(attribute.name()) {
                continue;
            }
            map.entry(attribute.name().to_string())
                .or_insert_with(|| Value::String(attribute.value().to_string()));
        }
        for child in child_elements(node) {
            if used_elements.contains(&child.id()) {
                continue;
            }
            let key = child.tag_name().name().to_string();
            let value = self.element(child, extra_schema(self.registry, id, &key))?;
            push_repeated(&mut map, key, value);
        }
        Ok(Value::Object(map))
    }

    fn invalid(&self, id: SchemaId, node: Node<'_, '_>, message: String) -> CodecError {
        let value = Value::String(format!("<{}>", node.tag_name().name()));
        CodecError::Invalid(ValidationError::new(message, compact(&value), self.registry.fingerprint(id)))
    }
}

fn child_elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|c| c.is_element())
}

fn element_matches(node: Node<'_, '_>, name: &str, namespace: Option<&str>) -> bool {
    node.tag_name().name() == name && namespace.map_or(true, |ns| node.tag_name().namespace() == Some(ns))
}

fn find_child<'a, 'input>(node: Node<'a, 'input>, name: &str, namespace: Option<&str>) -> Option<Node<'a, 'input>> {
    child_elements(node).find(|c| element_matches(*c, name, namespace))
}

fn find_attribute<'a>(node: Node<'a, '_>, name: &str, namespace: Option<&str>) -> Option<&'a str> {
    node.attributes()
        .find(|a| a.name() == name && namespace.map_or(true, |ns| a.namespace().is_none() || a.namespace() == Some(ns)))
        .map(|a| a.value())
}

fn text_of(node: Node<'_, '_>) -> String {
    let text: String = node.children().filter(|c| c.is_text()).filter_map(|c| c.text()).collect();
    text.trim().to_string()
}

/// Insert `value`, turning repeated keys into arrays.
fn push_repeated(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

/// Schema-less conversion of an element.
fn free_element(node: Node<'_, '_>) -> Value {
    if node.attribute((XSI_NAMESPACE, "nil")) == Some("true") {
        return Value::Null;
    }
    let declared = declared_namespaces(node);
    let has_children = child_elements(node).next().is_some();
    let has_attributes = node.attributes().any(|a| a.namespace() != Some(XSI_NAMESPACE));
    if !has_children && !has_attributes && declared.is_empty() {
        return Value::String(text_of(node));
    }

    let mut map = Map::new();
    for (prefix, uri) in declared {
        map.insert(prefix, Value::String(uri));
    }
    for attribute in node.attributes().filter(|a| a.namespace() != Some(XSI_NAMESPACE)) {
        map.insert(attribute.name().to_string(), Value::String(attribute.value().to_string()));
    }
    for child in child_elements(node) {
        push_repeated(&mut map, child.tag_name().name().to_string(), free_element(child));
    }
    if !has_children {
        let text = text_of(node);
        if !text.is_empty() {
            map.insert("#text".to_string(), Value::String(text));
        }
    }
    Value::Object(map)
}

/// Namespaces declared on this element (not inherited from its parent).
fn declared_namespaces(node: Node<'_, '_>) -> Vec<(String, String)> {
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    node.namespaces()
        .filter(|ns| ns.name() != Some("xml") && ns.uri() != XSI_NAMESPACE)
        .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
        .map(|ns| (ns.name().unwrap_or("xmlns").to_string(), ns.uri().to_string()))
        .collect()
}

// ============================================================================
// Encoding
// ============================================================================

pub(crate) fn marshal(handle: &SchemaHandle<'_>, value: &Value) -> Result<Vec<u8>, CodecError> {
    let value = handle.parse(value, ParseOptions::default())?;
    let registry = handle.registry();
    let root = handle.schema().map(|id| registry.resolve(id));
    let name = root
        .and_then(|id| {
            let schema = registry.get(id);
            schema
                .xml
                .as_ref()
                .and_then(|x| x.name.clone())
                .or_else(|| schema.name.clone())
        })
        .unwrap_or_else(|| DEFAULT_ROOT.to_string());

    let encoder = Encoder {
        handle,
        registry,
        declare_xsi: Cell::new(has_null(&value)),
    };
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    encoder.element(&mut out, &name, root, &value)?;
    Ok(out.into_bytes())
}

struct Encoder<'h, 'r> {
    handle: &'h SchemaHandle<'r>,
    registry: &'r SchemaRegistry,
    /// Pending `xmlns:xsi` declaration, taken by the root element.
    declare_xsi: Cell<bool>,
}

impl Encoder<'_, '_> {
    fn binding(&self, id: Option<SchemaId>) -> Option<XmlBinding> {
        id.and_then(|i| xml_binding(self.registry, i).cloned())
    }

    fn element(&self, out: &mut String, name: &str, id: Option<SchemaId>, value: &Value) -> Result<(), CodecError> {
        self.handle.check_cancelled()?;
        let binding = self.binding(id);
        let id = id.map(|i| self.registry.resolve(i));
        let tag = qualified(name, binding.as_ref());

        out.push('<');
        out.push_str(&tag);
        if let Some(XmlBinding {
            namespace: Some(ns), prefix, ..
        }) = &binding
        {
            match prefix {
                Some(p) => out.push_str(&format!(r#" xmlns:{p}="{}""#, escape(ns))),
                None => out.push_str(&format!(r#" xmlns="{}""#, escape(ns))),
            }
        }
        if self.declare_xsi.replace(false) {
            out.push_str(&format!(r#" xmlns:xsi="{XSI_NAMESPACE}""#));
        }

        let mut body = String::new();
        match value {
            Value::Object(map) => {
                for (key, v) in map {
                    let pid = id.and_then(|i| property_schema(self.registry, i, key).or_else(|| extra_schema(self.registry, i, key)));
                    let prop_binding = self.binding(pid);
                    let child_name = prop_binding
                        .as_ref()
                        .and_then(|x| x.name.as_deref())
                        .unwrap_or(key.as_str());
                    if prop_binding.as_ref().is_some_and(|x| x.attribute) {
                        if v.is_null() {
                            continue;
                        }
                        out.push_str(&format!(
                            r#" {}="{}""#,
                            qualified(child_name, prop_binding.as_ref()),
                            escape(&scalar_text(v))
                        ));
                        continue;
                    }
                    match v {
                        Value::Array(items) => {
                            let item = pid.and_then(|p| items_schema(self.registry, p));
                            if prop_binding.as_ref().is_some_and(|x| x.wrapped) {
                                let item_name = self.item_name(item, child_name);
                                let wrapper = qualified(child_name, prop_binding.as_ref());
                                body.push('<');
                                body.push_str(&wrapper);
                                body.push('>');
                                for entry in items {
                                    self.element(&mut body, &item_name, item, entry)?;
                                }
                                body.push_str("</");
                                body.push_str(&wrapper);
                                body.push('>');
                            } else {
                                let item_name = self.item_name(item, child_name);
                                for entry in items {
                                    self.element(&mut body, &item_name, item, entry)?;
                                }
                            }
                        }
                        _ => self.element(&mut body, child_name, pid, v)?,
                    }
                }
            }
            Value::Array(items) => {
                let item = id.and_then(|i| items_schema(self.registry, i));
                let item_name = self.item_name(item, DEFAULT_ITEM);
                for entry in items {
                    self.element(&mut body, &item_name, item, entry)?;
                }
            }
            Value::Null => out.push_str(r#" xsi:nil="true""#),
            scalar => body.push_str(&escape(&scalar_text(scalar))),
        }

        if body.is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            out.push_str(&body);
            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
        Ok(())
    }

    fn item_name(&self, item: Option<SchemaId>, fallback: &str) -> String {
        item.and_then(|i| self.binding(Some(i)))
            .and_then(|x| x.name)
            .unwrap_or_else(|| fallback.to_string())
    }
}

fn has_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().any(has_null),
        Value::Object(map) => map.values().any(has_null),
        _ => false,
    }
}

fn qualified(name: &str, binding: Option<&XmlBinding>) -> String {
    match binding.and_then(|x| x.prefix.as_deref()) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{name}"),
        _ => name.to_string(),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::{marshal, unmarshal};
    use super::*;
    use serde_json::json;

    fn xml() -> MediaType {
        MediaType::parse("application/xml").unwrap()
    }

    fn registry(schema: Value) -> (SchemaRegistry, SchemaId) {
        SchemaRegistry::from_value(&schema).unwrap()
    }

    #[test]
    fn test_null_property_round_trips_as_nil() {
        let (registry, id) = registry(json!({
            "type": "object",
            "xml": {"name": "root"},
            "properties": {
                "n": {"type": "integer", "nullable": true},
                "tags": {"type": "array", "items": {"type": "integer", "nullable": true}}
            }
        }));
        let value = json!({"n": null, "tags": [1, null]});
        let bytes = marshal(&registry, Some(id), &value, &xml()).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains(r#"<root xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#), "{text}");
        assert!(text.contains(r#"<n xsi:nil="true"/>"#), "{text}");
        assert_eq!(unmarshal(&registry, Some(id), &bytes, &xml()).unwrap(), value);
    }

    #[test]
    fn test_schemaless_nil_child_is_null() {
        let registry = SchemaRegistry::default();
        let body = br#"<root xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><a>1</a><b xsi:nil="true"/></root>"#;
        let value = unmarshal(&registry, None, body, &xml()).unwrap();
        assert_eq!(value, json!({"a": "1", "b": null}));
    }

    #[test]
    fn test_no_xsi_declaration_without_nulls() {
        let (registry, id) = registry(json!({"type": "object", "properties": {"n": {"type": "integer"}}}));
        let bytes = marshal(&registry, Some(id), &json!({"n": 3}), &xml()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("xsi"), "{text}");
    }

    #[test]
    fn test_required_attribute_found_as_element() {
        let (registry, id) = registry(json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "integer", "xml": {"attribute": true}}}
        }));
        let err = unmarshal(&registry, Some(id), b"<root><id>123</id></root>", &xml()).unwrap_err();
        match err {
            CodecError::Invalid(e) => assert_eq!(e.message, "required attribute 'id' not found"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_attributes_elements_and_coercion() {
        let (registry, id) = registry(json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer", "xml": {"attribute": true}},
                "name": {"type": "string", "xml": {"name": "full-name"}},
                "active": {"type": "boolean"}
            }
        }));
        let body = br#"<user id="7"><full-name>Ann</full-name><active>true</active></user>"#;
        let value = unmarshal(&registry, Some(id), body, &xml()).unwrap();
        assert_eq!(value, json!({"id": 7, "name": "Ann", "active": true}));
    }

    #[test]
    fn test_wrapped_and_unwrapped_arrays() {
        let (registry, id) = registry(json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "xml": {"wrapped": true}, "items": {"type": "string", "xml": {"name": "tag"}}},
                "n": {"type": "array", "items": {"type": "integer"}}
            }
        }));
        let body = b"<r><tags><tag>a</tag><tag>b</tag></tags><n>1</n><n>2</n></r>";
        let value = unmarshal(&registry, Some(id), body, &xml()).unwrap();
        assert_eq!(value, json!({"tags": ["a", "b"], "n": [1, 2]}));
    }

    #[test]
    fn test_closed_object_rejects_extra_elements() {
        let (registry, id) = registry(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {"a": {"type": "string"}}
        }));
        let err = unmarshal(&registry, Some(id), b"<r><a>x</a><b>y</b></r>", &xml()).unwrap_err();
        assert!(err.to_string().contains("property 'b' not defined"));
    }

    #[test]
    fn test_schemaless_exposes_namespace_declarations() {
        let body = br#"<doc xmlns:smp="urn:sample"><smp:item>1</smp:item><smp:item>2</smp:item></doc>"#;
        let registry = SchemaRegistry::default();
        let value = unmarshal(&registry, None, body, &xml()).unwrap();
        assert_eq!(value, json!({"smp": "urn:sample", "item": ["1", "2"]}));
    }

    #[test]
    fn test_marshal_round_trip() {
        let (registry, id) = registry(json!({
            "type": "object",
            "xml": {"name": "pet"},
            "properties": {
                "id": {"type": "integer", "xml": {"attribute": true}},
                "name": {"type": "string"},
                "photos": {"type": "array", "xml": {"wrapped": true}, "items": {"type": "string", "xml": {"name": "url"}}}
            }
        }));
        let value = json!({"id": 3, "name": "Rex & co", "photos": ["a", "b"]});
        let bytes = marshal(&registry, Some(id), &value, &xml()).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains(r#"<pet id="3">"#), "{text}");
        assert!(text.contains("<name>Rex &amp; co</name>"), "{text}");
        assert!(text.contains("<photos><url>a</url><url>b</url></photos>"), "{text}");
        assert_eq!(unmarshal(&registry, Some(id), &bytes, &xml()).unwrap(), value);
    }

    #[test]
    fn test_namespace_prefix_on_output() {
        let (registry, id) = registry(json!({
            "type": "string",
            "xml": {"name": "msg", "namespace": "urn:x", "prefix": "x"}
        }));
        let bytes = marshal(&registry, Some(id), &json!("hi"), &xml()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with(r#"<x:msg xmlns:x="urn:x">hi</x:msg>"#), "{text}");
    }
}
