//! `application/x-www-form-urlencoded` codec.
//!
//! The body is read as a multi-map. Properties whose schema is an array take every
//! value of their key; other properties take the first one. Object-typed properties
//! carry JSON text, the default encoding for complex form fields.

use super::{declares, property_schema, CodecError, SchemaHandle};
use crate::media::MediaType;
use crate::schema::{ParseOptions, SchemaId, SchemaRegistry, TypeTag};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use url::form_urlencoded;

pub(crate) fn unmarshal(handle: &SchemaHandle<'_>, body: &[u8], media: &MediaType) -> Result<Value, CodecError> {
    let mut fields: IndexMap<String, Vec<String>> = IndexMap::new();
    for (key, value) in form_urlencoded::parse(body) {
        fields.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    let raw = fields_to_value(handle.registry(), handle.schema(), fields, media)?;
    handle.parse(&raw, ParseOptions::textual())
}

/// Turn a decoded multi-map into an object guided by the schema.
pub(crate) fn fields_to_value(
    registry: &SchemaRegistry,
    schema: Option<SchemaId>,
    fields: IndexMap<String, Vec<String>>,
    media: &MediaType,
) -> Result<Value, CodecError> {
    let mut map = Map::new();
    for (key, mut values) in fields {
        let property = schema.and_then(|id| property_schema(registry, id, &key));
        let value = match property {
            Some(p) if declares(registry, p, TypeTag::Array) => {
                Value::Array(values.into_iter().map(Value::String).collect())
            }
            Some(p) if declares(registry, p, TypeTag::Object) => {
                let text = values.swap_remove(0);
                serde_json::from_str(&text).map_err(|e| CodecError::malformed(media, format!("field '{key}': {e}")))?
            }
            Some(_) => Value::String(values.swap_remove(0)),
            None if values.len() == 1 => Value::String(values.swap_remove(0)),
            None => Value::Array(values.into_iter().map(Value::String).collect()),
        };
        map.insert(key, value);
    }
    Ok(Value::Object(map))
}

pub(crate) fn marshal(handle: &SchemaHandle<'_>, value: &Value) -> Result<Vec<u8>, CodecError> {
    let value = handle.parse(value, ParseOptions::default())?;
    let Value::Object(map) = &value else {
        return Err(CodecError::Malformed {
            media: "application/x-www-form-urlencoded".to_string(),
            reason: format!("expected an object but got {}", crate::schema::kind_of(&value)),
        });
    };
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, v) in map {
        match v {
            Value::Array(items) => {
                for item in items {
                    serializer.append_pair(key, &field_text(item));
                }
            }
            other => {
                serializer.append_pair(key, &field_text(other));
            }
        }
    }
    Ok(serializer.finish().into_bytes())
}

/// Text of a single form field.
pub(crate) fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{marshal, unmarshal};
    use super::*;
    use serde_json::json;

    fn form() -> MediaType {
        MediaType::parse("application/x-www-form-urlencoded").unwrap()
    }

    #[test]
    fn test_arrays_take_every_value() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "type": "object",
            "properties": {
                "tag": {"type": "array", "items": {"type": "integer"}},
                "name": {"type": "string"},
                "age": {"type": "integer"}
            }
        }))
        .unwrap();
        let value = unmarshal(&registry, Some(id), b"tag=1&name=J%20Doe&tag=2&age=40&name=ignored", &form()).unwrap();
        assert_eq!(value, json!({"tag": [1, 2], "name": "J Doe", "age": 40}));
    }

    #[test]
    fn test_object_fields_are_json() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "type": "object",
            "properties": {"address": {"type": "object", "properties": {"zip": {"type": "string"}}}}
        }))
        .unwrap();
        let value = unmarshal(&registry, Some(id), b"address=%7B%22zip%22%3A%2212345%22%7D", &form()).unwrap();
        assert_eq!(value, json!({"address": {"zip": "12345"}}));
    }

    #[test]
    fn test_round_trip() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "type": "object",
            "properties": {
                "q": {"type": "string"},
                "ids": {"type": "array", "items": {"type": "integer"}},
                "on": {"type": "boolean"}
            }
        }))
        .unwrap();
        let value = json!({"q": "a b&c", "ids": [1, 2], "on": false});
        let bytes = marshal(&registry, Some(id), &value, &form()).unwrap();
        assert_eq!(bytes, b"q=a+b%26c&ids=1&ids=2&on=false");
        assert_eq!(unmarshal(&registry, Some(id), &bytes, &form()).unwrap(), value);
    }

    #[test]
    fn test_marshal_requires_object() {
        let registry = SchemaRegistry::default();
        let err = marshal(&registry, None, &json!([1]), &form()).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }
}
