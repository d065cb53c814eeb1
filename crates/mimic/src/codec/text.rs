//! Plain text and opaque binary bodies.
//!
//! `text/*` bodies are a single string coerced against the schema, so `"12"` reads as
//! a number where the schema wants one. `application/octet-stream` passes bytes
//! through as a string, base64-encoded when the schema declares `format: byte` or
//! `contentEncoding: base64`.

use super::{CodecError, SchemaHandle};
use crate::media::MediaType;
use crate::schema::ParseOptions;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

pub(crate) fn handles(media: &MediaType) -> bool {
    media.kind == "text" || is_binary(media)
}

fn is_binary(media: &MediaType) -> bool {
    media.kind == "application" && media.subtype == "octet-stream"
}

/// True when the schema says binary content travels base64-encoded.
fn is_base64(handle: &SchemaHandle<'_>) -> bool {
    let Some(id) = handle.schema() else {
        return false;
    };
    let registry = handle.registry();
    let schema = registry.get(registry.resolve(id));
    schema.format.as_deref() == Some("byte") || schema.content_encoding.as_deref() == Some("base64")
}

pub(crate) fn unmarshal(handle: &SchemaHandle<'_>, body: &[u8], media: &MediaType) -> Result<Value, CodecError> {
    if is_binary(media) {
        let text = if is_base64(handle) {
            STANDARD.encode(body)
        } else {
            String::from_utf8_lossy(body).into_owned()
        };
        return handle.parse(&Value::String(text), ParseOptions::default());
    }
    let text = std::str::from_utf8(body).map_err(|e| CodecError::malformed(media, e))?;
    handle.parse(&Value::String(text.to_string()), ParseOptions::textual())
}

pub(crate) fn marshal(handle: &SchemaHandle<'_>, value: &Value, media: &MediaType) -> Result<Vec<u8>, CodecError> {
    let value = handle.parse(value, ParseOptions::default())?;
    let text = match &value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if is_binary(media) && is_base64(handle) {
        return STANDARD
            .decode(text.as_bytes())
            .map_err(|e| CodecError::malformed(media, e));
    }
    Ok(text.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::super::{marshal, unmarshal};
    use super::*;
    use crate::schema::SchemaRegistry;
    use serde_json::json;

    #[test]
    fn test_plain_text_is_coerced() {
        let (registry, id) = SchemaRegistry::from_value(&json!({"type": "integer", "maximum": 100})).unwrap();
        let media = MediaType::parse("text/plain; charset=utf-8").unwrap();
        assert_eq!(unmarshal(&registry, Some(id), b"42", &media).unwrap(), json!(42));
        assert!(unmarshal(&registry, Some(id), b"420", &media).is_err());
        assert_eq!(marshal(&registry, Some(id), &json!(42), &media).unwrap(), b"42");
    }

    #[test]
    fn test_octet_stream_base64() {
        let (registry, id) = SchemaRegistry::from_value(&json!({"type": "string", "format": "byte"})).unwrap();
        let media = MediaType::parse("application/octet-stream").unwrap();
        let value = unmarshal(&registry, Some(id), &[0, 159, 146, 150], &media).unwrap();
        assert_eq!(value, json!("AJ+Slg=="));
        assert_eq!(marshal(&registry, Some(id), &value, &media).unwrap(), vec![0, 159, 146, 150]);
    }
}
