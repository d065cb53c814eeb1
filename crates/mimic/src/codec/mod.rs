//! Schema-aware content codecs.
//!
//! [`unmarshal`] turns a request or response body into a typed value, validating it
//! against the schema; [`marshal`] validates a value and renders it in the requested
//! media type. The codec is chosen from the media type:
//!
//! | Media type | Codec |
//! |---|---|
//! | `application/json`, `*+json` | [`json`] |
//! | `application/xml`, `text/xml`, `*+xml` | [`xml`] |
//! | `application/x-www-form-urlencoded` | [`form`] |
//! | `multipart/form-data` | [`multipart`] |
//! | `text/plain`, `application/octet-stream` | [`text`] |

pub mod form;
pub mod json;
pub mod multipart;
pub mod text;
pub mod xml;

use crate::media::{InvalidMediaType, MediaType};
use crate::schema::{ParseOptions, Parser, SchemaId, SchemaRegistry, TypeTag, ValidationError, XmlBinding};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed {media} content: {reason}")]
    Malformed { media: String, reason: String },

    #[error("unsupported media type '{media}'")]
    Unsupported { media: String },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    MediaType(#[from] InvalidMediaType),
}

impl CodecError {
    pub(crate) fn malformed(media: &MediaType, reason: impl ToString) -> Self {
        CodecError::Malformed {
            media: media.essence(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Decode `body` as `media` and validate it against `schema` when one is given.
pub fn unmarshal(
    registry: &SchemaRegistry,
    schema: Option<SchemaId>,
    body: &[u8],
    media: &MediaType,
) -> Result<Value, CodecError> {
    SchemaHandle::new(registry, schema).unmarshal(body, media)
}

/// Validate `value` against `schema` when one is given and encode it as `media`.
pub fn marshal(
    registry: &SchemaRegistry,
    schema: Option<SchemaId>,
    value: &Value,
    media: &MediaType,
) -> Result<Vec<u8>, CodecError> {
    SchemaHandle::new(registry, schema).marshal(value, media)
}

/// A schema (or no schema) bound to its registry, ready to encode and decode bodies.
#[derive(Debug, Clone)]
pub struct SchemaHandle<'r> {
    registry: &'r SchemaRegistry,
    schema: Option<SchemaId>,
    cancel: Option<CancellationToken>,
}

impl<'r> SchemaHandle<'r> {
    pub fn new(registry: &'r SchemaRegistry, schema: Option<SchemaId>) -> Self {
        SchemaHandle {
            registry,
            schema,
            cancel: None,
        }
    }

    /// Abort work at part and element boundaries once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    pub fn schema(&self) -> Option<SchemaId> {
        self.schema
    }

    pub fn unmarshal(&self, body: &[u8], media: &MediaType) -> Result<Value, CodecError> {
        self.check_cancelled()?;
        debug!("Unmarshalling {} bytes as {}", body.len(), media.essence());
        if media.is_json() {
            json::unmarshal(self, body, media)
        } else if media.is_xml() {
            xml::unmarshal(self, body, media)
        } else if media.is_form_urlencoded() {
            form::unmarshal(self, body, media)
        } else if media.is_multipart() {
            multipart::unmarshal(self, body, media)
        } else if text::handles(media) {
            text::unmarshal(self, body, media)
        } else {
            Err(CodecError::Unsupported { media: media.essence() })
        }
    }

    pub fn marshal(&self, value: &Value, media: &MediaType) -> Result<Vec<u8>, CodecError> {
        self.check_cancelled()?;
        debug!("Marshalling value as {}", media.essence());
        if media.is_json() {
            json::marshal(self, value)
        } else if media.is_xml() {
            xml::marshal(self, value)
        } else if media.is_form_urlencoded() {
            form::marshal(self, value)
        } else if media.is_multipart() {
            multipart::marshal(self, value, media)
        } else if text::handles(media) {
            text::marshal(self, value, media)
        } else {
            Err(CodecError::Unsupported { media: media.essence() })
        }
    }

    /// Same handle pointed at another schema of the registry.
    pub(crate) fn at(&self, schema: Option<SchemaId>) -> SchemaHandle<'r> {
        SchemaHandle {
            registry: self.registry,
            schema,
            cancel: self.cancel.clone(),
        }
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), CodecError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(CodecError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Validate and coerce `value` with the given options; schema-less values pass as-is.
    pub(crate) fn parse(&self, value: &Value, options: ParseOptions) -> Result<Value, CodecError> {
        match self.schema {
            Some(id) => Ok(Parser::new(self.registry, options).parse(value, id)?),
            None => Ok(value.clone()),
        }
    }
}

// ============================================================================
// Schema shape helpers shared by the textual codecs
// ============================================================================

/// Schemas that shape a value at `id`: the resolved schema plus every composition
/// member, depth first. Textual codecs use this to find property declarations that
/// live inside `allOf`/`anyOf`/`oneOf` branches.
pub(crate) fn shape(registry: &SchemaRegistry, id: SchemaId) -> Vec<SchemaId> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    collect_shape(registry, id, &mut out, &mut seen);
    out
}

fn collect_shape(registry: &SchemaRegistry, id: SchemaId, out: &mut Vec<SchemaId>, seen: &mut HashSet<SchemaId>) {
    let id = registry.resolve(id);
    if !seen.insert(id) {
        return;
    }
    out.push(id);
    let schema = registry.get(id);
    let members = registry
        .all_of(id)
        .into_iter()
        .chain(schema.any_of.iter().copied())
        .chain(schema.one_of.iter().copied());
    for member in members {
        collect_shape(registry, member, out, seen);
    }
}

/// Schema declared for property `key` anywhere in the shape of `id`. The id is
/// returned unresolved so that bindings written next to a `$ref` stay visible.
pub(crate) fn property_schema(registry: &SchemaRegistry, id: SchemaId, key: &str) -> Option<SchemaId> {
    shape(registry, id)
        .into_iter()
        .find_map(|s| registry.get(s).properties.get(key).copied())
}

/// Declared properties across the shape of `id`, first declaration wins.
pub(crate) fn declared_properties(registry: &SchemaRegistry, id: SchemaId) -> Vec<(String, SchemaId)> {
    let mut out: Vec<(String, SchemaId)> = Vec::new();
    for s in shape(registry, id) {
        for (key, pid) in &registry.get(s).properties {
            if !out.iter().any(|(k, _)| k == key) {
                out.push((key.clone(), *pid));
            }
        }
    }
    out
}

/// XML binding written at `id` itself, else on the schema it resolves to.
pub(crate) fn xml_binding(registry: &SchemaRegistry, id: SchemaId) -> Option<&XmlBinding> {
    registry
        .get(id)
        .xml
        .as_ref()
        .or_else(|| registry.get(registry.resolve(id)).xml.as_ref())
}

/// Item schema of an array-shaped schema, unresolved.
pub(crate) fn items_schema(registry: &SchemaRegistry, id: SchemaId) -> Option<SchemaId> {
    shape(registry, id).into_iter().find_map(|s| registry.get(s).items)
}

/// True if any schema in the shape of `id` declares the given type.
pub(crate) fn declares(registry: &SchemaRegistry, id: SchemaId, tag: TypeTag) -> bool {
    shape(registry, id).into_iter().any(|s| {
        let schema = registry.get(s);
        match tag {
            TypeTag::Array => schema.types.contains(TypeTag::Array) || schema.items.is_some(),
            TypeTag::Object => schema.is_object(),
            other => schema.types.contains(other),
        }
    })
}

/// Schema for an undeclared key: a `patternProperties` match or the
/// `additionalProperties` schema.
pub(crate) fn extra_schema(registry: &SchemaRegistry, id: SchemaId, key: &str) -> Option<SchemaId> {
    shape(registry, id).into_iter().find_map(|s| {
        let schema = registry.get(s);
        schema.pattern_property(key).or_else(|| schema.additional_schema())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn media(s: &str) -> MediaType {
        MediaType::parse(s).unwrap()
    }

    #[test]
    fn test_unsupported_media_type() {
        let (registry, id) = SchemaRegistry::from_value(&json!({"type": "string"})).unwrap();
        let err = unmarshal(&registry, Some(id), b"x", &media("image/png")).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported { ref media } if media == "image/png"));
    }

    #[test]
    fn test_cancelled_handle_fails_fast() {
        let (registry, id) = SchemaRegistry::from_value(&json!({"type": "string"})).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let handle = SchemaHandle::new(&registry, Some(id)).with_cancel(token);
        let err = handle.unmarshal(b"\"x\"", &media("application/json")).unwrap_err();
        assert!(matches!(err, CodecError::Cancelled));
    }

    #[test]
    fn test_shape_walks_composition() {
        let (registry, id) = SchemaRegistry::from_value(&json!({
            "allOf": [
                {"properties": {"a": {"type": "string"}}},
                {"properties": {"b": {"type": "array", "items": {"type": "integer"}}}}
            ]
        }))
        .unwrap();
        let keys: Vec<String> = declared_properties(&registry, id).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        let b = property_schema(&registry, id, "b").unwrap();
        assert!(declares(&registry, b, TypeTag::Array));
        assert!(items_schema(&registry, b).is_some());
    }
}
