//! JSON codec (`application/json` and `+json` subtypes).

use super::{CodecError, SchemaHandle};
use crate::media::MediaType;
use crate::schema::ParseOptions;
use serde_json::Value;

pub(crate) fn unmarshal(handle: &SchemaHandle<'_>, body: &[u8], media: &MediaType) -> Result<Value, CodecError> {
    let value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body).map_err(|e| CodecError::malformed(media, e))?
    };
    handle.parse(&value, ParseOptions::default())
}

pub(crate) fn marshal(handle: &SchemaHandle<'_>, value: &Value) -> Result<Vec<u8>, CodecError> {
    let value = handle.parse(value, ParseOptions::default())?;
    serde_json::to_vec(&value).map_err(|e| CodecError::Malformed {
        media: "application/json".to_string(),
        reason: e.to_string(),
    })
}
