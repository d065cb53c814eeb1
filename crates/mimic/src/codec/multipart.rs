//! `multipart/form-data` codec.
//!
//! Each part is decoded with its own `Content-Type` against the schema of the
//! property sharing its form name. Parts carrying a `filename` become
//! `{filename, type, size}` descriptors instead of their content. When the
//! property is a string (the usual `format: binary` upload), the part is
//! validated as its file name (base64 content for `format: byte`) and the
//! descriptor replaces it afterwards.

use super::{declares, property_schema, CodecError, SchemaHandle};
use crate::media::MediaType;
use crate::schema::{kind_of, ParseOptions, TypeTag};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};
use tracing::debug;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// One decoded body part.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

pub(crate) fn unmarshal(handle: &SchemaHandle<'_>, body: &[u8], media: &MediaType) -> Result<Value, CodecError> {
    let boundary = media
        .boundary()
        .ok_or_else(|| CodecError::malformed(media, "missing boundary parameter"))?;
    let parts = split_parts(body, boundary).map_err(|reason| CodecError::malformed(media, reason))?;
    debug!("Multipart body has {} parts", parts.len());

    let registry = handle.registry();
    let mut map = Map::new();
    // descriptors standing in for string-typed file properties, by slot
    let mut files: Vec<(String, Option<usize>, Value)> = Vec::new();
    for part in parts {
        handle.check_cancelled()?;
        let property = handle.schema().and_then(|id| property_schema(registry, id, &part.name));
        let repeated = property.is_some_and(|p| declares(registry, p, TypeTag::Array));
        let Some(filename) = &part.filename else {
            let value = part_value(handle, &part, property)?;
            insert(&mut map, part.name, value, repeated);
            continue;
        };

        let descriptor = json!({
            "filename": filename,
            "type": part.content_type.clone().unwrap_or_else(|| "application/octet-stream".to_string()),
            "size": part.body.len(),
        });
        let target = match property {
            Some(p) if repeated => super::items_schema(registry, p),
            other => other,
        };
        if let Some(t) = target.filter(|&t| declares(registry, t, TypeTag::String)) {
            let stand_in = match registry.get(registry.resolve(t)).format.as_deref() {
                Some("byte") => STANDARD.encode(&part.body),
                _ => filename.clone(),
            };
            let slot = insert(&mut map, part.name.clone(), Value::String(stand_in), repeated);
            if let Some(slot) = slot {
                files.push((part.name, slot, descriptor));
            }
        } else {
            insert(&mut map, part.name, descriptor, repeated);
        }
    }

    let mut value = handle.parse(&Value::Object(map), ParseOptions::textual())?;
    if let Value::Object(parsed) = &mut value {
        for (name, slot, descriptor) in files {
            match (parsed.get_mut(&name), slot) {
                (Some(Value::Array(items)), Some(i)) if i < items.len() => items[i] = descriptor,
                (Some(entry), None) => *entry = descriptor,
                _ => {}
            }
        }
    }
    Ok(value)
}

/// Add a part value under its form name. Returns the slot it landed in:
/// `Some(None)` for a plain property, `Some(Some(i))` for item `i` of a
/// repeated one, `None` when a non-repeated name was already taken.
fn insert(map: &mut Map<String, Value>, name: String, value: Value, repeated: bool) -> Option<Option<usize>> {
    match map.get_mut(&name) {
        Some(Value::Array(items)) if repeated => {
            items.push(value);
            Some(Some(items.len() - 1))
        }
        Some(_) => None,
        None if repeated => {
            map.insert(name, Value::Array(vec![value]));
            Some(Some(0))
        }
        None => {
            map.insert(name, value);
            Some(None)
        }
    }
}

/// Decode a non-file part with its own media type.
fn part_value(
    handle: &SchemaHandle<'_>,
    part: &Part,
    property: Option<crate::schema::SchemaId>,
) -> Result<Value, CodecError> {
    let registry = handle.registry();
    let media = match &part.content_type {
        Some(ct) => MediaType::parse(ct)?,
        None => return Ok(Value::String(String::from_utf8_lossy(&part.body).into_owned())),
    };
    if media.is_text() {
        return Ok(Value::String(String::from_utf8_lossy(&part.body).into_owned()));
    }
    // array properties repeat the part; each part is one item
    let target = match property {
        Some(p) if declares(registry, p, TypeTag::Array) => super::items_schema(registry, p),
        other => other,
    };
    handle.at(target).unmarshal(&part.body, &media)
}

/// Split a multipart body into parts.
pub fn split_parts(body: &[u8], boundary: &str) -> Result<Vec<Part>, String> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut parts = Vec::new();
    let mut rest = match find(body, &delimiter) {
        Some(start) => &body[start + delimiter.len()..],
        None => return Err("boundary not found".to_string()),
    };
    loop {
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        let rest_after_line = rest.strip_prefix(CRLF).unwrap_or(rest);
        let end = find(rest_after_line, &delimiter).ok_or_else(|| "unterminated part".to_string())?;
        let raw = &rest_after_line[..end];
        let raw = raw.strip_suffix(CRLF).unwrap_or(raw);
        parts.push(parse_part(raw)?);
        rest = &rest_after_line[end + delimiter.len()..];
    }
}

fn parse_part(raw: &[u8]) -> Result<Part, String> {
    let (head, body) = match find(raw, HEADER_END) {
        Some(i) => (&raw[..i], &raw[i + HEADER_END.len()..]),
        None if raw.starts_with(CRLF) => (&raw[..0], &raw[CRLF.len()..]),
        None => return Err("part without header terminator".to_string()),
    };
    let head = String::from_utf8_lossy(head);
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in head.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "content-disposition" => {
                for param in value.split(';').skip(1) {
                    let Some((k, v)) = param.split_once('=') else {
                        continue;
                    };
                    let v = v.trim().trim_matches('"').to_string();
                    match k.trim().to_ascii_lowercase().as_str() {
                        "name" => name = Some(v),
                        "filename" => filename = Some(v),
                        _ => {}
                    }
                }
            }
            "content-type" => content_type = Some(value.trim().to_string()),
            _ => {}
        }
    }
    Ok(Part {
        name: name.ok_or_else(|| "part without a form name".to_string())?,
        filename,
        content_type,
        body: body.to_vec(),
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub(crate) fn marshal(handle: &SchemaHandle<'_>, value: &Value, media: &MediaType) -> Result<Vec<u8>, CodecError> {
    let boundary = media
        .boundary()
        .ok_or_else(|| CodecError::malformed(media, "missing boundary parameter"))?;
    let value = handle.parse(value, ParseOptions::default())?;
    let Value::Object(map) = &value else {
        return Err(CodecError::malformed(media, format!("expected an object but got {}", kind_of(&value))));
    };

    let mut out = Vec::new();
    for (key, v) in map {
        let entries: Vec<&Value> = match v {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for entry in entries {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            out.extend_from_slice(format!("Content-Disposition: form-data; name=\"{key}\"\r\n").as_bytes());
            match entry {
                Value::Object(_) | Value::Array(_) => {
                    out.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
                    out.extend_from_slice(entry.to_string().as_bytes());
                }
                other => {
                    out.extend_from_slice(CRLF);
                    out.extend_from_slice(super::form::field_text(other).as_bytes());
                }
            }
            out.extend_from_slice(CRLF);
        }
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Ok(out)
}
