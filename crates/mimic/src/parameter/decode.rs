//! Style/explode decoding matrix.
//!
//! Extraction happens in two steps. First the raw text for a parameter is located
//! and split according to its style into a [`Raw`] shape (a scalar, a token list or
//! key/value pairs); tokens are percent-decoded only after splitting, so escaped
//! separators stay literal. Then the shape is coerced against the parameter schema
//! with the textual parser.

use super::types::{Location, Parameter, ParameterError, ParameterValue, Style};
use crate::codec::{declares, extra_schema, property_schema, shape};
use crate::schema::{ParseOptions, Parser, SchemaId, SchemaRegistry, TypeTag, ValidationError};
use hyper::HeaderMap;
use serde_json::{Map, Value};
use tracing::debug;

/// What the parameter schema expects.
#[derive(Debug, Clone, Copy)]
enum Kind {
    Primitive,
    Array,
    Object(SchemaId),
}

/// Style-split text of one parameter.
#[derive(Debug)]
enum Raw {
    Scalar(String),
    List(Vec<String>),
    Pairs(Vec<(String, Value)>),
}

/// Request pieces parameters are read from.
pub(crate) struct Source<'a> {
    route: Vec<&'a str>,
    path: Vec<&'a str>,
    /// Undecoded `key=value` pairs in request order.
    query: Vec<(&'a str, &'a str)>,
    headers: &'a HeaderMap,
}

impl<'a> Source<'a> {
    pub(crate) fn new(route: &'a str, path: &'a str, query: Option<&'a str>, headers: &'a HeaderMap) -> Self {
        let query = query
            .unwrap_or("")
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| p.split_once('=').unwrap_or((p, "")))
            .collect();
        Source {
            route: route.split('/').collect(),
            path: path.split('/').collect(),
            query,
            headers,
        }
    }

    /// Request segment bound to `{name}` in the route, with literal text around the
    /// placeholder removed.
    fn path_segment(&self, name: &str) -> Option<&'a str> {
        let placeholder = format!("{{{name}}}");
        let index = self.route.iter().position(|s| s.contains(&placeholder))?;
        let template = self.route[index];
        let segment = *self.path.get(index)?;
        let (prefix, suffix) = template.split_once(&placeholder)?;
        segment.strip_prefix(prefix)?.strip_suffix(suffix)
    }

    fn query_values(&self, name: &str) -> Vec<&'a str> {
        self.query
            .iter()
            .filter(|(k, _)| decode_query(k) == name)
            .map(|(_, v)| *v)
            .collect()
    }

    fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }

    fn cookie(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get_all(hyper::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|c| c.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }
}

pub(crate) struct Decoder<'r, 'p> {
    registry: &'r SchemaRegistry,
    declared: &'p [Parameter],
}

impl<'r, 'p> Decoder<'r, 'p> {
    pub(crate) fn new(registry: &'r SchemaRegistry, declared: &'p [Parameter]) -> Self {
        Decoder { registry, declared }
    }

    /// Decode one parameter; `Ok(None)` when an optional parameter is absent.
    pub(crate) fn decode(&self, param: &Parameter, source: &Source<'_>) -> Result<Option<ParameterValue>, ParameterError> {
        let style = param.effective_style();
        if !style_allowed(param.location, style) {
            return Err(ParameterError::UnsupportedStyle {
                name: param.name.clone(),
                style,
                location: param.location,
            });
        }
        if param.deprecated {
            debug!("Decoding deprecated {} parameter '{}'", param.location, param.name);
        }
        let kind = self.kind(param);

        let extracted = match param.location {
            Location::Path => {
                let Some(segment) = source.path_segment(&param.name).filter(|s| !s.is_empty()) else {
                    return Err(ParameterError::Missing {
                        name: param.name.clone(),
                        location: param.location,
                    });
                };
                Some((decode_path(segment), self.split_path(param, style, kind, segment)?))
            }
            Location::Query => self.split_query(param, style, kind, source)?,
            Location::Header => match source.header(&param.name) {
                Some(text) => Some((text.clone(), self.split_simple(param, kind, &text, ',', decode_none)?)),
                None => None,
            },
            Location::Cookie => match source.cookie(&param.name) {
                Some(text) => Some((decode_path(text), self.split_simple(param, kind, text, ',', decode_path)?)),
                None => None,
            },
        };

        let Some((raw, split)) = extracted else {
            return if param.required {
                Err(ParameterError::Missing {
                    name: param.name.clone(),
                    location: param.location,
                })
            } else {
                Ok(None)
            };
        };
        if is_empty(&split) {
            return if param.required {
                Err(ParameterError::Empty {
                    name: param.name.clone(),
                    location: param.location,
                })
            } else {
                Ok(None)
            };
        }

        let value = self.typed(param, kind, split)?;
        Ok(Some(ParameterValue { raw: Some(raw), value }))
    }

    fn kind(&self, param: &Parameter) -> Kind {
        match param.schema {
            Some(id) if declares(self.registry, id, TypeTag::Array) => Kind::Array,
            Some(id) if declares(self.registry, id, TypeTag::Object) => Kind::Object(id),
            _ => Kind::Primitive,
        }
    }

    // ------------------------------------------------------------------------
    // Splitting
    // ------------------------------------------------------------------------

    fn split_path(&self, param: &Parameter, style: Style, kind: Kind, segment: &str) -> Result<Raw, ParameterError> {
        let explode = param.effective_explode();
        match style {
            Style::Label => {
                let text = segment.strip_prefix('.').unwrap_or(segment);
                let separator = if explode && !matches!(kind, Kind::Primitive) { '.' } else { ',' };
                self.split_simple(param, kind, text, separator, decode_path)
            }
            Style::Matrix => {
                let text = segment.strip_prefix(';').unwrap_or(segment);
                let prefix = format!("{}=", param.name);
                match kind {
                    Kind::Array if explode => Ok(Raw::List(
                        text.split(';')
                            .map(|t| decode_path(t.strip_prefix(&prefix).unwrap_or(t)))
                            .collect(),
                    )),
                    Kind::Object(_) if explode => self.split_simple(param, kind, text, ';', decode_path),
                    _ => {
                        let text = text.strip_prefix(&prefix).unwrap_or(text);
                        self.split_simple(param, kind, text, ',', decode_path)
                    }
                }
            }
            _ => self.split_simple(param, kind, segment, ',', decode_path),
        }
    }

    /// `simple` splitting: `a,b,c` arrays, `k=v,k=v` (explode) or `k,v,k,v` objects.
    fn split_simple(
        &self,
        param: &Parameter,
        kind: Kind,
        text: &str,
        separator: char,
        decode: fn(&str) -> String,
    ) -> Result<Raw, ParameterError> {
        match kind {
            Kind::Primitive => Ok(Raw::Scalar(decode(text))),
            Kind::Array => Ok(Raw::List(text.split(separator).map(decode).collect())),
            Kind::Object(_) if param.effective_explode() => Ok(Raw::Pairs(
                text.split(separator)
                    .filter(|t| !t.is_empty())
                    .map(|t| {
                        let (k, v) = t.split_once('=').unwrap_or((t, ""));
                        (decode(k), Value::String(decode(v)))
                    })
                    .collect(),
            )),
            Kind::Object(_) => {
                let tokens: Vec<String> = text.split(separator).map(decode).collect();
                pairs(param, tokens).map(Raw::Pairs)
            }
        }
    }

    fn split_query(
        &self,
        param: &Parameter,
        style: Style,
        kind: Kind,
        source: &Source<'_>,
    ) -> Result<Option<(String, Raw)>, ParameterError> {
        let explode = param.effective_explode();

        if style == Style::DeepObject {
            return Ok(self.deep_object(param, source));
        }
        if let (Kind::Object(_), true) = (kind, explode) {
            // the whole query string is the object, minus other declared parameters
            let others: Vec<&str> = self
                .declared
                .iter()
                .filter(|p| p.location == Location::Query && p.name != param.name)
                .map(|p| p.name.as_str())
                .collect();
            let entries: Vec<(String, Value)> = source
                .query
                .iter()
                .map(|(k, v)| (decode_query(k), decode_query(v)))
                .filter(|(k, _)| !others.contains(&k.as_str()))
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            if entries.is_empty() {
                return Ok(None);
            }
            let raw = entries
                .iter()
                .map(|(k, v)| format!("{k}={}", v.as_str().unwrap_or_default()))
                .collect::<Vec<_>>()
                .join("&");
            return Ok(Some((raw, Raw::Pairs(entries))));
        }

        let values = source.query_values(&param.name);
        let Some(first) = values.first() else {
            return Ok(None);
        };
        let split = match kind {
            Kind::Primitive => Raw::Scalar(decode_query(first)),
            Kind::Array if explode => Raw::List(values.iter().map(|v| decode_query(v)).collect()),
            Kind::Array | Kind::Object(_) => {
                let tokens = delimited(style, first);
                match kind {
                    Kind::Object(_) => Raw::Pairs(pairs(param, tokens)?),
                    _ => Raw::List(tokens),
                }
            }
        };
        let raw = match &split {
            Raw::List(items) => items.join(","),
            _ => decode_query(first),
        };
        Ok(Some((raw, split)))
    }

    /// `name[a]=1&name[b][c]=2` into nested pairs. Repeated leaves are comma-joined.
    fn deep_object(&self, param: &Parameter, source: &Source<'_>) -> Option<(String, Raw)> {
        let prefix = format!("{}[", param.name);
        let mut root = Map::new();
        let mut raw = Vec::new();
        for (k, v) in &source.query {
            let key = decode_query(k);
            let Some(path) = key.strip_prefix(&prefix) else {
                continue;
            };
            let segments: Vec<&str> = path.trim_end_matches(']').split("][").collect();
            let value = decode_query(v);
            raw.push(format!("{key}={value}"));
            insert_deep(&mut root, &segments, value);
        }
        if raw.is_empty() {
            return None;
        }
        Some((raw.join("&"), Raw::Pairs(root.into_iter().collect())))
    }

    // ------------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------------

    fn typed(&self, param: &Parameter, kind: Kind, split: Raw) -> Result<Value, ParameterError> {
        let raw = match (kind, split) {
            (Kind::Object(id), Raw::Pairs(entries)) => Value::Object(self.object_entries(param, id, entries)?),
            (_, Raw::Scalar(s)) => Value::String(s),
            (_, Raw::List(items)) => Value::Array(items.into_iter().map(Value::String).collect()),
            (_, Raw::Pairs(entries)) => Value::Object(entries.into_iter().collect()),
        };
        let Some(schema) = param.schema else {
            return Ok(raw);
        };
        Parser::new(self.registry, ParseOptions::textual())
            .parse(&raw, schema)
            .map_err(|source| invalid(param, source))
    }

    /// Check every key against the schema and split comma-joined array values.
    fn object_entries(
        &self,
        param: &Parameter,
        id: SchemaId,
        entries: Vec<(String, Value)>,
    ) -> Result<Map<String, Value>, ParameterError> {
        let open = shape(self.registry, id).into_iter().any(|s| {
            let schema = self.registry.get(s);
            schema.is_free_form() || schema.is_dictionary()
        });
        let mut map = Map::new();
        for (key, value) in entries {
            match property_schema(self.registry, id, &key) {
                Some(property) if declares(self.registry, property, TypeTag::Array) => {
                    let value = match value {
                        Value::String(s) => Value::Array(s.split(',').map(|t| Value::String(t.to_string())).collect()),
                        other => other,
                    };
                    map.insert(key, value);
                }
                Some(_) => {
                    map.insert(key, value);
                }
                None if open || extra_schema(self.registry, id, &key).is_some() => {
                    map.insert(key, value);
                }
                None => {
                    return Err(ParameterError::PropertyNotDefined {
                        name: param.name.clone(),
                        property: key,
                    })
                }
            }
        }
        Ok(map)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn style_allowed(location: Location, style: Style) -> bool {
    match location {
        Location::Path => matches!(style, Style::Simple | Style::Label | Style::Matrix),
        Location::Query => matches!(
            style,
            Style::Form | Style::SpaceDelimited | Style::PipeDelimited | Style::DeepObject
        ),
        Location::Header => style == Style::Simple,
        Location::Cookie => matches!(style, Style::Simple | Style::Form),
    }
}

fn is_empty(raw: &Raw) -> bool {
    match raw {
        Raw::Scalar(s) => s.is_empty(),
        Raw::List(items) => items.iter().all(String::is_empty),
        Raw::Pairs(entries) => entries.is_empty(),
    }
}

/// Non-explode object tokens `k,v,k,v` into pairs.
fn pairs(param: &Parameter, tokens: Vec<String>) -> Result<Vec<(String, Value)>, ParameterError> {
    if tokens.len() % 2 != 0 {
        return Err(ParameterError::InvalidPairs {
            name: param.name.clone(),
            count: tokens.len(),
        });
    }
    let mut out = Vec::with_capacity(tokens.len() / 2);
    let mut iter = tokens.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        out.push((k, Value::String(v)));
    }
    Ok(out)
}

/// Split a non-exploded query value by its style's separator.
fn delimited(style: Style, value: &str) -> Vec<String> {
    match style {
        Style::SpaceDelimited => decode_query(value).split(' ').map(str::to_string).collect(),
        Style::PipeDelimited => decode_query(value).split('|').map(str::to_string).collect(),
        _ => value.split(',').map(decode_query).collect(),
    }
}

fn insert_deep(map: &mut Map<String, Value>, segments: &[&str], value: String) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        match map.get_mut(*first) {
            Some(Value::String(existing)) => {
                existing.push(',');
                existing.push_str(&value);
            }
            _ => {
                map.insert(first.to_string(), Value::String(value));
            }
        }
        return;
    }
    let child = map
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    if let Value::Object(inner) = child {
        insert_deep(inner, rest, value);
    }
}

fn invalid(param: &Parameter, source: ValidationError) -> ParameterError {
    ParameterError::Invalid {
        name: param.name.clone(),
        source,
    }
}

/// Percent-decode a path or cookie token; `+` is literal.
fn decode_path(text: &str) -> String {
    match urlencoding::decode(text) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(text.as_bytes())).into_owned(),
    }
}

/// Percent-decode a query token; `+` means space.
fn decode_query(text: &str) -> String {
    decode_path(&text.replace('+', " "))
}

fn decode_none(text: &str) -> String {
    text.trim().to_string()
}
