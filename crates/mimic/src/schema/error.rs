//! Error types for schema loading, reference resolution and validation.

use crate::config::ReadError;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while loading schemas or resolving `$ref`s.
#[derive(Debug, Error)]
pub enum RefError {
    #[error("resolve reference '{reference}' failed: {reason}")]
    Unresolved { reference: String, reason: String },

    #[error("invalid JSON pointer '{pointer}' in reference '{reference}'")]
    MalformedPointer { reference: String, pointer: String },

    #[error("invalid schema at {location}: {reason}")]
    InvalidSchema { location: String, reason: String },

    /// Reader failures are propagated unchanged.
    #[error(transparent)]
    Read(#[from] ReadError),
}

impl RefError {
    pub(crate) fn unresolved(reference: &str, reason: impl Into<String>) -> Self {
        RefError::Unresolved {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(location: impl Into<String>, reason: impl Into<String>) -> Self {
        RefError::InvalidSchema {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// A constraint violation found while parsing a value against a schema.
///
/// `pointer` is the JSON pointer of the offending value, `value` a compact rendering
/// of it and `schema` a fingerprint of the schema that rejected it.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct ValidationError {
    pub pointer: String,
    pub message: String,
    pub value: String,
    pub schema: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<ValidationError>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, value: impl Into<String>, schema: impl Into<String>) -> Self {
        ValidationError {
            pointer: String::new(),
            message: message.into(),
            value: value.into(),
            schema: schema.into(),
            causes: Vec::new(),
        }
    }

    pub fn with_causes(mut self, causes: Vec<ValidationError>) -> Self {
        self.causes = causes;
        self
    }

    /// Wrap an error raised for a property: prefixes the pointer and the message.
    pub fn in_property(self, name: &str) -> Self {
        ValidationError {
            pointer: format!("/{}{}", escape_pointer(name), self.pointer),
            message: format!("parse property '{name}' failed: {}", self.message),
            ..self
        }
    }

    /// Wrap an error raised for an array item.
    pub fn in_item(self, index: usize) -> Self {
        ValidationError {
            pointer: format!("/{index}{}", self.pointer),
            message: format!("parse item {index} failed: {}", self.message),
            ..self
        }
    }

    /// Full diagnostic including the pointer, value and schema fingerprint.
    pub fn detail(&self) -> String {
        let pointer = if self.pointer.is_empty() { "/" } else { &self.pointer };
        format!(
            "{} (at {pointer}, value {}, {})",
            self.message, self.value, self.schema
        )
    }
}

/// Escape a key for use as a JSON pointer token (RFC 6901).
pub(crate) fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Unescape a JSON pointer token (RFC 6901).
pub(crate) fn unescape_pointer(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Compact, truncated JSON rendering of a value for error messages.
pub(crate) fn compact(value: &serde_json::Value) -> String {
    const LIMIT: usize = 80;
    let rendered = value.to_string();
    if rendered.chars().count() <= LIMIT {
        return rendered;
    }
    let truncated: String = rendered.chars().take(LIMIT).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_wrapping_builds_pointer_and_message() {
        let inner = ValidationError::new("invalid type, expected number but got string", "\"Alex\"", "schema type=number");
        let outer = inner.in_property("age").in_property("person/a");
        assert_eq!(outer.pointer, "/person~1a/age");
        assert_eq!(
            outer.message,
            "parse property 'person/a' failed: parse property 'age' failed: invalid type, expected number but got string"
        );
    }

    #[test]
    fn test_compact_truncates_long_values() {
        let long = json!("x".repeat(200));
        let rendered = compact(&long);
        assert!(rendered.ends_with("..."));
        assert!(rendered.len() < 100);
    }

    #[test]
    fn test_pointer_escaping_roundtrip() {
        assert_eq!(unescape_pointer(&escape_pointer("a/b~c")), "a/b~c");
    }
}
