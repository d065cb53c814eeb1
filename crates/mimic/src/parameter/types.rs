//! Type definitions for OpenAPI parameters and their decoded values.

use crate::schema::{SchemaId, ValidationError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Declarations
// ============================================================================

/// Where a parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Path,
    Query,
    Header,
    Cookie,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Path => "path",
            Location::Query => "query",
            Location::Header => "header",
            Location::Cookie => "cookie",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OpenAPI 3 parameter serialization style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    Simple,
    Label,
    Matrix,
    Form,
    SpaceDelimited,
    PipeDelimited,
    DeepObject,
}

impl Style {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(Style::Simple),
            "label" => Some(Style::Label),
            "matrix" => Some(Style::Matrix),
            "form" => Some(Style::Form),
            "spaceDelimited" => Some(Style::SpaceDelimited),
            "pipeDelimited" => Some(Style::PipeDelimited),
            "deepObject" => Some(Style::DeepObject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Simple => "simple",
            Style::Label => "label",
            Style::Matrix => "matrix",
            Style::Form => "form",
            Style::SpaceDelimited => "spaceDelimited",
            Style::PipeDelimited => "pipeDelimited",
            Style::DeepObject => "deepObject",
        }
    }

    /// Style used when a parameter declares none.
    pub fn default_for(location: Location) -> Self {
        match location {
            Location::Query => Style::Form,
            Location::Path | Location::Header | Location::Cookie => Style::Simple,
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared OpenAPI parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub location: Location,
    pub required: bool,
    pub deprecated: bool,
    pub style: Option<Style>,
    /// Unset means the style's default.
    pub explode: Option<bool>,
    pub schema: Option<SchemaId>,
}

impl Parameter {
    /// Parameter with default style and explode; path parameters are always required.
    pub fn new(name: impl Into<String>, location: Location) -> Self {
        Parameter {
            name: name.into(),
            location,
            required: location == Location::Path,
            deprecated: false,
            style: None,
            explode: None,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: SchemaId) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_explode(mut self, explode: bool) -> Self {
        self.explode = Some(explode);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required || self.location == Location::Path;
        self
    }

    pub fn effective_style(&self) -> Style {
        self.style.unwrap_or_else(|| Style::default_for(self.location))
    }

    /// `explode` defaults to true for `form`, false otherwise.
    pub fn effective_explode(&self) -> bool {
        self.explode.unwrap_or(self.effective_style() == Style::Form)
    }
}

// ============================================================================
// Decoded values
// ============================================================================

/// A decoded parameter: the text it came from and its typed value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterValue {
    pub raw: Option<String>,
    pub value: Value,
}

/// Decoded parameters of one request, keyed by name within each location.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestParameters {
    pub path: IndexMap<String, ParameterValue>,
    pub query: IndexMap<String, ParameterValue>,
    pub header: IndexMap<String, ParameterValue>,
    pub cookie: IndexMap<String, ParameterValue>,
}

impl RequestParameters {
    pub fn get(&self, location: Location, name: &str) -> Option<&ParameterValue> {
        self.location(location).get(name)
    }

    pub fn location(&self, location: Location) -> &IndexMap<String, ParameterValue> {
        match location {
            Location::Path => &self.path,
            Location::Query => &self.query,
            Location::Header => &self.header,
            Location::Cookie => &self.cookie,
        }
    }

    pub(crate) fn insert(&mut self, location: Location, name: String, value: ParameterValue) {
        let target = match location {
            Location::Path => &mut self.path,
            Location::Query => &mut self.query,
            Location::Header => &mut self.header,
            Location::Cookie => &mut self.cookie,
        };
        target.insert(name, value);
    }

    /// Typed values as a JSON object `{path: {..}, query: {..}, header: {..}, cookie: {..}}`,
    /// the shape workflow expressions see.
    pub fn to_value(&self) -> Value {
        let section = |m: &IndexMap<String, ParameterValue>| {
            Value::Object(m.iter().map(|(k, v)| (k.clone(), v.value.clone())).collect())
        };
        serde_json::json!({
            "path": section(&self.path),
            "query": section(&self.query),
            "header": section(&self.header),
            "cookie": section(&self.cookie),
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure to decode one parameter. Every variant names the parameter.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("required {location} parameter '{name}' not found")]
    Missing { name: String, location: Location },

    #[error("required {location} parameter '{name}' is empty")]
    Empty { name: String, location: Location },

    #[error("parameter '{name}': invalid number of key/value tokens ({count}), expected pairs")]
    InvalidPairs { name: String, count: usize },

    #[error("parameter '{name}': property '{property}' not defined in schema")]
    PropertyNotDefined { name: String, property: String },

    #[error("parameter '{name}': style '{style}' is not supported for {location} parameters")]
    UnsupportedStyle {
        name: String,
        style: Style,
        location: Location,
    },

    #[error("parameter '{name}': {source}")]
    Invalid {
        name: String,
        #[source]
        source: ValidationError,
    },
}

impl ParameterError {
    /// Name of the parameter that failed.
    pub fn name(&self) -> &str {
        match self {
            ParameterError::Missing { name, .. }
            | ParameterError::Empty { name, .. }
            | ParameterError::InvalidPairs { name, .. }
            | ParameterError::PropertyNotDefined { name, .. }
            | ParameterError::UnsupportedStyle { name, .. }
            | ParameterError::Invalid { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_and_explode_defaults() {
        let query = Parameter::new("q", Location::Query);
        assert_eq!(query.effective_style(), Style::Form);
        assert!(query.effective_explode());
        assert!(!query.required);

        let path = Parameter::new("id", Location::Path).required(false);
        assert_eq!(path.effective_style(), Style::Simple);
        assert!(!path.effective_explode());
        assert!(path.required);

        let deep = Parameter::new("f", Location::Query).with_style(Style::DeepObject);
        assert!(!deep.effective_explode());
    }

    #[test]
    fn test_style_parse_round_trips() {
        for style in [
            Style::Simple,
            Style::Label,
            Style::Matrix,
            Style::Form,
            Style::SpaceDelimited,
            Style::PipeDelimited,
            Style::DeepObject,
        ] {
            assert_eq!(Style::parse(style.as_str()), Some(style));
        }
        assert_eq!(Style::parse("tabDelimited"), None);
    }
}
