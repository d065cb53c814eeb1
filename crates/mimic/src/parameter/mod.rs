//! OpenAPI 3 parameter extraction and coercion.
//!
//! [`from_request`] decodes every declared parameter of a matched operation from a
//! request: path segments by route template, query pairs, headers and cookies, each
//! split according to its `style`/`explode` and coerced against its schema. The
//! first failure aborts the whole extraction.

mod decode;
mod types;

#[cfg(test)]
mod tests;

pub use types::{Location, Parameter, ParameterError, ParameterValue, RequestParameters, Style};

use crate::schema::SchemaRegistry;
use decode::{Decoder, Source};
use hyper::{HeaderMap, Request};
use tracing::debug;

/// Decode `declared` parameters from `request`, whose path matched `route`
/// (an OpenAPI path template such as `/users/{id}`).
pub fn from_request<B>(
    registry: &SchemaRegistry,
    declared: &[Parameter],
    route: &str,
    request: &Request<B>,
) -> Result<RequestParameters, ParameterError> {
    let uri = request.uri();
    from_parts(registry, declared, route, uri.path(), uri.query(), request.headers())
}

/// Same as [`from_request`] for callers that hold the request pieces separately.
pub fn from_parts(
    registry: &SchemaRegistry,
    declared: &[Parameter],
    route: &str,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<RequestParameters, ParameterError> {
    let source = Source::new(route, path, query, headers);
    let decoder = Decoder::new(registry, declared);
    let mut parameters = RequestParameters::default();
    for param in declared {
        if let Some(value) = decoder.decode(param, &source)? {
            debug!("Decoded {} parameter '{}'", param.location, param.name);
            parameters.insert(param.location, param.name.clone(), value);
        }
    }
    Ok(parameters)
}
