//! Typed view over an OpenAPI 3.x document.
//!
//! Loading walks `paths` and `components`, registers every schema it meets in a
//! [`RegistryBuilder`] and links the result, so the returned [`OpenApi`] owns a
//! ready-to-use [`SchemaRegistry`].

use super::reader::{ConfigDocument, Reader};
use crate::parameter::{Location, Parameter, Style};
use crate::schema::{escape_pointer, RegistryBuilder, SchemaId, SchemaRegistry};
use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

const METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

#[derive(Debug, Deserialize)]
struct RawParameter {
    name: String,
    #[serde(rename = "in")]
    location: Location,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    deprecated: bool,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    explode: Option<bool>,
}

/// Request body of an operation: media type -> schema.
#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    pub required: bool,
    pub content: IndexMap<String, Option<SchemaId>>,
}

/// One declared response of an operation.
#[derive(Debug, Clone)]
pub struct Response {
    /// Status code or `default`.
    pub status: String,
    pub content: IndexMap<String, Option<SchemaId>>,
}

/// A single `paths.<template>.<method>` entry.
#[derive(Debug, Clone)]
pub struct Operation {
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    pub responses: Vec<Response>,
}

impl Operation {
    /// Response for a status code, falling back to `default`.
    pub fn response(&self, status: &str) -> Option<&Response> {
        self.responses
            .iter()
            .find(|r| r.status == status)
            .or_else(|| self.responses.iter().find(|r| r.status == "default"))
    }

    /// First 2xx response, or the first declared one.
    pub fn success_response(&self) -> Option<&Response> {
        self.responses
            .iter()
            .find(|r| r.status.starts_with('2'))
            .or_else(|| self.responses.first())
    }
}

/// A loaded OpenAPI description.
#[derive(Debug, Clone)]
pub struct OpenApi {
    pub url: Url,
    pub version: String,
    pub title: Option<String>,
    pub operations: Vec<Operation>,
    pub registry: SchemaRegistry,
}

impl OpenApi {
    /// Read and load the document at `url`; external `$ref`s go through the same reader.
    pub fn load(reader: &dyn Reader, url: &Url) -> anyhow::Result<Self> {
        let document = reader
            .read(url)
            .with_context(|| format!("Failed to read OpenAPI document {url}"))?;
        Self::from_document(document, reader)
    }

    pub fn from_document(document: ConfigDocument, reader: &dyn Reader) -> anyhow::Result<Self> {
        let url = document.info.url.clone();
        let value = document.value;
        let version = value
            .get("openapi")
            .and_then(Value::as_str)
            .context("Missing 'openapi' version field")?
            .to_string();
        if !version.starts_with("3.") {
            bail!("Unsupported OpenAPI version '{}'. Only 3.x documents are supported", version);
        }
        let title = value
            .pointer("/info/title")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut builder = RegistryBuilder::new();
        let base = builder.load_document(url.as_str(), value.clone())?;
        let base = base.as_str();

        if let Some(schemas) = value.pointer("/components/schemas").and_then(Value::as_object) {
            for name in schemas.keys() {
                builder
                    .schema_at(base, &format!("/components/schemas/{}", escape_pointer(name)))
                    .with_context(|| format!("Invalid schema 'components/schemas/{name}'"))?;
            }
        }

        let mut operations = Vec::new();
        if let Some(paths) = value.get("paths").and_then(Value::as_object) {
            for (path, item) in paths {
                let item_pointer = format!("/paths/{}", escape_pointer(path));
                let shared = load_parameters(&mut builder, &value, base, item, &item_pointer)?;
                for method in METHODS {
                    let Some(op) = item.get(*method) else {
                        continue;
                    };
                    let op_pointer = format!("{item_pointer}/{method}");
                    let own = load_parameters(&mut builder, &value, base, op, &op_pointer)?;
                    let mut parameters = shared.clone();
                    for parameter in own {
                        match parameters
                            .iter_mut()
                            .find(|p| p.name == parameter.name && p.location == parameter.location)
                        {
                            Some(existing) => *existing = parameter,
                            None => parameters.push(parameter),
                        }
                    }
                    let request_body = load_request_body(&mut builder, &value, base, op, &op_pointer)?;
                    let responses = load_responses(&mut builder, &value, base, op, &op_pointer)?;
                    debug!("Loaded operation {} {}", method.to_uppercase(), path);
                    operations.push(Operation {
                        method: method.to_uppercase(),
                        path: path.clone(),
                        operation_id: op.get("operationId").and_then(Value::as_str).map(str::to_string),
                        parameters,
                        request_body,
                        responses,
                    });
                }
            }
        }

        builder
            .link(reader)
            .with_context(|| format!("Failed to resolve references in {url}"))?;
        let registry = builder.build();
        info!(
            "Loaded OpenAPI {} document {} with {} operation(s), {} schema(s)",
            version,
            url,
            operations.len(),
            registry.len()
        );
        Ok(OpenApi {
            url,
            version,
            title,
            operations,
            registry,
        })
    }

    /// Component schema by name.
    pub fn schema(&self, name: &str) -> Option<SchemaId> {
        self.registry
            .lookup(&format!("{}#/components/schemas/{}", self.url, escape_pointer(name)))
    }

    pub fn operation(&self, method: &str, template: &str) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|op| op.method.eq_ignore_ascii_case(method) && op.path == template)
    }

    /// Operation whose route template matches a concrete request path.
    /// Literal segments win over templated ones.
    pub fn match_operation(&self, method: &str, path: &str) -> Option<&Operation> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        self.operations
            .iter()
            .filter(|op| op.method.eq_ignore_ascii_case(method))
            .filter_map(|op| route_score(&op.path, &segments).map(|score| (score, op)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, op)| op)
    }
}

/// Number of literal segments matched, or `None` when the template does not match.
fn route_score(template: &str, segments: &[&str]) -> Option<usize> {
    let parts: Vec<&str> = template.trim_matches('/').split('/').collect();
    if parts.len() != segments.len() {
        return None;
    }
    let mut score = 0;
    for (part, segment) in parts.iter().zip(segments) {
        if part.starts_with('{') && part.ends_with('}') {
            continue;
        }
        if part != segment {
            return None;
        }
        score += 1;
    }
    Some(score)
}

/// Follow a local `$ref` (`#/components/...`), returning the value and its pointer.
fn deref<'a>(document: &'a Value, value: &'a Value, pointer: String) -> anyhow::Result<(&'a Value, String)> {
    match value.get("$ref").and_then(Value::as_str) {
        Some(reference) => {
            let Some(local) = reference.strip_prefix('#') else {
                bail!("Only local references are supported here, got '{}'", reference);
            };
            let local = urlencoding::decode(local)
                .with_context(|| format!("Invalid reference '{reference}'"))?
                .into_owned();
            let target = document
                .pointer(&local)
                .with_context(|| format!("Reference '{reference}' not found"))?;
            Ok((target, local))
        }
        None => Ok((value, pointer)),
    }
}

fn load_parameters(
    builder: &mut RegistryBuilder,
    document: &Value,
    base: &str,
    owner: &Value,
    owner_pointer: &str,
) -> anyhow::Result<Vec<Parameter>> {
    let Some(list) = owner.get("parameters").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut parameters = Vec::with_capacity(list.len());
    for (i, entry) in list.iter().enumerate() {
        let (value, pointer) = deref(document, entry, format!("{owner_pointer}/parameters/{i}"))?;
        let raw: RawParameter = serde_json::from_value(value.clone())
            .with_context(|| format!("Invalid parameter at {pointer}"))?;
        let style = match raw.style.as_deref() {
            None | Some("") => None,
            Some(s) => Some(Style::parse(s).with_context(|| format!("Unknown parameter style '{s}'"))?),
        };
        let schema = if value.get("schema").is_some() {
            Some(builder.schema_at(base, &format!("{pointer}/schema"))?)
        } else if let Some((media, _)) = value.get("content").and_then(Value::as_object).and_then(|c| c.iter().next()) {
            Some(builder.schema_at(base, &format!("{pointer}/content/{}/schema", escape_pointer(media)))?)
        } else {
            None
        };
        parameters.push(Parameter {
            name: raw.name,
            location: raw.location,
            required: raw.required || raw.location == Location::Path,
            deprecated: raw.deprecated,
            style,
            explode: raw.explode,
            schema,
        });
    }
    Ok(parameters)
}

fn load_content(
    builder: &mut RegistryBuilder,
    base: &str,
    owner: &Value,
    owner_pointer: &str,
) -> anyhow::Result<IndexMap<String, Option<SchemaId>>> {
    let mut content = IndexMap::new();
    if let Some(media_types) = owner.get("content").and_then(Value::as_object) {
        for (media, entry) in media_types {
            let schema = if entry.get("schema").is_some() {
                Some(builder.schema_at(
                    base,
                    &format!("{owner_pointer}/content/{}/schema", escape_pointer(media)),
                )?)
            } else {
                None
            };
            content.insert(media.clone(), schema);
        }
    }
    Ok(content)
}

fn load_request_body(
    builder: &mut RegistryBuilder,
    document: &Value,
    base: &str,
    op: &Value,
    op_pointer: &str,
) -> anyhow::Result<Option<RequestBody>> {
    let Some(entry) = op.get("requestBody") else {
        return Ok(None);
    };
    let (body, pointer) = deref(document, entry, format!("{op_pointer}/requestBody"))?;
    Ok(Some(RequestBody {
        required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
        content: load_content(builder, base, body, &pointer)?,
    }))
}

fn load_responses(
    builder: &mut RegistryBuilder,
    document: &Value,
    base: &str,
    op: &Value,
    op_pointer: &str,
) -> anyhow::Result<Vec<Response>> {
    let mut responses = Vec::new();
    if let Some(map) = op.get("responses").and_then(Value::as_object) {
        for (status, entry) in map {
            let (response, pointer) =
                deref(document, entry, format!("{op_pointer}/responses/{}", escape_pointer(status)))?;
            responses.push(Response {
                status: status.clone(),
                content: load_content(builder, base, response, &pointer)?,
            });
        }
    }
    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticReader;
    use crate::schema::TypeTag;
    use serde_json::json;

    fn petstore() -> Value {
        json!({
            "openapi": "3.0.3",
            "info": {"title": "Pets", "version": "1"},
            "paths": {
                "/pets/{petId}": {
                    "parameters": [{"$ref": "#/components/parameters/PetId"}],
                    "get": {
                        "operationId": "getPet",
                        "parameters": [
                            {"name": "fields", "in": "query", "style": "form", "explode": false,
                             "schema": {"type": "array", "items": {"type": "string"}}}
                        ],
                        "responses": {
                            "200": {"content": {"application/json": {"schema": {"$ref": "#/components/schemas/Pet"}}}},
                            "default": {"description": "error"}
                        }
                    }
                },
                "/pets/mine": {
                    "get": {"responses": {"204": {"description": "none"}}}
                }
            },
            "components": {
                "parameters": {
                    "PetId": {"name": "petId", "in": "path", "schema": {"type": "integer"}}
                },
                "schemas": {
                    "Pet": {
                        "type": "object",
                        "required": ["id"],
                        "properties": {"id": {"type": "integer"}, "name": {"type": "string"}}
                    }
                }
            }
        })
    }

    fn load(value: Value) -> anyhow::Result<OpenApi> {
        let reader = StaticReader::new().with("https://example.com/openapi.json", value);
        OpenApi::load(&reader, &Url::parse("https://example.com/openapi.json").unwrap())
    }

    #[test]
    fn test_load_operations_and_parameters() {
        let api = load(petstore()).unwrap();
        assert_eq!(api.title.as_deref(), Some("Pets"));
        let op = api.operation("GET", "/pets/{petId}").unwrap();
        assert_eq!(op.operation_id.as_deref(), Some("getPet"));
        assert_eq!(op.parameters.len(), 2);
        assert_eq!(op.parameters[0].name, "petId");
        assert!(op.parameters[0].required);
        assert_eq!(op.parameters[1].style, Some(Style::Form));
        assert_eq!(op.parameters[1].explode, Some(false));

        let id = api.registry.resolve(op.parameters[0].schema.unwrap());
        assert!(api.registry.get(id).types.is(TypeTag::Integer));
    }

    #[test]
    fn test_response_schema_resolves_to_component() {
        let api = load(petstore()).unwrap();
        let op = api.operation("get", "/pets/{petId}").unwrap();
        let response = op.success_response().unwrap();
        let schema = response.content["application/json"].unwrap();
        assert_eq!(Some(api.registry.resolve(schema)), api.schema("Pet"));
        assert_eq!(op.response("404").unwrap().status, "default");
    }

    #[test]
    fn test_match_operation_prefers_literal_segments() {
        let api = load(petstore()).unwrap();
        assert_eq!(api.match_operation("GET", "/pets/mine").unwrap().path, "/pets/mine");
        assert_eq!(api.match_operation("GET", "/pets/12").unwrap().path, "/pets/{petId}");
        assert!(api.match_operation("POST", "/pets/12").is_none());
    }

    #[test]
    fn test_rejects_swagger_2() {
        let err = load(json!({"swagger": "2.0", "openapi": "2.0"})).unwrap_err();
        assert!(err.to_string().contains("Unsupported OpenAPI version"));
    }
}
