//! Tests for the parameter module.
//!
//! Covers every location and the style/explode matrix for primitive, array and
//! object schemas, plus the missing/empty policies.

use super::*;
use crate::schema::{SchemaId, SchemaRegistry};
use hyper::header::{HeaderValue, COOKIE};
use serde_json::{json, Value};

fn schema(value: Value) -> (SchemaRegistry, SchemaId) {
    SchemaRegistry::from_value(&value).unwrap()
}

fn int_array() -> (SchemaRegistry, SchemaId) {
    schema(json!({"type": "array", "items": {"type": "integer"}}))
}

fn request(uri: &str) -> Request<()> {
    Request::builder().uri(uri).body(()).unwrap()
}

fn decode_one(
    registry: &SchemaRegistry,
    param: Parameter,
    route: &str,
    request: &Request<()>,
) -> Result<Option<ParameterValue>, ParameterError> {
    let location = param.location;
    let name = param.name.clone();
    let decoded = from_request(registry, &[param], route, request)?;
    Ok(decoded.get(location, &name).cloned())
}

// ============================================================================
// Query
// ============================================================================

#[test]
fn test_query_form_explode_array() {
    let (registry, id) = int_array();
    let param = Parameter::new("id", Location::Query).with_schema(id);
    let value = decode_one(&registry, param, "/items", &request("/items?id=3&id=4&id=5"))
        .unwrap()
        .unwrap();
    assert_eq!(value.value, json!([3, 4, 5]));
    assert!(value.value[0].is_i64());
    assert_eq!(value.raw.as_deref(), Some("3,4,5"));
}

#[test]
fn test_query_form_no_explode_array() {
    let (registry, id) = int_array();
    let param = Parameter::new("id", Location::Query).with_schema(id).with_explode(false);
    let value = decode_one(&registry, param, "/items", &request("/items?id=3,4,5"))
        .unwrap()
        .unwrap();
    assert_eq!(value.value, json!([3, 4, 5]));
}

#[test]
fn test_query_space_and_pipe_delimited() {
    let (registry, id) = int_array();
    let space = Parameter::new("id", Location::Query)
        .with_schema(id)
        .with_style(Style::SpaceDelimited)
        .with_explode(false);
    let value = decode_one(&registry, space, "/", &request("/?id=3%204%205")).unwrap().unwrap();
    assert_eq!(value.value, json!([3, 4, 5]));

    let pipe = Parameter::new("id", Location::Query)
        .with_schema(id)
        .with_style(Style::PipeDelimited)
        .with_explode(false);
    let value = decode_one(&registry, pipe, "/", &request("/?id=3%7C4%7C5")).unwrap().unwrap();
    assert_eq!(value.value, json!([3, 4, 5]));
}

#[test]
fn test_query_form_explode_object_rejects_undeclared() {
    let (registry, id) = schema(json!({
        "type": "object",
        "properties": {"role": {"type": "string"}},
        "additionalProperties": false
    }));
    let param = Parameter::new("filter", Location::Query).with_schema(id);
    let err = decode_one(&registry, param, "/", &request("/?role=admin&firstName=Alex")).unwrap_err();
    match err {
        ParameterError::PropertyNotDefined { name, property } => {
            assert_eq!(name, "filter");
            assert_eq!(property, "firstName");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_query_form_explode_object_skips_other_parameters() {
    let (registry, id) = schema(json!({
        "type": "object",
        "properties": {"role": {"type": "string"}, "age": {"type": "integer"}},
        "additionalProperties": false
    }));
    let declared = vec![
        Parameter::new("filter", Location::Query).with_schema(id),
        Parameter::new("page", Location::Query),
    ];
    let decoded = from_request(&registry, &declared, "/", &request("/?role=admin&age=3&page=2")).unwrap();
    assert_eq!(
        decoded.get(Location::Query, "filter").unwrap().value,
        json!({"role": "admin", "age": 3})
    );
    assert_eq!(decoded.get(Location::Query, "page").unwrap().value, json!("2"));
}

#[test]
fn test_query_deep_object() {
    let (registry, id) = schema(json!({
        "type": "object",
        "properties": {
            "color": {"type": "string"},
            "size": {"type": "array", "items": {"type": "integer"}},
            "dims": {"type": "object", "properties": {"w": {"type": "integer"}}}
        }
    }));
    let param = Parameter::new("f", Location::Query)
        .with_schema(id)
        .with_style(Style::DeepObject)
        .with_explode(true);
    let value = decode_one(
        &registry,
        param,
        "/",
        &request("/?f%5Bcolor%5D=red&f%5Bsize%5D=1&f%5Bsize%5D=2&f%5Bdims%5D%5Bw%5D=9&other=x"),
    )
    .unwrap()
    .unwrap();
    assert_eq!(value.value, json!({"color": "red", "size": [1, 2], "dims": {"w": 9}}));
}

#[test]
fn test_query_primitive_decodes_plus_and_percent() {
    let (registry, id) = schema(json!({"type": "string"}));
    let param = Parameter::new("q", Location::Query).with_schema(id);
    let value = decode_one(&registry, param, "/", &request("/?q=a+b%21")).unwrap().unwrap();
    assert_eq!(value.value, json!("a b!"));
}

#[test]
fn test_query_missing_and_empty_policies() {
    let (registry, id) = schema(json!({"type": "integer"}));
    let optional = Parameter::new("n", Location::Query).with_schema(id);
    assert!(decode_one(&registry, optional.clone(), "/", &request("/")).unwrap().is_none());
    assert!(decode_one(&registry, optional, "/", &request("/?n=")).unwrap().is_none());

    let required = Parameter::new("n", Location::Query).with_schema(id).required(true);
    assert!(matches!(
        decode_one(&registry, required.clone(), "/", &request("/")),
        Err(ParameterError::Missing { .. })
    ));
    assert!(matches!(
        decode_one(&registry, required, "/", &request("/?n=")),
        Err(ParameterError::Empty { .. })
    ));
}

#[test]
fn test_query_coercion_failure_names_parameter() {
    let (registry, id) = schema(json!({"type": "integer"}));
    let param = Parameter::new("limit", Location::Query).with_schema(id);
    let err = decode_one(&registry, param, "/", &request("/?limit=ten")).unwrap_err();
    assert_eq!(err.name(), "limit");
    assert!(err.to_string().contains("expected integer but got string"), "{err}");
}

// ============================================================================
// Path
// ============================================================================

#[test]
fn test_path_simple_array() {
    let (registry, id) = int_array();
    let param = Parameter::new("foo", Location::Path).with_schema(id);
    let value = decode_one(&registry, param, "/{foo}", &request("/3,4,5")).unwrap().unwrap();
    assert_eq!(value.value, json!([3, 4, 5]));
}

#[test]
fn test_path_simple_explode_object_percent_decoded() {
    let (registry, id) = schema(json!({
        "type": "object",
        "properties": {
            "role": {"type": "string"},
            "firstName": {"type": "string"},
            "msg": {"type": "string"},
            "foo": {"type": "string"}
        }
    }));
    let param = Parameter::new("foo", Location::Path).with_schema(id).with_explode(true);
    let value = decode_one(
        &registry,
        param,
        "/{foo}",
        &request("/role=admin,firstName=Alex,msg=Hello%20World,foo=foo%26bar"),
    )
    .unwrap()
    .unwrap();
    assert_eq!(
        value.value,
        json!({"role": "admin", "firstName": "Alex", "msg": "Hello World", "foo": "foo&bar"})
    );
}

#[test]
fn test_path_label_and_matrix() {
    let (registry, id) = int_array();
    let label = Parameter::new("id", Location::Path).with_schema(id).with_style(Style::Label);
    let value = decode_one(&registry, label, "/users/{id}", &request("/users/.3,4")).unwrap().unwrap();
    assert_eq!(value.value, json!([3, 4]));

    let matrix = Parameter::new("id", Location::Path)
        .with_schema(id)
        .with_style(Style::Matrix)
        .with_explode(true);
    let value = decode_one(&registry, matrix, "/users/{id}", &request("/users/;id=3;id=4"))
        .unwrap()
        .unwrap();
    assert_eq!(value.value, json!([3, 4]));

    let (registry, id) = schema(json!({"type": "integer"}));
    let matrix = Parameter::new("id", Location::Path).with_schema(id).with_style(Style::Matrix);
    let value = decode_one(&registry, matrix, "/users/{id}", &request("/users/;id=5")).unwrap().unwrap();
    assert_eq!(value.value, json!(5));
}

#[test]
fn test_path_placeholder_with_suffix() {
    let (registry, id) = schema(json!({"type": "integer"}));
    let param = Parameter::new("id", Location::Path).with_schema(id);
    let value = decode_one(&registry, param, "/reports/{id}.json", &request("/reports/17.json"))
        .unwrap()
        .unwrap();
    assert_eq!(value.value, json!(17));
}

#[test]
fn test_path_missing_segment() {
    let registry = SchemaRegistry::default();
    let param = Parameter::new("id", Location::Path);
    let err = decode_one(&registry, param, "/users/{id}", &request("/users")).unwrap_err();
    assert!(matches!(err, ParameterError::Missing { location: Location::Path, .. }));
}

#[test]
fn test_path_object_odd_tokens() {
    let (registry, id) = schema(json!({"type": "object"}));
    let param = Parameter::new("o", Location::Path).with_schema(id);
    let err = decode_one(&registry, param, "/{o}", &request("/a,1,b")).unwrap_err();
    assert!(matches!(err, ParameterError::InvalidPairs { count: 3, .. }));
}

#[test]
fn test_style_not_allowed_for_location() {
    let registry = SchemaRegistry::default();
    let param = Parameter::new("id", Location::Path).with_style(Style::Form);
    let err = decode_one(&registry, param, "/{id}", &request("/1")).unwrap_err();
    assert!(matches!(err, ParameterError::UnsupportedStyle { .. }));
}

// ============================================================================
// Header and cookie
// ============================================================================

#[test]
fn test_header_case_insensitive_array() {
    let (registry, id) = int_array();
    let mut req = request("/");
    req.headers_mut().insert("x-ids", HeaderValue::from_static("1, 2,3"));
    let param = Parameter::new("X-Ids", Location::Header).with_schema(id);
    let value = decode_one(&registry, param, "/", &req).unwrap().unwrap();
    assert_eq!(value.value, json!([1, 2, 3]));
}

#[test]
fn test_cookie_object_coercion_failure() {
    let (registry, id) = schema(json!({
        "type": "object",
        "properties": {"role": {"type": "string"}, "age": {"type": "number"}}
    }));
    let mut req = request("/");
    req.headers_mut()
        .insert(COOKIE, HeaderValue::from_static("session=x; foo=role,admin,age,Alex"));
    let param = Parameter::new("foo", Location::Cookie).with_schema(id);
    let err = decode_one(&registry, param, "/", &req).unwrap_err();
    match &err {
        ParameterError::Invalid { name, source } => {
            assert_eq!(name, "foo");
            assert!(source
                .message
                .starts_with("parse property 'age' failed: invalid type, expected number but got string"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_cookie_primitive() {
    let (registry, id) = schema(json!({"type": "boolean"}));
    let mut req = request("/");
    req.headers_mut().insert(COOKIE, HeaderValue::from_static("debug=true"));
    let param = Parameter::new("debug", Location::Cookie).with_schema(id);
    assert_eq!(decode_one(&registry, param, "/", &req).unwrap().unwrap().value, json!(true));
}

#[test]
fn test_failure_aborts_whole_extraction() {
    let (registry, id) = schema(json!({"type": "integer"}));
    let declared = vec![
        Parameter::new("a", Location::Query).with_schema(id),
        Parameter::new("b", Location::Query).with_schema(id),
    ];
    let err = from_request(&registry, &declared, "/", &request("/?a=1&b=x")).unwrap_err();
    assert_eq!(err.name(), "b");
}

#[test]
fn test_to_value_sections() {
    let (registry, id) = schema(json!({"type": "integer"}));
    let declared = vec![
        Parameter::new("id", Location::Path).with_schema(id),
        Parameter::new("q", Location::Query),
    ];
    let decoded = from_request(&registry, &declared, "/users/{id}", &request("/users/9?q=x")).unwrap();
    assert_eq!(
        decoded.to_value(),
        json!({"path": {"id": 9}, "query": {"q": "x"}, "header": {}, "cookie": {}})
    );
}
