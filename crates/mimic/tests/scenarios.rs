//! End-to-end boundary scenarios through the public API.

use hyper::header::{HeaderValue, COOKIE};
use hyper::Request;
use indexmap::IndexMap;
use mimic::expr::{self, Value as ExprValue};
use mimic::parameter::{from_request, Location, Parameter, ParameterError, Style};
use mimic::schema::{SchemaId, SchemaRegistry};
use mimic::workflow::{Event, RunOptions, Runtime, Status, Workflow};
use mimic::{marshal, unmarshal, Error, ErrorKind, GenerationRequest, Generator, GeneratorOptions, MediaType};
use serde_json::{json, Value};

fn schema(value: Value) -> (SchemaRegistry, SchemaId) {
    SchemaRegistry::from_value(&value).unwrap()
}

fn request(uri: &str) -> Request<()> {
    Request::builder().uri(uri).body(()).unwrap()
}

fn media(s: &str) -> MediaType {
    MediaType::parse(s).unwrap()
}

// ============================================================================
// Parameters
// ============================================================================

#[test]
fn query_form_explode_array() {
    let (registry, id) = schema(json!({"type": "array", "items": {"type": "integer"}}));
    let params = [Parameter::new("id", Location::Query)
        .with_schema(id)
        .with_style(Style::Form)
        .with_explode(true)];
    let decoded = from_request(&registry, &params, "/items", &request("/items?id=3&id=4&id=5")).unwrap();
    let id = decoded.get(Location::Query, "id").unwrap();
    assert_eq!(id.value, json!([3, 4, 5]));
    assert!(id.value.as_array().unwrap().iter().all(Value::is_i64));
    assert_eq!(id.raw.as_deref(), Some("3,4,5"));
}

#[test]
fn path_simple_array() {
    let (registry, id) = schema(json!({"type": "array", "items": {"type": "integer"}}));
    let params = [Parameter::new("foo", Location::Path).with_schema(id)];
    let decoded = from_request(&registry, &params, "/{foo}", &request("/3,4,5")).unwrap();
    assert_eq!(decoded.get(Location::Path, "foo").unwrap().value, json!([3, 4, 5]));
}

#[test]
fn path_exploded_object_is_percent_decoded() {
    let (registry, id) = schema(json!({
        "type": "object",
        "properties": {
            "role": {"type": "string"},
            "firstName": {"type": "string"},
            "msg": {"type": "string"},
            "foo": {"type": "string"}
        }
    }));
    let params = [Parameter::new("foo", Location::Path).with_schema(id).with_explode(true)];
    let decoded = from_request(
        &registry,
        &params,
        "/{foo}",
        &request("/role=admin,firstName=Alex,msg=Hello%20World,foo=foo%26bar"),
    )
    .unwrap();
    let value = &decoded.get(Location::Path, "foo").unwrap().value;
    assert_eq!(value["msg"], json!("Hello World"));
    assert_eq!(value["foo"], json!("foo&bar"));
}

#[test]
fn cookie_object_with_bad_number() {
    let (registry, id) = schema(json!({
        "type": "object",
        "properties": {"role": {"type": "string"}, "age": {"type": "number"}}
    }));
    let mut req = request("/");
    req.headers_mut()
        .insert(COOKIE, HeaderValue::from_static("foo=role,admin,age,Alex"));
    let params = [Parameter::new("foo", Location::Cookie).with_schema(id)];
    let err = from_request(&registry, &params, "/", &req).unwrap_err();
    assert_eq!(err.name(), "foo");
    let message = err.to_string();
    assert!(message.contains("parse property 'age' failed"), "{message}");
    assert!(message.contains("expected number but got string"), "{message}");
    assert_eq!(Error::from(err).kind(), ErrorKind::Parameter);
}

#[test]
fn query_exploded_object_rejects_undefined_property() {
    let (registry, id) = schema(json!({
        "type": "object",
        "properties": {"role": {"type": "string"}},
        "additionalProperties": false
    }));
    let params = [Parameter::new("filter", Location::Query)
        .with_schema(id)
        .with_style(Style::Form)
        .with_explode(true)];
    let err = from_request(&registry, &params, "/", &request("/?role=admin&firstName=Alex")).unwrap_err();
    assert!(matches!(&err, ParameterError::PropertyNotDefined { property, .. } if property == "firstName"));
    assert!(err.to_string().contains("firstName"));
}

// ============================================================================
// Codecs
// ============================================================================

#[test]
fn json_null_for_string_property() {
    let (registry, id) = schema(json!({"type": "object", "properties": {"foo": {"type": "string"}}}));
    let err = unmarshal(&registry, Some(id), br#"{"foo": null}"#, &media("application/json")).unwrap_err();
    assert_eq!(Error::from(err).kind(), ErrorKind::Validation);
}

#[test]
fn xml_required_attribute_missing() {
    let (registry, id) = schema(json!({
        "type": "object",
        "required": ["id"],
        "properties": {"id": {"type": "integer", "xml": {"attribute": true}}}
    }));
    let err = unmarshal(&registry, Some(id), b"<root><id>123</id></root>", &media("application/xml")).unwrap_err();
    let err = Error::from(err);
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("required attribute 'id' not found"), "{err}");
}

#[test]
fn marshal_number_and_nullable_null() {
    let (registry, id) = schema(json!({"type": "number"}));
    assert_eq!(marshal(&registry, Some(id), &json!(12), &media("application/json")).unwrap(), b"12");

    let (registry, id) = schema(json!({"type": "number", "nullable": true}));
    assert_eq!(
        marshal(&registry, Some(id), &Value::Null, &media("application/json")).unwrap(),
        b"null"
    );
}

#[test]
fn one_of_matching_both_branches() {
    let (registry, id) = schema(json!({
        "oneOf": [
            {"type": "object", "properties": {"a": {"type": "string"}}},
            {"type": "object", "properties": {"b": {"type": "string"}}}
        ]
    }));
    let err = unmarshal(&registry, Some(id), br#"{"a": "x"}"#, &media("application/json")).unwrap_err();
    let err = Error::from(err);
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("matches more than one"), "{err}");
}

// ============================================================================
// Expressions
// ============================================================================

#[test]
fn expression_equality() {
    let mut env = IndexMap::new();
    env.insert("a".to_string(), ExprValue::Int(1));
    env.insert("b".to_string(), ExprValue::Int(1));
    assert_eq!(expr::evaluate("a == b", &env).unwrap(), ExprValue::Bool(true));
}

#[test]
fn expression_closure_with_any() {
    assert_eq!(
        expr::evaluate("any([1,2,3,4], x => x > 3)", &()).unwrap(),
        ExprValue::Bool(true)
    );
}

// ============================================================================
// Workflows
// ============================================================================

fn workflows(yaml: &str) -> Vec<Workflow> {
    serde_yaml::from_str(yaml).unwrap()
}

#[tokio::test]
async fn workflow_false_condition_skips() {
    let wf = workflows("- name: w\n  steps:\n    - id: s1\n      if: ${{ false }}\n      uses: log\n      with:\n        message: never\n");
    let summary = Runtime::new()
        .dispatch(&wf, Event::Manual { workflow: "w".into() }, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.workflow("w").unwrap().step("s1").unwrap().status, Status::Skip);
}

#[cfg(unix)]
#[tokio::test]
async fn workflow_set_output_line() {
    let wf = workflows(
        "- name: w\n  steps:\n    - id: s1\n      run: echo \"::set-output name=greet::hello\"\n    - id: s2\n      if: steps.s1.outputs.greet == \"hello\"\n      uses: set-output\n      with:\n        ok: yes\n",
    );
    let summary = Runtime::new()
        .dispatch(&wf, Event::Manual { workflow: "w".into() }, RunOptions::default())
        .await
        .unwrap();
    let run = summary.workflow("w").unwrap();
    assert_eq!(run.step("s1").unwrap().outputs["greet"], json!("hello"));
    assert_eq!(run.step("s2").unwrap().status, Status::Success);
}

// ============================================================================
// Recursive schemas
// ============================================================================

#[test]
fn self_referencing_items_generate_finite_tree() {
    let (registry, id) = schema(json!({"type": "array", "items": {"$ref": "#"}}));
    for seed in 0..10 {
        let options = GeneratorOptions {
            max_depth: 4,
            ..GeneratorOptions::seeded(seed)
        };
        let value = Generator::new(&registry, options)
            .generate(&GenerationRequest::new(id))
            .unwrap();
        fn depth(value: &Value) -> usize {
            match value {
                Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
                _ => 0,
            }
        }
        assert!(depth(&value) <= 5, "seed {seed}: {value}");
    }
}
