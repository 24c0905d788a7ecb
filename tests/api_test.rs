//! HTTP annotation and OpenAPI synthesis over hand-written knowledge graphs

mod common;

use oxrdf::{Graph, NamedNodeRef, SubjectRef};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tempfile::TempDir;

use common::*;
use iotkg::api::{postprocess, ApiPostProcessor, ApiSpec};
use iotkg::rdf::{read_turtle, vocab};
use iotkg::synth::{synthesize_file, SynthesizerConfig};
use iotkg::Error;

const HOTEL_KG: &str = r#"@prefix brick: <https://brickschema.org/schema/Brick#> .
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .

<http://example.org/resource/Hotel:sensor1> a brick:Temperature_Sensor ;
    rdf:value <http://orion.hotel:1026/v2/entities/Hotel:sensor1/attrs/temperature/value> .
<http://example.org/resource/Hotel:sensor2> a brick:Temperature_Sensor ;
    rdf:value <http://orion.hotel:1026/v2/entities/Hotel:sensor2/attrs/temperature/value> .
<http://example.org/resource/Hotel:vent1_fanSpeed> a brick:Fan_Speed_Command ;
    rdf:value <http://orion.hotel:1026/v2/entities/Hotel:vent1/attrs/fanSpeed/value> .
<http://example.org/resource/Hotel:lobby> a brick:Room ;
    rdf:value <http://elsewhere.example/status> .
"#;

/// Request IRI to its method
fn requests(graph: &Graph) -> BTreeMap<String, String> {
    graph
        .subjects_for_predicate_object(vocab::rdf::TYPE, vocab::http::REQUEST)
        .filter_map(|s| match s {
            SubjectRef::NamedNode(n) => Some(n.as_str().to_string()),
            _ => None,
        })
        .map(|iri| {
            let method = literals(graph, &iri, vocab::http::METHOD_NAME).concat();
            (iri, method)
        })
        .collect()
}

#[test]
fn test_base_path_is_prepended_to_templates() {
    let dir = TempDir::new().unwrap();
    let kg = write(dir.path(), "kg.ttl", HOTEL_KG);
    let spec = write_json(dir.path(), "swagger.json", &hotel_swagger());
    let output = dir.path().join("kg_http.ttl");

    let stats = postprocess(&kg, &spec, None, &output).unwrap();
    assert_eq!(stats.access_uris, 4);
    assert_eq!(stats.matched, 3);
    assert_eq!(stats.unmatched, 1);
    assert_eq!(stats.requests, 4);

    let (graph, prefixes) = read_turtle(&output).unwrap();
    let requests = requests(&graph);
    assert_eq!(
        requests.get("http://www.example.org/api#GET_v2_entities_Hotel_sensor1_attrs_temperature_value"),
        Some(&"GET".to_string())
    );
    assert_eq!(
        requests.get("http://www.example.org/api#PUT_v2_entities_Hotel_vent1_attrs_fanSpeed_value"),
        Some(&"PUT".to_string())
    );
    assert!(prefixes.get("http").is_some());
    assert!(prefixes.get("api").is_some());

    let put = "http://www.example.org/api#PUT_v2_entities_Hotel_vent1_attrs_fanSpeed_value";
    assert_eq!(
        literals(&graph, put, vocab::http::ABSOLUTE_PATH),
        vec!["/v2/entities/Hotel:vent1/attrs/fanSpeed/value".to_string()]
    );
    assert_eq!(
        literals(&graph, put, vocab::http::AUTHORITY),
        vec!["orion.hotel:1026".to_string()]
    );
}

#[test]
fn test_shared_header_node_is_reused() {
    let dir = TempDir::new().unwrap();
    let kg = write(dir.path(), "kg.ttl", HOTEL_KG);
    let spec = write_json(dir.path(), "swagger.json", &hotel_swagger());
    let output = dir.path().join("kg_http.ttl");
    postprocess(&kg, &spec, None, &output).unwrap();

    let (graph, _) = read_turtle(&output).unwrap();
    assert_eq!(instances_of(&graph, vocab::http::MESSAGE_HEADER.as_str()), 2);

    let shared = NamedNodeRef::new_unchecked("http://www.example.org/api#Header_Fiware_Service");
    assert_eq!(graph.subjects_for_predicate_object(vocab::http::HEADERS, shared).count(), 4);
    assert_eq!(
        literals(&graph, shared.as_str(), vocab::http::FIELD_NAME),
        vec!["Fiware-Service".to_string()]
    );
    assert_eq!(
        literals(&graph, shared.as_str(), vocab::http::FIELD_VALUE),
        vec!["demo".to_string()]
    );
}

#[test]
fn test_spec_without_operations_is_rejected() {
    let dir = TempDir::new().unwrap();
    let kg = write(dir.path(), "kg.ttl", HOTEL_KG);
    let spec = write_json(
        dir.path(),
        "empty.json",
        &json!({"swagger": "2.0", "info": {"title": "t", "version": "1"}, "paths": {}}),
    );
    let output = dir.path().join("kg_http.ttl");

    let err = postprocess(&kg, &spec, None, &output).unwrap_err();
    assert!(matches!(err, Error::NoOperations { .. }));
    assert!(err.artifact().contains("empty.json"));
    assert!(!output.exists());
}

#[test]
fn test_annotation_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let kg = write(dir.path(), "kg.ttl", HOTEL_KG);
    let spec = ApiSpec::load(&write_json(dir.path(), "swagger.json", &hotel_swagger())).unwrap();
    let processor = ApiPostProcessor::new(spec).unwrap();

    let once = dir.path().join("once.ttl");
    let twice = dir.path().join("twice.ttl");
    processor.process_file(&kg, &once).unwrap();
    processor.process_file(&once, &twice).unwrap();

    let (first, _) = read_turtle(&once).unwrap();
    let (second, _) = read_turtle(&twice).unwrap();
    assert_eq!(first.len(), second.len());
    assert_eq!(requests(&first), requests(&second));
}

#[test]
fn test_yaml_openapi_with_server_variables() {
    let dir = TempDir::new().unwrap();
    let kg = write(dir.path(), "kg.ttl", HOTEL_KG);
    let spec = write(
        dir.path(),
        "orion.yaml",
        r#"openapi: 3.0.3
info:
  title: Orion
  version: "2"
servers:
  - url: "http://{host}:1026/{version}"
    variables:
      host:
        default: orion.hotel
      version:
        default: v2
paths:
  /entities/{entityId}/attrs/{attrName}/value:
    get:
      parameters:
        - name: entityId
          in: path
          required: true
          schema:
            type: string
        - name: attrName
          in: path
          required: true
          schema:
            type: string
        - name: options
          in: query
          schema:
            type: string
            default: keyValues
      responses:
        "200":
          description: OK
"#,
    );
    let output = dir.path().join("kg_http.ttl");

    let stats = postprocess(&kg, &spec, None, &output).unwrap();
    assert_eq!(stats.matched, 3);
    assert_eq!(stats.requests, 3);

    let (graph, _) = read_turtle(&output).unwrap();
    assert_eq!(instances_of(&graph, vocab::http::PARAMETER.as_str()), 3);
    let param = "http://www.example.org/api#Param_GET_v2_entities_Hotel_sensor1_attrs_temperature_value_options";
    assert_eq!(literals(&graph, param, vocab::http::PARAM_VALUE), vec!["keyValues".to_string()]);
}

#[test]
fn test_synthesized_spec_reproduces_requests() {
    let dir = TempDir::new().unwrap();
    let kg = write(dir.path(), "kg.ttl", HOTEL_KG);

    let handwritten = dir.path().join("handwritten.ttl");
    postprocess(
        &kg,
        &write_json(dir.path(), "swagger.json", &hotel_swagger()),
        None,
        &handwritten,
    )
    .unwrap();

    let config = SynthesizerConfig {
        method_overrides: BTreeMap::from([(
            "fanSpeed".to_string(),
            vec!["GET".to_string(), "PUT".to_string()],
        )]),
        fiware_service: "demo".to_string(),
        ..Default::default()
    };
    let openapi = dir.path().join("openapi.json");
    let document = synthesize_file(&kg, &openapi, &config).unwrap();
    assert_eq!(
        document["servers"],
        json!([{"url": "http://elsewhere.example"}, {"url": "http://orion.hotel:1026"}])
    );

    let synthesized = dir.path().join("synthesized.ttl");
    postprocess(&kg, &openapi, None, &synthesized).unwrap();

    let (expected, _) = read_turtle(&handwritten).unwrap();
    let (actual, _) = read_turtle(&synthesized).unwrap();
    let expected = requests(&expected);
    let actual = requests(&actual);

    // the synthesized description also covers the lobby status path
    let lobby: BTreeSet<&String> = actual.keys().filter(|k| k.contains("status")).collect();
    assert_eq!(lobby.len(), 1);
    for (iri, method) in &expected {
        assert_eq!(actual.get(iri), Some(method), "{iri} missing from synthesized run");
    }
    assert_eq!(actual.len(), expected.len() + 1);
}
