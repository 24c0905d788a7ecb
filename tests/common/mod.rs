//! Common test utilities

use oxrdf::{Graph, NamedNodeRef, TermRef};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use iotkg::config::PlatformConfig;
use iotkg::rdf::vocab;

#[allow(dead_code)]
pub const BRICK_NS: &str = "https://brickschema.org/schema/Brick#";

/// Minimal Brick excerpt covering the hotel fixture
#[allow(dead_code)]
pub const BRICK: &str = r#"@prefix brick: <https://brickschema.org/schema/Brick#> .
@prefix owl: <http://www.w3.org/2002/07/owl#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .

brick:Location a owl:Class .
brick:Room a owl:Class ; rdfs:subClassOf brick:Location .
brick:Point a owl:Class .
brick:Temperature_Sensor a owl:Class ; rdfs:subClassOf brick:Point .
brick:Ventilation_Air_System a owl:Class .
brick:Fan_Speed_Command a owl:Class ; rdfs:subClassOf brick:Point .
brick:hasPoint a owl:ObjectProperty ; rdfs:domain brick:Location ; rdfs:range brick:Point .
brick:feeds a owl:ObjectProperty .
"#;

/// FIWARE export of a small hotel: two rooms, two sensors, two ventilation units
#[allow(dead_code)]
pub fn hotel_entities() -> Value {
    json!([
        {"id": "Hotel:room1", "type": "Room",
         "hasPoint": {"type": "Relationship", "value": "Hotel:sensor1"}},
        {"id": "Hotel:room2", "type": "Room",
         "hasPoint": {"type": "Relationship", "value": "Hotel:sensor2"}},
        {"id": "Hotel:sensor1", "type": "TemperatureSensor",
         "access_uri": "http://orion.hotel:1026/v2/entities/Hotel:sensor1/attrs/temperature/value"},
        {"id": "Hotel:sensor2", "type": "TemperatureSensor",
         "access_uri": "http://orion.hotel:1026/v2/entities/Hotel:sensor2/attrs/temperature/value"},
        {"id": "Hotel:vent1", "type": "FreshAirVentilation",
         "feeds": {"type": "Relationship", "value": "Hotel:room1"},
         "fanSpeed": {"type": "Number", "value": 40}},
        {"id": "Hotel:vent2", "type": "FreshAirVentilation",
         "feeds": {"type": "Relationship", "value": "Hotel:room2"},
         "fanSpeed": {"type": "Number", "value": 55}}
    ])
}

#[allow(dead_code)]
pub fn hotel_platform() -> PlatformConfig {
    PlatformConfig {
        patterns_splitting: vec!["$[*].fanSpeed".to_string()],
        access_uri_template: Some(
            "http://orion.hotel:1026/v2/entities/{entity_id}/attrs/{attribute}/value".to_string(),
        ),
        split_link_property: Some("hasPoint".to_string()),
        ..Default::default()
    }
}

/// Swagger 2.0 description of the hotel's Orion broker
#[allow(dead_code)]
pub fn hotel_swagger() -> Value {
    json!({
        "swagger": "2.0",
        "info": {"title": "Orion", "version": "2"},
        "host": "orion.hotel:1026",
        "basePath": "/v2",
        "parameters": {
            "service": {
                "name": "Fiware-Service",
                "in": "header",
                "type": "string",
                "default": "demo"
            }
        },
        "paths": {
            "/entities/{entityId}/attrs/temperature/value": {
                "parameters": [{"name": "entityId", "in": "path", "required": true, "type": "string"}],
                "get": {"responses": {"200": {"description": "OK"}}}
            },
            "/entities/{entityId}/attrs/fanSpeed/value": {
                "parameters": [{"name": "entityId", "in": "path", "required": true, "type": "string"}],
                "get": {"responses": {"200": {"description": "OK"}}},
                "put": {
                    "parameters": [{"name": "Content-Type", "in": "header", "type": "string", "default": "text/plain"}],
                    "responses": {"204": {"description": "Updated"}}
                }
            }
        }
    })
}

/// Write `content` below `dir` and return the path
#[allow(dead_code)]
pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[allow(dead_code)]
pub fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    write(dir, name, &serde_json::to_string_pretty(value).unwrap())
}

#[allow(dead_code)]
pub fn brick(local: &str) -> String {
    format!("{BRICK_NS}{local}")
}

/// Subjects typed with `class`
#[allow(dead_code)]
pub fn instances_of(graph: &Graph, class: &str) -> usize {
    let class = NamedNodeRef::new_unchecked(class);
    graph.subjects_for_predicate_object(vocab::rdf::TYPE, class).count()
}

/// Literal values of `predicate` on `subject`
#[allow(dead_code)]
pub fn literals(graph: &Graph, subject: &str, predicate: NamedNodeRef<'_>) -> Vec<String> {
    graph
        .objects_for_subject_predicate(NamedNodeRef::new_unchecked(subject), predicate)
        .filter_map(|object| match object {
            TermRef::Literal(literal) => Some(literal.value().to_string()),
            _ => None,
        })
        .collect()
}
