//! OpenAPI synthesis for FIWARE context brokers
//!
//! Builds a minimal OpenAPI 3.0.1 description of the endpoints a knowledge graph already
//! points at through `rdf:value`. Paths are the concrete access paths; the servers are the
//! distinct origins of the access URIs.
//!
//! The method of a path defaults to `PUT` when it ends in `/value` and its attribute name
//! ends in one of the writable suffixes (`Setpoint`), else `GET`. `method_overrides` replaces
//! the default for named attributes.

use oxrdf::Graph;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

use crate::api::{AccessUri, HttpVerb};
use crate::error::{Error, Result};
use crate::rdf::{iri_objects, read_turtle, vocab};
use crate::utils::{slugify, write_atomic};

/// Synthesizer defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    /// Attribute-name suffixes marking writable points
    pub writable_suffixes: Vec<String>,

    /// Attribute name to the methods it supports, replacing the suffix heuristic
    pub method_overrides: BTreeMap<String, Vec<String>>,

    /// Default of the `Fiware-Service` header
    pub fiware_service: String,

    /// Default of the `Fiware-ServicePath` header
    pub fiware_service_path: String,

    pub title: String,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            writable_suffixes: vec!["Setpoint".to_string()],
            method_overrides: BTreeMap::new(),
            fiware_service: "openiot".to_string(),
            fiware_service_path: "/".to_string(),
            title: "FIWARE context broker".to_string(),
        }
    }
}

impl SynthesizerConfig {
    /// Reject overrides naming something other than an HTTP method
    pub fn validate(&self) -> Result<()> {
        for (attribute, methods) in &self.method_overrides {
            if methods.is_empty() {
                return Err(Error::config(
                    "[synthesizer]",
                    format!("method override for '{attribute}' lists no methods"),
                ));
            }
            if let Some(bad) = methods.iter().find(|m| HttpVerb::parse(m).is_none()) {
                return Err(Error::config(
                    "[synthesizer]",
                    format!("method override for '{attribute}': '{bad}' is not an HTTP method"),
                ));
            }
        }
        Ok(())
    }
}

/// Attribute name of a FIWARE attribute path (`/v2/entities/e/attrs/<attr>/value`)
pub fn attribute_segment(path: &str) -> Option<&str> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(pos) = segments.iter().position(|s| *s == "attrs") {
        return segments.get(pos + 1).copied();
    }
    match segments.as_slice() {
        [.., attribute, "value"] => Some(*attribute),
        [.., last] => Some(*last),
        [] => None,
    }
}

/// Synthesizes an OpenAPI document from access URIs
pub struct OpenApiSynthesizer<'a> {
    config: &'a SynthesizerConfig,
}

impl<'a> OpenApiSynthesizer<'a> {
    pub fn new(config: &'a SynthesizerConfig) -> Self {
        Self { config }
    }

    /// Methods for one access path
    pub fn methods_for(&self, path: &str) -> BTreeSet<HttpVerb> {
        let attribute = attribute_segment(path);

        if let Some(methods) = attribute.and_then(|a| self.config.method_overrides.get(a)) {
            let verbs: BTreeSet<HttpVerb> = methods.iter().filter_map(|m| HttpVerb::parse(m)).collect();
            if !verbs.is_empty() {
                return verbs;
            }
        }

        let writable = path.trim_end_matches('/').ends_with("/value")
            && attribute.is_some_and(|a| self.config.writable_suffixes.iter().any(|s| a.ends_with(s.as_str())));
        BTreeSet::from([if writable { HttpVerb::Put } else { HttpVerb::Get }])
    }

    /// OpenAPI 3.0.1 document for every `rdf:value` access URI in `graph`
    pub fn synthesize(&self, graph: &Graph) -> Value {
        let mut servers: BTreeSet<String> = BTreeSet::new();
        let mut operations: BTreeMap<String, BTreeSet<HttpVerb>> = BTreeMap::new();

        for (_, iri) in iri_objects(graph, vocab::rdf::VALUE) {
            let Some(access) = AccessUri::parse(iri.as_str()) else {
                debug!(uri = iri.as_str(), "Skipping non-URL value");
                continue;
            };
            if let Some(origin) = origin_of(iri.as_str()) {
                servers.insert(origin);
            }
            let methods = self.methods_for(&access.path);
            operations.entry(access.path).or_default().extend(methods);
        }

        let mut paths = Map::new();
        for (path, methods) in &operations {
            let mut item = Map::new();
            for verb in methods {
                item.insert(verb.key().to_string(), self.operation(*verb, path));
            }
            paths.insert(path.clone(), Value::Object(item));
        }

        info!(
            servers = servers.len(),
            paths = paths.len(),
            operations = operations.values().map(BTreeSet::len).sum::<usize>(),
            "Synthesized OpenAPI document"
        );

        json!({
            "openapi": "3.0.1",
            "info": {
                "title": self.config.title,
                "version": "1.0.0"
            },
            "servers": servers.iter().map(|url| json!({"url": url})).collect::<Vec<_>>(),
            "paths": paths,
            "components": {
                "parameters": {
                    "FiwareService": header_parameter("Fiware-Service", &self.config.fiware_service),
                    "FiwareServicePath": header_parameter("Fiware-ServicePath", &self.config.fiware_service_path)
                }
            }
        })
    }

    fn operation(&self, verb: HttpVerb, path: &str) -> Value {
        let mut parameters = vec![
            json!({"$ref": "#/components/parameters/FiwareService"}),
            json!({"$ref": "#/components/parameters/FiwareServicePath"}),
        ];
        let mut operation = Map::new();
        operation.insert(
            "operationId".to_string(),
            Value::String(format!("{}_{}", verb.key(), slugify(path))),
        );

        if matches!(verb, HttpVerb::Put | HttpVerb::Post | HttpVerb::Patch) {
            parameters.push(header_parameter("Content-Type", "text/plain"));
            operation.insert(
                "requestBody".to_string(),
                json!({"required": true, "content": {"text/plain": {"schema": {"type": "string"}}}}),
            );
        }

        operation.insert("parameters".to_string(), Value::Array(parameters));
        operation.insert(
            "responses".to_string(),
            json!({"200": {"description": "OK", "content": {"text/plain": {"schema": {"type": "string"}}}}}),
        );
        Value::Object(operation)
    }
}

fn header_parameter(name: &str, default: &str) -> Value {
    json!({
        "name": name,
        "in": "header",
        "required": false,
        "schema": {"type": "string", "default": default}
    })
}

fn origin_of(uri: &str) -> Option<String> {
    let parsed = url::Url::parse(uri).ok()?;
    let origin = parsed.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Synthesize from the graph at `kg` and write JSON, or YAML for `.yaml`/`.yml` destinations
pub fn synthesize_file(kg: &Path, output: &Path, config: &SynthesizerConfig) -> Result<Value> {
    config.validate()?;
    let (graph, _) = read_turtle(kg)?;
    let document = OpenApiSynthesizer::new(config).synthesize(&graph);

    let yaml = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    let text = if yaml {
        serde_yaml::to_string(&document)?
    } else {
        serde_json::to_string_pretty(&document)?
    };
    write_atomic(output, text.as_bytes())?;
    Ok(document)
}
