//! HTTP annotation of a knowledge graph
//!
//! Every IRI reached through `rdf:value` is treated as an access URI. When its path matches
//! a template of the API description, one `http:Request` per declared method is added and
//! linked from the single `api:Connection_Main`. Requests carry the shared (globally
//! declared) headers and query parameters plus their operation's own ones.
//!
//! Node IRIs depend only on verb, path and parameter name, so annotating twice gives the
//! same graph.
//!
//! # Example
//!
//! ```rust,ignore
//! use iotkg::api::{ApiPostProcessor, ApiSpec};
//!
//! let processor = ApiPostProcessor::new(ApiSpec::load("swagger.json".as_ref())?)?;
//! let stats = processor.process_file("kg.ttl".as_ref(), "kg_http.ttl".as_ref())?;
//! println!("{} requests", stats.requests);
//! ```

pub mod index;
pub mod spec;

pub use index::{HttpVerb, IndexedPath, Operation, OperationIndex};
pub use spec::{ApiSpec, Parameter, ParameterLocation, SpecVersion};

use oxrdf::{Graph, Literal, NamedNode, NamedNodeRef, Triple};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ontology::PrefixTable;
use crate::rdf::{read_turtle, vocab, write_turtle, API_NS, HEADERS_NS, HTTP_NS};
use crate::utils::{collapse_slashes, slugify};

/// Path parameters whose values are already part of the access URI
const EMBEDDED_PATH_PARAMETERS: [&str; 2] = ["entityId", "attrName"];

/// Counters of one annotation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationStats {
    pub access_uris: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub requests: usize,
}

/// Authority and collapsed path of an access URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUri {
    pub uri: String,
    pub authority: String,
    pub path: String,
}

impl AccessUri {
    pub fn parse(uri: &str) -> Option<Self> {
        let parsed = url::Url::parse(uri).ok()?;
        let host = parsed.host_str()?;
        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Some(Self {
            uri: uri.to_string(),
            authority,
            path: collapse_slashes(parsed.path()),
        })
    }
}

/// Adds HTTP request metadata to a graph from an API description
#[derive(Debug)]
pub struct ApiPostProcessor {
    spec: ApiSpec,
    index: OperationIndex,
    shared: Vec<Parameter>,
    prefixes: PrefixTable,
}

impl ApiPostProcessor {
    /// Index `spec`; fails when it declares no operations
    pub fn new(spec: ApiSpec) -> Result<Self> {
        let index = OperationIndex::build(&spec);
        if index.is_empty() {
            return Err(Error::NoOperations {
                artifact: spec.artifact().to_string(),
            });
        }

        let shared: Vec<Parameter> = spec
            .global_parameters()
            .into_iter()
            .filter(Parameter::is_materialized)
            .collect();

        info!(
            artifact = spec.artifact(),
            templates = index.len(),
            shared_parameters = shared.len(),
            bases = ?spec.base_paths(),
            "Indexed API operations"
        );

        let mut prefixes = PrefixTable::new();
        prefixes.insert("http", HTTP_NS);
        prefixes.insert("headers", HEADERS_NS);
        prefixes.insert("api", API_NS);

        Ok(Self {
            spec,
            index,
            shared,
            prefixes,
        })
    }

    /// Check the emitted terms against an HTTP vocabulary and adopt its prefixes
    pub fn with_http_vocabulary(mut self, path: &Path) -> Result<Self> {
        let (vocabulary, prefixes) = read_turtle(path)?;
        for term in vocab::http::USED_TERMS {
            if vocabulary.triples_for_subject(term).next().is_none() {
                warn!(term = term.as_str(), vocabulary = %path.display(), "HTTP term not declared by vocabulary");
            }
        }
        self.prefixes.merge(&prefixes);
        Ok(self)
    }

    pub fn index(&self) -> &OperationIndex {
        &self.index
    }

    pub fn spec(&self) -> &ApiSpec {
        &self.spec
    }

    /// Annotate `graph` in place
    pub fn annotate(&self, graph: &mut Graph) -> AnnotationStats {
        let uris: BTreeSet<String> = crate::rdf::iri_objects(graph, vocab::rdf::VALUE)
            .into_iter()
            .map(|(_, iri)| iri.as_str().to_string())
            .collect();

        let mut stats = AnnotationStats {
            access_uris: uris.len(),
            ..AnnotationStats::default()
        };
        let mut requests = BTreeSet::new();

        let connection = api_node("Connection_Main");
        insert(graph, &connection, vocab::rdf::TYPE, vocab::http::CONNECTION);

        let shared_nodes: Vec<(Parameter, NamedNode)> = self
            .shared
            .iter()
            .map(|p| {
                let node = self.parameter_node(graph, p, None);
                (p.clone(), node)
            })
            .collect();

        for uri in &uris {
            let Some(access) = AccessUri::parse(uri) else {
                debug!(uri, "Access URI is not an absolute URL");
                stats.unmatched += 1;
                continue;
            };
            let Some((entry, bindings)) = self.index.find(&access.path) else {
                debug!(uri, "No path template matches access URI");
                stats.unmatched += 1;
                continue;
            };
            stats.matched += 1;
            debug!(uri, template = %entry.template, ?bindings, "Matched access URI");

            for operation in &entry.operations {
                let request = self.add_request(graph, &access, operation, &connection, &shared_nodes);
                requests.insert(request);
            }
        }

        stats.requests = requests.len();
        info!(
            access_uris = stats.access_uris,
            matched = stats.matched,
            unmatched = stats.unmatched,
            requests = stats.requests,
            "Annotated graph with HTTP requests"
        );
        stats
    }

    fn add_request(
        &self,
        graph: &mut Graph,
        access: &AccessUri,
        operation: &Operation,
        connection: &NamedNode,
        shared_nodes: &[(Parameter, NamedNode)],
    ) -> NamedNode {
        let key = request_key(operation.verb, &access.path);
        let request = api_node(&key);

        insert(graph, &request, vocab::rdf::TYPE, vocab::http::REQUEST);
        insert_literal(graph, &request, vocab::http::METHOD_NAME, operation.verb.as_str());
        insert_literal(graph, &request, vocab::http::ABSOLUTE_PATH, &access.path);
        insert_literal(graph, &request, vocab::http::ABSOLUTE_URI, &access.uri);
        insert_literal(graph, &request, vocab::http::AUTHORITY, &access.authority);
        insert(graph, connection, vocab::http::REQUESTS, &request);

        let local: Vec<&Parameter> = operation
            .parameters
            .iter()
            .filter(|p| p.is_materialized() && !is_embedded(p))
            .collect();

        for (shared, node) in shared_nodes {
            if local.iter().any(|p| overrides(p, shared)) {
                continue;
            }
            insert(graph, &request, link_predicate(shared), node);
        }

        for parameter in local {
            let covered = shared_nodes
                .iter()
                .any(|(shared, _)| shared.same_slot(parameter) && !overrides(parameter, shared));
            if covered {
                continue;
            }
            let node = self.parameter_node(graph, parameter, Some(&key));
            insert(graph, &request, link_predicate(parameter), &node);
        }

        request
    }

    /// Header or parameter node; operation-local ones are scoped by their request key
    fn parameter_node(&self, graph: &mut Graph, parameter: &Parameter, scope: Option<&str>) -> NamedNode {
        let kind = match parameter.location {
            ParameterLocation::Header => "Header",
            _ => "Param",
        };
        let name = slugify(&parameter.name);
        let node = match scope {
            Some(scope) => api_node(&format!("{kind}_{scope}_{name}")),
            None => api_node(&format!("{kind}_{name}")),
        };

        if parameter.location == ParameterLocation::Header {
            insert(graph, &node, vocab::rdf::TYPE, vocab::http::MESSAGE_HEADER);
            insert_literal(graph, &node, vocab::http::FIELD_NAME, &parameter.name);
            insert_literal(graph, &node, vocab::http::FIELD_VALUE, &parameter.default_value);
            match NamedNode::new(format!("{HEADERS_NS}{}", parameter.name.to_lowercase())) {
                Ok(header) => insert(graph, &node, vocab::http::HDR_NAME, &header),
                Err(e) => debug!(header = %parameter.name, error = %e, "Header name is not IRI-safe"),
            }
        } else {
            insert(graph, &node, vocab::rdf::TYPE, vocab::http::PARAMETER);
            insert_literal(graph, &node, vocab::http::PARAM_NAME, &parameter.name);
            insert_literal(graph, &node, vocab::http::PARAM_VALUE, &parameter.default_value);
        }
        node
    }

    /// Read `input`, annotate it and write the extended graph to `output`
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<AnnotationStats> {
        let (mut graph, mut prefixes) = read_turtle(input)?;
        let stats = self.annotate(&mut graph);
        prefixes.merge(&self.prefixes);
        write_turtle(output, &graph, &prefixes)?;
        Ok(stats)
    }
}

/// Annotate the graph at `kg` with the API description at `spec` and write it to `output`
pub fn postprocess(kg: &Path, spec: &Path, http_vocabulary: Option<&Path>, output: &Path) -> Result<AnnotationStats> {
    let mut processor = ApiPostProcessor::new(ApiSpec::load(spec)?)?;
    if let Some(vocabulary) = http_vocabulary {
        processor = processor.with_http_vocabulary(vocabulary)?;
    }
    processor.process_file(kg, output)
}

/// `GET_v2_entities_Hotel_main_attrs_t_value`
pub fn request_key(verb: HttpVerb, path: &str) -> String {
    format!("{}_{}", verb.as_str(), slugify(path))
}

fn is_embedded(parameter: &Parameter) -> bool {
    parameter.location == ParameterLocation::Path && EMBEDDED_PATH_PARAMETERS.contains(&parameter.name.as_str())
}

fn link_predicate(parameter: &Parameter) -> NamedNodeRef<'static> {
    match parameter.location {
        ParameterLocation::Header => vocab::http::HEADERS,
        _ => vocab::http::PARAMS,
    }
}

fn api_node(local: &str) -> NamedNode {
    NamedNode::new_unchecked(format!("{API_NS}{}", slugify_local(local)))
}

/// Local names keep letters, digits, `_` and `-`
fn slugify_local(local: &str) -> String {
    local
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// An operation-local parameter replaces a shared one in the same slot when its default differs
fn overrides(local: &Parameter, shared: &Parameter) -> bool {
    local.same_slot(shared) && local.default_value != shared.default_value
}

fn insert<'a>(graph: &mut Graph, subject: &NamedNode, predicate: NamedNodeRef<'_>, object: impl Into<NamedNodeRef<'a>>) {
    graph.insert(&Triple::new(subject.clone(), predicate.into_owned(), object.into().into_owned()));
}

fn insert_literal(graph: &mut Graph, subject: &NamedNode, predicate: NamedNodeRef<'_>, value: &str) {
    graph.insert(&Triple::new(
        subject.clone(),
        predicate.into_owned(),
        Literal::new_simple_literal(value),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::{has_type, sorted_triples};
    use oxrdf::{NamedNodeRef, TermRef};
    use serde_json::json;

    fn kg(uris: &[&str]) -> Graph {
        let mut graph = Graph::new();
        for (i, uri) in uris.iter().enumerate() {
            graph.insert(&Triple::new(
                NamedNode::new_unchecked(format!("http://example.org/resource/point{i}")),
                vocab::rdf::VALUE.into_owned(),
                NamedNode::new_unchecked(*uri),
            ));
        }
        graph
    }

    fn processor(document: serde_json::Value) -> ApiPostProcessor {
        ApiPostProcessor::new(ApiSpec::from_value(document, "api.json", None).unwrap()).unwrap()
    }

    fn requests(graph: &Graph) -> Vec<String> {
        let mut nodes: Vec<String> = graph
            .subjects_for_predicate_object(vocab::rdf::TYPE, vocab::http::REQUEST)
            .map(|s| s.to_string())
            .collect();
        nodes.sort();
        nodes
    }

    fn literal(graph: &Graph, subject: &str, predicate: NamedNodeRef<'_>) -> Option<String> {
        match graph.object_for_subject_predicate(NamedNodeRef::new_unchecked(subject), predicate)? {
            TermRef::Literal(l) => Some(l.value().to_string()),
            _ => None,
        }
    }

    fn fiware_swagger() -> serde_json::Value {
        json!({
            "swagger": "2.0",
            "basePath": "/v2",
            "parameters": {
                "Service": {"name": "Fiware-Service", "in": "header", "type": "string", "schema": {"default": "demo"}},
                "Limit": {"name": "limit", "in": "query", "default": 20},
                "Payload": {"name": "payload", "in": "body"}
            },
            "paths": {
                "/entities/{entityId}/attrs/{attrName}/value": {
                    "parameters": [
                        {"name": "entityId", "in": "path", "required": true},
                        {"name": "attrName", "in": "path", "required": true}
                    ],
                    "get": {"parameters": [{"name": "Accept", "in": "header", "default": "text/plain"}]},
                    "put": {"parameters": [
                        {"name": "Content-Type", "in": "header", "default": "text/plain"},
                        {"name": "value", "in": "body"}
                    ]}
                }
            }
        })
    }

    #[test]
    fn test_colon_entity_ids_match_templates() {
        let processor = processor(fiware_swagger());
        let mut graph = kg(&["http://orion:1026/v2/entities/Hotel:main/attrs/t/value"]);
        let stats = processor.annotate(&mut graph);

        assert_eq!(stats.matched, 1);
        assert_eq!(stats.requests, 2);
        assert_eq!(
            requests(&graph),
            vec![
                format!("<{API_NS}GET_v2_entities_Hotel_main_attrs_t_value>"),
                format!("<{API_NS}PUT_v2_entities_Hotel_main_attrs_t_value>"),
            ]
        );

        let get = format!("{API_NS}GET_v2_entities_Hotel_main_attrs_t_value");
        assert_eq!(literal(&graph, &get, vocab::http::METHOD_NAME).as_deref(), Some("GET"));
        assert_eq!(
            literal(&graph, &get, vocab::http::ABSOLUTE_PATH).as_deref(),
            Some("/v2/entities/Hotel:main/attrs/t/value")
        );
        assert_eq!(literal(&graph, &get, vocab::http::AUTHORITY).as_deref(), Some("orion:1026"));
        assert!(graph.contains(oxrdf::TripleRef::new(
            NamedNodeRef::new_unchecked(&format!("{API_NS}Connection_Main")),
            vocab::http::REQUESTS,
            NamedNodeRef::new_unchecked(&get),
        )));
    }

    #[test]
    fn test_shared_header_node_is_reused() {
        let processor = processor(fiware_swagger());
        let mut graph = kg(&[
            "http://orion:1026/v2/entities/r1/attrs/t/value",
            "http://orion:1026/v2/entities/r2/attrs/t/value",
        ]);
        processor.annotate(&mut graph);

        let header = NamedNodeRef::new_unchecked("http://www.example.org/api#Header_Fiware_Service");
        assert!(has_type(&graph, header, vocab::http::MESSAGE_HEADER));
        assert_eq!(
            literal(&graph, header.as_str(), vocab::http::FIELD_VALUE).as_deref(),
            Some("demo")
        );
        let linked: Vec<_> = graph
            .subjects_for_predicate_object(vocab::http::HEADERS, header)
            .collect();
        assert_eq!(linked.len(), 4);

        let limit = NamedNodeRef::new_unchecked("http://www.example.org/api#Param_limit");
        assert!(has_type(&graph, limit, vocab::http::PARAMETER));
        assert_eq!(literal(&graph, limit.as_str(), vocab::http::PARAM_VALUE).as_deref(), Some("20"));
        assert!(graph
            .object_for_subject_predicate(header, vocab::http::HDR_NAME)
            .is_some());
    }

    #[test]
    fn test_local_parameters_skip_body_and_embedded_path() {
        let processor = processor(fiware_swagger());
        let mut graph = kg(&["http://orion:1026/v2/entities/r1/attrs/t/value"]);
        processor.annotate(&mut graph);

        let put = NamedNodeRef::new_unchecked("http://www.example.org/api#PUT_v2_entities_r1_attrs_t_value");
        let headers: Vec<String> = graph
            .objects_for_subject_predicate(put, vocab::http::HEADERS)
            .map(|o| o.to_string())
            .collect();
        assert_eq!(headers.len(), 2);
        assert!(headers
            .iter()
            .any(|h| h.contains("Header_PUT_v2_entities_r1_attrs_t_value_Content_Type")));
        assert_eq!(graph.objects_for_subject_predicate(put, vocab::http::PARAMS).count(), 1);

        let text = sorted_triples(&graph)
            .iter()
            .map(ToString::to_string)
            .collect::<String>();
        assert!(!text.contains("entityId"));
        assert!(!text.contains("payload"));
    }

    #[test]
    fn test_local_default_replaces_shared_header() {
        let mut document = fiware_swagger();
        document["paths"]["/entities/{entityId}/attrs/{attrName}/value"]["get"]["parameters"]
            .as_array_mut()
            .unwrap()
            .push(json!({"name": "Fiware-Service", "in": "header", "default": "hotel"}));
        let processor = processor(document);
        let mut graph = kg(&["http://orion:1026/v2/entities/r1/attrs/t/value"]);
        processor.annotate(&mut graph);

        let shared = NamedNodeRef::new_unchecked("http://www.example.org/api#Header_Fiware_Service");
        let get = NamedNodeRef::new_unchecked("http://www.example.org/api#GET_v2_entities_r1_attrs_t_value");
        let put = NamedNodeRef::new_unchecked("http://www.example.org/api#PUT_v2_entities_r1_attrs_t_value");
        let local = format!("{API_NS}Header_GET_v2_entities_r1_attrs_t_value_Fiware_Service");

        assert!(!graph.contains(oxrdf::TripleRef::new(get, vocab::http::HEADERS, shared)));
        assert!(graph.contains(oxrdf::TripleRef::new(
            get,
            vocab::http::HEADERS,
            NamedNodeRef::new_unchecked(&local)
        )));
        assert_eq!(literal(&graph, &local, vocab::http::FIELD_VALUE).as_deref(), Some("hotel"));
        assert!(graph.contains(oxrdf::TripleRef::new(put, vocab::http::HEADERS, shared)));
    }

    #[test]
    fn test_unmatched_uris_left_untouched() {
        let processor = processor(fiware_swagger());
        let mut graph = kg(&["http://orion:1026/v1/contextEntities/r1", "urn:ngsi:r2"]);
        let before = graph.len();
        let stats = processor.annotate(&mut graph);

        assert_eq!(stats.unmatched, 2);
        assert_eq!(stats.requests, 0);
        // connection and shared nodes only
        assert!(requests(&graph).is_empty());
        assert!(graph.len() > before);
    }

    #[test]
    fn test_annotation_is_idempotent() {
        let processor = processor(fiware_swagger());
        let mut graph = kg(&["http://orion:1026/v2/entities/r1/attrs/t/value"]);
        processor.annotate(&mut graph);
        let once = sorted_triples(&graph);
        processor.annotate(&mut graph);
        assert_eq!(sorted_triples(&graph), once);
    }

    #[test]
    fn test_empty_paths_rejected() {
        let spec = ApiSpec::from_value(json!({"openapi": "3.0.0", "paths": {}}), "empty.json", None).unwrap();
        let err = ApiPostProcessor::new(spec).unwrap_err();
        assert!(matches!(err, Error::NoOperations { .. }));
        assert_eq!(err.artifact(), "empty.json");
    }

    #[test]
    fn test_access_uri_parsing() {
        let access = AccessUri::parse("http://orion:1026//v2//entities/a:b").unwrap();
        assert_eq!(access.authority, "orion:1026");
        assert_eq!(access.path, "/v2/entities/a:b");
        assert!(AccessUri::parse("urn:x").is_none());
    }

    #[test]
    fn test_request_methods_from_closed_set() {
        let processor = processor(fiware_swagger());
        let mut graph = kg(&["http://orion:1026/v2/entities/r1/attrs/t/value"]);
        processor.annotate(&mut graph);

        for triple in graph.triples_for_predicate(vocab::http::METHOD_NAME) {
            let TermRef::Literal(method) = triple.object else {
                panic!("methodName must be a literal");
            };
            assert!(HttpVerb::ALL.iter().any(|v| v.as_str() == method.value()));
        }
    }
}
