//! RDF vocabulary constants and graph I/O
//!
//! Graphs are held as [`oxrdf::Graph`]. Turtle and N-Triples are read and written with
//! `oxttl`; serialized output is sorted so repeated runs produce byte-identical files.

use oxrdf::{Graph, NamedNodeRef, SubjectRef, TermRef, Triple, TripleRef};
use oxttl::{NTriplesParser, TurtleParser, TurtleSerializer};
use std::path::Path;

use crate::error::{Error, Result};
use crate::ontology::prefixes::PrefixTable;
use crate::utils::{read_file, write_atomic};

/// W3C HTTP vocabulary namespace
pub const HTTP_NS: &str = "http://www.w3.org/2011/http#";
/// W3C HTTP header names namespace
pub const HEADERS_NS: &str = "http://www.w3.org/2011/http-headers#";
/// Namespace of generated request, header and parameter nodes
pub const API_NS: &str = "http://www.example.org/api#";

pub mod vocab {
    pub mod rdf {
        use oxrdf::NamedNodeRef;

        pub const TYPE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/1999/02/22-rdf-syntax-ns#type");
        pub const VALUE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/1999/02/22-rdf-syntax-ns#value");
    }

    pub mod rdfs {
        use oxrdf::NamedNodeRef;

        pub const LABEL: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#label");
        pub const SUB_CLASS_OF: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#subClassOf");
        pub const DOMAIN: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#domain");
        pub const RANGE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#range");
    }

    pub mod owl {
        use oxrdf::NamedNodeRef;

        pub const CLASS: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#Class");
        pub const OBJECT_PROPERTY: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#ObjectProperty");
        pub const THING: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#Thing");
    }

    pub mod skos {
        use oxrdf::NamedNodeRef;

        pub const PREF_LABEL: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2004/02/skos/core#prefLabel");
    }

    /// W3C HTTP vocabulary (`http://www.w3.org/2011/http#`)
    pub mod http {
        use oxrdf::NamedNodeRef;

        pub const CONNECTION: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#Connection");
        pub const REQUEST: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#Request");
        pub const MESSAGE_HEADER: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#MessageHeader");
        pub const PARAMETER: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#Parameter");
        pub const REQUESTS: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#requests");
        pub const METHOD_NAME: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#methodName");
        pub const ABSOLUTE_PATH: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#absolutePath");
        pub const ABSOLUTE_URI: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#absoluteURI");
        pub const AUTHORITY: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#authority");
        pub const HEADERS: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#headers");
        pub const PARAMS: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#params");
        pub const FIELD_NAME: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#fieldName");
        pub const FIELD_VALUE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#fieldValue");
        pub const HDR_NAME: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#hdrName");
        pub const PARAM_NAME: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#paramName");
        pub const PARAM_VALUE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/2011/http#paramValue");

        /// Every term the post-processor emits
        pub const USED_TERMS: [NamedNodeRef<'static>; 16] = [
            CONNECTION,
            REQUEST,
            MESSAGE_HEADER,
            PARAMETER,
            REQUESTS,
            METHOD_NAME,
            ABSOLUTE_PATH,
            ABSOLUTE_URI,
            AUTHORITY,
            HEADERS,
            PARAMS,
            FIELD_NAME,
            FIELD_VALUE,
            HDR_NAME,
            PARAM_NAME,
            PARAM_VALUE,
        ];
    }

    /// R2RML core
    pub mod rr {
        use oxrdf::NamedNodeRef;

        pub const NS: &str = "http://www.w3.org/ns/r2rml#";

        pub const TRIPLES_MAP: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#TriplesMap");
        pub const SUBJECT_MAP: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#subjectMap");
        pub const PREDICATE_OBJECT_MAP: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#predicateObjectMap");
        pub const PREDICATE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#predicate");
        pub const OBJECT_MAP: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#objectMap");
        pub const TEMPLATE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#template");
        pub const CONSTANT: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#constant");
        pub const CLASS: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#class");
        pub const TERM_TYPE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#termType");
        pub const IRI: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#IRI");
        pub const LITERAL: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#Literal");
        pub const PARENT_TRIPLES_MAP: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#parentTriplesMap");
        pub const JOIN_CONDITION: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#joinCondition");
        pub const CHILD: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#child");
        pub const PARENT: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://www.w3.org/ns/r2rml#parent");
    }

    /// RML extensions of R2RML
    pub mod rml {
        use oxrdf::NamedNodeRef;

        pub const NS: &str = "http://semweb.mmlab.be/ns/rml#";

        pub const LOGICAL_SOURCE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://semweb.mmlab.be/ns/rml#logicalSource");
        pub const SOURCE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://semweb.mmlab.be/ns/rml#source");
        pub const REFERENCE_FORMULATION: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://semweb.mmlab.be/ns/rml#referenceFormulation");
        pub const ITERATOR: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://semweb.mmlab.be/ns/rml#iterator");
        pub const REFERENCE: NamedNodeRef<'_> =
            NamedNodeRef::new_unchecked("http://semweb.mmlab.be/ns/rml#reference");
    }

    pub mod ql {
        pub const NS: &str = "http://semweb.mmlab.be/ns/ql#";
    }
}

/// Parse a Turtle document, returning the graph and every prefix it declares
pub fn parse_turtle(text: &str, artifact: &str) -> Result<(Graph, PrefixTable)> {
    let mut parser = TurtleParser::new().for_reader(text.as_bytes());
    let mut graph = Graph::new();

    for triple in parser.by_ref() {
        let triple = triple.map_err(|e| Error::rdf_syntax(artifact, e))?;
        graph.insert(&triple);
    }

    let prefixes = parser.prefixes().collect::<PrefixTable>();
    Ok((graph, prefixes))
}

/// Parse an N-Triples document
pub fn parse_ntriples(text: &str, artifact: &str) -> Result<Graph> {
    let mut graph = Graph::new();
    for triple in NTriplesParser::new().for_reader(text.as_bytes()) {
        let triple = triple.map_err(|e| Error::rdf_syntax(artifact, e))?;
        graph.insert(&triple);
    }
    Ok(graph)
}

/// Read a Turtle file
pub fn read_turtle(path: &Path) -> Result<(Graph, PrefixTable)> {
    let text = read_file(path)?;
    parse_turtle(&text, &path.display().to_string())
}

/// Serialize a graph to Turtle with the given prefixes, triples sorted
pub fn to_turtle(graph: &Graph, prefixes: &PrefixTable) -> Result<String> {
    let mut serializer = TurtleSerializer::new();
    for (prefix, namespace) in prefixes.iter() {
        serializer = serializer
            .with_prefix(prefix, namespace)
            .map_err(|e| Error::rdf_syntax(format!("prefix '{prefix}'"), e))?;
    }

    let mut writer = serializer.for_writer(Vec::new());
    for triple in sorted_triples(graph) {
        writer
            .serialize_triple(&triple)
            .map_err(|e| Error::with_source("Turtle serialization failed", e))?;
    }
    let bytes = writer
        .finish()
        .map_err(|e| Error::with_source("Turtle serialization failed", e))?;

    String::from_utf8(bytes).map_err(|e| Error::with_source("Turtle output is not UTF-8", e))
}

/// Serialize a graph to Turtle and write it atomically
pub fn write_turtle(path: &Path, graph: &Graph, prefixes: &PrefixTable) -> Result<()> {
    let turtle = to_turtle(graph, prefixes)?;
    write_atomic(path, turtle.as_bytes())
}

/// Triples of `graph` in a stable order
pub fn sorted_triples(graph: &Graph) -> Vec<Triple> {
    let mut triples: Vec<Triple> = graph.iter().map(TripleRef::into_owned).collect();
    triples.sort_by_cached_key(|t| (t.subject.to_string(), t.predicate.to_string(), t.object.to_string()));
    triples
}

/// Every `(subject, iri)` pair of `?s <predicate> ?iri` where the object is an IRI
pub fn iri_objects<'a>(
    graph: &'a Graph,
    predicate: NamedNodeRef<'a>,
) -> Vec<(SubjectRef<'a>, NamedNodeRef<'a>)> {
    graph
        .triples_for_predicate(predicate)
        .filter_map(|t| match t.object {
            TermRef::NamedNode(iri) => Some((t.subject, iri)),
            _ => None,
        })
        .collect()
}

/// True when `subject` carries `rdf:type <class>`
pub fn has_type<'a>(graph: &Graph, subject: impl Into<SubjectRef<'a>>, class: NamedNodeRef<'a>) -> bool {
    graph.contains(TripleRef::new(subject, vocab::rdf::TYPE, class))
}

/// Local name of an IRI: fragment, else the last path segment
pub fn local_name(iri: &str) -> &str {
    if let Some((_, fragment)) = iri.rsplit_once('#') {
        if !fragment.is_empty() {
            return fragment;
        }
    }
    iri.trim_end_matches('/')
        .rsplit_once('/')
        .map_or(iri, |(_, last)| last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{Literal, NamedNode};

    const SAMPLE: &str = r#"@prefix brick: <https://brickschema.org/schema/Brick#> .
@prefix ex: <http://example.org/resource/> .
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .

ex:Room1 a brick:Room .
ex:Point1 rdf:value <http://h:1026/v2/entities/Room1/attrs/t/value> ;
    brick:label "t" .
"#;

    #[test]
    fn test_parse_turtle_collects_prefixes() {
        let (graph, prefixes) = parse_turtle(SAMPLE, "sample.ttl").unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(prefixes.get("brick"), Some("https://brickschema.org/schema/Brick#"));
        assert!(has_type(
            &graph,
            NamedNodeRef::new_unchecked("http://example.org/resource/Room1"),
            NamedNodeRef::new_unchecked("https://brickschema.org/schema/Brick#Room"),
        ));
    }

    #[test]
    fn test_parse_turtle_error_names_artifact() {
        let err = parse_turtle("ex:a ex:b", "broken.ttl").unwrap_err();
        assert_eq!(err.artifact(), "broken.ttl");
    }

    #[test]
    fn test_iri_objects_skips_literals() {
        let (graph, _) = parse_turtle(SAMPLE, "sample.ttl").unwrap();

        let values = iri_objects(&graph, vocab::rdf::VALUE);
        assert_eq!(values.len(), 1);
        assert_eq!(
            values[0].1.as_str(),
            "http://h:1026/v2/entities/Room1/attrs/t/value"
        );
    }

    #[test]
    fn test_turtle_round_trip_is_stable() {
        let (graph, prefixes) = parse_turtle(SAMPLE, "sample.ttl").unwrap();

        let first = to_turtle(&graph, &prefixes).unwrap();
        let (reparsed, _) = parse_turtle(&first, "first.ttl").unwrap();
        let second = to_turtle(&reparsed, &prefixes).unwrap();

        assert_eq!(graph, reparsed);
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_ntriples() {
        let graph = parse_ntriples(
            "<http://a/s> <http://a/p> \"x\" .\n<http://a/s> <http://a/q> <http://a/o> .\n",
            "out.nt",
        )
        .unwrap();

        assert_eq!(graph.len(), 2);
        let s = NamedNode::new_unchecked("http://a/s");
        let p = NamedNode::new_unchecked("http://a/p");
        assert!(graph.contains(TripleRef::new(&s, &p, &Literal::new_simple_literal("x"))));
    }

    #[test]
    fn test_has_type_with_owned_subject() {
        let (graph, _) = parse_turtle(SAMPLE, "sample.ttl").unwrap();
        let room = NamedNode::new("http://example.org/resource/Room1").unwrap();
        let class = NamedNode::new("https://brickschema.org/schema/Brick#Room").unwrap();

        assert!(has_type(&graph, &room, class.as_ref()));
        assert!(!has_type(&graph, &room, vocab::owl::THING));
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name("https://brickschema.org/schema/Brick#Room"), "Room");
        assert_eq!(local_name("http://example.org/onto/Sensor"), "Sensor");
        assert_eq!(local_name("http://example.org/onto/Sensor/"), "Sensor");
    }
}
