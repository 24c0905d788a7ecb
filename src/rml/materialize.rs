//! Built-in RML materializer
//!
//! Executes the RML subset the emitter produces over an in-memory JSON document:
//! JSONPath logical sources, `rr:template` / `rml:reference` / `rr:constant` term maps
//! with `rr:termType`, `rr:class`, and `rr:parentTriplesMap` joins.
//!
//! Template values that end up in IRIs are percent-encoded like R2RML engines do, so an
//! id `Hotel:room1` yields `.../Hotel%3Aroom1`. Callers canonicalize afterwards.

use oxrdf::{Graph, Literal, NamedNode, SubjectRef, Term, TermRef, Triple};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::jsonpath::{resolve_reference, JsonPath};
use crate::rdf::{parse_turtle, vocab};

/// Kind of RDF term a term map produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    Iri,
    Literal,
}

/// Piece of an `rr:template`
#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Text(String),
    Reference(String),
}

/// How a term is computed from an iterated node
#[derive(Debug, Clone, PartialEq)]
enum TermMap {
    Reference(String),
    Template(Vec<TemplatePart>),
    Constant(Term),
}

#[derive(Debug, Clone, PartialEq)]
enum ObjectSpec {
    Value { map: TermMap, kind: TermKind },
    Join { parent: String, conditions: Vec<(String, String)> },
}

#[derive(Debug, Clone, PartialEq)]
struct PredicateObjectRule {
    predicates: Vec<NamedNode>,
    objects: Vec<ObjectSpec>,
}

#[derive(Debug, Clone, PartialEq)]
struct TriplesMapRule {
    key: String,
    iterator: JsonPath,
    subject: TermMap,
    classes: Vec<NamedNode>,
    predicate_objects: Vec<PredicateObjectRule>,
}

/// A parsed RML mapping, ready to run
#[derive(Debug, Clone)]
pub struct MappingDocument {
    artifact: String,
    maps: Vec<TriplesMapRule>,
}

impl MappingDocument {
    /// Parse RML Turtle; syntax errors are reported as materialization failures
    pub fn parse(text: &str, artifact: &str) -> Result<Self> {
        let (graph, _) = parse_turtle(text, artifact).map_err(|e| match e {
            Error::RdfSyntax { artifact, reason } => {
                Error::materialization(artifact, format!("mapping is not valid Turtle: {reason}"))
            }
            other => other,
        })?;

        let mut subjects: Vec<SubjectRef<'_>> = graph
            .subjects_for_predicate_object(vocab::rdf::TYPE, vocab::rr::TRIPLES_MAP)
            .chain(graph.triples_for_predicate(vocab::rml::LOGICAL_SOURCE).map(|t| t.subject))
            .collect();
        subjects.sort_by_cached_key(ToString::to_string);
        subjects.dedup();

        let maps = subjects
            .into_iter()
            .map(|subject| parse_triples_map(&graph, subject, artifact))
            .collect::<Result<Vec<_>>>()?;

        for map in &maps {
            for rule in &map.predicate_objects {
                for object in &rule.objects {
                    if let ObjectSpec::Join { parent, .. } = object {
                        if !maps.iter().any(|m| &m.key == parent) {
                            return Err(Error::materialization(
                                artifact,
                                format!("{} joins undefined triples map {parent}", map.key),
                            ));
                        }
                    }
                }
            }
        }

        debug!(artifact, maps = maps.len(), "Parsed RML mapping");
        Ok(Self {
            artifact: artifact.to_string(),
            maps,
        })
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Run every triples map over `source`
    pub fn materialize(&self, source: &Value) -> Result<Graph> {
        let mut subjects: HashMap<&str, Vec<(NamedNode, &Value)>> = HashMap::new();
        for map in &self.maps {
            let mut generated = Vec::new();
            for node in map.iterator.select(source) {
                let Some(iri) = self.generate_iris(&map.subject, node).into_iter().next() else {
                    debug!(map = %map.key, "Skipping node without subject");
                    continue;
                };
                generated.push((iri, node));
            }
            subjects.insert(map.key.as_str(), generated);
        }

        let mut graph = Graph::new();
        for map in &self.maps {
            let Some(nodes) = subjects.get(map.key.as_str()) else {
                continue;
            };
            for (subject, node) in nodes {
                for class in &map.classes {
                    graph.insert(&Triple::new(subject.clone(), vocab::rdf::TYPE.into_owned(), class.clone()));
                }

                for rule in &map.predicate_objects {
                    let objects = self.objects(rule, node, &subjects);
                    for predicate in &rule.predicates {
                        for object in &objects {
                            graph.insert(&Triple::new(subject.clone(), predicate.clone(), object.clone()));
                        }
                    }
                }
            }
        }

        debug!(artifact = %self.artifact, triples = graph.len(), "Materialized mapping");
        Ok(graph)
    }

    fn objects(
        &self,
        rule: &PredicateObjectRule,
        node: &Value,
        subjects: &HashMap<&str, Vec<(NamedNode, &Value)>>,
    ) -> Vec<Term> {
        let mut objects = Vec::new();
        for spec in &rule.objects {
            match spec {
                ObjectSpec::Value { map, kind } => match kind {
                    TermKind::Iri => objects.extend(self.generate_iris(map, node).into_iter().map(Term::from)),
                    TermKind::Literal => objects.extend(generate_literals(map, node)),
                },
                ObjectSpec::Join {
                    parent: parent_map,
                    conditions,
                } => {
                    let parents = subjects.get(parent_map.as_str()).map(Vec::as_slice).unwrap_or_default();
                    for (parent_subject, parent_node) in parents {
                        let joined = conditions.iter().all(|(child, parent)| {
                            let child_values = lexical_values(resolve_reference(node, child));
                            let parent_values = lexical_values(resolve_reference(parent_node, parent));
                            child_values.iter().any(|v| parent_values.contains(v))
                        });
                        if joined {
                            objects.push(Term::from(parent_subject.clone()));
                        }
                    }
                }
            }
        }
        objects
    }

    fn generate_iris(&self, map: &TermMap, node: &Value) -> Vec<NamedNode> {
        let lexical = match map {
            TermMap::Constant(Term::NamedNode(n)) => return vec![n.clone()],
            TermMap::Constant(_) => return Vec::new(),
            TermMap::Reference(reference) => lexical_values(resolve_reference(node, reference)),
            TermMap::Template(parts) => expand_template(parts, node, true).into_iter().collect(),
        };

        lexical
            .into_iter()
            .filter_map(|iri| match NamedNode::new(iri.as_str()) {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(artifact = %self.artifact, iri = %iri, error = %e, "Skipping invalid IRI");
                    None
                }
            })
            .collect()
    }
}

fn generate_literals(map: &TermMap, node: &Value) -> Vec<Term> {
    match map {
        TermMap::Constant(term) => vec![term.clone()],
        TermMap::Reference(reference) => lexical_values(resolve_reference(node, reference))
            .into_iter()
            .map(|v| Literal::new_simple_literal(v).into())
            .collect(),
        TermMap::Template(parts) => expand_template(parts, node, false)
            .into_iter()
            .map(|v| Literal::new_simple_literal(v).into())
            .collect(),
    }
}

/// Lexical forms of a referenced JSON value; objects and nulls yield nothing
fn lexical_values(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Number(n)) => vec![n.to_string()],
        Some(Value::Bool(b)) => vec![b.to_string()],
        Some(Value::Array(items)) => items.iter().flat_map(|i| lexical_values(Some(i))).collect(),
        _ => Vec::new(),
    }
}

/// Fill a template; `None` when a referenced value is missing
fn expand_template(parts: &[TemplatePart], node: &Value, iri_safe: bool) -> Option<String> {
    let mut out = String::new();
    for part in parts {
        match part {
            TemplatePart::Text(text) => out.push_str(text),
            TemplatePart::Reference(reference) => {
                let value = lexical_values(resolve_reference(node, reference)).into_iter().next()?;
                if iri_safe {
                    out.push_str(&percent_encode(&value));
                } else {
                    out.push_str(&value);
                }
            }
        }
    }
    Some(out)
}

/// Percent-encode everything but RFC 3986 unreserved characters and non-ASCII
pub fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') || !c.is_ascii() {
            out.push(c);
        } else {
            out.push_str(&format!("%{:02X}", c as u32));
        }
    }
    out
}

fn parse_template(template: &str, artifact: &str) -> Result<Vec<TemplatePart>> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    text.push(escaped);
                }
            }
            '{' => {
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                }
                let mut reference = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    reference.push(c);
                }
                if !closed || reference.is_empty() {
                    return Err(Error::materialization(
                        artifact,
                        format!("malformed rr:template '{template}'"),
                    ));
                }
                parts.push(TemplatePart::Reference(reference));
            }
            c => text.push(c),
        }
    }
    if !text.is_empty() {
        parts.push(TemplatePart::Text(text));
    }
    Ok(parts)
}

fn as_subject(term: TermRef<'_>) -> Option<SubjectRef<'_>> {
    match term {
        TermRef::NamedNode(n) => Some(n.into()),
        TermRef::BlankNode(b) => Some(b.into()),
        _ => None,
    }
}

fn literal_value<'g>(graph: &'g Graph, subject: SubjectRef<'_>, predicate: oxrdf::NamedNodeRef<'_>) -> Option<&'g str> {
    match graph.object_for_subject_predicate(subject, predicate)? {
        TermRef::Literal(l) => Some(l.value()),
        _ => None,
    }
}

fn parse_term_map(
    graph: &Graph,
    node: SubjectRef<'_>,
    artifact: &str,
    owner: &str,
) -> Result<(TermMap, Option<TermKind>)> {
    let kind = match graph.object_for_subject_predicate(node, vocab::rr::TERM_TYPE) {
        None => None,
        Some(TermRef::NamedNode(t)) if t == vocab::rr::IRI => Some(TermKind::Iri),
        Some(TermRef::NamedNode(t)) if t == vocab::rr::LITERAL => Some(TermKind::Literal),
        Some(other) => {
            return Err(Error::materialization(
                artifact,
                format!("{owner}: unsupported rr:termType {other}"),
            ));
        }
    };

    if let Some(template) = literal_value(graph, node, vocab::rr::TEMPLATE) {
        return Ok((TermMap::Template(parse_template(template, artifact)?), kind));
    }
    if let Some(reference) = literal_value(graph, node, vocab::rml::REFERENCE) {
        return Ok((TermMap::Reference(reference.to_string()), kind));
    }
    if let Some(constant) = graph.object_for_subject_predicate(node, vocab::rr::CONSTANT) {
        return Ok((TermMap::Constant(constant.into_owned()), kind));
    }

    Err(Error::materialization(
        artifact,
        format!("{owner}: term map has no rr:template, rml:reference or rr:constant"),
    ))
}

fn parse_triples_map(graph: &Graph, subject: SubjectRef<'_>, artifact: &str) -> Result<TriplesMapRule> {
    let key = subject.to_string();

    let iterator = graph
        .object_for_subject_predicate(subject, vocab::rml::LOGICAL_SOURCE)
        .and_then(as_subject)
        .and_then(|source| literal_value(graph, source, vocab::rml::ITERATOR))
        .unwrap_or("$");
    let iterator = JsonPath::parse(iterator)
        .map_err(|e| Error::materialization(artifact, format!("{key}: {e}")))?;

    let subject_map = graph
        .object_for_subject_predicate(subject, vocab::rr::SUBJECT_MAP)
        .and_then(as_subject)
        .ok_or_else(|| Error::materialization(artifact, format!("{key} has no rr:subjectMap")))?;
    let (subject_term, _) = parse_term_map(graph, subject_map, artifact, &key)?;
    let classes = graph
        .objects_for_subject_predicate(subject_map, vocab::rr::CLASS)
        .filter_map(|o| match o {
            TermRef::NamedNode(n) => Some(n.into_owned()),
            _ => None,
        })
        .collect();

    let mut predicate_objects = Vec::new();
    for pom in graph.objects_for_subject_predicate(subject, vocab::rr::PREDICATE_OBJECT_MAP) {
        let Some(pom) = as_subject(pom) else {
            continue;
        };
        let predicates: Vec<NamedNode> = graph
            .objects_for_subject_predicate(pom, vocab::rr::PREDICATE)
            .filter_map(|o| match o {
                TermRef::NamedNode(n) => Some(n.into_owned()),
                _ => None,
            })
            .collect();

        let mut objects = Vec::new();
        for object_map in graph.objects_for_subject_predicate(pom, vocab::rr::OBJECT_MAP) {
            let Some(object_map) = as_subject(object_map) else {
                continue;
            };

            if let Some(parent) = graph.object_for_subject_predicate(object_map, vocab::rr::PARENT_TRIPLES_MAP) {
                let conditions = graph
                    .objects_for_subject_predicate(object_map, vocab::rr::JOIN_CONDITION)
                    .filter_map(as_subject)
                    .filter_map(|condition| {
                        Some((
                            literal_value(graph, condition, vocab::rr::CHILD)?.to_string(),
                            literal_value(graph, condition, vocab::rr::PARENT)?.to_string(),
                        ))
                    })
                    .collect();
                objects.push(ObjectSpec::Join {
                    parent: parent.to_string(),
                    conditions,
                });
                continue;
            }

            let (map, kind) = parse_term_map(graph, object_map, artifact, &key)?;
            let kind = kind.unwrap_or(match &map {
                TermMap::Reference(_) => TermKind::Literal,
                TermMap::Template(_) => TermKind::Iri,
                TermMap::Constant(Term::NamedNode(_)) => TermKind::Iri,
                TermMap::Constant(_) => TermKind::Literal,
            });
            objects.push(ObjectSpec::Value { map, kind });
        }

        if predicates.is_empty() || objects.is_empty() {
            return Err(Error::materialization(
                artifact,
                format!("{key}: predicate-object map without predicate or object map"),
            ));
        }
        predicate_objects.push(PredicateObjectRule { predicates, objects });
    }

    Ok(TriplesMapRule {
        key,
        iterator,
        subject: subject_term,
        classes,
        predicate_objects,
    })
}
