//! Ontology loading and term indices
//!
//! One or more Turtle documents (Brick, REC, custom extensions) are parsed into a single
//! union graph from which three lookup structures are built:
//!
//! - a [`PrefixTable`] from the leading prefix block of each file
//! - a class index over every `owl:Class` subject
//! - a property index over every `owl:ObjectProperty` subject
//!
//! The full IRI is the primary key of every term. The string keys (preferred label or
//! local name) exist for lookup only; two IRIs sharing a key are resolved last-write-wins
//! and the collision is recorded in [`OntologyBundle::warnings`].
//!
//! # Example
//!
//! ```ignore
//! use iotkg::ontology::OntologyBundle;
//!
//! let bundle = OntologyBundle::load(&["Brick.ttl".into()])?;
//! let room = bundle.classes.get("Room").unwrap();
//! println!("{} -> {}", room.key, room.iri);
//! ```

pub mod prefixes;

pub use prefixes::PrefixTable;

use oxrdf::{Graph, NamedNodeRef, SubjectRef, TermRef};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::rdf::{local_name, vocab};
use crate::utils::read_file;

/// A class or property of the ontology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OntologyTerm {
    pub iri: String,
    /// Prefix whose namespace contains the IRI, when one is declared
    pub prefix: Option<String>,
    pub local_name: String,
    /// Lookup key (preferred label or local name)
    pub key: String,
    /// Human readable label (`skos:prefLabel`, else `rdfs:label`)
    pub label: Option<String>,
    pub domain: Option<String>,
    pub range: Option<String>,
}

impl OntologyTerm {
    /// `(prefix, local-name)` pair used to tell apart terms with equal local names
    pub fn qualified_name(&self) -> (Option<&str>, &str) {
        (self.prefix.as_deref(), &self.local_name)
    }

    /// Text used for similarity ranking
    pub fn match_text(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

/// IRI-keyed term store with a secondary string index
///
/// Every inserted term stays reachable by IRI; only the string key is last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct TermIndex {
    terms: BTreeMap<String, OntologyTerm>,
    keys: BTreeMap<String, String>,
}

impl TermIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a term; returns the IRI previously bound to the same key, if different
    pub fn insert(&mut self, term: OntologyTerm) -> Option<String> {
        let replaced = self
            .keys
            .insert(term.key.clone(), term.iri.clone())
            .filter(|previous| previous != &term.iri);
        self.terms.insert(term.iri.clone(), term);
        replaced
    }

    /// Lookup by string key
    pub fn get(&self, key: &str) -> Option<&OntologyTerm> {
        self.keys.get(key).and_then(|iri| self.terms.get(iri))
    }

    /// Lookup by full IRI
    pub fn by_iri(&self, iri: &str) -> Option<&OntologyTerm> {
        self.terms.get(iri)
    }

    pub fn contains_iri(&self, iri: &str) -> bool {
        self.terms.contains_key(iri)
    }

    /// Terms in IRI order
    pub fn iter(&self) -> impl Iterator<Item = &OntologyTerm> {
        self.terms.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Which kind of term a subject is indexed as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TermKind {
    Class,
    Property,
}

/// Prefix table, class index and property index of a set of ontology documents
#[derive(Debug, Clone, Default)]
pub struct OntologyBundle {
    pub prefixes: PrefixTable,
    pub classes: TermIndex,
    pub properties: TermIndex,
    /// Key collisions and other non-fatal findings
    pub warnings: Vec<String>,
    superclasses: BTreeMap<String, BTreeSet<String>>,
}

impl OntologyBundle {
    /// Load every ontology file; fails on the first unparseable one
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            debug!(path = %path.display(), "Reading ontology");
            sources.push((path.clone(), read_file(path)?));
        }

        let borrowed: Vec<(&Path, &str)> = sources
            .iter()
            .map(|(path, text)| (path.as_path(), text.as_str()))
            .collect();
        Self::from_sources(&borrowed)
    }

    /// Build a bundle from in-memory documents (`(artifact path, turtle text)`)
    pub fn from_sources(sources: &[(&Path, &str)]) -> Result<Self> {
        let mut bundle = Self::default();
        let mut union = Graph::new();
        let mut per_file = Vec::with_capacity(sources.len());

        for (path, text) in sources {
            let file_prefixes = PrefixTable::from_leading_block(text);
            let mut parser = oxttl::TurtleParser::new().for_reader(text.as_bytes());
            let mut graph = Graph::new();
            for triple in parser.by_ref() {
                let triple = triple.map_err(|e| Error::ontology_parse(path, e))?;
                graph.insert(&triple);
                union.insert(&triple);
            }

            for (prefix, namespace) in file_prefixes.iter() {
                if let Some(previous) = bundle.prefixes.insert(prefix, namespace) {
                    if previous != namespace {
                        bundle.warn(format!(
                            "prefix '{prefix}' rebound from <{previous}> to <{namespace}> by {}",
                            path.display()
                        ));
                    }
                }
            }
            per_file.push(graph);
        }

        for graph in &per_file {
            bundle.index_subjects(graph, &union, TermKind::Class);
            bundle.index_subjects(graph, &union, TermKind::Property);
        }

        for triple in union.triples_for_predicate(vocab::rdfs::SUB_CLASS_OF) {
            if let (SubjectRef::NamedNode(child), TermRef::NamedNode(parent)) =
                (triple.subject, triple.object)
            {
                bundle
                    .superclasses
                    .entry(child.as_str().to_string())
                    .or_default()
                    .insert(parent.as_str().to_string());
            }
        }

        info!(
            files = sources.len(),
            prefixes = bundle.prefixes.len(),
            classes = bundle.classes.len(),
            properties = bundle.properties.len(),
            warnings = bundle.warnings.len(),
            "Ontology loaded"
        );

        Ok(bundle)
    }

    /// Every declared superclass of `class`, transitively (not including `class`)
    pub fn ancestors(&self, class: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([class]);

        while let Some(current) = queue.pop_front() {
            if let Some(parents) = self.superclasses.get(current) {
                for parent in parents {
                    if parent != class && seen.insert(parent.clone()) {
                        queue.push_back(parent);
                    }
                }
            }
        }

        seen
    }

    /// `class` equals `ancestor` or reaches it through declared `rdfs:subClassOf` links
    ///
    /// Everything is a subclass of `owl:Thing`.
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        class == ancestor
            || ancestor == vocab::owl::THING.as_str()
            || self.ancestors(class).contains(ancestor)
    }

    fn warn(&mut self, message: String) {
        warn!(warning = %message, "Ontology warning");
        self.warnings.push(message);
    }

    fn index_subjects(&mut self, graph: &Graph, union: &Graph, kind: TermKind) {
        let type_iri = match kind {
            TermKind::Class => vocab::owl::CLASS,
            TermKind::Property => vocab::owl::OBJECT_PROPERTY,
        };

        let mut subjects: Vec<String> = graph
            .subjects_for_predicate_object(vocab::rdf::TYPE, type_iri)
            .filter_map(|s| match s {
                SubjectRef::NamedNode(n) => Some(n.as_str().to_string()),
                _ => None,
            })
            .collect();
        subjects.sort();
        subjects.dedup();

        for iri in subjects {
            let node = NamedNodeRef::new_unchecked(&iri);
            let pref_label = literal_object(union, node, vocab::skos::PREF_LABEL);
            let label = pref_label
                .clone()
                .or_else(|| literal_object(union, node, vocab::rdfs::LABEL));
            let local = local_name(&iri).to_string();
            let key = match kind {
                TermKind::Class => pref_label.unwrap_or_else(|| local.clone()),
                TermKind::Property => pref_label
                    .map(|l| l.to_lowercase())
                    .unwrap_or_else(|| local.clone()),
            };

            let term = OntologyTerm {
                prefix: self.prefixes.prefix_of(&iri).map(str::to_string),
                local_name: local,
                key,
                label,
                domain: iri_object(union, node, vocab::rdfs::DOMAIN),
                range: iri_object(union, node, vocab::rdfs::RANGE),
                iri,
            };

            let key = term.key.clone();
            let new_iri = term.iri.clone();
            let index = match kind {
                TermKind::Class => &mut self.classes,
                TermKind::Property => &mut self.properties,
            };
            if let Some(previous) = index.insert(term) {
                self.warn(format!(
                    "duplicate {} key '{key}': <{previous}> replaced by <{new_iri}>",
                    match kind {
                        TermKind::Class => "class",
                        TermKind::Property => "property",
                    }
                ));
            }
        }
    }
}

/// Preferred literal object: untagged or English first, then lexical order
fn literal_object(graph: &Graph, subject: NamedNodeRef<'_>, predicate: NamedNodeRef<'_>) -> Option<String> {
    let mut literals: Vec<(u8, String)> = graph
        .objects_for_subject_predicate(subject, predicate)
        .filter_map(|o| match o {
            TermRef::Literal(literal) => {
                let rank = match literal.language() {
                    None => 0,
                    Some(lang) if lang.starts_with("en") => 1,
                    Some(_) => 2,
                };
                Some((rank, literal.value().to_string()))
            }
            _ => None,
        })
        .collect();
    literals.sort();
    literals.into_iter().next().map(|(_, value)| value)
}

fn iri_object(graph: &Graph, subject: NamedNodeRef<'_>, predicate: NamedNodeRef<'_>) -> Option<String> {
    graph
        .objects_for_subject_predicate(subject, predicate)
        .filter_map(|o| match o {
            TermRef::NamedNode(n) => Some(n.as_str().to_string()),
            _ => None,
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRICK: &str = r#"@prefix brick: <https://brickschema.org/schema/Brick#> .
@prefix owl: <http://www.w3.org/2002/07/owl#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix skos: <http://www.w3.org/2004/02/skos/core#> .

brick:Location a owl:Class .
brick:Room a owl:Class ; rdfs:subClassOf brick:Space ; rdfs:label "Room" .
brick:Space a owl:Class ; rdfs:subClassOf brick:Location .
brick:Temperature_Sensor a owl:Class ; skos:prefLabel "Temperature Sensor"@en .
brick:hasPoint a owl:ObjectProperty ; rdfs:domain brick:Location .
brick:isPointOf a owl:ObjectProperty ; skos:prefLabel "Is Point Of" .
"#;

    const EXTENSION: &str = r#"@prefix ext: <http://example.org/ext#> .
@prefix owl: <http://www.w3.org/2002/07/owl#> .

ext:Room a owl:Class .
"#;

    fn bundle(sources: &[(&str, &str)]) -> Result<OntologyBundle> {
        let sources: Vec<(&Path, &str)> = sources
            .iter()
            .map(|(p, t)| (Path::new(*p), *t))
            .collect();
        OntologyBundle::from_sources(&sources)
    }

    #[test]
    fn test_class_and_property_keys() {
        let bundle = bundle(&[("Brick.ttl", BRICK)]).unwrap();

        assert_eq!(bundle.classes.len(), 4);
        assert_eq!(
            bundle.classes.get("Room").unwrap().iri,
            "https://brickschema.org/schema/Brick#Room"
        );
        assert!(bundle.classes.get("Temperature Sensor").is_some());
        assert!(bundle.classes.get("Temperature_Sensor").is_none());

        assert!(bundle.properties.get("hasPoint").is_some());
        assert!(bundle.properties.get("is point of").is_some());
        assert_eq!(
            bundle.properties.get("hasPoint").unwrap().domain.as_deref(),
            Some("https://brickschema.org/schema/Brick#Location")
        );
    }

    #[test]
    fn test_prefixes_and_qualified_names() {
        let bundle = bundle(&[("Brick.ttl", BRICK)]).unwrap();

        assert_eq!(bundle.prefixes.len(), 4);
        let room = bundle.classes.get("Room").unwrap();
        assert_eq!(room.qualified_name(), (Some("brick"), "Room"));
    }

    #[test]
    fn test_duplicate_keys_last_write_wins() {
        let bundle = bundle(&[("Brick.ttl", BRICK), ("ext.ttl", EXTENSION)]).unwrap();

        assert_eq!(bundle.classes.get("Room").unwrap().iri, "http://example.org/ext#Room");
        assert!(bundle.classes.contains_iri("https://brickschema.org/schema/Brick#Room"));
        assert!(bundle.classes.contains_iri("http://example.org/ext#Room"));
        assert_eq!(
            bundle.classes.by_iri("https://brickschema.org/schema/Brick#Room").unwrap().key,
            "Room"
        );
        assert_eq!(bundle.classes.len(), 5);
        assert_eq!(bundle.warnings.len(), 1);
        assert!(bundle.warnings[0].contains("duplicate class key 'Room'"));
    }

    #[test]
    fn test_subclass_walk() {
        let bundle = bundle(&[("Brick.ttl", BRICK)]).unwrap();
        let room = "https://brickschema.org/schema/Brick#Room";
        let location = "https://brickschema.org/schema/Brick#Location";

        assert!(bundle.is_subclass_of(room, location));
        assert!(bundle.is_subclass_of(room, room));
        assert!(bundle.is_subclass_of(room, vocab::owl::THING.as_str()));
        assert!(!bundle.is_subclass_of(location, room));
        assert_eq!(bundle.ancestors(room).len(), 2);
    }

    #[test]
    fn test_unparseable_source_names_file() {
        let err = bundle(&[("Brick.ttl", BRICK), ("bad.ttl", "brick:Room a")]).unwrap_err();

        assert!(matches!(err, Error::OntologyParse { .. }));
        assert_eq!(err.artifact(), "bad.ttl");
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Brick.ttl");
        std::fs::write(&path, BRICK).unwrap();

        let bundle = OntologyBundle::load(&[path]).unwrap();
        assert_eq!(bundle.classes.len(), 4);
    }
}
