//! Node Relationship Report
//!
//! The human-reviewable document between discovery and mapping emission. Serialized as
//! JSON with a `@context` prefix table and a `@data` list of triples-map entries:
//!
//! ```json
//! {
//!   "@context": { "brick": "https://brickschema.org/schema/Brick#" },
//!   "@data": [{
//!     "id": "room",
//!     "resource_type": "Room",
//!     "iterator": "$[?(@.type==\"Room\")]",
//!     "subject_template": "http://example.org/resource/{id}",
//!     "class": "https://brickschema.org/schema/Brick#Room",
//!     "confidence": 1.0,
//!     "predicate_objects": [
//!       { "kind": "join", "predicate": "https://brickschema.org/schema/Brick#hasPoint",
//!         "parent_map": "temperaturesensor", "child": "hasPoint.value", "parent": "id" }
//!     ]
//!   }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::jsonpath::JsonPath;
use crate::ontology::{OntologyBundle, PrefixTable};
use crate::rdf::vocab;
use crate::utils::{read_file, write_atomic};

const ARTIFACT: &str = "node relationship report";

/// Whether a value link produces a literal or an IRI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermType {
    #[default]
    Literal,
    Iri,
}

/// One predicate-object specification of a triples map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateObject {
    /// Object taken from a JSON field of the same entity
    ValueLink {
        predicate: String,
        reference: String,
        #[serde(default)]
        term_type: TermType,
    },
    /// Object is the subject of another triples map where `child == parent`
    Join {
        predicate: String,
        parent_map: String,
        child: String,
        parent: String,
    },
}

impl PredicateObject {
    pub fn predicate(&self) -> &str {
        match self {
            Self::ValueLink { predicate, .. } | Self::Join { predicate, .. } => predicate,
        }
    }
}

/// One triples map: which entities, which subject IRI, which class, which edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriplesMapEntry {
    pub id: String,
    pub resource_type: String,
    pub iterator: String,
    pub subject_template: String,
    pub class: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub review: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_notes: Vec<String>,
    #[serde(default)]
    pub predicate_objects: Vec<PredicateObject>,
}

impl TriplesMapEntry {
    /// Flag the entry for review with a note
    pub fn flag(&mut self, note: impl Into<String>) {
        self.review = true;
        self.review_notes.push(note.into());
    }
}

/// Intermediate document produced by discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRelationshipReport {
    #[serde(rename = "@context")]
    pub context: PrefixTable,
    #[serde(rename = "@data")]
    pub data: Vec<TriplesMapEntry>,
}

impl NodeRelationshipReport {
    pub fn entry(&self, id: &str) -> Option<&TriplesMapEntry> {
        self.data.iter().find(|e| e.id == id)
    }

    pub fn review_count(&self) -> usize {
        self.data.iter().filter(|e| e.review).count()
    }

    /// Check the report against the ontology and the entities it will be run over
    ///
    /// - every class is indexed (`owl:Thing` only on review-flagged entries)
    /// - every predicate is an indexed property or `rdf:value`
    /// - every join names an existing map
    /// - every iterator parses and selects at least one entity
    pub fn validate(&self, ontology: &OntologyBundle, entities: &[Value]) -> Result<()> {
        let mut ids = HashSet::new();
        for entry in &self.data {
            if !ids.insert(entry.id.as_str()) {
                return Err(Error::config(ARTIFACT, format!("duplicate triples map id '{}'", entry.id)));
            }
        }

        let document = Value::Array(entities.to_vec());
        let thing = vocab::owl::THING.as_str();

        for entry in &self.data {
            if entry.class == thing {
                if !entry.review {
                    return Err(Error::config(
                        ARTIFACT,
                        format!("map '{}' uses owl:Thing without a review flag", entry.id),
                    ));
                }
            } else if !ontology.classes.contains_iri(&entry.class) {
                return Err(Error::config(
                    ARTIFACT,
                    format!("map '{}': class <{}> is not in the ontology", entry.id, entry.class),
                ));
            }

            let iterator = JsonPath::parse(&entry.iterator)
                .map_err(|e| Error::config(ARTIFACT, format!("map '{}': {e}", entry.id)))?;
            if iterator.find(&document).is_empty() {
                return Err(Error::config(
                    ARTIFACT,
                    format!("map '{}': iterator {} selects no entity", entry.id, entry.iterator),
                ));
            }

            for po in &entry.predicate_objects {
                let predicate = po.predicate();
                if predicate != vocab::rdf::VALUE.as_str() && !ontology.properties.contains_iri(predicate) {
                    return Err(Error::config(
                        ARTIFACT,
                        format!("map '{}': property <{predicate}> is not in the ontology", entry.id),
                    ));
                }
                if let PredicateObject::Join { parent_map, .. } = po {
                    if !ids.contains(parent_map.as_str()) {
                        return Err(Error::config(
                            ARTIFACT,
                            format!("map '{}': join references unknown map '{parent_map}'", entry.id),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_json()?.as_bytes())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = read_file(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::config(path.display().to_string(), format!("not a node relationship report: {e}")))
    }
}
