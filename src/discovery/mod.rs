//! Relationship discovery
//!
//! Builds the [`NodeRelationshipReport`] for a normalized entity list:
//!
//! 1. collect the resource types (values of the type keys) in first-seen order
//! 2. collect relationship fields: values that name another entity's identifier,
//!    directly or as `{"value": id}`, `{"object": id}` or `{"ref": id}`
//! 3. match every type against the class index and every relationship field against the
//!    property index, escalating close calls to the [`Arbiter`]
//! 4. emit one triples map per type
//!
//! Discovery is lenient: anything it cannot decide is flagged for review instead of
//! failing. The one exception is an arbiter that declines a name no candidate scores
//! above the lower threshold for.

pub mod arbiter;
pub mod report;
pub mod similarity;

pub use arbiter::{Arbiter, ArbiterVerdict, LlmArbiter, MatchKind};
pub use report::{NodeRelationshipReport, PredicateObject, TermType, TriplesMapEntry};
pub use similarity::{Candidate, SemanticScorer, SimilarityScorer, StringScorer};

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::jsonpath::JsonPath;
use crate::ontology::{OntologyBundle, OntologyTerm, PrefixTable};
use crate::preprocess::{id_string, ACCESS_URI_KEY, REF_KEY};
use crate::rdf::vocab;
use crate::utils::slugify;

/// Keys under which an object can carry a referenced entity id
const REFERENCE_WRAPPERS: [&str; 3] = ["value", "object", REF_KEY];

/// Result of the match protocol for one name
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept {
        iri: String,
        confidence: f32,
        review_note: Option<String>,
    },
    Unmatched {
        note: String,
    },
}

/// A field of one resource type that points at entities of another type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Relationship {
    field: String,
    reference: String,
    target_type: String,
    split_link: bool,
}

/// Discovers classes and relationships of an entity list
pub struct RelationshipFinder<'a> {
    config: &'a PlatformConfig,
    scorer: &'a dyn SimilarityScorer,
    arbiter: Option<&'a dyn Arbiter>,
}

impl<'a> RelationshipFinder<'a> {
    pub fn new(config: &'a PlatformConfig, scorer: &'a dyn SimilarityScorer) -> Self {
        Self {
            config,
            scorer,
            arbiter: None,
        }
    }

    pub fn with_arbiter(mut self, arbiter: &'a dyn Arbiter) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Build the report for `entities`
    pub async fn discover(&self, entities: &[Value], ontology: &OntologyBundle) -> Result<NodeRelationshipReport> {
        let (types, type_keys) = self.type_inventory(entities);
        let owner_types = self.id_owners(entities);
        let relationships = self.relationship_inventory(entities, &owner_types);
        let value_links = self.value_link_inventory(entities);

        info!(
            entities = entities.len(),
            types = types.len(),
            relationship_fields = relationships.values().map(BTreeSet::len).sum::<usize>(),
            "Discovering relationships"
        );

        let map_ids = assign_map_ids(&types);
        let class_terms: Vec<&OntologyTerm> = ontology.classes.iter().collect();

        let mut classes: HashMap<&str, (String, f32, Option<String>)> = HashMap::new();
        for resource_type in &types {
            let candidates = similarity::rank(resource_type, &class_terms, self.scorer, self.config.top_k)?;
            let decision = self.decide(resource_type, MatchKind::Class, &candidates).await?;
            let assignment = match decision {
                Decision::Accept {
                    iri,
                    confidence,
                    review_note,
                } => (iri, confidence, review_note),
                Decision::Unmatched { note } => (vocab::owl::THING.as_str().to_string(), 0.0, Some(note)),
            };
            classes.insert(resource_type.as_str(), assignment);
        }

        let mut data = Vec::with_capacity(types.len());
        for resource_type in &types {
            let type_key = type_keys.get(resource_type).map_or("type", String::as_str);
            let (class, confidence, class_note) = classes
                .get(resource_type.as_str())
                .cloned()
                .unwrap_or_else(|| (vocab::owl::THING.as_str().to_string(), 0.0, None));

            let mut entry = TriplesMapEntry {
                id: map_ids[resource_type].clone(),
                resource_type: resource_type.clone(),
                iterator: JsonPath::type_filter(type_key, resource_type).to_string(),
                subject_template: format!("{}{{{}}}", self.config.base_iri, self.config.unique_identifier_key),
                class,
                confidence,
                review: false,
                review_notes: Vec::new(),
                predicate_objects: Vec::new(),
            };
            if let Some(note) = class_note {
                entry.flag(format!("class: {note}"));
            }

            for reference in value_links.get(resource_type).into_iter().flatten() {
                entry.predicate_objects.push(PredicateObject::ValueLink {
                    predicate: vocab::rdf::VALUE.as_str().to_string(),
                    reference: reference.clone(),
                    term_type: TermType::Iri,
                });
            }

            for relationship in relationships.get(resource_type).into_iter().flatten() {
                let target_class = classes
                    .get(relationship.target_type.as_str())
                    .map(|(iri, _, _)| iri.as_str());
                let predicate = self
                    .relationship_predicate(relationship, &entry.class, target_class, ontology)
                    .await?;

                match predicate {
                    Decision::Accept {
                        iri, review_note, ..
                    } => {
                        if let Some(note) = review_note {
                            entry.flag(format!("property '{}': {note}", relationship.field));
                        }
                        entry.predicate_objects.push(PredicateObject::Join {
                            predicate: iri,
                            parent_map: map_ids[&relationship.target_type].clone(),
                            child: relationship.reference.clone(),
                            parent: self.config.unique_identifier_key.clone(),
                        });
                    }
                    Decision::Unmatched { note } => {
                        entry.flag(format!(
                            "property '{}' -> {} dropped: {note}",
                            relationship.field, relationship.target_type
                        ));
                    }
                }
            }

            if entry.review {
                info!(
                    map = %entry.id,
                    class = %entry.class,
                    notes = ?entry.review_notes,
                    "Mapping flagged for review"
                );
            }
            data.push(entry);
        }

        let mut context = PrefixTable::standard();
        context.merge(&ontology.prefixes);

        let report = NodeRelationshipReport { context, data };
        info!(
            maps = report.data.len(),
            review = report.review_count(),
            "Relationship discovery complete"
        );
        Ok(report)
    }

    /// Distinct type values in first-seen order, with the key each was first found under
    fn type_inventory(&self, entities: &[Value]) -> (Vec<String>, HashMap<String, String>) {
        let mut keys = HashMap::new();
        let mut types = Vec::new();
        for entity in entities {
            if let Some((key, t)) = self.config.typed_by(entity) {
                if !keys.contains_key(t) {
                    keys.insert(t.to_string(), key.to_string());
                    types.push(t.to_string());
                }
            }
        }
        (types, keys)
    }

    /// Entity id -> its type
    fn id_owners(&self, entities: &[Value]) -> HashMap<String, String> {
        entities
            .iter()
            .filter_map(|entity| {
                let id = entity.get(&self.config.unique_identifier_key).and_then(id_string)?;
                let t = self.config.entity_type(entity)?;
                Some((id, t.to_string()))
            })
            .collect()
    }

    fn is_structural_key(&self, key: &str) -> bool {
        key == self.config.unique_identifier_key
            || key == self.config.parent_link_key
            || key == self.config.split_payload_key
            || self.config.entity_type_keys.iter().any(|k| k == key)
    }

    /// Per type: fields whose values collide with another entity's id
    fn relationship_inventory(
        &self,
        entities: &[Value],
        owners: &HashMap<String, String>,
    ) -> BTreeMap<String, BTreeSet<Relationship>> {
        let mut inventory: BTreeMap<String, BTreeSet<Relationship>> = BTreeMap::new();

        for entity in entities {
            let (Some(source_type), Some(fields)) = (self.config.entity_type(entity), entity.as_object()) else {
                continue;
            };
            for (field, value) in fields {
                if self.is_structural_key(field) {
                    continue;
                }
                let Some((reference, target_id, split_link)) = referenced_id(field, value) else {
                    continue;
                };
                let Some(target_type) = owners.get(&target_id) else {
                    continue;
                };
                inventory
                    .entry(source_type.to_string())
                    .or_default()
                    .insert(Relationship {
                        field: field.clone(),
                        reference,
                        target_type: target_type.clone(),
                        split_link,
                    });
            }
        }

        inventory
    }

    /// Per type: fields carrying an access URI
    fn value_link_inventory(&self, entities: &[Value]) -> HashMap<String, BTreeSet<String>> {
        let mut inventory: HashMap<String, BTreeSet<String>> = HashMap::new();
        for entity in entities {
            let (Some(source_type), Some(fields)) = (self.config.entity_type(entity), entity.as_object()) else {
                continue;
            };
            for (field, value) in fields {
                if self.is_structural_key(field) {
                    continue;
                }
                if field == ACCESS_URI_KEY || value.as_str().is_some_and(is_http_url) {
                    inventory
                        .entry(source_type.to_string())
                        .or_default()
                        .insert(field.clone());
                }
            }
        }
        inventory
    }

    async fn relationship_predicate(
        &self,
        relationship: &Relationship,
        source_class: &str,
        target_class: Option<&str>,
        ontology: &OntologyBundle,
    ) -> Result<Decision> {
        if relationship.split_link {
            if let Some(configured) = &self.config.split_link_property {
                if let Some(term) = lookup_property(ontology, configured) {
                    return Ok(Decision::Accept {
                        iri: term.iri.clone(),
                        confidence: 1.0,
                        review_note: None,
                    });
                }
                return Ok(Decision::Unmatched {
                    note: format!("split_link_property '{configured}' is not an ontology property"),
                });
            }
        }

        let consistent: Vec<&OntologyTerm> = ontology
            .properties
            .iter()
            .filter(|term| {
                let domain_ok = term
                    .domain
                    .as_deref()
                    .map_or(true, |domain| is_unconstrained(source_class) || ontology.is_subclass_of(source_class, domain));
                let range_ok = term.range.as_deref().map_or(true, |range| {
                    target_class.map_or(true, |target| is_unconstrained(target) || ontology.is_subclass_of(target, range))
                });
                domain_ok && range_ok
            })
            .collect();

        let candidates = similarity::rank(&relationship.field, &consistent, self.scorer, self.config.top_k)?;
        self.decide(&relationship.field, MatchKind::Property, &candidates).await
    }

    /// Threshold protocol shared by classes and properties
    ///
    /// - exact token match, or a unique best score at or above `high`: accept
    /// - best score in `[low, high)` or tied: ask the arbiter; without one, accept the
    ///   best candidate for review
    /// - best score below `low`: unmatched, unless the arbiter picks a candidate; an
    ///   arbiter that declines here is an ambiguity error
    pub async fn decide(&self, name: &str, kind: MatchKind, candidates: &[Candidate]) -> Result<Decision> {
        let thresholds = &self.config.similarity_thresholds;
        let Some(best) = candidates.first() else {
            return Ok(Decision::Unmatched {
                note: format!("no {kind} candidates"),
            });
        };
        let tied = candidates.get(1).is_some_and(|c| c.ties_with(best));

        if !tied && (best.exact || best.score >= thresholds.high) {
            debug!(name, %kind, iri = %best.iri, score = best.score, "Accepted directly");
            return Ok(Decision::Accept {
                iri: best.iri.clone(),
                confidence: best.score,
                review_note: None,
            });
        }

        let above_low = best.score >= thresholds.low;
        let verdict = match self.arbiter {
            Some(arbiter) => Some(arbiter.arbitrate(name, kind, candidates).await?),
            None => None,
        };

        let decision = match (verdict, above_low) {
            (Some(ArbiterVerdict::Pick { iri, confidence }), _) => Decision::Accept {
                iri,
                confidence,
                review_note: None,
            },
            (Some(ArbiterVerdict::NoMatch), _) => Decision::Unmatched {
                note: format!("arbiter rejected every candidate for '{name}'"),
            },
            (Some(ArbiterVerdict::Declined), true) => Decision::Accept {
                iri: best.iri.clone(),
                confidence: best.score,
                review_note: Some(format!(
                    "arbiter declined; kept best candidate <{}> (score {:.3})",
                    best.iri, best.score
                )),
            },
            (Some(ArbiterVerdict::Declined), false) => {
                return Err(Error::ambiguous(
                    name,
                    format!(
                        "arbiter declined and no {kind} candidate scores above {:.2} (best <{}> at {:.3})",
                        thresholds.low, best.iri, best.score
                    ),
                ));
            }
            (None, true) => Decision::Accept {
                iri: best.iri.clone(),
                confidence: best.score,
                review_note: Some(format!(
                    "accepted without arbitration: <{}> (score {:.3}{})",
                    best.iri,
                    best.score,
                    if tied { ", tied" } else { "" }
                )),
            },
            (None, false) => Decision::Unmatched {
                note: format!(
                    "no candidate scores above {:.2} (best <{}> at {:.3})",
                    thresholds.low, best.iri, best.score
                ),
            },
        };

        debug!(name, %kind, ?decision, "Escalated match decided");
        Ok(decision)
    }
}

/// Discover with edit-distance scoring and no arbiter
pub async fn discover(
    entities: &[Value],
    ontology: &OntologyBundle,
    config: &PlatformConfig,
) -> Result<NodeRelationshipReport> {
    RelationshipFinder::new(config, &StringScorer)
        .discover(entities, ontology)
        .await
}

fn is_unconstrained(class: &str) -> bool {
    class == vocab::owl::THING.as_str()
}

fn is_http_url(text: &str) -> bool {
    text.starts_with("http://") || text.starts_with("https://")
}

/// `(reference path, referenced id, is split link)` of a field value
fn referenced_id(field: &str, value: &Value) -> Option<(String, String, bool)> {
    match value {
        Value::String(id) if !id.is_empty() => Some((field.to_string(), id.clone(), false)),
        Value::Object(map) => wrapped_id(map).map(|(wrapper, id)| {
            (format!("{field}.{wrapper}"), id, wrapper == REF_KEY)
        }),
        _ => None,
    }
}

fn wrapped_id(map: &Map<String, Value>) -> Option<(&'static str, String)> {
    REFERENCE_WRAPPERS
        .iter()
        .find_map(|wrapper| map.get(*wrapper).and_then(id_string).map(|id| (*wrapper, id)))
}

/// Property by key, full IRI or CURIE
fn lookup_property<'o>(ontology: &'o OntologyBundle, name: &str) -> Option<&'o OntologyTerm> {
    ontology
        .properties
        .get(name)
        .or_else(|| ontology.properties.get(&name.to_lowercase()))
        .or_else(|| ontology.properties.by_iri(name))
        .or_else(|| {
            ontology
                .prefixes
                .expand(name)
                .and_then(|iri| ontology.properties.by_iri(&iri))
        })
}

/// `Room` -> `room`, suffixed on collision
fn assign_map_ids(types: &[String]) -> HashMap<String, String> {
    let mut used = HashSet::new();
    let mut ids = HashMap::new();
    for resource_type in types {
        let base = match slugify(resource_type).to_lowercase() {
            slug if slug.is_empty() => "map".to_string(),
            slug => slug,
        };
        let mut id = base.clone();
        let mut n = 2;
        while !used.insert(id.clone()) {
            id = format!("{base}_{n}");
            n += 1;
        }
        ids.insert(resource_type.clone(), id);
    }
    ids
}
