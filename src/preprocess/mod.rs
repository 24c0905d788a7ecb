//! Platform JSON normalization
//!
//! A platform export is turned into a flat, ordered list of entity objects:
//!
//! 1. nested arrays and container objects are flattened into entities
//! 2. every entity gets an identifier at the configured key; missing ones are derived
//!    from a hash of the entity's type and canonical content
//! 3. subtrees matched by a `patterns_splitting` JSONPath are moved into synthetic child
//!    entities and replaced by `{"ref": <child id>}`
//!
//! The JSON tree is never mutated in place: splitting rebuilds each entity from its
//! replacements and returns the children separately. Running the preprocessor on its
//! own output is a no-op.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::jsonpath::{JsonPath, Location, PathStep};
use crate::utils::{read_file, write_atomic};

/// Key of the reference object left where a subtree was split off
pub const REF_KEY: &str = "ref";

/// Key of a split child holding the attribute name it was split from
pub const ATTRIBUTE_KEY: &str = "attribute";

/// Key of a split child holding its access URI
pub const ACCESS_URI_KEY: &str = "access_uri";

/// Counters of one preprocessing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessStats {
    pub entities: usize,
    pub synthesized_ids: usize,
    pub split_children: usize,
}

/// JSON normalizer bound to a platform configuration
pub struct Preprocessor<'a> {
    config: &'a PlatformConfig,
    patterns: Vec<JsonPath>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(config: &'a PlatformConfig) -> Result<Self> {
        Ok(Self {
            config,
            patterns: config.splitting_patterns()?,
        })
    }

    /// Normalize `input` into an ordered entity list
    pub fn run(&self, input: &Value) -> (Vec<Value>, PreprocessStats) {
        let mut stats = PreprocessStats::default();
        let id_key = &self.config.unique_identifier_key;

        let flattened = self.flatten(input);

        let mut ids = IdAllocator::default();
        for entity in &flattened {
            if let Some(id) = entity.get(id_key).and_then(id_string) {
                ids.reserve(id);
            }
        }

        let mut entities: Vec<Value> = flattened
            .into_iter()
            .map(|entity| {
                if entity.get(id_key).and_then(id_string).is_some() {
                    return Value::Object(entity);
                }
                stats.synthesized_ids += 1;
                let id = ids.allocate(&self.synthesize_id(&entity));
                Value::Object(with_leading_key(entity, id_key, Value::String(id)))
            })
            .collect();

        let mut children = Vec::new();
        for pattern in &self.patterns {
            let document = Value::Array(entities.clone());
            let per_entity = self.split_locations(pattern, &document);

            entities = entities
                .into_iter()
                .enumerate()
                .map(|(index, entity)| match per_entity.get(&index) {
                    Some(locations) => {
                        let (rebuilt, split) = self.split_entity(&entity, locations, &mut ids);
                        children.extend(split);
                        rebuilt
                    }
                    None => entity,
                })
                .collect();
        }

        stats.split_children = children.len();
        entities.extend(children);
        stats.entities = entities.len();

        (entities, stats)
    }

    fn is_entity_like(&self, map: &Map<String, Value>) -> bool {
        map.contains_key(&self.config.unique_identifier_key)
            || self.config.entity_type_keys.iter().any(|k| map.contains_key(k))
    }

    /// Step 1: ordered entity objects
    fn flatten(&self, input: &Value) -> Vec<Map<String, Value>> {
        let mut out = Vec::new();
        self.flatten_into(input, None, &mut out);
        out
    }

    fn flatten_into(&self, value: &Value, key_hint: Option<&str>, out: &mut Vec<Map<String, Value>>) {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.flatten_into(item, None, out);
                }
            }
            Value::Object(map) if self.is_entity_like(map) => {
                let id_key = &self.config.unique_identifier_key;
                match key_hint {
                    Some(key) if !map.contains_key(id_key) => {
                        out.push(with_leading_key(map.clone(), id_key, Value::String(key.to_string())));
                    }
                    _ => out.push(map.clone()),
                }
            }
            Value::Object(map) if !map.is_empty() && map.values().all(|v| v.is_array() || v.is_object()) => {
                // Container keyed by name or id
                for (key, child) in map {
                    self.flatten_into(child, Some(key), out);
                }
            }
            Value::Object(map) => out.push(map.clone()),
            other => {
                warn!(value = %other, "Skipping primitive value outside of any entity");
            }
        }
    }

    /// Step 2: `{type}_{hash}` identifier for an entity without one
    fn synthesize_id(&self, entity: &Map<String, Value>) -> String {
        let type_name = self
            .config
            .entity_type(&Value::Object(entity.clone()))
            .unwrap_or("entity")
            .to_string();

        let mut hasher = Sha256::new();
        hasher.update(type_name.as_bytes());
        hasher.update(canonical_json(&Value::Object(entity.clone())).as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        format!("{}_{}", type_name, &digest[..12])
    }

    /// Step 3: outermost split locations per entity index
    fn split_locations(&self, pattern: &JsonPath, document: &Value) -> BTreeMap<usize, Vec<Location>> {
        let mut selected: BTreeSet<Location> = BTreeSet::new();

        for found in pattern.find(document) {
            let Some(PathStep::Index(index)) = found.location.first() else {
                continue;
            };
            if found.location.len() < 2 || is_reference(found.value) {
                continue;
            }
            if document
                .get(*index)
                .and_then(Value::as_object)
                .is_some_and(|entity| self.is_split_child(entity))
            {
                continue;
            }
            selected.insert(found.location);
        }

        // Keep outermost matches only; sorted order puts prefixes first
        let mut kept: Vec<Location> = Vec::new();
        for location in selected {
            if !kept.iter().any(|k| location.starts_with(k)) {
                kept.push(location);
            }
        }

        let mut per_entity: BTreeMap<usize, Vec<Location>> = BTreeMap::new();
        for location in kept {
            if let Some(PathStep::Index(index)) = location.first() {
                per_entity.entry(*index).or_default().push(location[1..].to_vec());
            }
        }
        per_entity
    }

    fn is_split_child(&self, entity: &Map<String, Value>) -> bool {
        entity.contains_key(&self.config.parent_link_key)
            && entity.contains_key(ATTRIBUTE_KEY)
            && entity.contains_key(&self.config.split_payload_key)
    }

    /// Rebuild `entity` with each location replaced by a reference; returns the children
    fn split_entity(&self, entity: &Value, locations: &[Location], ids: &mut IdAllocator) -> (Value, Vec<Value>) {
        let parent_id = entity
            .get(&self.config.unique_identifier_key)
            .and_then(id_string)
            .unwrap_or_default();
        let parent_type = self.config.entity_type(entity);
        let type_key = self
            .config
            .entity_type_keys
            .first()
            .cloned()
            .unwrap_or_else(|| "type".to_string());

        let mut replacements = BTreeMap::new();
        let mut children = Vec::with_capacity(locations.len());

        for location in locations {
            let Some(subtree) = value_at(entity, location) else {
                continue;
            };
            let attribute = location
                .iter()
                .rev()
                .find_map(|step| match step {
                    PathStep::Key(key) => Some(key.clone()),
                    PathStep::Index(_) => None,
                })
                .unwrap_or_else(|| "item".to_string());

            let child_id = ids.allocate(&format!("{parent_id}_{attribute}"));
            let child_type = self.config.split_type_naming.derive(parent_type, &attribute);

            let mut child = Map::new();
            child.insert(
                self.config.unique_identifier_key.clone(),
                Value::String(child_id.clone()),
            );
            child.insert(type_key.clone(), Value::String(child_type));
            child.insert(self.config.parent_link_key.clone(), Value::String(parent_id.clone()));
            child.insert(ATTRIBUTE_KEY.to_string(), Value::String(attribute.clone()));
            if let Some(template) = &self.config.access_uri_template {
                let uri = template
                    .replace("{entity_id}", &parent_id)
                    .replace("{attribute}", &attribute);
                child.insert(ACCESS_URI_KEY.to_string(), Value::String(uri));
            }
            child.insert(self.config.split_payload_key.clone(), subtree.clone());

            debug!(parent = %parent_id, child = %child_id, "Split subtree into child entity");

            let mut reference = Map::new();
            reference.insert(REF_KEY.to_string(), Value::String(child_id));
            replacements.insert(location.clone(), Value::Object(reference));
            children.push(Value::Object(child));
        }

        (rebuild(entity, &mut Vec::new(), &replacements), children)
    }
}

/// Normalize a platform export with `config`
pub fn preprocess(input: &Value, config: &PlatformConfig) -> Result<Vec<Value>> {
    let preprocessor = Preprocessor::new(config)?;
    let (entities, stats) = preprocessor.run(input);

    info!(
        entities = stats.entities,
        synthesized_ids = stats.synthesized_ids,
        split_children = stats.split_children,
        "Preprocessing complete"
    );

    Ok(entities)
}

/// Read a JSON export, normalize it and write the entity list to `destination`
pub fn preprocess_file(source: &Path, destination: &Path, config: &PlatformConfig) -> Result<Vec<Value>> {
    let text = read_file(source)?;
    let input: Value = serde_json::from_str(&text).map_err(|e| {
        Error::with_source(format!("'{}' is not valid JSON", source.display()), e)
    })?;

    let entities = preprocess(&input, config)?;
    let serialized = serde_json::to_vec_pretty(&entities)?;
    write_atomic(destination, &serialized)?;

    Ok(entities)
}

/// String form of an identifier value
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `{"ref": "..."}` left behind by splitting
pub fn is_reference(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.len() == 1 && m.get(REF_KEY).is_some_and(Value::is_string))
}

/// Unique identifiers, suffixing `_2`, `_3`, ... on collision
#[derive(Debug, Default)]
struct IdAllocator {
    used: HashSet<String>,
}

impl IdAllocator {
    fn reserve(&mut self, id: String) {
        self.used.insert(id);
    }

    fn allocate(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn with_leading_key(map: Map<String, Value>, key: &str, value: Value) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len() + 1);
    out.insert(key.to_string(), value);
    for (k, v) in map {
        if k != key {
            out.insert(k, v);
        }
    }
    out
}

/// JSON with object keys sorted, used for hashing
fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), sorted(v))).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

fn value_at<'v>(value: &'v Value, location: &[PathStep]) -> Option<&'v Value> {
    location.iter().try_fold(value, |node, step| match step {
        PathStep::Key(key) => node.get(key.as_str()),
        PathStep::Index(i) => node.get(*i),
    })
}

/// Copy `value`, substituting the subtrees at the locations in `replacements`
fn rebuild(value: &Value, path: &mut Location, replacements: &BTreeMap<Location, Value>) -> Value {
    if let Some(replacement) = replacements.get(path.as_slice()) {
        return replacement.clone();
    }
    if !replacements.keys().any(|loc| loc.starts_with(path.as_slice())) {
        return value.clone();
    }

    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                path.push(PathStep::Key(key.clone()));
                out.insert(key.clone(), rebuild(child, path, replacements));
                path.pop();
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, child) in items.iter().enumerate() {
                path.push(PathStep::Index(i));
                out.push(rebuild(child, path, replacements));
                path.pop();
            }
            Value::Array(out)
        }
        other => other.clone(),
    }
}
