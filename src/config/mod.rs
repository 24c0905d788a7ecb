//! Configuration management
//!
//! Two configuration documents drive a run:
//!
//! - [`PlatformConfig`] (JSON) describes the IoT platform export: identifier and type keys,
//!   splitting patterns, similarity mode and thresholds.
//! - [`PipelineConfig`] (TOML, overridable through `IOTKG_*` environment variables)
//!   configures the collaborators: LLM endpoint, embedding model, RML engine, synthesizer
//!   defaults and logging.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::embedding::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::generator::{EngineConfig, EngineKind};
use crate::jsonpath::JsonPath;
use crate::llm::LlmConfig;
use crate::synth::SynthesizerConfig;
use crate::utils::read_file;

/// How ontology candidates are ranked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMode {
    /// Edit distance over normalized tokens
    #[default]
    String,
    /// Cosine similarity of sentence embeddings
    Semantic,
}

/// Acceptance thresholds, `0 <= low <= high <= 1`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityThresholds {
    pub low: f32,
    pub high: f32,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            low: 0.5,
            high: 0.85,
        }
    }
}

/// Type name given to entities split out of a parent along a JSONPath pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitTypeNaming {
    /// The matched key as is (`fanSpeed`)
    #[default]
    Leaf,
    /// The matched key with an upper-case first letter (`FanSpeed`)
    PascalLeaf,
    /// Parent type and key (`FreshAirVentilation_fanSpeed`)
    ParentQualified,
}

impl SplitTypeNaming {
    /// Derive the child type from the parent's type and the matched key
    pub fn derive(self, parent_type: Option<&str>, leaf: &str) -> String {
        match self {
            Self::Leaf => leaf.to_string(),
            Self::PascalLeaf => {
                let mut chars = leaf.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
            Self::ParentQualified => match parent_type {
                Some(parent) if !parent.is_empty() => format!("{parent}_{leaf}"),
                _ => leaf.to_string(),
            },
        }
    }
}

/// Shape of a platform's JSON export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Key holding each entity's unique identifier
    pub unique_identifier_key: String,

    /// Keys holding the entity type, in priority order
    pub entity_type_keys: Vec<String>,

    /// JSONPath patterns whose matches become synthetic child entities
    pub patterns_splitting: Vec<String>,

    pub similarity_mode: SimilarityMode,

    pub similarity_thresholds: SimilarityThresholds,

    /// Type naming of split children
    pub split_type_naming: SplitTypeNaming,

    /// Key of the child's link back to its parent
    pub parent_link_key: String,

    /// Key under which the split subtree is stored in the child
    pub split_payload_key: String,

    /// Access URI of split children, placeholders `{entity_id}` and `{attribute}`
    pub access_uri_template: Option<String>,

    /// Ontology property linking a parent to its split children
    pub split_link_property: Option<String>,

    /// Namespace of generated subject IRIs
    pub base_iri: String,

    /// Candidates kept per resource when ranking
    pub top_k: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            unique_identifier_key: "id".to_string(),
            entity_type_keys: vec!["type".to_string()],
            patterns_splitting: Vec::new(),
            similarity_mode: SimilarityMode::String,
            similarity_thresholds: SimilarityThresholds::default(),
            split_type_naming: SplitTypeNaming::Leaf,
            parent_link_key: "parent".to_string(),
            split_payload_key: "payload".to_string(),
            access_uri_template: None,
            split_link_property: None,
            base_iri: "http://example.org/resource/".to_string(),
            top_k: 5,
        }
    }
}

impl PlatformConfig {
    /// Load and validate a platform config JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = read_file(path)?;
        let artifact = path.display().to_string();

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::config(&artifact, format!("not a valid platform config: {e}")))?;
        config.validate_as(&artifact)?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.validate_as("platform config")
    }

    fn validate_as(&self, artifact: &str) -> Result<()> {
        let SimilarityThresholds { low, high } = self.similarity_thresholds;
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
            return Err(Error::config(
                artifact,
                format!("similarity_thresholds must satisfy 0 <= low <= high <= 1 (low = {low}, high = {high})"),
            ));
        }

        if self.unique_identifier_key.trim().is_empty() {
            return Err(Error::config(artifact, "unique_identifier_key must not be empty"));
        }

        if self.entity_type_keys.is_empty()
            || self.entity_type_keys.iter().any(|k| k.trim().is_empty())
        {
            return Err(Error::config(
                artifact,
                "entity_type_keys must list at least one non-empty key",
            ));
        }

        if self.top_k == 0 {
            return Err(Error::config(artifact, "top_k must be greater than 0"));
        }

        if url::Url::parse(&self.base_iri).is_err() {
            return Err(Error::config(
                artifact,
                format!("base_iri '{}' is not an absolute IRI", self.base_iri),
            ));
        }

        self.splitting_patterns_as(artifact)?;
        Ok(())
    }

    /// Parsed `patterns_splitting`
    pub fn splitting_patterns(&self) -> Result<Vec<JsonPath>> {
        self.splitting_patterns_as("platform config")
    }

    fn splitting_patterns_as(&self, artifact: &str) -> Result<Vec<JsonPath>> {
        self.patterns_splitting
            .iter()
            .map(|pattern| {
                let path = JsonPath::parse(pattern)
                    .map_err(|e| Error::config(artifact, format!("patterns_splitting: {e}")))?;
                if path.leaf_name().is_none() {
                    return Err(Error::config(
                        artifact,
                        format!("patterns_splitting: '{pattern}' must end in a member name"),
                    ));
                }
                Ok(path)
            })
            .collect()
    }

    /// Value of the first type key present on `entity`
    pub fn entity_type<'a>(&self, entity: &'a serde_json::Value) -> Option<&'a str> {
        self.typed_by(entity).map(|(_, t)| t)
    }

    /// `(type key, type value)` of the first type key present on `entity`
    pub fn typed_by<'s, 'a>(&'s self, entity: &'a serde_json::Value) -> Option<(&'s str, &'a str)> {
        self.entity_type_keys.iter().find_map(|key| {
            entity
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(|t| (key.as_str(), t))
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Collaborator configuration for a pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub engine: EngineConfig,
    pub synthesizer: SynthesizerConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = read_file(path)?;

        toml::from_str(&content).map_err(|e| {
            Error::config(path.display().to_string(), format!("failed to parse TOML: {e}"))
        })
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("IOTKG_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("IOTKG_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(enabled) = std::env::var("IOTKG_LLM_ENABLED")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            self.llm.enabled = enabled;
        }
        if let Some(timeout) = std::env::var("IOTKG_LLM_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.llm.timeout_secs = timeout;
        }
        if let Ok(engine) = std::env::var("IOTKG_ENGINE") {
            self.engine.kind = engine
                .parse::<EngineKind>()
                .map_err(|reason| Error::config("IOTKG_ENGINE", reason))?;
        }
        if let Ok(model) = std::env::var("IOTKG_EMBEDDING_MODEL") {
            self.embedding.model_id = model;
        }
        if let Ok(level) = std::env::var("IOTKG_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("IOTKG_LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.llm.max_attempts == 0 {
            return Err(Error::config("[llm]", "max_attempts must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::config("[llm]", "temperature must be within 0.0..=2.0"));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::config("[embedding]", "batch_size must be greater than 0"));
        }
        if self.engine.kind == EngineKind::MorphKgc && self.engine.command.trim().is_empty() {
            return Err(Error::config("[engine]", "command must be set for morph-kgc"));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::config(
                "[logging]",
                format!("unknown log format '{}'", self.logging.format),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
