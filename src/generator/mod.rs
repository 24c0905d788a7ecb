//! RDF generation
//!
//! Runs an RML mapping over a platform export and writes the resulting graph as Turtle:
//!
//! 1. the export is preprocessed into a scoped temporary JSON file
//! 2. a [`MaterializationEngine`] executes the mapping against that file
//! 3. every IRI is canonicalized once (`%3A` back to `:`), since the engine
//!    percent-encodes template values but access URIs are matched with literal colons
//! 4. the graph is written atomically
//!
//! The temporary file is removed when the generator returns, whether it succeeded or not.
//!
//! Two engines are available: the built-in [`NativeEngine`] and [`MorphKgcEngine`], which
//! drives the external `morph-kgc` materializer through a typed [`EngineDescriptor`].

use async_trait::async_trait;
use oxrdf::{Graph, NamedNode, Subject, Term, Triple};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::ontology::PrefixTable;
use crate::preprocess::preprocess;
use crate::rdf::{parse_ntriples, parse_turtle, write_turtle};
use crate::rml::{MappingDocument, MAP_NS};
use crate::utils::{decode_colons, read_file};

/// Which materializer runs the mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineKind {
    #[serde(rename = "native")]
    Native,
    #[default]
    #[serde(rename = "morph-kgc")]
    MorphKgc,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::MorphKgc => write!(f, "morph-kgc"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "morph-kgc" | "morph_kgc" | "morphkgc" => Ok(Self::MorphKgc),
            other => Err(format!("unknown engine '{other}' (expected 'native' or 'morph-kgc')")),
        }
    }
}

/// Materialization engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,

    /// Program started for the external engine
    pub command: String,

    /// Arguments placed before the generated config file
    pub args: Vec<String>,

    /// Kill the external engine after this many seconds; 0 waits indefinitely
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::MorphKgc,
            command: "python3".to_string(),
            args: vec!["-m".to_string(), "morph_kgc".to_string()],
            timeout_secs: 0,
        }
    }
}

impl EngineConfig {
    pub fn native() -> Self {
        Self {
            kind: EngineKind::Native,
            ..Self::default()
        }
    }
}

/// Typed form of the engine's INI configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDescriptor {
    pub mappings: PathBuf,
    pub file_path: PathBuf,
    pub output_file: PathBuf,
}

impl EngineDescriptor {
    /// Serialize as a morph-kgc config file
    pub fn to_ini(&self) -> String {
        format!(
            "[CONFIGURATION]\noutput_file={}\noutput_format=N-TRIPLES\n\n[DataSource1]\nmappings={}\nfile_path={}\n",
            self.output_file.display(),
            self.mappings.display(),
            self.file_path.display()
        )
    }
}

/// Executes an RML mapping against a JSON source file
#[async_trait]
pub trait MaterializationEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn materialize(&self, mapping: &Path, source: &Path) -> Result<Graph>;
}

/// In-process engine
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine;

#[async_trait]
impl MaterializationEngine for NativeEngine {
    fn name(&self) -> &str {
        "native"
    }

    async fn materialize(&self, mapping: &Path, source: &Path) -> Result<Graph> {
        let artifact = mapping.display().to_string();
        let document = MappingDocument::parse(&read_file(mapping)?, &artifact)?;
        let data: serde_json::Value = serde_json::from_str(&read_file(source)?)
            .map_err(|e| Error::materialization(&artifact, format!("source is not JSON: {e}")))?;
        document.materialize(&data)
    }
}

/// External `morph-kgc` process
#[derive(Debug, Clone)]
pub struct MorphKgcEngine {
    config: EngineConfig,
}

impl MorphKgcEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MaterializationEngine for MorphKgcEngine {
    fn name(&self) -> &str {
        "morph-kgc"
    }

    async fn materialize(&self, mapping: &Path, source: &Path) -> Result<Graph> {
        let artifact = mapping.display().to_string();
        let workdir = tempfile::TempDir::new().map_err(|e| Error::io("create temp dir", std::env::temp_dir(), e))?;

        let descriptor = EngineDescriptor {
            mappings: mapping.to_path_buf(),
            file_path: source.to_path_buf(),
            output_file: workdir.path().join("output.nt"),
        };
        let config_path = workdir.path().join("config.ini");
        std::fs::write(&config_path, descriptor.to_ini()).map_err(|e| Error::io("write", &config_path, e))?;

        debug!(command = %self.config.command, config = %config_path.display(), "Starting external engine");

        let mut command = tokio::process::Command::new(&self.config.command);
        command.args(&self.config.args).arg(&config_path).kill_on_drop(true);

        let output = if self.config.timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), command.output())
                .await
                .map_err(|_| {
                    Error::materialization(
                        &artifact,
                        format!("{} did not finish within {}s", self.config.command, self.config.timeout_secs),
                    )
                })?
        } else {
            command.output().await
        }
        .map_err(|e| Error::materialization(&artifact, format!("failed to start '{}': {e}", self.config.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::materialization(
                &artifact,
                format!("{} exited with {}: {}", self.name(), output.status, stderr.trim()),
            ));
        }

        let text = read_file(&descriptor.output_file)
            .map_err(|e| Error::materialization(&artifact, format!("engine produced no output: {e}")))?;
        parse_ntriples(&text, &descriptor.output_file.display().to_string())
            .map_err(|e| Error::materialization(&artifact, format!("engine output is not N-Triples: {e}")))
    }
}

/// Engine for a configuration
pub fn engine_for(config: &EngineConfig) -> Box<dyn MaterializationEngine> {
    match config.kind {
        EngineKind::Native => Box::new(NativeEngine),
        EngineKind::MorphKgc => Box::new(MorphKgcEngine::new(config.clone())),
    }
}

/// Counters of one generation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateStats {
    pub entities: usize,
    pub triples: usize,
}

/// Preprocess, materialize, canonicalize, write
pub struct RdfGenerator<'a> {
    platform: &'a PlatformConfig,
    engine: Box<dyn MaterializationEngine>,
}

impl<'a> RdfGenerator<'a> {
    pub fn new(platform: &'a PlatformConfig, engine: Box<dyn MaterializationEngine>) -> Self {
        Self { platform, engine }
    }

    pub fn from_config(platform: &'a PlatformConfig, engine: &EngineConfig) -> Self {
        Self::new(platform, engine_for(engine))
    }

    /// Materialize `mapping` over `source` and write Turtle to `destination`
    pub async fn generate(&self, mapping: &Path, source: &Path, destination: &Path) -> Result<GenerateStats> {
        info!(
            engine = self.engine.name(),
            mapping = %mapping.display(),
            source = %source.display(),
            "Generating RDF"
        );

        let input: serde_json::Value = serde_json::from_str(&read_file(source)?).map_err(|e| {
            Error::with_source(format!("'{}' is not valid JSON", source.display()), e)
        })?;
        let entities = preprocess(&input, self.platform)?;

        let mut staged = tempfile::Builder::new()
            .prefix("iotkg-preprocessed-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| Error::io("create temp file", std::env::temp_dir(), e))?;
        let staged_path = staged.path().to_path_buf();
        let payload = serde_json::to_vec(&entities)?;
        staged
            .write_all(&payload)
            .and_then(|()| staged.flush())
            .map_err(|e| Error::io("write", &staged_path, e))?;

        let graph = self.engine.materialize(mapping, staged.path()).await?;
        let graph = canonicalize_iris(&graph);

        let prefixes = output_prefixes(mapping)?;
        write_turtle(destination, &graph, &prefixes)?;

        let stats = GenerateStats {
            entities: entities.len(),
            triples: graph.len(),
        };
        info!(
            entities = stats.entities,
            triples = stats.triples,
            output = %destination.display(),
            "RDF generation complete"
        );
        Ok(stats)
    }
}

/// Run `mapping` over `source` with the configured engine
pub async fn generate(
    mapping: &Path,
    source: &Path,
    destination: &Path,
    platform: &PlatformConfig,
    engine: &EngineConfig,
) -> Result<GenerateStats> {
    RdfGenerator::from_config(platform, engine)
        .generate(mapping, source, destination)
        .await
}

/// Copy of `graph` with percent-encoded colons decoded in every IRI
pub fn canonicalize_iris(graph: &Graph) -> Graph {
    let mut canonical = Graph::new();
    for triple in graph.iter() {
        let triple = triple.into_owned();
        let subject = match triple.subject {
            Subject::NamedNode(n) => Subject::NamedNode(decode_node(n)),
            other => other,
        };
        let object = match triple.object {
            Term::NamedNode(n) => Term::NamedNode(decode_node(n)),
            other => other,
        };
        canonical.insert(&Triple::new(subject, decode_node(triple.predicate), object));
    }
    canonical
}

fn decode_node(node: NamedNode) -> NamedNode {
    let decoded = decode_colons(node.as_str());
    if decoded == node.as_str() {
        return node;
    }
    NamedNode::new(decoded).unwrap_or(node)
}

/// Mapping prefixes without the mapping vocabularies
fn output_prefixes(mapping: &Path) -> Result<PrefixTable> {
    let (_, prefixes) = parse_turtle(&read_file(mapping)?, &mapping.display().to_string())?;
    let hidden = [crate::rdf::vocab::rr::NS, crate::rdf::vocab::rml::NS, crate::rdf::vocab::ql::NS, MAP_NS];
    Ok(prefixes
        .iter()
        .filter(|(_, namespace)| !hidden.contains(namespace))
        .collect())
}
