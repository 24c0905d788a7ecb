//! End-to-end pipeline
//!
//! Runs every stage on files, each stage reading what the previous one wrote:
//!
//! ```text
//! platform.json ─▶ preprocess ─▶ discover ─▶ render ─▶ generate ─▶ postprocess
//!                  preprocessed   node_relationships   mapping   kg.ttl   kg_http.ttl
//!                  .json          .json                .ttl
//! ```
//!
//! Cancellation is cooperative: the flag returned by [`Pipeline::cancel_flag`] is checked
//! between stages and a set flag stops the run with [`Error::Cancelled`]. A stage that
//! has started always finishes (or fails) on its own.
//!
//! Every artifact is written atomically and recorded in `manifest.json` with its SHA-256.
//! An optional hook set with [`Pipeline::on_artifact`] sees each record as it is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::api;
use crate::config::{PipelineConfig, PlatformConfig, SimilarityMode};
use crate::discovery::{LlmArbiter, NodeRelationshipReport, RelationshipFinder, SemanticScorer, SimilarityScorer, StringScorer};
use crate::embedding::SentenceEmbedder;
use crate::error::{Error, Result};
use crate::generator::RdfGenerator;
use crate::llm::LlmClient;
use crate::ontology::OntologyBundle;
use crate::preprocess::preprocess_file;
use crate::rml;
use crate::synth;
use crate::utils::write_atomic;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Preprocess,
    Discover,
    Render,
    Generate,
    Postprocess,
    Synthesize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preprocess => "preprocess",
            Self::Discover => "discover",
            Self::Render => "render",
            Self::Generate => "generate",
            Self::Postprocess => "postprocess",
            Self::Synthesize => "synthesize",
        };
        f.write_str(name)
    }
}

/// Files a run reads
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub ontologies: Vec<PathBuf>,
    pub platform_json: PathBuf,
    pub api_spec: Option<PathBuf>,
    pub http_vocabulary: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Also synthesize an OpenAPI description from the base graph
    pub synthesize: bool,
}

impl PipelineInputs {
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}

/// One file written by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub stage: Stage,
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

/// Summary of a run, saved next to its artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entities: usize,
    pub triples_maps: usize,
    pub review: usize,
    pub triples: usize,
    pub requests: usize,
    pub artifacts: Vec<ArtifactRecord>,
}

impl RunManifest {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            entities: 0,
            triples_maps: 0,
            review: 0,
            triples: 0,
            requests: 0,
            artifacts: Vec::new(),
        }
    }

    fn record(&mut self, stage: Stage, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path).map_err(|e| Error::io("read", path, e))?;
        let hash = Sha256::digest(&bytes);
        self.artifacts.push(ArtifactRecord {
            stage,
            path: path.to_path_buf(),
            sha256: format!("{hash:x}"),
            bytes: bytes.len() as u64,
        });
        Ok(())
    }

    pub fn artifact(&self, stage: Stage) -> Option<&ArtifactRecord> {
        self.artifacts.iter().find(|a| a.stage == stage)
    }
}

/// Called with every artifact record right after the stage that wrote it
pub type ArtifactHook = Box<dyn Fn(&ArtifactRecord) + Send + Sync>;

/// Stage orchestration for one platform export
pub struct Pipeline {
    platform: PlatformConfig,
    config: PipelineConfig,
    cancel: Arc<AtomicBool>,
    on_artifact: Option<ArtifactHook>,
}

impl Pipeline {
    pub fn new(platform: PlatformConfig, config: PipelineConfig) -> Self {
        Self {
            platform,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            on_artifact: None,
        }
    }

    pub fn on_artifact(mut self, hook: impl Fn(&ArtifactRecord) + Send + Sync + 'static) -> Self {
        self.on_artifact = Some(Box::new(hook));
        self
    }

    fn record(&self, manifest: &mut RunManifest, stage: Stage, path: &Path) -> Result<()> {
        manifest.record(stage, path)?;
        if let (Some(hook), Some(record)) = (&self.on_artifact, manifest.artifacts.last()) {
            hook(record);
        }
        Ok(())
    }

    /// Setting the flag stops the run at the next stage boundary
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn checkpoint(&self, stage: Stage) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            info!(%stage, "Cancellation requested, stopping");
            return Err(Error::Cancelled {
                stage: stage.to_string(),
            });
        }
        info!(%stage, "Starting stage");
        Ok(())
    }

    /// Run every stage
    pub async fn run(&self, inputs: &PipelineInputs) -> Result<RunManifest> {
        self.platform.validate()?;
        self.config.synthesizer.validate()?;
        std::fs::create_dir_all(&inputs.output_dir)
            .map_err(|e| Error::io("create directory", &inputs.output_dir, e))?;

        let mut manifest = RunManifest::new();

        self.checkpoint(Stage::Preprocess)?;
        let preprocessed = inputs.artifact("preprocessed.json");
        let entities = preprocess_file(&inputs.platform_json, &preprocessed, &self.platform)?;
        manifest.entities = entities.len();
        self.record(&mut manifest, Stage::Preprocess, &preprocessed)?;

        self.checkpoint(Stage::Discover)?;
        let ontology = OntologyBundle::load(&inputs.ontologies)?;
        let report = self.discover(&entities, &ontology).await?;
        report.validate(&ontology, &entities)?;
        let report_path = inputs.artifact("node_relationships.json");
        report.save(&report_path)?;
        manifest.triples_maps = report.data.len();
        manifest.review = report.review_count();
        self.record(&mut manifest, Stage::Discover, &report_path)?;

        self.checkpoint(Stage::Render)?;
        let mapping_path = inputs.artifact("mapping.ttl");
        write_atomic(&mapping_path, rml::render(&report)?.as_bytes())?;
        self.record(&mut manifest, Stage::Render, &mapping_path)?;

        self.checkpoint(Stage::Generate)?;
        let kg_path = inputs.artifact("kg.ttl");
        let stats = RdfGenerator::from_config(&self.platform, &self.config.engine)
            .generate(&mapping_path, &inputs.platform_json, &kg_path)
            .await?;
        manifest.triples = stats.triples;
        self.record(&mut manifest, Stage::Generate, &kg_path)?;

        if let Some(spec) = &inputs.api_spec {
            self.checkpoint(Stage::Postprocess)?;
            let extended = inputs.artifact("kg_http.ttl");
            let stats = api::postprocess(&kg_path, spec, inputs.http_vocabulary.as_deref(), &extended)?;
            manifest.requests = stats.requests;
            self.record(&mut manifest, Stage::Postprocess, &extended)?;
        }

        if inputs.synthesize {
            self.checkpoint(Stage::Synthesize)?;
            let openapi = inputs.artifact("openapi.json");
            synth::synthesize_file(&kg_path, &openapi, &self.config.synthesizer)?;
            self.record(&mut manifest, Stage::Synthesize, &openapi)?;
        }

        manifest.finished_at = Some(Utc::now());
        write_atomic(
            &inputs.artifact("manifest.json"),
            serde_json::to_string_pretty(&manifest)?.as_bytes(),
        )?;

        info!(
            entities = manifest.entities,
            triples_maps = manifest.triples_maps,
            review = manifest.review,
            triples = manifest.triples,
            requests = manifest.requests,
            output = %inputs.output_dir.display(),
            "Pipeline complete"
        );
        Ok(manifest)
    }

    /// Discovery with the configured scorer and, when enabled, the LLM arbiter
    pub async fn discover(
        &self,
        entities: &[serde_json::Value],
        ontology: &OntologyBundle,
    ) -> Result<NodeRelationshipReport> {
        let embedder;
        let semantic;
        let scorer: &dyn SimilarityScorer = match self.platform.similarity_mode {
            SimilarityMode::String => &StringScorer,
            SimilarityMode::Semantic => {
                embedder = SentenceEmbedder::from_pretrained(self.config.embedding.clone())?;
                semantic = SemanticScorer::new(&embedder);
                &semantic
            }
        };

        let finder = RelationshipFinder::new(&self.platform, scorer);
        if !self.config.llm.enabled {
            return finder.discover(entities, ontology).await;
        }

        let client = LlmClient::with_config(self.config.llm.clone())?;
        let arbiter = LlmArbiter::new(Arc::new(client));
        finder.with_arbiter(&arbiter).discover(entities, ontology).await
    }
}
