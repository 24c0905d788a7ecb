//! iotkg - IoT platform exports to ontology-aligned knowledge graphs
//!
//! Converts the JSON entity exports of IoT platforms (FIWARE Orion, openHAB, ...) into an
//! RDF knowledge graph typed against a building ontology such as Brick, then annotates
//! every data point with the HTTP request that reads or writes it.
//!
//! # Architecture
//!
//! The library is organized by pipeline stage:
//!
//! - [`preprocess`] - Stable identifiers and pattern-based splitting of compound entities
//! - [`discovery`] - Class and property matching, the node relationship report
//! - [`rml`] - RML mapping emission and the built-in materializer
//! - [`generator`] - Mapping execution, IRI canonicalization, Turtle output
//! - [`api`] - HTTP annotation from Swagger / OpenAPI descriptions
//! - [`synth`] - OpenAPI synthesis for FIWARE brokers
//! - [`pipeline`] - All stages in sequence
//!
//! Supporting modules: [`ontology`], [`rdf`], [`jsonpath`], [`embedding`], [`llm`],
//! [`config`], [`error`], [`utils`].
//!
//! # Example
//!
//! ```no_run
//! use iotkg::config::{PipelineConfig, PlatformConfig};
//! use iotkg::pipeline::{Pipeline, PipelineInputs};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = PlatformConfig::from_file("platform.json".as_ref())?;
//!     let pipeline = Pipeline::new(platform, PipelineConfig::load(None)?);
//!     let inputs = PipelineInputs {
//!         ontologies: vec!["Brick.ttl".into()],
//!         platform_json: "entities.json".into(),
//!         api_spec: Some("swagger.json".into()),
//!         output_dir: "out".into(),
//!         ..Default::default()
//!     };
//!     pipeline.run(&inputs).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod discovery;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod jsonpath;
pub mod llm;
pub mod ontology;
pub mod pipeline;
pub mod preprocess;
pub mod rdf;
pub mod rml;
pub mod synth;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{ApiPostProcessor, ApiSpec};
    pub use crate::config::{PipelineConfig, PlatformConfig};
    pub use crate::discovery::{NodeRelationshipReport, RelationshipFinder};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::generator::RdfGenerator;
    pub use crate::ontology::OntologyBundle;
    pub use crate::pipeline::{Pipeline, PipelineInputs};
}

pub use error::{Error, Result};
