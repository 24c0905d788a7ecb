use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iotkg::config::{PipelineConfig, PlatformConfig};
use iotkg::discovery::NodeRelationshipReport;
use iotkg::ontology::OntologyBundle;
use iotkg::pipeline::{Pipeline, PipelineInputs};

#[derive(Parser)]
#[command(
    name = "iotkg",
    version,
    about = "IoT platform JSON to ontology-aligned RDF knowledge graphs with HTTP access metadata",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Platform configuration (JSON)
    #[arg(short, long, global = true)]
    platform: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a platform export and split compound entities
    Preprocess {
        /// Platform JSON export
        input: PathBuf,

        /// Preprocessed entity list
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Match entity types and relationships against ontologies
    Discover {
        /// Platform JSON export (raw or preprocessed)
        input: PathBuf,

        /// Ontology documents (Turtle)
        #[arg(long = "ontology", required = true)]
        ontologies: Vec<PathBuf>,

        /// Node relationship report
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Render a node relationship report as an RML mapping
    Render {
        /// Node relationship report
        report: PathBuf,

        /// Validate the report against these ontologies first
        #[arg(long = "ontology", requires = "entities")]
        ontologies: Vec<PathBuf>,

        /// Platform export the iterators are checked against
        #[arg(long)]
        entities: Option<PathBuf>,

        /// RML mapping (Turtle)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Materialize an RML mapping over a platform export
    Generate {
        /// RML mapping
        #[arg(short, long)]
        mapping: PathBuf,

        /// Platform JSON export
        input: PathBuf,

        /// Knowledge graph (Turtle)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Annotate a knowledge graph with HTTP requests from an API description
    Postprocess {
        /// Knowledge graph (Turtle)
        kg: PathBuf,

        /// Swagger 2.0 / OpenAPI 3 description (JSON or YAML)
        #[arg(short, long)]
        spec: PathBuf,

        /// HTTP vocabulary ontology
        #[arg(long)]
        http_ontology: Option<PathBuf>,

        /// Extended knowledge graph (Turtle)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Synthesize an OpenAPI description from the access URIs of a knowledge graph
    Synthesize {
        /// Knowledge graph (Turtle)
        kg: PathBuf,

        /// OpenAPI document (.json, .yaml)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run every stage
    Run {
        /// Platform JSON export
        input: PathBuf,

        /// Ontology documents (Turtle)
        #[arg(long = "ontology", required = true)]
        ontologies: Vec<PathBuf>,

        /// Swagger 2.0 / OpenAPI 3 description
        #[arg(short, long)]
        spec: Option<PathBuf>,

        /// HTTP vocabulary ontology
        #[arg(long)]
        http_ontology: Option<PathBuf>,

        /// Also synthesize an OpenAPI description
        #[arg(long, default_value = "false")]
        synthesize: bool,

        /// Output directory
        #[arg(short, long, default_value = "out")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PipelineConfig::load(cli.config.as_deref())?;
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    let platform = match &cli.platform {
        Some(path) => PlatformConfig::from_file(path)?,
        None => PlatformConfig::default(),
    };

    if let Err(err) = execute(cli.command, platform, config).await {
        tracing::error!(
            category = %err.category(),
            artifact = %err.artifact(),
            "{err}"
        );
        eprintln!("error [{}] in '{}': {err}", err.category(), err.artifact());
        std::process::exit(1);
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("iotkg=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("iotkg={level},warn"))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("iotkg=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn execute(command: Commands, platform: PlatformConfig, config: PipelineConfig) -> iotkg::Result<()> {
    match command {
        Commands::Preprocess { input, output } => {
            tracing::info!(input = %input.display(), output = %output.display(), "Starting preprocess command");
            let entities = iotkg::preprocess::preprocess_file(&input, &output, &platform)?;
            println!("{} entities written to {}", entities.len(), output.display());
        }

        Commands::Discover {
            input,
            ontologies,
            output,
        } => {
            tracing::info!(input = %input.display(), ontologies = ontologies.len(), "Starting discover command");
            let entities = load_entities(&input, &platform)?;
            let ontology = OntologyBundle::load(&ontologies)?;
            let pipeline = Pipeline::new(platform, config);
            let report = pipeline.discover(&entities, &ontology).await?;
            report.save(&output)?;
            println!(
                "{} triples maps ({} flagged for review) written to {}",
                report.data.len(),
                report.review_count(),
                output.display()
            );
        }

        Commands::Render {
            report,
            ontologies,
            entities,
            output,
        } => {
            tracing::info!(report = %report.display(), output = %output.display(), "Starting render command");
            let report = NodeRelationshipReport::load(&report)?;
            if !ontologies.is_empty() {
                let ontology = OntologyBundle::load(&ontologies)?;
                let entities = match &entities {
                    Some(path) => load_entities(path, &platform)?,
                    None => Vec::new(),
                };
                report.validate(&ontology, &entities)?;
            }
            let mapping = iotkg::rml::render(&report)?;
            iotkg::utils::write_atomic(&output, mapping.as_bytes())?;
            println!("{} triples maps written to {}", report.data.len(), output.display());
        }

        Commands::Generate { mapping, input, output } => {
            tracing::info!(mapping = %mapping.display(), engine = %config.engine.kind, "Starting generate command");
            let stats = iotkg::generator::generate(&mapping, &input, &output, &platform, &config.engine).await?;
            println!("{} triples written to {}", stats.triples, output.display());
        }

        Commands::Postprocess {
            kg,
            spec,
            http_ontology,
            output,
        } => {
            tracing::info!(kg = %kg.display(), spec = %spec.display(), "Starting postprocess command");
            let stats = iotkg::api::postprocess(&kg, &spec, http_ontology.as_deref(), &output)?;
            println!(
                "{} of {} access URIs matched, {} requests written to {}",
                stats.matched,
                stats.access_uris,
                stats.requests,
                output.display()
            );
        }

        Commands::Synthesize { kg, output } => {
            tracing::info!(kg = %kg.display(), output = %output.display(), "Starting synthesize command");
            let document = iotkg::synth::synthesize_file(&kg, &output, &config.synthesizer)?;
            let paths = document["paths"].as_object().map_or(0, |p| p.len());
            println!("{paths} paths written to {}", output.display());
        }

        Commands::Run {
            input,
            ontologies,
            spec,
            http_ontology,
            synthesize,
            output_dir,
        } => {
            tracing::info!(input = %input.display(), output_dir = %output_dir.display(), "Starting run command");
            let pipeline = Pipeline::new(platform, config).on_artifact(|record| {
                println!("[{}] {} ({} bytes)", record.stage, record.path.display(), record.bytes);
            });

            let cancel = pipeline.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping after the current stage");
                    cancel.store(true, Ordering::SeqCst);
                }
            });

            let inputs = PipelineInputs {
                ontologies,
                platform_json: input,
                api_spec: spec,
                http_vocabulary: http_ontology,
                output_dir,
                synthesize,
            };
            let manifest = pipeline.run(&inputs).await?;
            println!(
                "{} entities, {} triples maps ({} for review), {} triples, {} requests",
                manifest.entities, manifest.triples_maps, manifest.review, manifest.triples, manifest.requests
            );
        }
    }

    Ok(())
}

/// Read an export and preprocess it in memory
fn load_entities(path: &Path, platform: &PlatformConfig) -> iotkg::Result<Vec<serde_json::Value>> {
    let text = iotkg::utils::read_file(path)?;
    let input: serde_json::Value = serde_json::from_str(&text)?;
    iotkg::preprocess::preprocess(&input, platform)
}
