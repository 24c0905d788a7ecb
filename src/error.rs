//! Unified error handling for the iotkg crate
//!
//! Every fatal condition of the mapping pipeline is one variant of [`Error`]. Each variant
//! carries the offending input artifact (a file path or a resource name) and its `Display`
//! output names the contract that was violated, so the CLI can print both.
//!
//! # Architecture
//!
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum
//! - [`LlmError`] - Transport errors of the LLM arbiter, converted into
//!   [`Error::LlmUnavailable`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use iotkg::error::{Error, ErrorCategory};
//!
//! fn report(err: &Error) {
//!     if err.is_recoverable() {
//!         eprintln!("transient: {err}");
//!     } else {
//!         eprintln!("fatal [{}] in {}: {err}", err.category(), err.artifact());
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use crate::llm::LlmError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Ontology documents, JSON exports and API descriptions that cannot be used
    Input,
    /// Configuration and validation errors
    Config,
    /// Ontology alignment could not be decided
    Mapping,
    /// RDF materialization failures
    Materialization,
    /// LLM and AI processing errors
    Llm,
    /// Storage and I/O errors
    Storage,
    /// Other/unknown errors
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Input => "input",
            Self::Config => "config",
            Self::Mapping => "mapping",
            Self::Materialization => "materialization",
            Self::Llm => "llm",
            Self::Storage => "storage",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Unified error type for the iotkg crate
#[derive(Error, Debug)]
pub enum Error {
    /// An ontology source could not be parsed
    #[error("ontology '{}' is not valid Turtle: {reason}", path.display())]
    OntologyParse { path: PathBuf, reason: String },

    /// A graph document (knowledge graph, mapping) is not valid RDF
    #[error("'{artifact}' is not a valid RDF document: {reason}")]
    RdfSyntax { artifact: String, reason: String },

    /// Platform or pipeline configuration is invalid
    #[error("invalid configuration in '{artifact}': {reason}")]
    Config { artifact: String, reason: String },

    /// The arbiter declined and no candidate reached the lower threshold
    #[error("cannot map '{resource}' to the ontology: {reason}")]
    AmbiguousMapping { resource: String, reason: String },

    /// The RML engine failed or produced unusable output
    #[error("materialization of '{artifact}' failed: {message}")]
    Materialization { artifact: String, message: String },

    /// The OpenAPI / Swagger document is not usable
    #[error("API description '{artifact}' is invalid: {reason}")]
    SpecValidation { artifact: String, reason: String },

    /// The API description declares no operations
    #[error("API description '{artifact}' declares no operations under 'paths'")]
    NoOperations { artifact: String },

    /// The LLM arbiter could not be reached or kept rejecting requests
    #[error("LLM arbiter unavailable: {0}")]
    LlmUnavailable(#[from] LlmError),

    /// A cancellation request stopped the pipeline at a stage boundary
    #[error("pipeline cancelled before stage '{stage}'")]
    Cancelled { stage: String },

    /// File I/O error
    #[error("I/O error during {operation} on '{}': {source}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create an ontology parse error
    pub fn ontology_parse(path: impl AsRef<Path>, reason: impl fmt::Display) -> Self {
        Self::OntologyParse {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Create an RDF syntax error
    pub fn rdf_syntax(artifact: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::RdfSyntax {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Create an ambiguous mapping error
    pub fn ambiguous(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AmbiguousMapping {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a materialization error
    pub fn materialization(artifact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Materialization {
            artifact: artifact.into(),
            message: message.into(),
        }
    }

    /// Create an API description validation error
    pub fn spec_validation(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpecValidation {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Create an I/O error bound to the file it happened on
    pub fn io(operation: impl Into<String>, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::LlmUnavailable(e) => e.is_recoverable(),
            Self::Io { .. } => true,
            _ => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::OntologyParse { .. }
            | Self::RdfSyntax { .. }
            | Self::SpecValidation { .. }
            | Self::NoOperations { .. }
            | Self::Json(_)
            | Self::Yaml(_) => ErrorCategory::Input,
            Self::Config { .. } => ErrorCategory::Config,
            Self::AmbiguousMapping { .. } => ErrorCategory::Mapping,
            Self::Materialization { .. } => ErrorCategory::Materialization,
            Self::LlmUnavailable(_) => ErrorCategory::Llm,
            Self::Io { .. } => ErrorCategory::Storage,
            Self::Cancelled { .. } | Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// The input artifact the error is about
    pub fn artifact(&self) -> String {
        match self {
            Self::OntologyParse { path, .. } | Self::Io { path, .. } => {
                path.display().to_string()
            }
            Self::Config { artifact, .. }
            | Self::RdfSyntax { artifact, .. }
            | Self::Materialization { artifact, .. }
            | Self::SpecValidation { artifact, .. }
            | Self::NoOperations { artifact } => artifact.clone(),
            Self::AmbiguousMapping { resource, .. } => resource.clone(),
            Self::Cancelled { stage } => stage.clone(),
            Self::LlmUnavailable(_) => "llm endpoint".to_string(),
            Self::Json(_) | Self::Yaml(_) | Self::Other { .. } => "-".to_string(),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
