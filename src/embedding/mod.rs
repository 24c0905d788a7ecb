//! Sentence embeddings for the `semantic` similarity mode
//!
//! - [`TextEmbedder`] - anything that turns texts into vectors
//! - [`SentenceEmbedder`] - BERT sentence-transformer running on Candle

pub mod sentence;

pub use sentence::SentenceEmbedder;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// HuggingFace model identifier
    pub model_id: String,

    /// Maximum sequence length
    pub max_seq_length: usize,

    /// Use GPU if available
    pub use_gpu: bool,

    /// Batch size for inference
    pub batch_size: usize,

    /// Normalize embeddings (L2)
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            max_seq_length: 128,
            use_gpu: false,
            batch_size: 32,
            normalize: true,
        }
    }
}

/// Text to vector encoder
pub trait TextEmbedder: Send + Sync {
    /// Embed every text; the output has one vector per input, in order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .unwrap_or_default())
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
