//! Sentence embeddings with a BERT model running on Candle
//!
//! Token embeddings are mean-pooled over the attention mask and L2 normalized, which is
//! how sentence-transformers checkpoints are meant to be used.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::path::PathBuf;
use tokenizers::Tokenizer;

use super::{EmbeddingConfig, TextEmbedder};
use crate::error::{Error, Result};

/// BERT sentence embedder
pub struct SentenceEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    config: EmbeddingConfig,
}

fn model_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::other(format!("{context}: {e}"))
}

impl SentenceEmbedder {
    /// Download (or reuse the cached copy of) the configured HuggingFace model
    pub fn from_pretrained(config: EmbeddingConfig) -> Result<Self> {
        let device = if config.use_gpu {
            Device::cuda_if_available(0).unwrap_or(Device::Cpu)
        } else {
            Device::Cpu
        };

        tracing::info!(
            model = %config.model_id,
            device = device_name(&device),
            "Loading embedding model"
        );

        let api = Api::new().map_err(|e| model_error("Failed to create HuggingFace API", e))?;
        let repo = api.repo(Repo::new(config.model_id.clone(), RepoType::Model));

        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| model_error("Failed to download tokenizer", e))?;
        let config_path = repo
            .get("config.json")
            .map_err(|e| model_error("Failed to download model config", e))?;
        let weights_path = repo
            .get("model.safetensors")
            .or_else(|_| repo.get("pytorch_model.bin"))
            .map_err(|e| model_error("Failed to download model weights", e))?;

        Self::from_files(tokenizer_path, config_path, weights_path, config, device)
    }

    /// Create an embedder from local files
    pub fn from_files(
        tokenizer_path: PathBuf,
        config_path: PathBuf,
        weights_path: PathBuf,
        config: EmbeddingConfig,
        device: Device,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| model_error("Failed to load tokenizer", e))?;

        let raw_config = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::io("read", &config_path, e))?;
        let bert_config: BertConfig = serde_json::from_str(&raw_config)?;

        let vb = if weights_path.extension().is_some_and(|e| e == "safetensors") {
            // SAFETY: the weights file is not modified while mapped
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                    .map_err(|e| model_error("Failed to load safetensors", e))?
            }
        } else {
            VarBuilder::from_pth(&weights_path, DType::F32, &device)
                .map_err(|e| model_error("Failed to load PyTorch weights", e))?
        };

        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| model_error("Failed to build BERT model", e))?;

        Ok(Self {
            model,
            tokenizer,
            device,
            config,
        })
    }

    pub fn device_name(&self) -> &'static str {
        device_name(&self.device)
    }

    fn embed_chunk(&self, texts: &[String]) -> candle_core::Result<Vec<Vec<f32>>> {
        let encodings = texts
            .iter()
            .map(|text| {
                self.tokenizer
                    .encode(text.as_str(), true)
                    .map_err(|e| candle_core::Error::Msg(format!("Tokenization failed: {e}")))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.config.max_seq_length);
        let batch_size = encodings.len();

        let mut input_ids = Vec::with_capacity(batch_size * max_len);
        let mut attention_mask = Vec::with_capacity(batch_size * max_len);
        let mut token_type_ids = Vec::with_capacity(batch_size * max_len);

        for encoding in &encodings {
            let seq_len = encoding.get_ids().len().min(max_len);
            let padding = max_len - seq_len;

            input_ids.extend(encoding.get_ids().iter().take(seq_len).map(|&x| i64::from(x)));
            attention_mask.extend(
                encoding
                    .get_attention_mask()
                    .iter()
                    .take(seq_len)
                    .map(|&x| i64::from(x)),
            );
            token_type_ids.extend(encoding.get_type_ids().iter().take(seq_len).map(|&x| i64::from(x)));

            input_ids.extend(std::iter::repeat(0i64).take(padding));
            attention_mask.extend(std::iter::repeat(0i64).take(padding));
            token_type_ids.extend(std::iter::repeat(0i64).take(padding));
        }

        let input_ids = Tensor::from_vec(input_ids, (batch_size, max_len), &self.device)?;
        let attention_mask = Tensor::from_vec(attention_mask, (batch_size, max_len), &self.device)?;
        let token_type_ids = Tensor::from_vec(token_type_ids, (batch_size, max_len), &self.device)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean pooling over the non-padding tokens
        let mask = attention_mask.unsqueeze(2)?.to_dtype(DType::F32)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let lengths = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let pooled = summed.broadcast_div(&lengths)?;

        let pooled = if self.config.normalize {
            let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
            pooled.broadcast_div(&norms)?
        } else {
            pooled
        };

        pooled.to_vec2::<f32>()
    }
}

impl TextEmbedder for SentenceEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let embedded = self
                .embed_chunk(chunk)
                .map_err(|e| model_error("Embedding inference failed", e))?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
