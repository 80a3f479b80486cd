//! Local BERT sentence embeddings via candle.

use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;

pub const DEFAULT_CANDLE_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Longest input in tokens; MiniLM was trained with 256-token sequences.
const MAX_SEQ_LEN: usize = 256;

#[derive(Clone)]
pub struct CandleEmbedder {
    model: Arc<BertModel>,
    tokenizer: Arc<Tokenizer>,
    device: Device,
    repo_id: String,
}

impl std::fmt::Debug for CandleEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleEmbedder")
            .field("repo_id", &self.repo_id)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// Pick the best available device for the compiled feature set.
#[must_use]
pub fn default_device() -> Device {
    #[cfg(feature = "metal")]
    if let Ok(device) = Device::new_metal(0) {
        return device;
    }
    #[cfg(feature = "cuda")]
    if let Ok(device) = Device::new_cuda(0) {
        return device;
    }
    Device::Cpu
}

impl CandleEmbedder {
    /// Load a BERT embedding model from `HuggingFace` Hub.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if a model file cannot be downloaded and `ModelLoad` if the
    /// downloaded files cannot be loaded.
    pub fn load(repo_id: &str, device: &Device) -> Result<Self> {
        let api = hf_hub::api::sync::Api::new().map_err(|e| {
            EmbedError::ModelUnavailable(format!("failed to create HuggingFace API client: {e}"))
        })?;
        let repo = api.model(repo_id.to_owned());

        let fetch = |name: &str| {
            repo.get(name).map_err(|e| {
                EmbedError::ModelUnavailable(format!("failed to download {name} from {repo_id}: {e}"))
            })
        };
        let config_path = fetch("config.json")?;
        let tokenizer_path = fetch("tokenizer.json")?;
        let weights_path = fetch("model.safetensors")?;

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| EmbedError::ModelLoad(format!("failed to read BERT config: {e}")))?;
        let config: BertConfig = serde_json::from_str(&config_str)?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedError::ModelLoad(format!("failed to load tokenizer: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..TruncationParams::default()
            }))
            .map_err(|e| EmbedError::ModelLoad(format!("failed to configure truncation: {e}")))?;

        // SAFETY: file is a valid safetensors downloaded from hf-hub, not modified during
        // VarBuilder lifetime
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)? };
        let model = BertModel::load(vb, &config)?;

        tracing::info!(repo_id, ?device, "loaded embedding model");

        Ok(Self {
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            device: device.clone(),
            repo_id: repo_id.to_owned(),
        })
    }

    /// Embed a batch on the current thread.
    ///
    /// Padding positions are excluded from mean pooling through the attention mask, so a
    /// text's vector does not depend on the other texts in its batch.
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization or the model forward pass fails.
    pub fn embed_batch_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbedError::Inference(format!("tokenizer encode failed: {e}")))?;

        let batch = encodings.len();
        let seq_len = encodings.first().map_or(0, tokenizers::Encoding::len);
        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            ids.extend_from_slice(encoding.get_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let input_ids = Tensor::from_vec(ids, (batch, seq_len), &self.device)?;
        let attention_mask = Tensor::from_vec(mask, (batch, seq_len), &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Masked mean pooling over the sequence dimension
        let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let pooled = summed.broadcast_div(&counts)?;

        // L2 normalization
        let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = pooled.broadcast_div(&norm)?;

        normalized.to_vec2::<f32>().map_err(EmbedError::Candle)
    }
}

impl EmbeddingProvider for CandleEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed_batch_sync(&texts))
            .await
            .map_err(|e| EmbedError::Inference(format!("candle embedding task failed: {e}")))?
    }

    fn name(&self) -> &'static str {
        "candle"
    }
}
