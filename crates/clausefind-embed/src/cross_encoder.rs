//! Pairwise reranker on an XLM-RoBERTa sequence classifier
//! (bge-reranker-large by default). Emits one raw logit per pair.

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Result};
use candle_core::{DType, Device};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaForSequenceClassification};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use clausefind_core::error::{Error, Result as CoreResult};
use clausefind_core::traits::Reranker;

use crate::tokenize::{configure, tokenize_on_device};
use crate::{load_var_builder, EncoderOptions};

pub struct CrossEncoder {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
    batch_size: usize,
}

impl CrossEncoder {
    pub fn load(model_dir: &Path, device: &Device, opts: &EncoderOptions) -> Result<Self> {
        let started = Instant::now();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        configure(&mut tokenizer, opts.max_len)?;

        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let vb = load_var_builder(model_dir, device)?;
        let model = XLMRobertaForSequenceClassification::new(1, &config, vb)?;

        info!(dir = %model_dir.display(), elapsed_ms = started.elapsed().as_millis() as u64, "cross-encoder loaded");
        Ok(Self { model, tokenizer, device: device.clone(), batch_size: opts.batch_size })
    }

    fn score_chunk(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>> {
        let pairs: Vec<(&str, &str)> = candidates.iter().map(|c| (query, *c)).collect();
        let batch = tokenize_on_device(&self.tokenizer, pairs, &self.device)?;
        let logits = self
            .model
            .forward(&batch.input_ids, &batch.attention_mask, &batch.token_type_ids)?
            .detach();
        let scores = logits.squeeze(1)?.to_dtype(DType::F32)?.to_device(&Device::Cpu)?.to_vec1()?;
        Ok(scores)
    }
}

impl Reranker for CrossEncoder {
    fn score_pairs(&self, query: &str, candidates: &[&str]) -> CoreResult<Vec<f32>> {
        let started = Instant::now();
        let mut out = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(self.batch_size.max(1)) {
            out.extend(self.score_chunk(query, chunk).map_err(Error::inference)?);
        }
        debug!(pairs = candidates.len(), elapsed_ms = started.elapsed().as_millis() as u64, "scored pairs");
        Ok(out)
    }
}
