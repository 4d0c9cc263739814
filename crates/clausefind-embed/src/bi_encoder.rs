//! Dense bi-encoder on an XLM-RoBERTa backbone (bge-m3 by default).

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Result};
use candle_core::Device;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use clausefind_core::config::Pooling;
use clausefind_core::error::{Error, Result as CoreResult};
use clausefind_core::traits::Embedder;

use crate::pool::pool;
use crate::tokenize::{configure, tokenize_on_device};
use crate::{load_var_builder, EncoderOptions};

pub struct BiEncoder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    batch_size: usize,
    pooling: Pooling,
}

impl BiEncoder {
    pub fn load(model_dir: &Path, device: &Device, opts: &EncoderOptions) -> Result<Self> {
        let started = Instant::now();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        configure(&mut tokenizer, opts.max_len)?;

        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let vb = load_var_builder(model_dir, device)?;
        let model = XLMRobertaModel::new(&config, vb)?;

        info!(dir = %model_dir.display(), dim = config.hidden_size, elapsed_ms = started.elapsed().as_millis() as u64, "bi-encoder loaded");
        Ok(Self {
            model,
            tokenizer,
            device: device.clone(),
            dim: config.hidden_size,
            max_len: opts.max_len,
            batch_size: opts.batch_size,
            pooling: opts.pooling,
        })
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let batch = tokenize_on_device(&self.tokenizer, inputs, &self.device)?;
        let hidden = self
            .model
            .forward(&batch.input_ids, &batch.attention_mask, &batch.token_type_ids, None, None, None)?
            .detach();
        let pooled = pool(&hidden, &batch.attention_mask, self.pooling)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_vec2()?;
        Ok(vectors)
    }
}

impl Embedder for BiEncoder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let started = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size.max(1)) {
            out.extend(self.embed_chunk(chunk).map_err(Error::inference)?);
        }
        debug!(texts = texts.len(), elapsed_ms = started.elapsed().as_millis() as u64, "embedded batch");
        Ok(out)
    }
}
