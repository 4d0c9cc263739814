//! clausefind-embed
//!
//! Device selection, the candle bi-encoder and cross-encoder, weight
//! acquisition and the [`ModelProvider`] that loads both models once.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use clausefind_core::config::{ModelsConfig, Pooling};

pub mod bi_encoder;
pub mod cross_encoder;
pub mod device;
pub mod fake;
pub mod pool;
pub mod provider;
pub mod tokenize;
pub mod weights;

pub use bi_encoder::BiEncoder;
pub use cross_encoder::CrossEncoder;
pub use device::{select_device, DeviceKind, DeviceSelector};
pub use fake::{FakeEmbedder, FakeReranker};
pub use pool::masked_mean_l2;
pub use provider::{CandleLoader, DevicePlacementWarning, EncoderPair, FakeLoader, ModelLoader, ModelProvider};
pub use weights::{HfHubSource, RetryPolicy, WeightSource, WeightStore};

/// Per-model inference settings.
#[derive(Debug, Clone, Copy)]
pub struct EncoderOptions {
    pub max_len: usize,
    pub batch_size: usize,
    pub pooling: Pooling,
}

impl From<&ModelsConfig> for EncoderOptions {
    fn from(cfg: &ModelsConfig) -> Self {
        Self { max_len: cfg.max_len, batch_size: cfg.batch_size, pooling: cfg.pooling }
    }
}

/// Whether to use the fake encoders: config flag or `APP_USE_FAKE_EMBEDDINGS`.
pub fn use_fake(cfg: &ModelsConfig) -> bool {
    cfg.use_fake
        || std::env::var("APP_USE_FAKE_EMBEDDINGS")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

/// Open weights from `model.safetensors` (memory-mapped) or fall back to
/// `pytorch_model.bin`.
pub(crate) fn load_var_builder(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let dtype = DType::F32;
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        // SAFETY: the file is not modified while mapped; the weight store only
        // replaces files before a load begins.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[safetensors], dtype, device)? };
        return Ok(vb);
    }
    let bin = model_dir.join("pytorch_model.bin");
    if !bin.exists() {
        return Err(anyhow!("No weight file in {}", model_dir.display()));
    }
    let weights = candle_core::pickle::read_all(&bin)?;
    let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
    Ok(VarBuilder::from_tensors(weights_map, dtype, device))
}
