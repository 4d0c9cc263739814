//! Model lifecycle: weights are verified or fetched, then the bi-encoder and
//! cross-encoder are loaded at most once per provider and shared read-only.
//!
//! The provider is an explicit handle built at startup and cloned into every
//! component that needs inference. The first load runs behind a mutex;
//! afterwards callers read the cached pair from a `OnceLock` without
//! locking.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use clausefind_core::config::{ModelsConfig, Settings};
use clausefind_core::error::{Error, Result};
use clausefind_core::traits::{Embedder, Reranker};

use crate::device::{select_device, DeviceKind};
use crate::fake::{FakeEmbedder, FakeReranker};
use crate::weights::WeightStore;
use crate::{use_fake, BiEncoder, CrossEncoder, EncoderOptions};

/// A model could not be placed on the preferred device and runs on the
/// fallback instead. Non-fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePlacementWarning {
    pub model: String,
    pub preferred: DeviceKind,
    pub fallback: DeviceKind,
    pub reason: String,
}

impl std::fmt::Display for DevicePlacementWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} could not use {} ({}); running on {}", self.model, self.preferred, self.reason, self.fallback)
    }
}

/// The loaded encoders plus how they were placed.
///
/// `bi_device` and `cross_device` are where each model actually runs;
/// they differ from `preferred` only when a warning was recorded.
pub struct EncoderPair {
    pub bi_encoder: Arc<dyn Embedder>,
    pub cross_encoder: Arc<dyn Reranker>,
    pub preferred: DeviceKind,
    pub bi_device: DeviceKind,
    pub cross_device: DeviceKind,
    pub warnings: Vec<DevicePlacementWarning>,
}

pub trait ModelLoader: Send + Sync {
    /// Fake loaders skip weight acquisition entirely.
    fn needs_weights(&self) -> bool {
        true
    }
    fn load_bi_encoder(&self, dir: &Path, device: DeviceKind) -> Result<Arc<dyn Embedder>>;
    fn load_cross_encoder(&self, dir: &Path, device: DeviceKind) -> Result<Arc<dyn Reranker>>;
}

pub struct CandleLoader {
    opts: EncoderOptions,
}

impl CandleLoader {
    pub fn new(opts: EncoderOptions) -> Self {
        Self { opts }
    }
}

impl ModelLoader for CandleLoader {
    fn load_bi_encoder(&self, dir: &Path, device: DeviceKind) -> Result<Arc<dyn Embedder>> {
        let dev = device.open().map_err(Error::inference)?;
        let model = BiEncoder::load(dir, &dev, &self.opts).map_err(Error::inference)?;
        Ok(Arc::new(model))
    }

    fn load_cross_encoder(&self, dir: &Path, device: DeviceKind) -> Result<Arc<dyn Reranker>> {
        let dev = device.open().map_err(Error::inference)?;
        let model = CrossEncoder::load(dir, &dev, &self.opts).map_err(Error::inference)?;
        Ok(Arc::new(model))
    }
}

#[derive(Default)]
pub struct FakeLoader;

impl ModelLoader for FakeLoader {
    fn needs_weights(&self) -> bool {
        false
    }

    fn load_bi_encoder(&self, _dir: &Path, _device: DeviceKind) -> Result<Arc<dyn Embedder>> {
        Ok(Arc::new(FakeEmbedder::default()))
    }

    fn load_cross_encoder(&self, _dir: &Path, _device: DeviceKind) -> Result<Arc<dyn Reranker>> {
        Ok(Arc::new(FakeReranker))
    }
}

struct Inner {
    bi_repo: String,
    cross_repo: String,
    device: DeviceKind,
    store: WeightStore,
    loader: Arc<dyn ModelLoader>,
    ready: OnceLock<Arc<EncoderPair>>,
    load_lock: Mutex<()>,
    loads: AtomicUsize,
}

#[derive(Clone)]
pub struct ModelProvider {
    inner: Arc<Inner>,
}

impl ModelProvider {
    /// Provider for the configured models on the platform-selected device.
    pub fn from_settings(settings: &Settings) -> Self {
        let models = &settings.models;
        let store = WeightStore::hub(models, &settings.download);
        let loader: Arc<dyn ModelLoader> = if use_fake(models) {
            info!("using fake encoders");
            Arc::new(FakeLoader)
        } else {
            Arc::new(CandleLoader::new(EncoderOptions::from(models)))
        };
        Self::new(models, select_device(), store, loader)
    }

    pub fn new(models: &ModelsConfig, device: DeviceKind, store: WeightStore, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            inner: Arc::new(Inner {
                bi_repo: models.bi_encoder.clone(),
                cross_repo: models.cross_encoder.clone(),
                device,
                store,
                loader,
                ready: OnceLock::new(),
                load_lock: Mutex::new(()),
                loads: AtomicUsize::new(0),
            }),
        }
    }

    pub fn device(&self) -> DeviceKind {
        self.inner.device
    }

    /// The cached pair, if loading has finished.
    pub fn try_get(&self) -> Option<Arc<EncoderPair>> {
        self.inner.ready.get().cloned()
    }

    /// Number of full loads performed; at most 1 once a load has succeeded.
    pub fn load_count(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    /// Block the current thread until the models are ready.
    pub fn get_blocking(&self) -> Result<Arc<EncoderPair>> {
        self.inner.get_or_load()
    }

    /// Wait for the models on a blocking worker, giving up after `timeout`.
    /// A load already in flight keeps running and later callers reuse it.
    pub async fn get(&self, timeout: Duration) -> Result<Arc<EncoderPair>> {
        if let Some(pair) = self.try_get() {
            return Ok(pair);
        }
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || inner.get_or_load());
        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined.map_err(Error::inference)?,
            Err(_) => Err(Error::Timeout { operation: "model load", after: timeout }),
        }
    }
}

impl Inner {
    fn get_or_load(&self) -> Result<Arc<EncoderPair>> {
        if let Some(pair) = self.ready.get() {
            return Ok(Arc::clone(pair));
        }
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pair) = self.ready.get() {
            return Ok(Arc::clone(pair));
        }
        let pair = Arc::new(self.load()?);
        let _ = self.ready.set(Arc::clone(&pair));
        Ok(pair)
    }

    fn load(&self) -> Result<EncoderPair> {
        let started = Instant::now();
        self.loads.fetch_add(1, Ordering::SeqCst);
        let (bi_dir, cross_dir) = if self.loader.needs_weights() {
            (self.store.ensure(&self.bi_repo)?, self.store.ensure(&self.cross_repo)?)
        } else {
            (self.store.dir_for(&self.bi_repo), self.store.dir_for(&self.cross_repo))
        };

        let mut warnings = Vec::new();
        let (bi_encoder, bi_device) = self.place(&self.bi_repo, &mut warnings, |d| self.loader.load_bi_encoder(&bi_dir, d))?;
        let (cross_encoder, cross_device) =
            self.place(&self.cross_repo, &mut warnings, |d| self.loader.load_cross_encoder(&cross_dir, d))?;
        info!(%bi_device, %cross_device, degraded = warnings.len(), elapsed_ms = started.elapsed().as_millis() as u64, "models ready");
        Ok(EncoderPair { bi_encoder, cross_encoder, preferred: self.device, bi_device, cross_device, warnings })
    }

    fn place<T>(
        &self,
        model: &str,
        warnings: &mut Vec<DevicePlacementWarning>,
        load: impl Fn(DeviceKind) -> Result<T>,
    ) -> Result<(T, DeviceKind)> {
        match load(self.device) {
            Ok(m) => Ok((m, self.device)),
            Err(e) if self.device != DeviceKind::Cpu => {
                let warning = DevicePlacementWarning {
                    model: model.to_string(),
                    preferred: self.device,
                    fallback: DeviceKind::Cpu,
                    reason: e.to_string(),
                };
                warn!(%warning, "device placement degraded");
                warnings.push(warning);
                load(DeviceKind::Cpu).map(|m| (m, DeviceKind::Cpu))
            }
            Err(e) => Err(e),
        }
    }
}
