//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`,
//! `config.<env>.toml` and `APP_*` env vars (nested keys split on `__`, so
//! `APP_CHUNKING__WINDOW=5` sets `chunking.window`). The model directory
//! may use `~` and `${VAR}`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    /// Defaults only; no files or environment consulted.
    pub fn defaults() -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())) }
    }

    /// Extract and validate the typed settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub models: ModelsConfig,
    pub download: DownloadConfig,
    pub timeouts: TimeoutConfig,
}

/// Sliding-window parameters.
///
/// Paragraphs shorter than `threshold` characters stay whole; longer ones
/// are cut into windows of `window` sentences sharing `overlap` sentences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub threshold: usize,
    pub window: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { threshold: 400, window: 4, overlap: 1 }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(Error::InvalidConfig("chunking.threshold must be > 0".into()));
        }
        if !(3..=5).contains(&self.window) {
            return Err(Error::InvalidConfig(format!("chunking.window must be in 3..=5, got {}", self.window)));
        }
        if !(1..=2).contains(&self.overlap) || self.overlap >= self.window {
            return Err(Error::InvalidConfig(format!(
                "chunking.overlap must be in 1..=2 and below window ({}), got {}",
                self.window, self.overlap
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of stage-1 candidates handed to the reranker.
    pub coarse_width: usize,
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { coarse_width: 30, default_top_k: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    Cls,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub dir: String,
    pub bi_encoder: String,
    pub cross_encoder: String,
    /// Mirror endpoint for the weight source, e.g. `https://hf-mirror.com`.
    pub endpoint: Option<String>,
    pub max_len: usize,
    pub batch_size: usize,
    pub pooling: Pooling,
    pub use_fake: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: "~/.cache/clausefind/models".to_string(),
            bi_encoder: "BAAI/bge-m3".to_string(),
            cross_encoder: "BAAI/bge-reranker-large".to_string(),
            endpoint: None,
            max_len: 512,
            batch_size: 16,
            pooling: Pooling::Cls,
            use_fake: false,
        }
    }
}

impl ModelsConfig {
    pub fn dir(&self) -> PathBuf {
        expand_path(&self.dir)
    }

    /// Local directory for one repository, e.g. `BAAI/bge-m3` -> `<dir>/bge-m3`.
    pub fn local_dir(&self, repo_id: &str) -> PathBuf {
        let name = repo_id.rsplit('/').next().unwrap_or(repo_id);
        self.dir().join(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self { attempts: 3, initial_backoff_ms: 1000, max_backoff_ms: 8000, multiplier: 2.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub model_ready_secs: u64,
    pub load_document_secs: u64,
    pub search_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { model_ready_secs: 600, load_document_secs: 300, search_secs: 60 }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.retrieval.coarse_width == 0 {
            return Err(Error::InvalidConfig("retrieval.coarse_width must be > 0".into()));
        }
        if self.retrieval.default_top_k == 0 {
            return Err(Error::InvalidConfig("retrieval.default_top_k must be > 0".into()));
        }
        if self.download.attempts == 0 {
            return Err(Error::InvalidConfig("download.attempts must be > 0".into()));
        }
        if self.models.batch_size == 0 || self.models.max_len == 0 {
            return Err(Error::InvalidConfig("models.batch_size and models.max_len must be > 0".into()));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
