//! Local weight store: integrity checks, manifest, and bounded-retry
//! acquisition from a weight source.
//!
//! A model directory is complete when it holds `config.json`,
//! `tokenizer.json` and one weight file, and every file listed in its
//! manifest still has the recorded size. The manifest stores blake3 digests
//! for [`WeightStore::verify_deep`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use clausefind_core::config::{DownloadConfig, ModelsConfig};
use clausefind_core::error::{Error, Result};

pub const MANIFEST_FILE: &str = ".clausefind-manifest.json";
pub const REQUIRED_FILES: &[&str] = &["config.json", "tokenizer.json"];
pub const WEIGHT_FILES: &[&str] = &["model.safetensors", "pytorch_model.bin"];
const MIN_WEIGHT_BYTES: u64 = 1024;

/// Bounded retry with exponential backoff.
///
/// `attempts` counts every try, including the first. Backoff before try
/// `n + 1` is `initial * multiplier^(n-1)`, capped at `max`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for RetryPolicy {
    fn from(cfg: &DownloadConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
            multiplier: cfg.multiplier,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self, completed: u32) -> Duration {
        let exp = i32::try_from(completed.saturating_sub(1)).unwrap_or(i32::MAX);
        let ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exp);
        Duration::from_millis(ms.min(self.max_backoff.as_millis() as f64) as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// `op` receives the 1-based attempt number. The returned error is
    /// `ModelAcquisition` carrying the last cause and the attempts spent.
    pub fn run<T>(&self, repo: &str, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            let (cause, status) = match &err {
                Error::ModelAcquisition { cause, status, .. } => (cause.clone(), *status),
                other => (other.to_string(), None),
            };
            if attempt >= self.attempts || !err.is_retryable() {
                warn!(repo, attempt, max_attempts = self.attempts, error = %cause, "giving up on weight fetch");
                return Err(Error::ModelAcquisition { repo: repo.to_string(), attempts: attempt, cause, status });
            }
            let backoff = self.backoff(attempt);
            warn!(repo, attempt, max_attempts = self.attempts, backoff_ms = backoff.as_millis() as u64, error = %cause, "retrying weight fetch");
            std::thread::sleep(backoff);
        }
    }
}

/// Fetch-and-cache mechanism for model weights.
pub trait WeightSource: Send + Sync {
    /// One attempt at placing the required files for `repo_id` in `dest`.
    fn fetch(&self, repo_id: &str, dest: &Path) -> Result<()>;
}

/// Hugging Face Hub (or a configured mirror) as the weight source.
pub struct HfHubSource {
    endpoint: Option<String>,
    cache_dir: PathBuf,
}

impl HfHubSource {
    pub fn new(endpoint: Option<String>, cache_dir: PathBuf) -> Self {
        Self { endpoint, cache_dir }
    }

    fn api(&self) -> Result<hf_hub::api::sync::Api> {
        let mut builder = hf_hub::api::sync::ApiBuilder::from_env()
            .with_cache_dir(self.cache_dir.clone())
            .with_progress(true);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        builder.build().map_err(|e| Error::ModelAcquisition {
            repo: String::new(),
            attempts: 0,
            cause: format!("failed to initialise hub client: {e}"),
            status: None,
        })
    }
}

/// Status code of a failed hub request. The hub client reports HTTP
/// failures as `<url>: status code <n>`.
fn http_status(message: &str) -> Option<u16> {
    let rest = &message[message.rfind("status code ")? + "status code ".len()..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn place(src: &Path, dest: &Path) -> std::io::Result<()> {
    // Hub snapshots are relative symlinks into a blob store.
    let src = fs::canonicalize(src)?;
    if dest.exists() {
        fs::remove_file(dest)?;
    }
    fs::hard_link(&src, dest).or_else(|_| fs::copy(&src, dest).map(|_| ()))
}

impl WeightSource for HfHubSource {
    fn fetch(&self, repo_id: &str, dest: &Path) -> Result<()> {
        let repo = self.api()?.model(repo_id.to_string());
        let fail = |file: &str, e: &dyn std::fmt::Display| {
            let cause = format!("{file}: {e}");
            Error::ModelAcquisition { repo: repo_id.to_string(), attempts: 0, status: http_status(&cause), cause }
        };
        fs::create_dir_all(dest)?;
        for file in REQUIRED_FILES {
            let cached = repo.get(file).map_err(|e| fail(file, &e))?;
            place(&cached, &dest.join(file))?;
        }
        let mut last = None;
        for file in WEIGHT_FILES {
            match repo.get(file) {
                Ok(cached) => {
                    place(&cached, &dest.join(file))?;
                    return Ok(());
                }
                Err(e) => last = Some(fail(file, &e)),
            }
        }
        Err(last.unwrap_or_else(|| fail("weights", &"no weight file candidates")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub blake3: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub repo: String,
    pub recorded_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn read(dir: &Path) -> Option<Self> {
        let raw = fs::read_to_string(dir.join(MANIFEST_FILE)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Hash every file under `dir` except the manifest itself.
    pub fn record(repo: &str, dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            let rel = rel.to_string_lossy().replace('\\', "/");
            if rel == MANIFEST_FILE {
                continue;
            }
            let size = entry.metadata().map_err(|e| Error::Io(e.into()))?.len();
            files.push(ManifestEntry { path: rel, size, blake3: hash_file(entry.path())? });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { repo: repo.to_string(), recorded_at: Utc::now(), files })
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Io(e.into()))?;
        fs::write(dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }
}

fn hash_file(path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = fs::File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightStatus {
    Complete,
    Incomplete(Vec<String>),
}

/// Quick integrity check: required file set plus manifest sizes.
pub fn check_dir(dir: &Path) -> WeightStatus {
    let mut problems = Vec::new();
    for file in REQUIRED_FILES {
        match fs::metadata(dir.join(file)) {
            Ok(m) if m.len() > 0 => {}
            Ok(_) => problems.push(format!("{file} is empty")),
            Err(_) => problems.push(format!("{file} missing")),
        }
    }
    let has_weights = WEIGHT_FILES
        .iter()
        .any(|f| fs::metadata(dir.join(f)).map(|m| m.len() >= MIN_WEIGHT_BYTES).unwrap_or(false));
    if !has_weights {
        problems.push(format!("no usable weight file ({})", WEIGHT_FILES.join(" or ")));
    }
    if let Some(manifest) = Manifest::read(dir) {
        for entry in &manifest.files {
            match fs::metadata(dir.join(&entry.path)) {
                Ok(m) if m.len() == entry.size => {}
                Ok(m) => problems.push(format!("{} has {} bytes, expected {}", entry.path, m.len(), entry.size)),
                Err(_) => problems.push(format!("{} missing", entry.path)),
            }
        }
    }
    if problems.is_empty() { WeightStatus::Complete } else { WeightStatus::Incomplete(problems) }
}

#[derive(Clone)]
pub struct WeightStore {
    models: ModelsConfig,
    source: Arc<dyn WeightSource>,
    retry: RetryPolicy,
}

impl WeightStore {
    pub fn new(models: ModelsConfig, source: Arc<dyn WeightSource>, retry: RetryPolicy) -> Self {
        Self { models, source, retry }
    }

    /// Store backed by the hub client, caching downloads under `<dir>/.hub-cache`.
    pub fn hub(models: &ModelsConfig, download: &DownloadConfig) -> Self {
        let source = HfHubSource::new(models.endpoint.clone(), models.dir().join(".hub-cache"));
        Self::new(models.clone(), Arc::new(source), RetryPolicy::from(download))
    }

    pub fn dir_for(&self, repo_id: &str) -> PathBuf {
        self.models.local_dir(repo_id)
    }

    /// Return a verified local directory for `repo_id`, fetching first when
    /// files are missing or do not match the manifest.
    pub fn ensure(&self, repo_id: &str) -> Result<PathBuf> {
        let dir = self.dir_for(repo_id);
        match check_dir(&dir) {
            WeightStatus::Complete => {
                info!(repo = repo_id, dir = %dir.display(), "weights complete locally, skipping fetch");
                if Manifest::read(&dir).is_none() {
                    Manifest::record(repo_id, &dir)?.write(&dir)?;
                }
                return Ok(dir);
            }
            WeightStatus::Incomplete(problems) => {
                info!(repo = repo_id, dir = %dir.display(), problems = ?problems, "weights incomplete, fetching");
            }
        }

        self.retry.run(repo_id, |attempt| {
            info!(repo = repo_id, attempt, "fetching weights");
            self.source.fetch(repo_id, &dir)?;
            match check_dir_without_manifest(&dir) {
                WeightStatus::Complete => Ok(()),
                WeightStatus::Incomplete(problems) => Err(Error::ModelAcquisition {
                    repo: repo_id.to_string(),
                    attempts: attempt,
                    cause: format!("fetched files failed integrity check: {}", problems.join("; ")),
                    status: None,
                }),
            }
        })?;
        Manifest::record(repo_id, &dir)?.write(&dir)?;
        info!(repo = repo_id, dir = %dir.display(), "weights fetched and recorded");
        Ok(dir)
    }

    /// Recompute digests against the manifest. Returns the mismatching files.
    pub fn verify_deep(&self, repo_id: &str) -> Result<Vec<String>> {
        let dir = self.dir_for(repo_id);
        let manifest = Manifest::read(&dir).ok_or_else(|| Error::ModelAcquisition {
            repo: repo_id.to_string(),
            attempts: 0,
            cause: format!("no manifest in {}", dir.display()),
            status: None,
        })?;
        let mut bad = Vec::new();
        for entry in &manifest.files {
            let path = dir.join(&entry.path);
            if !path.exists() || hash_file(&path)? != entry.blake3 {
                bad.push(entry.path.clone());
            }
        }
        Ok(bad)
    }
}

/// A fresh fetch replaces files, so a stale manifest must not veto it.
fn check_dir_without_manifest(dir: &Path) -> WeightStatus {
    let _ = fs::remove_file(dir.join(MANIFEST_FILE));
    check_dir(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_status_is_read_from_request_errors() {
        assert_eq!(http_status("config.json: request error: https://hf-mirror.com/x: status code 404"), Some(404));
        assert_eq!(http_status("config.json: request error: timed out after 4040ms"), None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::from(&DownloadConfig { attempts: 5, initial_backoff_ms: 1000, max_backoff_ms: 3000, multiplier: 2.0 });
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(3000));
    }

    #[test]
    fn run_stops_on_permanent_error() {
        let policy = RetryPolicy::from(&DownloadConfig { attempts: 3, initial_backoff_ms: 0, max_backoff_ms: 0, multiplier: 2.0 });
        let mut calls = 0;
        let err = policy
            .run::<()>("r", |_| {
                calls += 1;
                Err(Error::ModelAcquisition { repo: "r".into(), attempts: 0, cause: "404 Not Found".into(), status: Some(404) })
            })
            .expect_err("fails");
        assert_eq!(calls, 1);
        assert!(matches!(err, Error::ModelAcquisition { attempts: 1, .. }));
    }
}
