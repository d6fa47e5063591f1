//! Where model bytes come from.
//!
//! [`LocalCacheSource`] keeps a populated copy of the manifest and shards on
//! disk and downloads only what is missing. [`RemoteSource`] fetches
//! everything into memory on each load, which is what an in-page runtime
//! without persistent storage does.

use super::fetch::{self, fetch_bytes, verify_checksum};
use super::lock::CacheLock;
use super::manifest::{ModelManifest, shard_url};
use crate::constants::model;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A manifest and the concatenated bytes of its shards.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    manifest: ModelManifest,
    bytes: Vec<u8>,
}

impl ModelArtifact {
    /// Join shards in manifest order.
    pub fn from_shards(manifest: ModelManifest, shards: Vec<Vec<u8>>) -> Self {
        let total = shards.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(total);
        for shard in shards {
            bytes.extend_from_slice(&shard);
        }
        Self { manifest, bytes }
    }

    /// The manifest this artifact was built from.
    pub const fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    /// Serialized model bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Supplies model artifacts to the cache.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Produce a complete artifact, fetching whatever is missing.
    async fn fetch(&self) -> Result<ModelArtifact>;

    /// Whether an artifact could be produced without a network round trip
    /// failing. Never triggers a download.
    async fn is_available(&self) -> bool;
}

/// Outcome of inspecting a cache directory.
#[derive(Debug)]
pub enum CacheStatus {
    /// Manifest and every shard present and verified.
    Complete(ModelManifest),
    /// Manifest present but some shards missing, empty or corrupt.
    Incomplete {
        /// Shards needing a fresh download.
        missing: Vec<String>,
    },
    /// No usable manifest.
    Empty,
}

impl CacheStatus {
    /// True when nothing needs downloading.
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Inspect a cache directory.
///
/// A shard counts as present only if it exists, is non-empty, and matches
/// its checksum when the manifest lists one.
pub fn inspect_cache(cache_dir: &Path) -> CacheStatus {
    let manifest_path = cache_dir.join(model::MANIFEST_FILE);
    let Ok(bytes) = std::fs::read(&manifest_path) else {
        return CacheStatus::Empty;
    };
    let Ok(manifest) = ModelManifest::parse(&bytes, &manifest_path.to_string_lossy()) else {
        return CacheStatus::Empty;
    };

    let missing = missing_shards(cache_dir, &manifest);
    if missing.is_empty() {
        CacheStatus::Complete(manifest)
    } else {
        CacheStatus::Incomplete { missing }
    }
}

/// Run [`inspect_cache`] on the blocking thread pool.
pub async fn inspect_cache_async(cache_dir: PathBuf) -> CacheStatus {
    tokio::task::spawn_blocking(move || inspect_cache(&cache_dir))
        .await
        .unwrap_or_else(|e| {
            warn!("Cache inspection task failed: {e}");
            CacheStatus::Empty
        })
}

/// Shards of `manifest` that are absent or invalid in `cache_dir`.
fn missing_shards(cache_dir: &Path, manifest: &ModelManifest) -> Vec<String> {
    manifest
        .shard_paths()
        .into_iter()
        .filter(|path| !shard_is_valid(cache_dir, manifest, path))
        .map(String::from)
        .collect()
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::Internal {
            message: format!("blocking task failed: {e}"),
        })
}

fn shard_is_valid(cache_dir: &Path, manifest: &ModelManifest, path: &str) -> bool {
    let shard_path = cache_dir.join(path);
    match manifest.checksum_for(path) {
        Some(expected) => std::fs::read(&shard_path)
            .is_ok_and(|b| !b.is_empty() && fetch::sha256_hex(&b) == expected),
        None => std::fs::metadata(&shard_path).is_ok_and(|m| m.is_file() && m.len() > 0),
    }
}

/// Read a complete cache into memory.
async fn read_cache(cache_dir: &Path, manifest: ModelManifest) -> Result<ModelArtifact> {
    let mut shards = Vec::with_capacity(manifest.shard_paths().len());
    for path in manifest.shard_paths() {
        shards.push(tokio::fs::read(cache_dir.join(path)).await?);
    }
    Ok(ModelArtifact::from_shards(manifest, shards))
}

/// Disk-backed source for the server process.
pub struct LocalCacheSource {
    cache_dir: PathBuf,
    manifest_url: Option<String>,
    client: Client,
    lock_stale: Duration,
    show_progress: bool,
}

impl LocalCacheSource {
    /// Create a source. Without a manifest URL only a complete cache loads.
    pub fn new(
        cache_dir: PathBuf,
        manifest_url: Option<String>,
        client: Client,
        lock_stale: Duration,
    ) -> Self {
        Self {
            cache_dir,
            manifest_url,
            client,
            lock_stale,
            show_progress: false,
        }
    }

    /// Show download progress bars on stderr.
    #[must_use]
    pub const fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Cache directory this source populates.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Current state of the cache directory.
    pub async fn status(&self) -> CacheStatus {
        inspect_cache_async(self.cache_dir.clone()).await
    }

    /// Download missing files into the cache. Holds the cache lock while
    /// writing. The manifest is written last so a crash mid-way never
    /// leaves a cache that looks complete.
    pub async fn populate(&self) -> Result<ModelManifest> {
        if let CacheStatus::Complete(manifest) = self.status().await {
            debug!("Model cache already complete: {}", self.cache_dir.display());
            return Ok(manifest);
        }

        let url = self
            .manifest_url
            .as_deref()
            .ok_or_else(|| Error::ManifestUrlMissing {
                cache_dir: self.cache_dir.clone(),
            })?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let cache_dir = self.cache_dir.clone();
        let Some(lock) = CacheLock::acquire(&self.cache_dir, url, self.lock_stale, || {
            let dir = cache_dir.clone();
            async move { inspect_cache_async(dir).await.is_complete() }
        })
        .await?
        else {
            return match self.status().await {
                CacheStatus::Complete(manifest) => Ok(manifest),
                _ => Err(Error::Internal {
                    message: "model cache changed while waiting for lock".to_string(),
                }),
            };
        };

        // Keeps the lock fresh for as long as the download runs.
        let _heartbeat = lock.keep_alive(self.lock_stale);

        // Another process may have finished between the check and the lock.
        if let CacheStatus::Complete(manifest) = self.status().await {
            return Ok(manifest);
        }

        info!("Fetching model manifest from {url}");
        let manifest_bytes = fetch_bytes(&self.client, url).await?;
        let manifest = ModelManifest::parse(&manifest_bytes, url)?;

        let missing = {
            let cache_dir = self.cache_dir.clone();
            let manifest = manifest.clone();
            blocking(move || missing_shards(&cache_dir, &manifest)).await?
        };

        for path in manifest.shard_paths() {
            if !missing.iter().any(|m| m == path) {
                debug!("Shard already cached: {path}");
                continue;
            }

            let dest = self.cache_dir.join(path);
            let shard = shard_url(url, path)?;
            fetch::download_file(&self.client, &shard, &dest, self.show_progress).await?;

            if let Some(expected) = manifest.checksum_for(path) {
                let check = dest.clone();
                let verified = blocking(move || {
                    let bytes = std::fs::read(&check)?;
                    verify_checksum(&check, &bytes, Some(expected.as_str()))
                })
                .await?;
                if let Err(e) = verified {
                    let _ = tokio::fs::remove_file(&dest).await;
                    return Err(e);
                }
            }
        }

        let manifest_path = self.cache_dir.join(model::MANIFEST_FILE);
        let partial = fetch::partial_path(&manifest_path);
        tokio::fs::write(&partial, &manifest_bytes).await?;
        tokio::fs::rename(&partial, &manifest_path).await?;

        info!("Model cache populated: {}", self.cache_dir.display());
        Ok(manifest)
    }
}

#[async_trait]
impl ArtifactSource for LocalCacheSource {
    fn describe(&self) -> String {
        format!("local cache {}", self.cache_dir.display())
    }

    async fn fetch(&self) -> Result<ModelArtifact> {
        let manifest = self.populate().await?;
        read_cache(&self.cache_dir, manifest).await
    }

    async fn is_available(&self) -> bool {
        self.status().await.is_complete()
    }
}

/// Network-only source that never touches the disk.
pub struct RemoteSource {
    manifest_url: String,
    client: Client,
}

impl RemoteSource {
    /// Create a source for `manifest_url`.
    pub const fn new(manifest_url: String, client: Client) -> Self {
        Self {
            manifest_url,
            client,
        }
    }
}

#[async_trait]
impl ArtifactSource for RemoteSource {
    fn describe(&self) -> String {
        format!("remote {}", self.manifest_url)
    }

    async fn fetch(&self) -> Result<ModelArtifact> {
        let url = &self.manifest_url;
        info!("Fetching model manifest from {url}");
        let manifest = ModelManifest::parse(&fetch_bytes(&self.client, url).await?, url)?;

        let mut shards = Vec::with_capacity(manifest.shard_paths().len());
        for path in manifest.shard_paths() {
            let shard = shard_url(url, path)?;
            let mut bytes = fetch_bytes(&self.client, &shard).await?;
            if let Some(expected) = manifest.checksum_for(path) {
                let name = PathBuf::from(path);
                bytes = blocking(move || {
                    verify_checksum(&name, &bytes, Some(expected.as_str())).map(|()| bytes)
                })
                .await??;
            }
            shards.push(bytes);
        }

        Ok(ModelArtifact::from_shards(manifest, shards))
    }

    async fn is_available(&self) -> bool {
        fetch::probe(&self.client, &self.manifest_url).await
    }
}
