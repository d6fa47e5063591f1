//! Configuration type definitions.

use super::paths::default_cache_dir;
use crate::constants::{model, rate_limit, server, upload};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerSettings,

    /// Model artifact and runtime settings.
    pub model: ModelSettings,

    /// Rate limiting for the network boundary.
    pub rate_limit: RateLimitSettings,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address.
    pub bind: String,

    /// Budget for preprocessing plus inference, in seconds.
    pub inference_timeout_secs: u64,

    /// Upload ceiling in bytes.
    pub max_upload_bytes: usize,

    /// Derive client keys from `X-Forwarded-For` / `X-Real-IP`. Only enable
    /// behind a proxy that overwrites or appends these headers.
    pub trust_forwarded_headers: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: server::DEFAULT_BIND.to_string(),
            inference_timeout_secs: server::DEFAULT_INFERENCE_TIMEOUT_SECS,
            max_upload_bytes: upload::DEFAULT_MAX_BYTES,
            trust_forwarded_headers: false,
        }
    }
}

/// Model artifact and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// URL of the model manifest. Shards resolve relative to it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,

    /// Local cache directory. Defaults to the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Which tensor runtime to use.
    pub runtime: RuntimeKind,

    /// Device for the embedded runtime.
    pub device: InferenceDevice,

    /// Intra-op threads for the embedded runtime (0 = runtime default).
    pub intra_threads: usize,

    /// Per-file download timeout in seconds.
    pub download_timeout_secs: u64,

    /// Age in seconds after which a cache lock counts as abandoned.
    pub lock_stale_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            manifest_url: None,
            cache_dir: None,
            runtime: RuntimeKind::default(),
            device: InferenceDevice::default(),
            intra_threads: 0,
            download_timeout_secs: model::DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            lock_stale_secs: model::DEFAULT_LOCK_STALE_SECS,
        }
    }
}

impl ModelSettings {
    /// Cache directory, falling back to the platform default.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_cache_dir(),
        }
    }
}

/// Tensor runtime selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    /// Native ONNX Runtime with a disk-backed model cache.
    #[default]
    Embedded,
    /// Pure-Rust runtime loading the model straight into memory.
    InPage,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedded => write!(f, "embedded"),
            Self::InPage => write!(f, "in-page"),
        }
    }
}

/// Inference device configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InferenceDevice {
    /// Automatically select (GPU if available, else CPU).
    #[default]
    Auto,
    /// Prefer GPU (CUDA), warn and fall back to CPU when unavailable.
    Gpu,
    /// Force CPU inference.
    Cpu,
}

/// Rate-limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Whether the limiter runs at all.
    pub enabled: bool,

    /// Requests admitted per window per client.
    pub requests: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Key prefix in the shared store.
    pub prefix: String,

    /// Backing store.
    pub store: StoreKind,

    /// Upstash REST endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstash_url: Option<String>,

    /// Upstash REST token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstash_token: Option<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: rate_limit::DEFAULT_REQUESTS,
            window_secs: rate_limit::DEFAULT_WINDOW_SECS,
            prefix: rate_limit::DEFAULT_PREFIX.to_string(),
            store: StoreKind::default(),
            upstash_url: None,
            upstash_token: None,
        }
    }
}

impl RateLimitSettings {
    /// Fill Upstash credentials from the environment when set there.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(rate_limit::UPSTASH_URL_ENV)
            && !url.is_empty()
        {
            self.upstash_url = Some(url);
        }
        if let Ok(token) = std::env::var(rate_limit::UPSTASH_TOKEN_ENV)
            && !token.is_empty()
        {
            self.upstash_token = Some(token);
        }
    }
}

/// Rate-limit store selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process map; state is per instance.
    #[default]
    Memory,
    /// Upstash Redis over REST; state shared across instances.
    Upstash,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.server.max_upload_bytes, 4 * 1024 * 1024);
        assert_eq!(config.rate_limit.requests, 10);
        assert_eq!(config.rate_limit.window_secs, 30);
        assert_eq!(config.model.runtime, RuntimeKind::Embedded);
        assert_eq!(config.model.device, InferenceDevice::Auto);
        assert!(!config.server.trust_forwarded_headers);
    }

    #[test]
    fn test_runtime_kind_serde_names() {
        let config: Config = toml::from_str("[model]\nruntime = \"in-page\"\n").unwrap();
        assert_eq!(config.model.runtime, RuntimeKind::InPage);
        assert_eq!(RuntimeKind::InPage.to_string(), "in-page");
    }

    #[test]
    fn test_store_kind_parses() {
        let config: Config = toml::from_str("[rate_limit]\nstore = \"upstash\"\n").unwrap();
        assert_eq!(config.rate_limit.store, StoreKind::Upstash);
    }
}
