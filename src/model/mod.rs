//! Model artifacts: manifest, download, on-disk cache and memoized loading.

mod cache;
pub mod fetch;
mod lock;
mod manifest;
mod source;

pub use cache::ModelCache;
pub use lock::{CacheLock, LockHeartbeat, LockInfo};
pub use manifest::{ModelManifest, WeightGroup, shard_url};
pub use source::{
    ArtifactSource, CacheStatus, LocalCacheSource, ModelArtifact, RemoteSource, inspect_cache,
    inspect_cache_async,
};

#[cfg(test)]
pub(crate) use cache::tests as cache_tests;
