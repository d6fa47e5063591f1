//! Cross-process lock guarding model cache population.

use crate::constants::model;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::warn;

/// Lock file content for debugging.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process ID that holds the lock.
    pub pid: u32,
    /// Hostname of the machine.
    pub hostname: String,
    /// When the lock was acquired.
    pub started: DateTime<Utc>,
    /// Manifest URL being fetched.
    pub manifest_url: String,
}

/// RAII guard for the cache directory lock.
#[derive(Debug)]
pub struct CacheLock {
    lock_path: PathBuf,
}

impl CacheLock {
    /// Try to take the lock for `cache_dir` without waiting.
    pub fn try_acquire(cache_dir: &Path, manifest_url: &str) -> Result<Self> {
        let lock_path = Self::lock_path_for(cache_dir);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path);

        match file {
            Ok(mut f) => {
                let info = LockInfo {
                    pid: std::process::id(),
                    hostname: hostname::get().map_or_else(
                        |_| "unknown".to_string(),
                        |h| h.to_string_lossy().into_owned(),
                    ),
                    started: Utc::now(),
                    manifest_url: manifest_url.to_string(),
                };

                let json = serde_json::to_string_pretty(&info).unwrap_or_else(|_| "{}".to_string());
                let _ = f.write_all(json.as_bytes());

                Ok(Self { lock_path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::CacheLocked { path: lock_path })
            }
            Err(e) => Err(Error::LockCreate {
                path: lock_path,
                source: e,
            }),
        }
    }

    /// Take the lock, waiting while another process holds it.
    ///
    /// A lock not refreshed for `stale_after` is assumed abandoned and
    /// removed. Holders keep theirs fresh with [`CacheLock::keep_alive`].
    /// Returns `None` when the cache became complete while waiting, in which
    /// case there is nothing left to populate.
    pub async fn acquire<F, Fut>(
        cache_dir: &Path,
        manifest_url: &str,
        stale_after: Duration,
        is_complete: F,
    ) -> Result<Option<Self>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut announced = false;
        loop {
            match Self::try_acquire(cache_dir, manifest_url) {
                Ok(lock) => return Ok(Some(lock)),
                Err(Error::CacheLocked { path }) => {
                    if is_complete().await {
                        return Ok(None);
                    }
                    if Self::is_stale(cache_dir, stale_after) {
                        warn!("Removing stale cache lock: {}", path.display());
                        Self::remove_stale(cache_dir)?;
                        continue;
                    }
                    if !announced {
                        tracing::info!("Waiting for another process to finish populating the model cache");
                        announced = true;
                    }
                    tokio::time::sleep(Duration::from_millis(model::LOCK_POLL_MILLIS)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bump the lock file's modification time.
    pub fn touch(&self) -> Result<()> {
        touch_file(&self.lock_path)
    }

    /// Refresh the lock in the background until the returned guard drops.
    ///
    /// The period is a quarter of `stale_after`, so a waiting process never
    /// sees a live lock as stale.
    pub fn keep_alive(&self, stale_after: Duration) -> LockHeartbeat {
        let path = self.lock_path.clone();
        let period = (stale_after / 4).max(Duration::from_millis(model::LOCK_POLL_MILLIS));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = touch_file(&path) {
                    warn!("Failed to refresh cache lock: {e}");
                }
            }
        });

        LockHeartbeat { task }
    }

    /// Get the lock file path for a cache directory.
    pub fn lock_path_for(cache_dir: &Path) -> PathBuf {
        cache_dir.join(model::LOCK_FILE)
    }

    /// Check if a lock file exists.
    pub fn is_locked(cache_dir: &Path) -> bool {
        Self::lock_path_for(cache_dir).exists()
    }

    /// Check if a lock is stale (older than `max_age`).
    pub fn is_stale(cache_dir: &Path, max_age: Duration) -> bool {
        let lock_path = Self::lock_path_for(cache_dir);

        if let Ok(metadata) = fs::metadata(&lock_path)
            && let Ok(modified) = metadata.modified()
        {
            return modified.elapsed().unwrap_or_default() > max_age;
        }
        false
    }

    /// Remove a stale lock. A lock already gone counts as removed.
    pub fn remove_stale(cache_dir: &Path) -> Result<()> {
        let lock_path = Self::lock_path_for(cache_dir);
        match fs::remove_file(&lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::LockRemove {
                path: lock_path,
                source: e,
            }),
        }
    }
}

fn touch_file(path: &Path) -> Result<()> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()))
        .map_err(|e| Error::LockCreate {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Background refresh of a held [`CacheLock`]. Stops when dropped.
#[derive(Debug)]
pub struct LockHeartbeat {
    task: JoinHandle<()>,
}

impl Drop for LockHeartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    const URL: &str = "https://cdn.example.com/model.json";

    #[test]
    fn test_acquire_and_release_lock() {
        let temp_dir = TempDir::new().unwrap();

        let lock = CacheLock::try_acquire(temp_dir.path(), URL);
        assert!(lock.is_ok());
        assert!(CacheLock::is_locked(temp_dir.path()));

        drop(lock);
        assert!(!CacheLock::is_locked(temp_dir.path()));
    }

    #[test]
    fn test_double_lock_fails() {
        let temp_dir = TempDir::new().unwrap();

        let _lock1 = CacheLock::try_acquire(temp_dir.path(), URL).unwrap();
        let lock2 = CacheLock::try_acquire(temp_dir.path(), URL);
        assert!(matches!(lock2, Err(Error::CacheLocked { .. })));
    }

    #[test]
    fn test_lock_records_owner() {
        let temp_dir = TempDir::new().unwrap();
        let _lock = CacheLock::try_acquire(temp_dir.path(), URL).unwrap();

        let json = fs::read_to_string(CacheLock::lock_path_for(temp_dir.path())).unwrap();
        let info: LockInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.manifest_url, URL);
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let temp_dir = TempDir::new().unwrap();
        File::create(CacheLock::lock_path_for(temp_dir.path())).unwrap();

        let lock = CacheLock::acquire(temp_dir.path(), URL, Duration::ZERO, || async { false })
            .await
            .unwrap();
        assert!(lock.is_some());
    }

    #[tokio::test]
    async fn test_wait_ends_when_cache_completes() {
        let temp_dir = TempDir::new().unwrap();
        let _holder = CacheLock::try_acquire(temp_dir.path(), URL).unwrap();

        let lock = CacheLock::acquire(temp_dir.path(), URL, Duration::from_secs(3600), || async {
            true
        })
            .await
            .unwrap();
        assert!(lock.is_none());
    }

    fn age_lock(dir: &Path, by: Duration) {
        let file = OpenOptions::new()
            .write(true)
            .open(CacheLock::lock_path_for(dir))
            .unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_touch_makes_lock_fresh() {
        let temp_dir = TempDir::new().unwrap();
        let lock = CacheLock::try_acquire(temp_dir.path(), URL).unwrap();

        age_lock(temp_dir.path(), Duration::from_secs(3600));
        assert!(CacheLock::is_stale(temp_dir.path(), Duration::from_secs(60)));

        lock.touch().unwrap();
        assert!(!CacheLock::is_stale(temp_dir.path(), Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_held_lock_is_not_taken_over() {
        let temp_dir = TempDir::new().unwrap();
        let stale_after = Duration::from_millis(600);
        let holder = CacheLock::try_acquire(temp_dir.path(), URL).unwrap();
        let _heartbeat = holder.keep_alive(stale_after);

        // Outlive the staleness window several times over while waiting.
        let waiter = tokio::time::timeout(
            Duration::from_millis(2000),
            CacheLock::acquire(temp_dir.path(), URL, stale_after, || async { false }),
        )
        .await;
        assert!(waiter.is_err(), "live lock was taken over");
        assert!(CacheLock::is_locked(temp_dir.path()));
    }

    #[tokio::test]
    async fn test_heartbeat_stops_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let holder = CacheLock::try_acquire(temp_dir.path(), URL).unwrap();
        let heartbeat = holder.keep_alive(Duration::from_millis(400));
        drop(heartbeat);

        age_lock(temp_dir.path(), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(CacheLock::is_stale(temp_dir.path(), Duration::from_secs(60)));
    }
}
