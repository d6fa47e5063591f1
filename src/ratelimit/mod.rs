//! Sliding-window admission control for the network boundary.
//!
//! Counts live in a [`RateLimitStore`]; the limiter itself holds no
//! per-client state. Each check is one atomic increment-and-check against the
//! store. The window is approximated the usual way: the previous fixed
//! window's count is weighted by how much of it still overlaps the rolling
//! window and added to the current fixed window's count.

mod memory;
mod upstash;

pub use memory::MemoryStore;
pub use upstash::UpstashStore;

use crate::config::{RateLimitSettings, StoreKind};
use crate::constants::rate_limit::ANONYMOUS_KEY;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests permitted per window.
    pub limit: u32,
    /// Requests left in the rolling window after this one.
    pub remaining: u32,
    /// End of the current fixed window, milliseconds since the Unix epoch.
    pub reset_at: i64,
}

impl RateLimitDecision {
    /// Whole seconds from `now_ms` until the window resets, at least one.
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let millis = (self.reset_at - now_ms).max(0);
        u64::try_from(((millis + 999) / 1000).max(1)).unwrap_or(1)
    }
}

/// Limit and window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: i64,
}

impl WindowPolicy {
    /// Build a policy from a request count and window in seconds.
    pub fn new(limit: u32, window_secs: u64) -> Self {
        let window_ms = i64::try_from(window_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self {
            limit,
            window_ms: window_ms.max(1),
        }
    }

    /// Index of the fixed window containing `now_ms`.
    pub const fn window_index(&self, now_ms: i64) -> i64 {
        now_ms.div_euclid(self.window_ms)
    }

    /// End of the fixed window with the given index.
    pub const fn reset_at(&self, index: i64) -> i64 {
        (index + 1) * self.window_ms
    }

    /// Previous window's count scaled by how much of it still overlaps the
    /// rolling window ending at `now_ms`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn carried_over(&self, previous: u32, now_ms: i64) -> u32 {
        let elapsed = now_ms.rem_euclid(self.window_ms) as f64 / self.window_ms as f64;
        (f64::from(previous) * (1.0 - elapsed)).floor() as u32
    }

    /// Decide one hit against a window's counters. An allowed decision means
    /// the caller must increment `current`.
    pub fn evaluate(&self, current: u32, previous: u32, now_ms: i64) -> RateLimitDecision {
        let effective = current.saturating_add(self.carried_over(previous, now_ms));
        let reset_at = self.reset_at(self.window_index(now_ms));

        if effective >= self.limit {
            RateLimitDecision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_at,
            }
        } else {
            RateLimitDecision {
                allowed: true,
                limit: self.limit,
                remaining: self.limit - effective - 1,
                reset_at,
            }
        }
    }
}

/// Shared counter store.
///
/// `hit` must perform the whole read-evaluate-increment step atomically for
/// the key; a denied hit must not increment.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Short store name for logs.
    fn name(&self) -> &'static str;

    /// Record one request for `key` at `now_ms` and decide admission.
    async fn hit(&self, key: &str, policy: &WindowPolicy, now_ms: i64)
    -> Result<RateLimitDecision>;
}

/// Admission control keyed by client identifier.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: WindowPolicy,
    prefix: String,
}

impl RateLimiter {
    /// Create a limiter over `store`.
    pub fn new(store: Arc<dyn RateLimitStore>, policy: WindowPolicy, prefix: impl Into<String>) -> Self {
        Self {
            store,
            policy,
            prefix: prefix.into(),
        }
    }

    /// Build the limiter described by the settings.
    pub fn from_settings(settings: &RateLimitSettings, client: reqwest::Client) -> Result<Self> {
        let store: Arc<dyn RateLimitStore> = match settings.store {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Upstash => {
                let (Some(url), Some(token)) = (&settings.upstash_url, &settings.upstash_token)
                else {
                    return Err(Error::ConfigValidation {
                        message: "upstash store needs upstash_url and upstash_token".to_string(),
                    });
                };
                Arc::new(UpstashStore::new(client, url.clone(), token.clone()))
            }
        };

        Ok(Self::new(
            store,
            WindowPolicy::new(settings.requests, settings.window_secs),
            settings.prefix.clone(),
        ))
    }

    /// The configured policy.
    pub const fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Name of the backing store.
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Check and record one request for `client_key` now.
    pub async fn admit(&self, client_key: &str) -> RateLimitDecision {
        self.admit_at(client_key, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// Check and record one request at an explicit time.
    ///
    /// A store failure admits the request and logs a warning.
    pub async fn admit_at(&self, client_key: &str, now_ms: i64) -> RateLimitDecision {
        let key = format!("{}:{}", self.prefix, client_key);

        match self.store.hit(&key, &self.policy, now_ms).await {
            Ok(decision) => {
                debug!(
                    "Rate limit {key}: allowed={} remaining={}",
                    decision.allowed, decision.remaining
                );
                decision
            }
            Err(e) => {
                warn!("Rate limit store '{}' failed, admitting request: {e}", self.store.name());
                RateLimitDecision {
                    allowed: true,
                    limit: self.policy.limit,
                    remaining: self.policy.limit.saturating_sub(1),
                    reset_at: self.policy.reset_at(self.policy.window_index(now_ms)),
                }
            }
        }
    }
}

/// Pick the client key from proxy headers or the peer address.
///
/// The last hop of `X-Forwarded-For` wins, since that is the address the
/// nearest proxy appended; earlier hops are client-supplied. Then
/// `X-Real-IP`, then the socket peer. Requests with none of these share one
/// anonymous bucket.
pub fn client_key(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<std::net::IpAddr>,
) -> String {
    let header_ip = forwarded_for
        .and_then(|v| v.rsplit(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| real_ip.map(str::trim).filter(|v| !v.is_empty()));

    match (header_ip, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(ip)) => ip.to_string(),
        (None, None) => ANONYMOUS_KEY.to_string(),
    }
}
