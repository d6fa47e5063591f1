//! In-process rate-limit store.

use super::{RateLimitDecision, RateLimitStore, WindowPolicy};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hits between sweeps of expired keys.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy, Default)]
struct WindowCounts {
    index: i64,
    current: u32,
    previous: u32,
}

impl WindowCounts {
    /// Shift counters so `current` belongs to window `index`.
    ///
    /// An index behind the stored one (wall clock stepped back) counts as
    /// the stored window, so a clock step never reopens the quota.
    fn roll_to(&mut self, index: i64) {
        if index <= self.index {
            return;
        }
        self.previous = if index == self.index + 1 {
            self.current
        } else {
            0
        };
        self.current = 0;
        self.index = index;
    }
}

/// Sliding-window counters in a concurrent map.
///
/// Each hit runs under the key's shard lock, so concurrent requests for the
/// same key never lose an increment. State is local to this process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, WindowCounts>,
    hits: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// True when no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop keys whose counts can no longer affect a decision.
    fn sweep(&self, policy: &WindowPolicy, now_ms: i64) {
        let index = policy.window_index(now_ms);
        self.windows.retain(|_, counts| counts.index + 1 >= index);
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn hit(
        &self,
        key: &str,
        policy: &WindowPolicy,
        now_ms: i64,
    ) -> Result<RateLimitDecision> {
        let index = policy.window_index(now_ms);

        let decision = {
            let mut counts = self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| WindowCounts {
                    index,
                    ..WindowCounts::default()
                });
            counts.roll_to(index);

            let decision = policy.evaluate(counts.current, counts.previous, now_ms);
            if decision.allowed {
                counts.current += 1;
            }
            decision
        };

        if self.hits.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(policy, now_ms);
        }

        Ok(decision)
    }
}
