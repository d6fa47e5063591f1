//! Upstash Redis rate-limit store over the REST API.

use super::{RateLimitDecision, RateLimitStore, WindowPolicy};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// Sliding-window check run atomically inside Redis.
///
/// KEYS: current window key, previous window key.
/// ARGV: limit, now (ms), window (ms).
/// Returns the remaining count after this hit, or -1 when denied.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local current = tonumber(redis.call("GET", KEYS[1]) or "0")
local previous = tonumber(redis.call("GET", KEYS[2]) or "0")
local limit = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])

local elapsed = (now % window) / window
local carried = math.floor(previous * (1 - elapsed))

if current + carried >= limit then
  return -1
end

local updated = redis.call("INCR", KEYS[1])
if updated == 1 then
  redis.call("PEXPIRE", KEYS[1], window * 2 + 1000)
end
return limit - (updated + carried)
"#;

#[derive(Debug, Deserialize)]
struct RestReply {
    result: Option<serde_json::Value>,
    error: Option<String>,
}

/// Store shared by every instance pointing at the same Upstash database.
pub struct UpstashStore {
    client: Client,
    url: String,
    token: String,
}

impl UpstashStore {
    /// Create a store for the REST endpoint `url`.
    pub fn new(client: Client, url: String, token: String) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn window_key(key: &str, index: i64) -> String {
        format!("{key}:{index}")
    }

    async fn eval(&self, keys: [String; 2], args: [String; 3]) -> Result<i64> {
        let mut command = vec![
            "EVAL".to_string(),
            SLIDING_WINDOW_SCRIPT.to_string(),
            keys.len().to_string(),
        ];
        command.extend(keys);
        command.extend(args);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await
            .map_err(|e| self.store_error(e))?;

        let status = response.status();
        let reply: RestReply = response.json().await.map_err(|e| self.store_error(e))?;

        if let Some(message) = reply.error {
            return Err(self.store_error(format!("HTTP {status}: {message}")));
        }

        reply
            .result
            .as_ref()
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| self.store_error(format!("HTTP {status}: unexpected reply")))
    }

    fn store_error(&self, e: impl std::fmt::Display) -> Error {
        Error::RateLimitStore {
            endpoint: self.url.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl RateLimitStore for UpstashStore {
    fn name(&self) -> &'static str {
        "upstash"
    }

    async fn hit(
        &self,
        key: &str,
        policy: &WindowPolicy,
        now_ms: i64,
    ) -> Result<RateLimitDecision> {
        let index = policy.window_index(now_ms);
        let remaining = self
            .eval(
                [
                    Self::window_key(key, index),
                    Self::window_key(key, index - 1),
                ],
                [
                    policy.limit.to_string(),
                    now_ms.to_string(),
                    policy.window_ms.to_string(),
                ],
            )
            .await?;

        Ok(RateLimitDecision {
            allowed: remaining >= 0,
            limit: policy.limit,
            remaining: u32::try_from(remaining.max(0)).unwrap_or(0),
            reset_at: policy.reset_at(index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keys_are_adjacent() {
        assert_eq!(UpstashStore::window_key("firesight:1.2.3.4", 7), "firesight:1.2.3.4:7");
        assert_eq!(UpstashStore::window_key("firesight:1.2.3.4", 6), "firesight:1.2.3.4:6");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let store = UpstashStore::new(
            Client::new(),
            "https://eu1-example.upstash.io/".to_string(),
            "token".to_string(),
        );
        assert_eq!(store.url, "https://eu1-example.upstash.io");
    }

    #[tokio::test]
    async fn test_unreachable_store_is_an_error() {
        let store = UpstashStore::new(
            Client::new(),
            "http://127.0.0.1:9".to_string(),
            "token".to_string(),
        );
        let policy = WindowPolicy::new(10, 30);
        assert!(store.hit("k", &policy, 0).await.is_err());
    }
}
