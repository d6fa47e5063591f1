//! Configuration validation.

use crate::config::{Config, StoreKind};
use crate::error::{Error, Result};
use std::net::SocketAddr;

/// Validate the entire configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server(config)?;
    validate_rate_limit(config)?;
    Ok(())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

/// Validate server settings.
fn validate_server(config: &Config) -> Result<()> {
    let server = &config.server;

    if server.bind.parse::<SocketAddr>().is_err() {
        return Err(invalid(format!(
            "server.bind must be a socket address like 0.0.0.0:8080, got '{}'",
            server.bind
        )));
    }

    if server.inference_timeout_secs == 0 {
        return Err(invalid("server.inference_timeout_secs must be at least 1"));
    }

    if server.max_upload_bytes == 0 {
        return Err(invalid("server.max_upload_bytes must be at least 1"));
    }

    Ok(())
}

/// Validate rate-limit settings. Skipped when the limiter is disabled.
fn validate_rate_limit(config: &Config) -> Result<()> {
    let limits = &config.rate_limit;
    if !limits.enabled {
        return Ok(());
    }

    if limits.requests == 0 {
        return Err(invalid("rate_limit.requests must be at least 1"));
    }

    if limits.window_secs == 0 {
        return Err(invalid("rate_limit.window_secs must be at least 1"));
    }

    if limits.store == StoreKind::Upstash
        && (limits.upstash_url.is_none() || limits.upstash_token.is_none())
    {
        return Err(invalid(
            "rate_limit.store = \"upstash\" needs upstash_url and upstash_token",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_bad_bind() {
        let mut config = Config::default();
        config.server.bind = "localhost".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.server.inference_timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_upload_ceiling() {
        let mut config = Config::default();
        config.server.max_upload_bytes = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_requests() {
        let mut config = Config::default();
        config.rate_limit.requests = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_window() {
        let mut config = Config::default();
        config.rate_limit.window_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_disabled_limiter_skips_checks() {
        let mut config = Config::default();
        config.rate_limit.enabled = false;
        config.rate_limit.requests = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_upstash_requires_credentials() {
        let mut config = Config::default();
        config.rate_limit.store = StoreKind::Upstash;
        config.rate_limit.upstash_url = Some("https://eu1.upstash.io".to_string());
        let result = validate_config(&config);
        assert!(matches!(result, Err(Error::ConfigValidation { .. })));

        config.rate_limit.upstash_token = Some("token".to_string());
        assert!(validate_config(&config).is_ok());
    }
}
