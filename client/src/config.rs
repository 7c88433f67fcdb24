//! Configuration management for the client.

use std::env;
use std::time::Duration;

use crate::reconcile::ResyncPolicy;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the records server
    pub server_url: String,
    /// Snapshot fetch attempts per resync
    pub resync_attempts: u32,
    /// Base delay between resync attempts; grows linearly
    pub resync_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            resync_attempts: 3,
            resync_backoff: Duration::from_millis(250),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_url = lookup("GRIDSYNC_SERVER_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.server_url);
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(ConfigError::InvalidServerUrl(server_url));
        }

        let resync_attempts = match lookup("GRIDSYNC_RESYNC_ATTEMPTS") {
            Some(raw) => parse_var("GRIDSYNC_RESYNC_ATTEMPTS", &raw)?,
            None => defaults.resync_attempts,
        };

        let resync_backoff = match lookup("GRIDSYNC_RESYNC_BACKOFF_MS") {
            Some(raw) => Duration::from_millis(parse_var("GRIDSYNC_RESYNC_BACKOFF_MS", &raw)?),
            None => defaults.resync_backoff,
        };

        Ok(Self {
            server_url,
            resync_attempts,
            resync_backoff,
        })
    }

    /// Resync retry policy described by this configuration.
    pub fn resync_policy(&self) -> ResyncPolicy {
        ResyncPolicy::new(self.resync_attempts, self.resync_backoff)
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: raw.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GRIDSYNC_SERVER_URL must be an http(s) URL, got '{0}'")]
    InvalidServerUrl(String),

    #[error("Invalid {var} value '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}
