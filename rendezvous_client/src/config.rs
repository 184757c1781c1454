//! Client configuration
//!
//! Timeouts, heartbeat cadence and retry policy for a signaling session.

use crate::error::ConfigError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a signaling session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the rendezvous server
    pub server_url: String,

    /// Interval between `/heartbeat` requests
    pub heartbeat_interval: Duration,

    /// Deadline for sign-in, message and heartbeat requests
    pub request_timeout: Duration,

    /// Client-side deadline for a `/wait` long-poll
    ///
    /// Must exceed the server's hold time, otherwise every poll ends in a
    /// client timeout before the server gets a chance to answer.
    pub wait_timeout: Duration,

    /// Deadline for the best-effort `/sign_out`
    pub sign_out_timeout: Duration,

    /// Consecutive background failures tolerated before the session is torn down
    pub max_consecutive_failures: u32,

    /// First retry delay after a background failure
    pub backoff_initial: Duration,

    /// Upper bound for the retry delay
    pub backoff_max: Duration,

    /// Bearer token sent with every request
    pub auth_token: Option<String>,

    /// Proxy all requests are routed through
    pub proxy: Option<String>,

    /// Spawn the long-poll wait loop after sign-in
    ///
    /// When disabled the caller drives `/wait` through `poll_once`.
    pub background_polling: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8888".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(40),
            sign_out_timeout: Duration::from_secs(2),
            max_consecutive_failures: 5,
            backoff_initial: Duration::from_millis(250),
            backoff_max: Duration::from_secs(8),
            auth_token: None,
            proxy: None,
            background_polling: true,
        }
    }
}

impl ClientConfig {
    /// Create a default config pointing at `server_url`
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Create config from environment variables
    ///
    /// Unset variables keep their default; set but unparseable ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("RENDEZVOUS_SERVER_URL") {
            config.server_url = url;
        }
        if let Some(secs) = parse_env(&lookup, "RENDEZVOUS_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env(&lookup, "RENDEZVOUS_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env(&lookup, "RENDEZVOUS_WAIT_TIMEOUT_SECS")? {
            config.wait_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = parse_env(&lookup, "RENDEZVOUS_MAX_FAILURES")? {
            config.max_consecutive_failures = max;
        }
        if let Some(token) = lookup("RENDEZVOUS_AUTH_TOKEN") {
            config.auth_token = Some(token);
        }
        if let Some(proxy) = lookup("RENDEZVOUS_PROXY") {
            config.proxy = Some(proxy);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.server_url).map_err(|e| invalid("server_url", e.to_string()))?;

        for (field, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("request_timeout", self.request_timeout),
            ("wait_timeout", self.wait_timeout),
            ("sign_out_timeout", self.sign_out_timeout),
            ("backoff_initial", self.backoff_initial),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be > 0"));
            }
        }

        if self.wait_timeout <= self.request_timeout {
            return Err(invalid("wait_timeout", "must exceed request_timeout"));
        }

        if self.max_consecutive_failures == 0 {
            return Err(invalid("max_consecutive_failures", "must be > 0"));
        }

        if self.backoff_initial > self.backoff_max {
            return Err(invalid("backoff_max", "must be >= backoff_initial"));
        }

        if let Some(proxy) = &self.proxy {
            Url::parse(proxy).map_err(|e| invalid("proxy", e.to_string()))?;
        }

        Ok(())
    }

    /// Retry delay after the `consecutive`-th failure in a row
    ///
    /// Doubles from `backoff_initial` and saturates at `backoff_max`.
    pub fn backoff_delay(&self, consecutive: u32) -> Duration {
        let exponent = consecutive.saturating_sub(1).min(16);
        self.backoff_initial
            .saturating_mul(1 << exponent)
            .min(self.backoff_max)
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { name, value }),
        None => Ok(None),
    }
}
