//! Client configuration.
//!
//! Defaults can be overridden from the environment (best-effort: values that
//! fail to parse or validate are ignored and the default is kept).
//!
//! Supported:
//! - CIPHERFLOW_URL
//! - CIPHERFLOW_API_TOKEN
//! - CIPHERFLOW_REQUEST_TIMEOUT_SECS
//! - CIPHERFLOW_POLL_MAX_TIMEOUT_SECS
//! - CIPHERFLOW_POLL_INITIAL_INTERVAL_MS
//! - CIPHERFLOW_POLL_MAX_INTERVAL_MS
//! - CIPHERFLOW_POLL_GROWTH_FACTOR

use std::time::Duration;

use crate::CipherflowError;

/// Growth factor applied to the poll interval after each non-terminal read.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.05;

/// Backoff and timeout parameters for status polling.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Give up once this much time has elapsed without a terminal status
    pub max_timeout: Duration,

    /// Sleep before the second status read
    pub initial_interval: Duration,

    /// Upper bound for the sleep between reads
    pub max_interval: Duration,

    /// Multiplicative growth of the sleep, never below 1.0
    pub growth_factor: f64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_timeout: Duration::from_secs(600),
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

impl PollSettings {
    pub fn new(max_timeout: Duration, initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_timeout,
            initial_interval,
            max_interval,
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }

    /// Check the settings describe a non-decreasing, bounded backoff.
    ///
    /// # Errors
    /// Returns `CipherflowError::Configuration` describing the first problem found.
    pub fn validate(&self) -> Result<(), CipherflowError> {
        if self.initial_interval.is_zero() {
            return Err(CipherflowError::Configuration(
                "initial poll interval must be positive".into(),
            ));
        }
        if self.initial_interval > self.max_interval {
            return Err(CipherflowError::Configuration(format!(
                "initial poll interval {:?} exceeds max interval {:?}",
                self.initial_interval, self.max_interval
            )));
        }
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(CipherflowError::Configuration(format!(
                "poll growth factor must be finite and >= 1.0, got {}",
                self.growth_factor
            )));
        }
        Ok(())
    }

    /// Interval to sleep after `current`, capped at `max_interval`.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        let grown_nanos = (current.as_nanos() as f64 * self.growth_factor).round();
        let grown = if grown_nanos >= u64::MAX as f64 {
            self.max_interval
        } else {
            Duration::from_nanos(grown_nanos as u64)
        };
        grown.max(current).min(self.max_interval)
    }
}

/// Configuration for talking to the remote computation service.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the service API
    pub base_url: String,

    /// Bearer token, if the service requires authentication
    pub api_token: Option<String>,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,

    pub poll: PollSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(30),
            poll: PollSettings::default(),
        }
    }
}

// The token stays out of logs and panics.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("poll", &self.poll)
            .finish()
    }
}

fn env_positive_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&v| v > 0)
}

impl ClientConfig {
    /// Load config overrides from environment (best-effort).
    #[must_use]
    pub fn from_env_or_default() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("CIPHERFLOW_URL") {
            let v = v.trim();
            if url::Url::parse(v).is_ok() {
                cfg.base_url = v.trim_end_matches('/').to_string();
            } else {
                tracing::warn!("Ignoring invalid CIPHERFLOW_URL");
            }
        }

        if let Ok(v) = std::env::var("CIPHERFLOW_API_TOKEN") {
            if !v.trim().is_empty() {
                cfg.api_token = Some(v.trim().to_string());
            }
        }

        if let Some(secs) = env_positive_u64("CIPHERFLOW_REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout = Duration::from_secs(secs);
        }

        let mut poll = cfg.poll.clone();
        if let Some(secs) = env_positive_u64("CIPHERFLOW_POLL_MAX_TIMEOUT_SECS") {
            poll.max_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_positive_u64("CIPHERFLOW_POLL_INITIAL_INTERVAL_MS") {
            poll.initial_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_positive_u64("CIPHERFLOW_POLL_MAX_INTERVAL_MS") {
            poll.max_interval = Duration::from_millis(ms);
        }
        if let Ok(v) = std::env::var("CIPHERFLOW_POLL_GROWTH_FACTOR") {
            if let Ok(x) = v.trim().parse::<f64>() {
                poll.growth_factor = x;
            }
        }

        match poll.validate() {
            Ok(()) => cfg.poll = poll,
            Err(e) => tracing::warn!("Ignoring poll overrides from environment: {e}"),
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_settings_valid() {
        let settings = PollSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.growth_factor, 1.05);
    }

    #[test]
    fn test_next_interval_grows_and_caps() {
        let settings = PollSettings::new(
            Duration::from_secs(60),
            Duration::from_millis(100),
            Duration::from_millis(110),
        );

        let second = settings.next_interval(Duration::from_millis(100));
        assert_eq!(second, Duration::from_millis(105));

        let third = settings.next_interval(second);
        assert_eq!(third, Duration::from_millis(110));
        assert_eq!(settings.next_interval(third), Duration::from_millis(110));
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut settings = PollSettings::default();
        settings.growth_factor = 0.9;
        assert!(matches!(
            settings.validate(),
            Err(CipherflowError::Configuration(_))
        ));

        let mut settings = PollSettings::default();
        settings.initial_interval = Duration::from_secs(60);
        assert!(settings.validate().is_err());

        let mut settings = PollSettings::default();
        settings.initial_interval = Duration::ZERO;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_client_config_debug_redacts_token() {
        let cfg = ClientConfig {
            api_token: Some("super-secret-token".into()),
            ..ClientConfig::default()
        };
        let out = format!("{cfg:?}");
        assert!(!out.contains("super-secret-token"));
        assert!(out.contains("<redacted>"));
    }
}
