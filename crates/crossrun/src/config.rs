//! # Router Configuration
//!
//! Every field has a default, so an empty JSON object is a valid configuration.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug)]
pub enum Error {
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "Config parse error: {}", msg),
            Self::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Bounded retry for a destination that is not answering yet.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn max_induced_delay(&self) -> Duration {
        self.delay() * self.max_attempts.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub retry: RetryPolicy,
    /// Bound on any blocking wait for a remote result.
    pub sync_timeout_ms: u64,
    pub scheme: String,
    pub endpoint_suffix: String,
    /// Marker a sibling process advertises to be considered during discovery.
    pub discovery_marker: String,
    /// Maximum concurrently running worker jobs.
    pub worker_limit: usize,
}

impl RouterConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| Error::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.worker_limit == 0 {
            return Err(Error::Invalid("worker_limit must be at least 1".into()));
        }
        if self.scheme.is_empty() || self.endpoint_suffix.is_empty() {
            return Err(Error::Invalid("scheme and endpoint_suffix must be non-empty".into()));
        }
        Ok(())
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            sync_timeout_ms: 5_000,
            scheme: "ipc".into(),
            endpoint_suffix: "crossrun.remote".into(),
            discovery_marker: "crossrun.action.connection".into(),
            worker_limit: 16,
        }
    }
}
