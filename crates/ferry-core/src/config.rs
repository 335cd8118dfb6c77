//! Relay configuration.
//!
//! ```rust,ignore
//! let config = RelayConfig::builder()
//!     .batch_size(50)
//!     .max_retries(5)
//!     .poll_interval(Duration::from_secs(15))
//!     .topic_prefix("acme.")
//!     .build()?;
//! ```
//!
//! The same settings can come from TOML; durations are given in seconds
//! (`*_secs`) or milliseconds (`publish_timeout_ms`):
//!
//! ```toml
//! batch_size = 50
//! max_retries = 5
//! poll_interval_secs = 15
//! topic_prefix = "acme."
//! ```

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use thiserror::Error;

/// Upper bound for `claim_ttl`.
pub const MAX_CLAIM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid relay config: {0}")]
    Invalid(String),

    #[error("could not parse relay config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct RelayConfig {
    batch_size: usize,
    max_retries: u32,
    poll_interval: Duration,
    topic_prefix: String,
    publish_timeout: Duration,
    tick_budget: Duration,
    claim_ttl: Duration,
    /// `claim_ttl` as a wall-clock offset, checked in `build`.
    claim_lease: ChronoDuration,
    dead_letter_permanent_failures: bool,
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Parse and validate a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let raw: RawRelayConfig = toml::from_str(s)?;
        raw.into_builder().build()
    }

    /// Upper bound on entries claimed per tick.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Failed attempts allowed before an entry is dead-lettered.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Per publish call; an elapsed timeout counts as a failed attempt.
    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    /// Wall-clock budget for one tick. Entries not attempted in time are
    /// released for the next tick.
    pub fn tick_budget(&self) -> Duration {
        self.tick_budget
    }

    /// How long a claim protects rows from other relays.
    pub fn claim_ttl(&self) -> Duration {
        self.claim_ttl
    }

    pub(crate) fn claim_lease(&self) -> ChronoDuration {
        self.claim_lease
    }

    /// Dead-letter permanent failures on first sight instead of retrying.
    pub fn dead_letter_permanent_failures(&self) -> bool {
        self.dead_letter_permanent_failures
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            poll_interval: Duration::from_secs(10),
            topic_prefix: String::new(),
            publish_timeout: Duration::from_secs(5),
            tick_budget: Duration::from_secs(30),
            claim_ttl: Duration::from_secs(60),
            claim_lease: ChronoDuration::seconds(60),
            dead_letter_permanent_failures: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn batch_size(mut self, value: usize) -> Self {
        self.config.batch_size = value;
        self
    }

    pub fn max_retries(mut self, value: u32) -> Self {
        self.config.max_retries = value;
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    pub fn topic_prefix(mut self, value: impl Into<String>) -> Self {
        self.config.topic_prefix = value.into();
        self
    }

    pub fn publish_timeout(mut self, value: Duration) -> Self {
        self.config.publish_timeout = value;
        self
    }

    pub fn tick_budget(mut self, value: Duration) -> Self {
        self.config.tick_budget = value;
        self
    }

    pub fn claim_ttl(mut self, value: Duration) -> Self {
        self.config.claim_ttl = value;
        self
    }

    pub fn dead_letter_permanent_failures(mut self, value: bool) -> Self {
        self.config.dead_letter_permanent_failures = value;
        self
    }

    pub fn build(self) -> Result<RelayConfig, ConfigError> {
        let mut c = self.config;
        if c.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".into()));
        }
        if c.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be >= 1".into()));
        }
        for (name, d) in [
            ("poll_interval", c.poll_interval),
            ("publish_timeout", c.publish_timeout),
            ("tick_budget", c.tick_budget),
            ("claim_ttl", c.claim_ttl),
        ] {
            if d.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        if c.publish_timeout > c.tick_budget {
            return Err(ConfigError::Invalid(
                "publish_timeout must not exceed tick_budget".into(),
            ));
        }
        // Claims must outlive the tick that holds them.
        if c.claim_ttl <= c.tick_budget {
            return Err(ConfigError::Invalid(
                "claim_ttl must be longer than tick_budget".into(),
            ));
        }
        if c.claim_ttl > MAX_CLAIM_TTL {
            return Err(ConfigError::Invalid(format!(
                "claim_ttl must be at most {}s",
                MAX_CLAIM_TTL.as_secs()
            )));
        }
        c.claim_lease = ChronoDuration::from_std(c.claim_ttl)
            .map_err(|e| ConfigError::Invalid(format!("claim_ttl out of range: {e}")))?;
        Ok(c)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRelayConfig {
    batch_size: Option<usize>,
    max_retries: Option<u32>,
    poll_interval_secs: Option<u64>,
    topic_prefix: Option<String>,
    publish_timeout_ms: Option<u64>,
    tick_budget_secs: Option<u64>,
    claim_ttl_secs: Option<u64>,
    dead_letter_permanent_failures: Option<bool>,
}

impl RawRelayConfig {
    fn into_builder(self) -> RelayConfigBuilder {
        let mut b = RelayConfig::builder();
        if let Some(v) = self.batch_size {
            b = b.batch_size(v);
        }
        if let Some(v) = self.max_retries {
            b = b.max_retries(v);
        }
        if let Some(v) = self.poll_interval_secs {
            b = b.poll_interval(Duration::from_secs(v));
        }
        if let Some(v) = self.topic_prefix {
            b = b.topic_prefix(v);
        }
        if let Some(v) = self.publish_timeout_ms {
            b = b.publish_timeout(Duration::from_millis(v));
        }
        if let Some(v) = self.tick_budget_secs {
            b = b.tick_budget(Duration::from_secs(v));
        }
        if let Some(v) = self.claim_ttl_secs {
            b = b.claim_ttl(Duration::from_secs(v));
        }
        if let Some(v) = self.dead_letter_permanent_failures {
            b = b.dead_letter_permanent_failures(v);
        }
        b
    }
}
