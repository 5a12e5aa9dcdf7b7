//! Feed configuration.
//!
//! Defaults suit a local backend. [`FeedConfig::from_env`] overrides them from
//! the environment; unset variables fall back to the default with a log line,
//! unparsable ones are an error.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;

pub const ENV_BASE_URL: &str = "FEED_BASE_URL";
pub const ENV_PAGE_SIZE: &str = "FEED_PAGE_SIZE";
pub const ENV_FETCH_TIMEOUT_MS: &str = "FEED_FETCH_TIMEOUT_MS";
pub const ENV_MUTATION_TIMEOUT_MS: &str = "FEED_MUTATION_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "FEED_POLL_INTERVAL_MS";

const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MUTATION_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Root of the REST API, e.g. `https://shelf.example/api`.
    pub base_url: String,
    /// Items requested per page.
    pub page_size: usize,
    /// Upper bound on one page fetch.
    #[serde(with = "millis", rename = "fetch_timeout_ms")]
    pub fetch_timeout: Duration,
    /// Upper bound on one like/save call.
    #[serde(with = "millis", rename = "mutation_timeout_ms")]
    pub mutation_timeout: Duration,
    /// Interval of the unread-counter poller.
    #[serde(with = "millis", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl FeedConfig {
    /// Load from `FEED_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            base_url: try_load(&lookup, ENV_BASE_URL, defaults.base_url)?,
            page_size: try_load(&lookup, ENV_PAGE_SIZE, defaults.page_size)?,
            fetch_timeout: Duration::from_millis(try_load(
                &lookup,
                ENV_FETCH_TIMEOUT_MS,
                as_millis(defaults.fetch_timeout),
            )?),
            mutation_timeout: Duration::from_millis(try_load(
                &lookup,
                ENV_MUTATION_TIMEOUT_MS,
                as_millis(defaults.mutation_timeout),
            )?),
            poll_interval: Duration::from_millis(try_load(
                &lookup,
                ENV_POLL_INTERVAL_MS,
                as_millis(defaults.poll_interval),
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::OutOfRange("base_url must not be empty".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::OutOfRange("page_size must be at least 1".into()));
        }
        for (name, value) in [
            ("fetch_timeout", self.fetch_timeout),
            ("mutation_timeout", self.mutation_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::OutOfRange(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| {
            warn!(key, value = %raw, "invalid configuration value");
            ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }
        }),
        None => {
            debug!(key, %default, "not set, using default");
            Ok(default)
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::as_millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
