//! Scaler configuration.
//!
//! Required settings come from the process environment and are validated
//! once at startup into an immutable [`ScalerConfig`]. Poll timing can be
//! tuned from an optional TOML file:
//!
//! ```toml
//! [polling]
//! start_interval = "15s"
//! start_deadline = "5m"
//! settle_interval = "5s"
//! settle_deadline = "1000s"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_INSTANCE_PREFIX: &str = "RDSMultitenantDBInstanceNamePrefix";
pub const ENV_ENVIRONMENT: &str = "Environment";
pub const ENV_NOTIFICATIONS_HOOK: &str = "MattermostNotificationsHook";
pub const ENV_ALERTS_HOOK: &str = "MattermostAlertsHook";
pub const ENV_QUEUE_URL: &str = "QueueURL";
pub const ENV_CACHE_PROPORTION: &str = "MemoryCacheProportion";
pub const ENV_SAFETY_PERCENTAGE: &str = "ConnectionsSafetyPercentage";
pub const ENV_CONNECTIONS_DIVIDER: &str = "MemoryConnectionsDivider";

/// Every variable that must be present.
pub const REQUIRED_ENV: [&str; 8] = [
    ENV_INSTANCE_PREFIX,
    ENV_ENVIRONMENT,
    ENV_NOTIFICATIONS_HOOK,
    ENV_ALERTS_HOOK,
    ENV_QUEUE_URL,
    ENV_CACHE_PROPORTION,
    ENV_SAFETY_PERCENTAGE,
    ENV_CONNECTIONS_DIVIDER,
];

/// Configuration errors. All of them are fatal before any external call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} was not set")]
    Missing(&'static str),

    #[error("environment variable {name} is not a positive number: {value:?}")]
    InvalidRatio { name: &'static str, value: String },

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Ratios used to recompute alarm thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmRatios {
    /// Share of instance memory reserved for cache headroom.
    pub cache_proportion: f64,
    /// Fraction of the theoretical connection limit to alarm at.
    pub connections_safety_percentage: f64,
    /// Bytes of memory per allowed connection.
    pub memory_connections_divider: f64,
}

/// Poll timing for the state-transition waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Interval between reads while waiting for a modification to begin.
    pub start_interval: Duration,
    /// Deadline for a modification to begin.
    pub start_deadline: Duration,
    /// Interval between reads while waiting for the instance to settle.
    pub settle_interval: Duration,
    /// Deadline for the instance to become available again.
    pub settle_deadline: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            start_interval: Duration::from_secs(15),
            start_deadline: Duration::from_secs(300),
            settle_interval: Duration::from_secs(5),
            settle_deadline: Duration::from_secs(1000),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PollingFile {
    #[serde(default)]
    polling: PollingSection,
}

#[derive(Debug, Default, Deserialize)]
struct PollingSection {
    start_interval: Option<String>,
    start_deadline: Option<String>,
    settle_interval: Option<String>,
    settle_deadline: Option<String>,
}

impl PollingConfig {
    /// Parse a `[polling]` TOML document; unset fields keep their defaults.
    ///
    /// Zero intervals and deadlines are rejected.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: PollingFile = toml::from_str(content)?;
        let mut config = Self::default();
        let section = file.polling;

        let fields = [
            ("start_interval", section.start_interval, &mut config.start_interval),
            ("start_deadline", section.start_deadline, &mut config.start_deadline),
            ("settle_interval", section.settle_interval, &mut config.settle_interval),
            ("settle_deadline", section.settle_deadline, &mut config.settle_deadline),
        ];
        for (field, value, slot) in fields {
            if let Some(value) = value {
                *slot = parse_duration(&value)
                    .filter(|d| !d.is_zero())
                    .ok_or(ConfigError::InvalidDuration { field, value })?;
            }
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

/// Immutable configuration for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerConfig {
    /// Only cluster members whose id contains this prefix are peer candidates.
    pub instance_name_prefix: String,
    /// Deployment environment tag, echoed in notifications.
    pub environment: String,
    pub notifications_hook: String,
    pub alerts_hook: String,
    pub queue_url: String,
    pub ratios: AlarmRatios,
    pub polling: PollingConfig,
}

impl ScalerConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        for name in REQUIRED_ENV {
            get(name)?;
        }

        Ok(Self {
            instance_name_prefix: get(ENV_INSTANCE_PREFIX)?,
            environment: get(ENV_ENVIRONMENT)?,
            notifications_hook: get(ENV_NOTIFICATIONS_HOOK)?,
            alerts_hook: get(ENV_ALERTS_HOOK)?,
            queue_url: get(ENV_QUEUE_URL)?,
            ratios: AlarmRatios {
                cache_proportion: parse_ratio(ENV_CACHE_PROPORTION, get(ENV_CACHE_PROPORTION)?)?,
                connections_safety_percentage: parse_ratio(
                    ENV_SAFETY_PERCENTAGE,
                    get(ENV_SAFETY_PERCENTAGE)?,
                )?,
                memory_connections_divider: parse_ratio(
                    ENV_CONNECTIONS_DIVIDER,
                    get(ENV_CONNECTIONS_DIVIDER)?,
                )?,
            },
            polling: PollingConfig::default(),
        })
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }
}

fn parse_ratio(name: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(ConfigError::InvalidRatio { name, value }),
    }
}

/// Parse a duration string like "5s", "500ms", "2m", or a bare number of
/// seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
