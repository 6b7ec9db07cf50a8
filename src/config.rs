//! Configuration module for PeopleSense.
//!
//! Process settings come from environment variables with sensible defaults.
//! The presence setup (people, thresholds, sensors) is read from a JSON file.

use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the webhook listener (default: 51828)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "peoplesense.db")
    pub db_path: String,
    /// Path to the presence configuration file (default: "peoplesense.json")
    pub config_path: String,
    /// Whether the webhook listener is started at all (default: true)
    pub webhook_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 51828,
            db_path: "peoplesense.db".to_string(),
            config_path: "peoplesense.json".to_string(),
            webhook_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PEOPLESENSE_HTTP_PORT`: webhook port (default: 51828)
    /// - `PEOPLESENSE_DB_PATH`: database file path (default: "peoplesense.db")
    /// - `PEOPLESENSE_CONFIG`: presence config path (default: "peoplesense.json")
    /// - `PEOPLESENSE_WEBHOOK_ENABLED`: "false" disables the listener
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("PEOPLESENSE_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("PEOPLESENSE_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(config_path) = env::var("PEOPLESENSE_CONFIG") {
            cfg.config_path = config_path;
        }

        if let Ok(enabled) = env::var("PEOPLESENSE_WEBHOOK_ENABLED") {
            cfg.webhook_enabled = !enabled.eq_ignore_ascii_case("false");
        }

        cfg
    }
}

/// Which signal wins while a webhook is still fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookPrecedence {
    /// Skip probing while the last webhook is within the threshold.
    #[default]
    Suppress,
    /// Probe every cycle; only the probe/webhook ordering guards the state.
    Always,
}

/// A single DNS server or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Presence configuration file, platform level.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceConfig {
    #[serde(default)]
    pub threshold: Option<i64>,
    #[serde(default)]
    pub ping_interval: Option<i64>,
    #[serde(default)]
    pub ping_use_arp: bool,
    #[serde(default)]
    pub ignore_re_enter_exit_seconds: Option<u64>,
    #[serde(default)]
    pub anyone_sensor: Option<bool>,
    #[serde(default)]
    pub anyone_sensor_name: Option<String>,
    #[serde(default)]
    pub noone_sensor: Option<bool>,
    #[serde(default)]
    pub noone_sensor_name: Option<String>,
    #[serde(default)]
    pub probe_timeout_ms: Option<u64>,
    #[serde(default)]
    pub webhook_precedence: WebhookPrecedence,
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub people: Vec<PersonConfig>,
}

/// One person entry in the presence configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub threshold: Option<i64>,
    #[serde(default)]
    pub ping_interval: Option<i64>,
    #[serde(default)]
    pub ping_use_arp: Option<bool>,
    #[serde(default)]
    pub ignore_re_enter_exit_seconds: Option<u64>,
    #[serde(default)]
    pub exclude_from_webhook: bool,
    #[serde(default)]
    pub custom_dns: Option<OneOrMany>,
    #[serde(default)]
    pub enable_custom_dns: Option<bool>,
}

const DEFAULT_THRESHOLD_MINUTES: i64 = 15;
const DEFAULT_PING_INTERVAL_MS: i64 = 10_000;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;
/// One year.
const MAX_THRESHOLD_MINUTES: i64 = 525_600;
/// One day.
const MAX_DEBOUNCE_SECONDS: u64 = 86_400;

/// Fully resolved settings for one tracked target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    /// Display name, matched case-insensitively by the webhook.
    pub name: String,
    /// IP address, hostname or MAC address.
    pub target: String,
    pub threshold: chrono::Duration,
    /// `None` disables probing.
    pub probe_interval: Option<Duration>,
    pub probe_timeout: Duration,
    pub use_arp: bool,
    pub webhook_debounce: Duration,
    pub excluded_from_webhook: bool,
    pub custom_dns: Vec<String>,
    pub precedence: WebhookPrecedence,
}

/// Names of the enabled aggregate sensors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateConfig {
    pub anyone: Option<String>,
    pub no_one: Option<String>,
}

/// Zero counts as unset, so the platform value is inherited.
fn non_zero(v: Option<i64>) -> Option<i64> {
    v.filter(|v| *v != 0)
}

impl PresenceConfig {
    /// Read and parse the configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Resolve every person against the platform defaults.
    pub fn targets(&self) -> Result<Vec<TargetConfig>, ConfigError> {
        let threshold = non_zero(self.threshold).unwrap_or(DEFAULT_THRESHOLD_MINUTES);
        let interval = non_zero(self.ping_interval).unwrap_or(DEFAULT_PING_INTERVAL_MS);
        let debounce = self.ignore_re_enter_exit_seconds.unwrap_or(0);
        let timeout = self
            .probe_timeout_ms
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS);

        let mut seen = HashSet::new();
        let mut seen_targets = HashSet::new();
        let mut targets = Vec::with_capacity(self.people.len());

        for person in &self.people {
            let name = person
                .name
                .clone()
                .unwrap_or_else(|| "People Sensor".to_string());
            if !seen.insert(name.to_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate sensor name: {}",
                    name
                )));
            }

            let target = match person.target.as_deref() {
                Some(t) if !t.trim().is_empty() => t.trim().to_string(),
                _ => {
                    tracing::warn!("No target was given for {}. Defaulting to \"127.0.0.1\".", name);
                    "127.0.0.1".to_string()
                }
            };
            // queue and heartbeats are keyed by target
            if !seen_targets.insert(target.to_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "{} shares target {} with another person",
                    name, target
                )));
            }

            let threshold = non_zero(person.threshold).unwrap_or(threshold);
            if !(0..=MAX_THRESHOLD_MINUTES).contains(&threshold) {
                return Err(ConfigError::Invalid(format!(
                    "threshold for {} must be between 0 and {} minutes",
                    name, MAX_THRESHOLD_MINUTES
                )));
            }

            let interval = non_zero(person.ping_interval).unwrap_or(interval);
            let probe_interval = if interval < 0 {
                None
            } else {
                Some(Duration::from_millis(interval as u64))
            };

            let custom_dns = if person.enable_custom_dns == Some(false) {
                Vec::new()
            } else {
                person
                    .custom_dns
                    .clone()
                    .map(OneOrMany::into_vec)
                    .unwrap_or_default()
            };

            let debounce = person
                .ignore_re_enter_exit_seconds
                .filter(|s| *s > 0)
                .unwrap_or(debounce);
            if debounce > MAX_DEBOUNCE_SECONDS {
                return Err(ConfigError::Invalid(format!(
                    "ignoreReEnterExitSeconds for {} cannot exceed {}",
                    name, MAX_DEBOUNCE_SECONDS
                )));
            }

            targets.push(TargetConfig {
                name,
                target,
                threshold: chrono::Duration::minutes(threshold),
                probe_interval,
                probe_timeout: Duration::from_millis(timeout),
                use_arp: person.ping_use_arp.unwrap_or(self.ping_use_arp),
                webhook_debounce: Duration::from_secs(debounce),
                excluded_from_webhook: person.exclude_from_webhook,
                custom_dns,
                precedence: self.webhook_precedence,
            });
        }

        Ok(targets)
    }

    pub fn aggregates(&self) -> AggregateConfig {
        AggregateConfig {
            anyone: self.anyone_sensor.unwrap_or(true).then(|| {
                self.anyone_sensor_name
                    .clone()
                    .unwrap_or_else(|| "Anyone".to_string())
            }),
            no_one: self.noone_sensor.unwrap_or(false).then(|| {
                self.noone_sensor_name
                    .clone()
                    .unwrap_or_else(|| "No One".to_string())
            }),
        }
    }
}
