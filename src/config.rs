use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::backoff::{BackoffPolicy, InvalidRetryConfig};
use crate::sensor::Sensor;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can not read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("can not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("need to provide at least one sensor")]
    NoSensors,
    #[error("need to provide a bluetooth adapter")]
    NoAdapter,
    #[error("sensor address must not be empty")]
    EmptyAddress,
    #[error("sensor {0} is listed more than once")]
    DuplicateSensor(String),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("invalid retry config: {0}")]
    Retry(#[from] InvalidRetryConfig),
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub min_secs: u64,
    pub max_secs: u64,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            min_secs: 30,
            max_secs: 30 * 60,
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> Result<BackoffPolicy, InvalidRetryConfig> {
        BackoffPolicy::new(
            Duration::from_secs(self.min_secs),
            Duration::from_secs(self.max_secs),
            self.factor,
        )
    }
}

fn default_adapter() -> String {
    "hci0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    2 * 60
}

fn default_drain_interval_secs() -> u64 {
    10
}

fn default_scan_timeout_secs() -> u64 {
    15
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_adapter")]
    pub adapter: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    // defaults to five refresh intervals
    #[serde(default)]
    pub stale_after_secs: Option<u64>,
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    pub sensors: Vec<Sensor>,
}

impl Config {
    pub fn parse(config_str: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_yaml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &str) -> Result<Config, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
        Config::parse(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }
        if self.adapter.is_empty() {
            return Err(ConfigError::NoAdapter);
        }

        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if sensor.address.is_empty() {
                return Err(ConfigError::EmptyAddress);
            }
            if !seen.insert(sensor.address.to_ascii_uppercase()) {
                return Err(ConfigError::DuplicateSensor(sensor.address.clone()));
            }
        }

        for (name, value) in [
            ("refresh_interval_secs", self.refresh_interval_secs),
            ("drain_interval_secs", self.drain_interval_secs),
            ("scan_timeout_secs", self.scan_timeout_secs),
            ("stale_after_secs", self.stale_after_secs.unwrap_or(1)),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }

        if self.refresh_interval() < Duration::from_secs(60) {
            warn!(
                refresh = ?self.refresh_interval(),
                "refresh intervals below one minute are discouraged"
            );
        }

        self.retry.policy()?;
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        match self.stale_after_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.refresh_interval().checked_mul(5).unwrap_or(Duration::MAX),
        }
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}
