use anyhow::{Context, Result};
use common::MAX_READ_PAYLOAD;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:43345";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // ip:port the QUIC endpoint binds to
    #[serde(default = "default_addr")]
    pub addr: String,
    // backend address, e.g. file:///var/lib/rkfs
    pub fs_uri: String,
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    // per-handle bound on stream and session close during a sweep
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: usize,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("max_read_bytes ({read}) exceeds the largest reply clients accept ({limit})")]
    ReadTooLarge { read: usize, limit: usize },
    #[error("max_request_bytes ({request}) is smaller than max_read_bytes ({read})")]
    RequestTooSmall { request: usize, read: usize },
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_idle_threshold_secs() -> u64 {
    240
}

fn default_reaper_interval_secs() -> u64 {
    240
}

fn default_close_timeout_secs() -> u64 {
    30
}

fn default_max_read_bytes() -> usize {
    2_000_000
}

fn default_max_request_bytes() -> usize {
    16 * 1024 * 1024
}

impl Config {
    /// Config with defaults for everything but the backend address.
    pub fn with_fs_uri(fs_uri: impl Into<String>) -> Self {
        Config {
            addr: default_addr(),
            fs_uri: fs_uri.into(),
            idle_threshold_secs: default_idle_threshold_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            close_timeout_secs: default_close_timeout_secs(),
            max_read_bytes: default_max_read_bytes(),
            max_request_bytes: default_max_request_bytes(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_threshold_secs == 0 {
            return Err(ConfigError::Zero("idle_threshold_secs"));
        }
        if self.reaper_interval_secs == 0 {
            return Err(ConfigError::Zero("reaper_interval_secs"));
        }
        if self.close_timeout_secs == 0 {
            return Err(ConfigError::Zero("close_timeout_secs"));
        }
        if self.max_read_bytes == 0 {
            return Err(ConfigError::Zero("max_read_bytes"));
        }
        if self.max_read_bytes > MAX_READ_PAYLOAD {
            return Err(ConfigError::ReadTooLarge {
                read: self.max_read_bytes,
                limit: MAX_READ_PAYLOAD,
            });
        }
        if self.max_request_bytes < self.max_read_bytes {
            return Err(ConfigError::RequestTooSmall {
                request: self.max_request_bytes,
                read: self.max_read_bytes,
            });
        }
        Ok(())
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let cfg: Config = serde_yaml::from_str(content).context("Failed to parse YAML config")?;
    cfg.validate().context("Invalid config")?;
    Ok(cfg)
}

pub fn load_config(path: &str) -> Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path}"))?;
    parse_config(&content)
}
