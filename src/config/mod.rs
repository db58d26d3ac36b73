//! Configuration system (layered: defaults < TOML file < env).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};
use crate::pipeline::Destination;

/// Environment variables read by [`ParleyConfig::apply_env`].
pub const ENV_VARS: [&str; 6] = [
    "PARLEY_STREAMING",
    "PARLEY_THREAD",
    "PARLEY_REQUEST_TIMEOUT_MS",
    "PARLEY_STREAM_IDLE_TIMEOUT_MS",
    "PARLEY_DESTINATION",
    "PARLEY_TELEMETRY_INTERVAL_SECS",
];

/// Runtime settings for the request core.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    /// Stream responses chunk by chunk instead of one atomic call.
    #[builder(default = true)]
    pub streaming: bool,
    /// Keep a running conversation thread across requests.
    #[builder(default)]
    pub thread_enabled: bool,
    #[builder(default = 120_000)]
    pub request_timeout_ms: u64,
    /// Zero disables the idle timeout.
    #[builder(default = 30_000)]
    pub stream_idle_timeout_ms: u64,
    #[builder(default)]
    pub default_destination: Destination,
    #[builder(default = 300)]
    pub telemetry_interval_secs: u64,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ParleyError::Configuration(format!(
            "{key}: expected a boolean, got {other:?}"
        ))),
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| ParleyError::Configuration(format!("{key}: expected an integer, got {raw:?}")))
}

fn default_parley_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".parley"))
        .unwrap_or_else(|| PathBuf::from(".parley"))
}

impl ParleyConfig {
    /// `~/.parley/config.toml`.
    pub fn default_path() -> PathBuf {
        default_parley_dir().join("config.toml")
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Overlay `PARLEY_*` variables from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by the names in [`ENV_VARS`].
    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup("PARLEY_STREAMING") {
            self.streaming = parse_bool("PARLEY_STREAMING", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_THREAD") {
            self.thread_enabled = parse_bool("PARLEY_THREAD", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_u64("PARLEY_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_STREAM_IDLE_TIMEOUT_MS") {
            self.stream_idle_timeout_ms = parse_u64("PARLEY_STREAM_IDLE_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("PARLEY_DESTINATION") {
            self.default_destination = raw.trim().parse().map_err(|_| {
                ParleyError::Configuration(format!("PARLEY_DESTINATION: unknown destination {raw:?}"))
            })?;
        }
        if let Some(raw) = lookup("PARLEY_TELEMETRY_INTERVAL_SECS") {
            self.telemetry_interval_secs = parse_u64("PARLEY_TELEMETRY_INTERVAL_SECS", &raw)?;
        }
        Ok(self)
    }

    /// Defaults, then the default config file, then `.env` and the process
    /// environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::load(&Self::default_path())?.apply_env()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        (self.stream_idle_timeout_ms > 0).then(|| Duration::from_millis(self.stream_idle_timeout_ms))
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }
}
