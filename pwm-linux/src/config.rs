//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Controller configuration. File: ~/.config/pwm-controller/config.toml or /etc/pwm-controller/config.toml.
/// Env overrides: PWMCTL_HOST, PWMCTL_PORT, PWMCTL_OFFLINE, PWMCTL_TIMEOUT_MS, PWMCTL_PING_INTERVAL_SECS.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Device host name or IPv4/IPv6 address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Device UDP port (default 8888).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Skip the startup probe and config request; start disconnected.
    #[serde(default)]
    pub offline: bool,
    /// Abort startup when the initial probe gets no acknowledgment.
    #[serde(default)]
    pub require_device: bool,
    /// Round-trip timeout per exchange (default 2000 ms).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Liveness probe cadence (default 5 s).
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// When set, a duty-cycle update only succeeds if the device replies with exactly this text.
    #[serde(default)]
    pub update_ack: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8888
}
fn default_timeout_ms() -> u64 {
    2000
}
fn default_ping_interval_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            offline: false,
            require_device: false,
            timeout_ms: default_timeout_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            update_ack: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Zero("timeout_ms"));
        }
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::Zero("ping_interval_secs"));
        }
        Ok(())
    }
}

/// Load config: an explicit path must exist and parse. Otherwise merge default, then the first
/// config file found (if any), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(path) => read_file(path)?,
        None => load_file().unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    c.validate()?;
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("PWMCTL_HOST") {
        if !s.is_empty() {
            c.host = s;
        }
    }
    if let Some(s) = var("PWMCTL_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Some(s) = var("PWMCTL_OFFLINE") {
        match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => c.offline = true,
            "0" | "false" | "no" | "off" => c.offline = false,
            _ => {}
        }
    }
    if let Some(s) = var("PWMCTL_TIMEOUT_MS") {
        if let Ok(ms) = s.parse::<u64>() {
            c.timeout_ms = ms;
        }
    }
    if let Some(s) = var("PWMCTL_PING_INTERVAL_SECS") {
        if let Ok(secs) = s.parse::<u64>() {
            c.ping_interval_secs = secs;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/pwm-controller/config.toml"));
    }
    out.push(PathBuf::from("/etc/pwm-controller/config.toml"));
    out
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match read_file(&p) {
                Ok(c) => return Some(c),
                Err(e) => log::warn!("ignoring config: {}", e),
            }
            break;
        }
    }
    None
}
