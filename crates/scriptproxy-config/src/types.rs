//! Configuration types

use scriptproxy_scripting::{EngineLimits, ScriptPaths};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Proxy listener settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Script locations, reloading and sandbox limits
    #[serde(default)]
    pub scripts: ScriptsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Proxy listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the intercepting proxy listens on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Log every gate decision and rewrite at info level
    #[serde(default)]
    pub verbose: bool,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8888))
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            verbose: false,
        }
    }
}

/// Script configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Directory holding the script files
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Request gate file name, relative to `dir`
    #[serde(default = "default_request_file")]
    pub request_file: PathBuf,

    /// Response rewriter file name, relative to `dir`
    #[serde(default = "default_response_file")]
    pub response_file: PathBuf,

    /// Reload scripts when their files change
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Reuse one engine per script version
    #[serde(default = "default_true")]
    pub cache_engines: bool,

    /// Fallback polling interval for file watching
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Sandbox limits
    #[serde(default)]
    pub limits: EngineLimits,
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_request_file() -> PathBuf {
    PathBuf::from(scriptproxy_scripting::reload::REQUEST_FILE)
}

fn default_response_file() -> PathBuf {
    PathBuf::from(scriptproxy_scripting::reload::RESPONSE_FILE)
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            request_file: default_request_file(),
            response_file: default_response_file(),
            watch: true,
            cache_engines: true,
            poll_interval: default_poll_interval(),
            limits: EngineLimits::default(),
        }
    }
}

impl ScriptsConfig {
    /// Resolved paths of both script files
    pub fn paths(&self) -> ScriptPaths {
        ScriptPaths {
            request: self.dir.join(&self.request_file),
            response: self.dir.join(&self.response_file),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}
