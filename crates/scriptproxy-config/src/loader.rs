//! Configuration loading

use crate::error::{ConfigError, Result};
use crate::{Config, ConfigFormat};
use regex::Regex;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let content = fs::read_to_string(path)?;

    debug!(path = %path.display(), ?format, "Loading configuration");
    load_from_str(&content, format)
}

/// Expand environment variables in configuration string.
/// Supports syntax: ${VAR} and ${VAR:-default}
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| ConfigError::invalid(format!("Invalid regex: {e}")))?;

    let mut result = String::with_capacity(content.len());
    let mut last_match = 0;

    for cap in re.captures_iter(content) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match (env::var(var_name.as_str()), default_value) {
            (Ok(val), _) => val,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => return Err(ConfigError::Env(var_name.as_str().to_string())),
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);

    Ok(result)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Config> {
    let expanded = expand_env_vars(content)?;

    // An empty YAML document deserializes to unit, not a map.
    if expanded.trim().is_empty() {
        return Ok(Config::default());
    }

    let config = match format {
        ConfigFormat::Yaml => {
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::parse("YAML", e))?
        }
        ConfigFormat::Toml => {
            toml::from_str(&expanded).map_err(|e| ConfigError::parse("TOML", e))?
        }
        ConfigFormat::Json => {
            serde_json::from_str(&expanded).map_err(|e| ConfigError::parse("JSON", e))?
        }
    };

    Ok(config)
}

/// Load and validate configuration from a file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = load_from_file(path)?;
    crate::validator::validate_config(&config)?;
    Ok(config)
}

/// Load and validate `path` when given and present, defaults otherwise
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) if path.exists() => load_config(path),
        Some(path) => {
            info!(path = %path.display(), "Config file not found, using defaults");
            Ok(Config::default())
        }
        None => Ok(Config::default()),
    }
}
