//! Configuration validation

use crate::error::{ConfigError, Result};
use crate::Config;
use tracing::warn;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_scripts(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_scripts(config: &Config) -> Result<()> {
    let scripts = &config.scripts;

    if scripts.request_file.as_os_str().is_empty() {
        return Err(ConfigError::invalid("scripts.request_file cannot be empty"));
    }
    if scripts.response_file.as_os_str().is_empty() {
        return Err(ConfigError::invalid("scripts.response_file cannot be empty"));
    }

    let paths = scripts.paths();
    if paths.request == paths.response {
        return Err(ConfigError::invalid(format!(
            "request and response scripts must be different files: {}",
            paths.request.display()
        )));
    }

    if scripts.watch && scripts.poll_interval.is_zero() {
        return Err(ConfigError::invalid("scripts.poll_interval must be > 0"));
    }

    let limits = &scripts.limits;
    if limits.max_operations == 0 {
        return Err(ConfigError::invalid("scripts.limits.max_operations must be > 0"));
    }
    if limits.max_call_levels == 0 {
        return Err(ConfigError::invalid("scripts.limits.max_call_levels must be > 0"));
    }
    if limits.max_string_size == 0 {
        return Err(ConfigError::invalid("scripts.limits.max_string_size must be > 0"));
    }

    if limits.max_string_size < 1024 * 1024 {
        warn!(
            max_string_size = limits.max_string_size,
            "max_string_size below 1MiB, large HTML bodies will pass through unrewritten"
        );
    }

    Ok(())
}

fn validate_logging(config: &Config) -> Result<()> {
    match config.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        other => Err(ConfigError::invalid(format!(
            "Invalid log level: {other} (must be trace, debug, info, warn or error)"
        ))),
    }
}
