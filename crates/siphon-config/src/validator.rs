//! Configuration validation

use crate::Config;
use siphon_core::{Error, Result};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server(config)?;
    validate_gzip(config)?;
    validate_proxy(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_server(config: &Config) -> Result<()> {
    if config.server.max_body_size == 0 {
        return Err(Error::Config("max_body_size must be > 0".to_string()));
    }

    if config.server.shutdown_timeout.is_zero() {
        return Err(Error::Config("shutdown_timeout must be > 0".to_string()));
    }

    Ok(())
}

fn validate_gzip(config: &Config) -> Result<()> {
    config.gzip.to_gzip_config()?.validate()?;

    for prefix in &config.gzip.skip_paths {
        if !prefix.starts_with('/') {
            return Err(Error::Config(format!(
                "gzip.skip_paths entry must start with '/': {prefix}"
            )));
        }
    }

    if !config.gzip.enabled && config.gzip.level.is_some() {
        tracing::warn!("gzip.level is set but compression is disabled");
    }

    Ok(())
}

fn validate_proxy(config: &Config) -> Result<()> {
    let proxy = &config.proxy;

    proxy.target()?;

    if proxy.timeout.is_zero() {
        return Err(Error::Config("proxy.timeout must be > 0".to_string()));
    }

    if proxy.connect_timeout.is_zero() {
        return Err(Error::Config("proxy.connect_timeout must be > 0".to_string()));
    }

    if proxy.timeout.as_secs() > 300 {
        tracing::warn!("proxy.timeout is very high (>5 minutes)");
    }

    Ok(())
}

fn validate_logging(config: &Config) -> Result<()> {
    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(Error::Config(format!(
            "Invalid log level: {} (expected one of {})",
            config.logging.level,
            LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{load_from_str, ConfigFormat};

    fn config() -> Config {
        load_from_str(
            "proxy:\n  target:\n    name: svcA\n    url: \"http://127.0.0.1:9000\"\n",
            ConfigFormat::Yaml,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&config()).is_ok());
    }

    #[test]
    fn test_zero_body_size() {
        let mut config = config();
        config.server.max_body_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_gzip_level_out_of_range() {
        let mut config = config();
        config.gzip.level = Some(10);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("gzip.level"));

        config.gzip.level = Some(-1);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_relative_skip_path() {
        let mut config = config();
        config.gzip.skip_paths = vec!["metrics".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_target_url() {
        let mut config = config();
        config.proxy.target.url = "https://backend:443".to_string();
        assert!(validate_config(&config).is_err());

        config.proxy.target.url = "backend:9000".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_timeouts() {
        let mut config = config();
        config.proxy.timeout = std::time::Duration::ZERO;
        assert!(validate_config(&config).is_err());

        let mut config = self::config();
        config.proxy.connect_timeout = std::time::Duration::ZERO;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_log_level() {
        let mut config = config();
        config.logging.level = "verbose".to_string();
        assert!(validate_config(&config).is_err());

        config.logging.level = "WARN".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
