//! Configuration for the gzip middleware

use crate::compressor::MAX_LEVEL;
use siphon_core::{default_skipper, Error, Result, Skipper};
use std::fmt;

/// Gzip middleware configuration
#[derive(Clone)]
pub struct GzipConfig {
    /// Requests for which the middleware steps aside
    pub skipper: Skipper,

    /// Compression level 0-9, `None` for the library default
    pub level: Option<u32>,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            skipper: default_skipper(),
            level: None,
        }
    }
}

impl GzipConfig {
    /// Replace the skipper
    #[must_use]
    pub fn with_skipper(mut self, skipper: Skipper) -> Self {
        self.skipper = skipper;
        self
    }

    /// Use an explicit compression level
    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    /// Check the level up front instead of failing on the first request
    pub fn validate(&self) -> Result<()> {
        match self.level {
            Some(level) if level > MAX_LEVEL => Err(Error::Config(format!(
                "invalid gzip compression level {level} (expected 0..={MAX_LEVEL})"
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for GzipConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipConfig")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GzipConfig::default();
        assert_eq!(config.level, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_level_zero_is_explicit() {
        let config = GzipConfig::default().with_level(0);
        assert_eq!(config.level, Some(0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_level() {
        let err = GzipConfig::default().with_level(11).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
