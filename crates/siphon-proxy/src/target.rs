//! Backend target descriptors and target selection

use http::Uri;
use siphon_core::{Context, Error, Result};
use std::fmt;
use std::sync::Arc;

/// Backend a request is forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    name: Option<String>,
    url: Uri,
}

impl ProxyTarget {
    /// Parse a target from an absolute `http://` URL
    pub fn new(url: &str) -> Result<Self> {
        let url: Uri = url
            .parse()
            .map_err(|e| Error::Config(format!("invalid proxy target url '{url}': {e}")))?;
        Self::from_uri(url)
    }

    /// Build a target from an already parsed URL
    pub fn from_uri(url: Uri) -> Result<Self> {
        if url.authority().is_none() {
            return Err(Error::Config(format!(
                "proxy target url '{url}' has no host"
            )));
        }
        match url.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(Error::Config(format!(
                    "proxy target url '{url}' uses unsupported scheme '{other}'"
                )))
            }
            None => {
                return Err(Error::Config(format!(
                    "proxy target url '{url}' has no scheme"
                )))
            }
        }

        Ok(Self { name: None, url })
    }

    /// Attach a human readable name used in logs
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.is_empty()).then_some(name);
        self
    }

    /// Display name, if configured
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Backend URL
    pub fn url(&self) -> &Uri {
        &self.url
    }
}

/// `name(url)` when named, `url` otherwise
impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}({})", self.url),
            None => write!(f, "{}", self.url),
        }
    }
}

/// Picks the backend for a request
pub trait TargetSelector: Send + Sync + fmt::Debug {
    /// Target for `ctx`, or `None` when no backend is available
    fn select(&self, ctx: &Context) -> Option<ProxyTarget>;
}

impl TargetSelector for ProxyTarget {
    fn select(&self, _ctx: &Context) -> Option<ProxyTarget> {
        Some(self.clone())
    }
}

impl<S: TargetSelector + ?Sized> TargetSelector for Arc<S> {
    fn select(&self, ctx: &Context) -> Option<ProxyTarget> {
        (**self).select(ctx)
    }
}
