//! # Siphon Reverse Proxy
//!
//! Forwards requests to a backend target:
//! - Single-target [`Forwarder`] and selector-driven [`Proxy`] handlers
//! - Path joining and query merging onto the target URL
//! - Hop-by-hop header stripping and X-Forwarded-* headers
//! - Streaming relay of the backend response
//! - Unreachable backends reported as `503 Service Unavailable`

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod client;
pub mod proxy;
pub mod target;

pub use client::{HttpClient, TransportConfig};
pub use proxy::{forward, Forwarder, Proxy, ProxyConfig};
pub use target::{ProxyTarget, TargetSelector};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{HttpClient, TransportConfig};
    pub use crate::proxy::{Forwarder, Proxy, ProxyConfig};
    pub use crate::target::{ProxyTarget, TargetSelector};
}
