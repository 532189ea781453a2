//! # Siphon Core
//!
//! Core types, traits, and error handling for the Siphon gateway.
//!
//! This crate provides the foundational abstractions used throughout:
//! - Per-request [`Context`] and the [`Response`] sink
//! - The [`ResponseWriter`] chain with optional hijack / close-notify capabilities
//! - Middleware and handler traits, and the [`Pipeline`] that runs them
//! - Error types and the standard error renderer

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod context;
pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod recorder;
pub mod response;

pub use context::{Body, Context, X_REQUEST_ID};
pub use error::{Capability, Error, Result};
pub use middleware::{
    default_skipper, handler_fn, skip_path_prefixes, Handler, Middleware, Next, Skipper,
};
pub use pipeline::{render_error, Pipeline, PipelineBuilder};
pub use recorder::Recorder;
pub use response::{
    BoxConnection, CloseNotifier, CloseNotify, Connection, Hijack, Hijacked, Response,
    ResponseWriter,
};

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::{Method, Request, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::context::{Body, Context};
    pub use crate::error::{Error, Result};
    pub use crate::middleware::{default_skipper, handler_fn, Handler, Middleware, Next, Skipper};
    pub use crate::pipeline::Pipeline;
    pub use crate::response::{Response, ResponseWriter};
}
