//! # Siphon Runtime
//!
//! Serves a [`Pipeline`](siphon_core::Pipeline) over HTTP/1:
//! - Connection-backed root response writer with upgrade and disconnect support
//! - Request body limits and in-flight accounting
//! - Server lifecycle (startup, running, shutdown)
//! - Graceful shutdown with signal handling

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod conn;
pub mod handler;
pub mod server;
pub mod shutdown;

pub use conn::{ChannelBody, ConnWriter};
pub use handler::RequestHandler;
pub use server::{Server, ServerConfig};
pub use shutdown::{ShutdownSignal, SignalHandler};

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Server is initializing
    Initializing,
    /// Server is running
    Running,
    /// Server is shutting down
    ShuttingDown,
    /// Server is stopped
    Stopped,
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::server::{Server, ServerConfig};
    pub use crate::shutdown::{ShutdownSignal, SignalHandler};
    pub use crate::RuntimeState;
}
