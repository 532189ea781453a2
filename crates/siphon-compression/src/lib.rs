//! Gzip response compression for Siphon pipelines
//!
//! The [`Gzip`] middleware compresses response bodies on the fly:
//! - Accept-Encoding negotiation, with `Vary: Accept-Encoding` on every response
//! - Streaming: writes and flushes go through the encoder as they happen
//! - Content-Type sniffed from the first body chunk when the handler sets none
//! - Content-Length dropped once the body is re-encoded
//! - Full rollback when the handler ends up writing no body
//! - Hijacking and close notification passed through to the original writer

pub mod compressor;
pub mod config;
pub mod middleware;
pub mod sniff;
pub mod writer;

pub use compressor::{GzipEncoder, GZIP_SCHEME, MAX_LEVEL};
pub use config::GzipConfig;
pub use middleware::{accepts_gzip, Gzip};
pub use sniff::detect_content_type;
pub use writer::GzipResponseWriter;
