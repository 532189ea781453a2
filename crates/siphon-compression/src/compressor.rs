//! Gzip compressor stream

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use siphon_core::{Error, Result};
use std::fmt;
use std::io::{self, Write};

/// Content-Encoding token of the supported scheme
pub const GZIP_SCHEME: &str = "gzip";

/// Highest accepted compression level
pub const MAX_LEVEL: u32 = 9;

/// Where compressed bytes end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Client,
    Discard,
}

/// Incremental gzip encoder.
///
/// Compressed output accumulates in an internal buffer; the owner drains it
/// with [`GzipEncoder::take_output`] and forwards it to the client. After
/// [`GzipEncoder::discard`] everything produced is thrown away instead.
pub struct GzipEncoder {
    encoder: GzEncoder<Vec<u8>>,
    target: Target,
    finished: bool,
}

impl GzipEncoder {
    /// Create an encoder. `None` selects the library's default level.
    pub fn new(level: Option<u32>) -> Result<Self> {
        let compression = match level {
            None => Compression::default(),
            Some(level) if level <= MAX_LEVEL => Compression::new(level),
            Some(level) => {
                return Err(Error::Config(format!(
                    "invalid gzip compression level {level} (expected 0..={MAX_LEVEL})"
                )))
            }
        };

        Ok(Self {
            encoder: GzEncoder::new(Vec::new(), compression),
            target: Target::Client,
            finished: false,
        })
    }

    /// Compress `buf`
    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "gzip stream already finished",
            ));
        }
        self.encoder.write_all(buf)
    }

    /// Sync-flush so every byte written so far can be decoded by the client
    pub fn flush(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.encoder.flush()
    }

    /// Drain compressed bytes produced so far
    pub fn take_output(&mut self) -> Bytes {
        let out = std::mem::take(self.encoder.get_mut());
        match self.target {
            Target::Client => Bytes::from(out),
            Target::Discard => Bytes::new(),
        }
    }

    /// Write the gzip trailer and drain the remaining output
    pub fn finish(&mut self) -> io::Result<Bytes> {
        if !self.finished {
            self.encoder.try_finish()?;
            self.finished = true;
        }
        Ok(self.take_output())
    }

    /// Send everything produced from now on, including what is still
    /// buffered, to a discard sink
    pub fn discard(&mut self) {
        self.target = Target::Discard;
        self.encoder.get_mut().clear();
    }

    /// Whether output is being thrown away
    pub fn is_discarding(&self) -> bool {
        self.target == Target::Discard
    }

    /// Whether the trailer has been written
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl fmt::Debug for GzipEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipEncoder")
            .field("target", &self.target)
            .field("finished", &self.finished)
            .field("pending", &self.encoder.get_ref().len())
            .finish()
    }
}
