//! In-memory response writer

use crate::error::{Error, Result};
use crate::response::{BoxConnection, CloseNotifier, CloseNotify, Hijack, Hijacked, ResponseWriter};
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::io;
use tokio_util::sync::CancellationToken;

/// Root writer that keeps everything in memory.
///
/// Mirrors the wire behaviour of a connection writer: the head is captured
/// when the first body byte, flush or close happens, so later header edits
/// show up in [`Recorder::headers`] but not in [`Recorder::sent_headers`].
#[derive(Default)]
pub struct Recorder {
    headers: HeaderMap,
    status: Option<StatusCode>,
    sent_headers: Option<HeaderMap>,
    body: Vec<u8>,
    flushes: usize,
    closed: bool,
    conn: Option<BoxConnection>,
    close_token: Option<CancellationToken>,
}

impl Recorder {
    /// Create an empty recorder without optional capabilities
    pub fn new() -> Self {
        Self::default()
    }

    /// Support connection takeover, handing out `conn`
    pub fn with_hijack(mut self, conn: BoxConnection) -> Self {
        self.conn = Some(conn);
        self
    }

    /// Support disconnect notification driven by `token`
    pub fn with_close_notify(mut self, token: CancellationToken) -> Self {
        self.close_token = Some(token);
        self
    }

    /// Recorded status line
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Live header map
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Headers as they were when the head went out
    pub fn sent_headers(&self) -> Option<&HeaderMap> {
        self.sent_headers.as_ref()
    }

    /// Body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Number of flushes
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Whether the body was closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn send_head(&mut self) {
        if self.sent_headers.is_none() {
            self.status.get_or_insert(StatusCode::OK);
            self.sent_headers = Some(self.headers.clone());
        }
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("flushes", &self.flushes)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl ResponseWriter for Recorder {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        self.status = Some(status);
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "body closed"));
        }
        self.send_head();
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.send_head();
        self.flushes += 1;
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.send_head();
        self.closed = true;
        Ok(())
    }

    fn as_hijack(&mut self) -> Option<&mut dyn Hijack> {
        if self.conn.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_close_notifier(&self) -> Option<&dyn CloseNotifier> {
        if self.close_token.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl Hijack for Recorder {
    fn hijack(&mut self) -> Result<Hijacked> {
        self.conn
            .take()
            .map(Hijacked::ready)
            .ok_or_else(|| Error::Runtime("connection already hijacked".to_string()))
    }
}

impl CloseNotifier for Recorder {
    fn close_notify(&self) -> CloseNotify {
        CloseNotify::new(self.close_token.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use http::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_head_captured_on_first_byte() {
        let mut rec = Recorder::new();
        rec.write_status(StatusCode::ACCEPTED).await.unwrap();
        rec.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        rec.write(b"abc").await.unwrap();
        rec.headers_mut()
            .insert("x-late", HeaderValue::from_static("1"));

        let sent = rec.sent_headers().unwrap();
        assert_eq!(sent.get(CONTENT_TYPE).unwrap(), "text/plain");
        assert!(sent.get("x-late").is_none());
        assert!(rec.headers().get("x-late").is_some());
        assert_eq!(rec.status(), Some(StatusCode::ACCEPTED));
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let mut rec = Recorder::new();
        rec.close().await.unwrap();
        let err = rec.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_hijack_once() {
        let (client, server) = tokio::io::duplex(64);
        let mut rec = Recorder::new().with_hijack(Box::new(server));

        let mut conn = rec.as_hijack().unwrap().hijack().unwrap().await.unwrap();
        conn.write_all(b"raw").await.unwrap();

        let mut client = client;
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"raw");

        assert!(rec.as_hijack().is_none());
    }
}
