//! Root response writer backed by a hyper connection

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body::{Body, Frame};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use siphon_core::{
    BoxConnection, CloseNotifier, CloseNotify, Error, Hijack, Hijacked, ResponseWriter, Result,
};
use std::convert::Infallible;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Chunks buffered between the pipeline task and hyper
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Response head handed to hyper once the pipeline commits it
pub type Head = http::Response<ChannelBody>;

/// Streaming response body fed by a [`ConnWriter`].
///
/// Dropping the body (hyper finished the response or the connection went
/// away) fires the writer's close notification.
pub struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
    _closed: Option<DropGuard>,
}

impl ChannelBody {
    /// Body with no content
    pub fn empty() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self { rx, _closed: None }
    }

    fn channel(closed: &CancellationToken) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let body = Self {
            rx,
            _closed: Some(closed.clone().drop_guard()),
        };
        (tx, body)
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, Infallible>>> {
        self.rx
            .poll_recv(cx)
            .map(|chunk| chunk.map(|data| Ok(Frame::data(data))))
    }
}

impl fmt::Debug for ChannelBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBody").finish_non_exhaustive()
    }
}

/// Writes a response onto a live HTTP/1 connection.
///
/// Status and headers are buffered until the first body byte, flush, close
/// or hijack; at that point the head is handed to hyper and body chunks are
/// streamed through a bounded channel.
pub struct ConnWriter {
    status: StatusCode,
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<Head>>,
    pending_body: Option<ChannelBody>,
    body_tx: Option<mpsc::Sender<Bytes>>,
    on_upgrade: Option<OnUpgrade>,
    closed: CancellationToken,
}

impl ConnWriter {
    /// Create a writer delivering its head on `head_tx`
    pub fn new(head_tx: oneshot::Sender<Head>) -> Self {
        let closed = CancellationToken::new();
        let (body_tx, body) = ChannelBody::channel(&closed);
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            head_tx: Some(head_tx),
            pending_body: Some(body),
            body_tx: Some(body_tx),
            on_upgrade: None,
            closed,
        }
    }

    /// Allow connection takeover through a protocol upgrade
    pub fn with_upgrade(mut self, on_upgrade: OnUpgrade) -> Self {
        self.on_upgrade = Some(on_upgrade);
        self
    }

    /// Whether the head has been handed to hyper
    pub fn head_sent(&self) -> bool {
        self.head_tx.is_none()
    }

    fn send_head(&mut self) -> io::Result<()> {
        let Some(head_tx) = self.head_tx.take() else {
            return Ok(());
        };
        let body = self.pending_body.take().unwrap_or_else(ChannelBody::empty);
        let mut head = http::Response::new(body);
        *head.status_mut() = self.status;
        *head.headers_mut() = self.headers.clone();
        head_tx.send(head).map_err(|_| client_gone())
    }
}

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client connection closed")
}

impl fmt::Debug for ConnWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnWriter")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("head_sent", &self.head_sent())
            .field("body_open", &self.body_tx.is_some())
            .finish()
    }
}

#[async_trait]
impl ResponseWriter for ConnWriter {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        if !self.head_sent() {
            self.status = status;
        }
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.send_head()?;
        let body_tx = self.body_tx.as_ref().ok_or_else(client_gone)?;
        body_tx
            .send(Bytes::copy_from_slice(buf))
            .await
            .map_err(|_| client_gone())?;
        Ok(buf.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        // chunks are handed to hyper as soon as they are written
        self.send_head()
    }

    async fn close(&mut self) -> io::Result<()> {
        let sent = self.send_head();
        self.body_tx = None;
        sent
    }

    fn as_hijack(&mut self) -> Option<&mut dyn Hijack> {
        if self.on_upgrade.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_close_notifier(&self) -> Option<&dyn CloseNotifier> {
        Some(self)
    }
}

impl Hijack for ConnWriter {
    fn hijack(&mut self) -> Result<Hijacked> {
        let on_upgrade = self
            .on_upgrade
            .take()
            .ok_or_else(|| Error::Runtime("connection already hijacked".to_string()))?;

        // hyper releases the connection only after the head went out
        self.send_head()?;
        self.body_tx = None;

        Ok(Hijacked::new(async move {
            let upgraded = on_upgrade
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Ok(Box::new(TokioIo::new(upgraded)) as BoxConnection)
        }))
    }
}

impl CloseNotifier for ConnWriter {
    fn close_notify(&self) -> CloseNotify {
        CloseNotify::new(self.closed.clone())
    }
}
