//! Response sink and the writer chain behind it
//!
//! A [`Response`] is the per-request sink handlers write to. It tracks the
//! status, whether the head has been committed and how many body bytes were
//! accepted, and forwards everything to the active [`ResponseWriter`].
//! Middleware can layer their own writer on top of the active one (see
//! [`Response::wrap_writer`]) and take it back off again once the handler
//! returns (see [`Response::take_writer`]).

use crate::error::{Capability, Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use http::{HeaderMap, StatusCode};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Type-erasure helper implemented for every `'static + Send` type.
///
/// Lets a layered writer be recovered by its concrete type without a cast
/// that can fail at runtime.
pub trait AsAny: Any + Send {
    /// Borrow as [`Any`]
    fn as_any(&self) -> &dyn Any;

    /// Convert into a boxed [`Any`]
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Raw bidirectional connection handed out by [`Hijack`]
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed [`Connection`]
pub type BoxConnection = Box<dyn Connection>;

/// Pending connection takeover.
///
/// Resolves once the connection has been released by the HTTP layer, which
/// for upgrades happens after the response head went out.
pub struct Hijacked {
    inner: BoxFuture<'static, io::Result<BoxConnection>>,
}

impl Hijacked {
    /// Wrap a future resolving to the taken-over connection
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = io::Result<BoxConnection>> + Send + 'static,
    {
        Self {
            inner: Box::pin(future),
        }
    }

    /// Connection that is available immediately
    pub fn ready(conn: BoxConnection) -> Self {
        Self::new(futures::future::ready(Ok(conn)))
    }
}

impl Future for Hijacked {
    type Output = io::Result<BoxConnection>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for Hijacked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hijacked").finish_non_exhaustive()
    }
}

/// Completes when the client side of the response goes away
pub struct CloseNotify {
    inner: BoxFuture<'static, ()>,
}

impl CloseNotify {
    /// Notification driven by `token` being cancelled
    pub fn new(token: CancellationToken) -> Self {
        Self {
            inner: Box::pin(async move { token.cancelled().await }),
        }
    }
}

impl Future for CloseNotify {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for CloseNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseNotify").finish_non_exhaustive()
    }
}

/// Optional capability: take over the raw connection
pub trait Hijack: Send {
    /// Take the connection away from the HTTP layer
    fn hijack(&mut self) -> Result<Hijacked>;
}

/// Optional capability: observe client disconnects
pub trait CloseNotifier: Send {
    /// Future completing once the client is gone
    fn close_notify(&self) -> CloseNotify;
}

/// Destination of response status, headers and body bytes
#[async_trait]
pub trait ResponseWriter: AsAny + fmt::Debug {
    /// Response headers
    fn headers(&self) -> &HeaderMap;

    /// Mutable response headers
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Record the status line. Header edits are still honoured until the
    /// first body byte, flush or close puts the head on the wire.
    async fn write_status(&mut self, status: StatusCode) -> io::Result<()>;

    /// Write body bytes, returning how many were accepted
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Write the whole buffer
    async fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Push buffered bytes towards the client
    async fn flush(&mut self) -> io::Result<()>;

    /// End the body. No writes are accepted afterwards.
    async fn close(&mut self) -> io::Result<()>;

    /// Connection takeover, if this writer supports it
    fn as_hijack(&mut self) -> Option<&mut dyn Hijack> {
        None
    }

    /// Disconnect notification, if this writer supports it
    fn as_close_notifier(&self) -> Option<&dyn CloseNotifier> {
        None
    }
}

/// Placeholder occupying the writer slot while a layer is being swapped
#[derive(Debug, Default)]
struct Detached {
    headers: HeaderMap,
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "response writer detached")
}

#[async_trait]
impl ResponseWriter for Detached {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    async fn write_status(&mut self, _status: StatusCode) -> io::Result<()> {
        Err(detached())
    }

    async fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(detached())
    }

    async fn flush(&mut self) -> io::Result<()> {
        Err(detached())
    }

    async fn close(&mut self) -> io::Result<()> {
        Err(detached())
    }
}

/// Per-request response sink
pub struct Response {
    writer: Box<dyn ResponseWriter>,
    status: StatusCode,
    size: u64,
    committed: bool,
}

impl Response {
    /// Create a response sink on top of a root writer
    pub fn new(writer: Box<dyn ResponseWriter>) -> Self {
        Self {
            writer,
            status: StatusCode::OK,
            size: 0,
            committed: false,
        }
    }

    /// Response headers
    pub fn headers(&self) -> &HeaderMap {
        self.writer.headers()
    }

    /// Mutable response headers
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.writer.headers_mut()
    }

    /// Status committed (or to be committed by the first write)
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Number of body bytes accepted so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the status line has been written
    pub fn committed(&self) -> bool {
        self.committed
    }

    /// Commit the status line. Only the first call takes effect.
    pub async fn write_status(&mut self, status: StatusCode) -> Result<()> {
        if self.committed {
            tracing::warn!(
                status = status.as_u16(),
                committed = self.status.as_u16(),
                "response already committed"
            );
            return Ok(());
        }
        self.status = status;
        self.writer.write_status(status).await?;
        self.committed = true;
        Ok(())
    }

    /// Write body bytes, committing the current status first if needed
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.committed {
            self.write_status(self.status).await?;
        }
        let n = self.writer.write(buf).await?;
        self.size += n as u64;
        Ok(n)
    }

    /// Write the whole buffer
    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Flush buffered bytes towards the client. The head goes out with the
    /// first flush, so the current status is committed first.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.committed {
            self.write_status(self.status).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// End the body, committing the status if nothing was written
    pub async fn close(&mut self) -> Result<()> {
        if !self.committed {
            self.write_status(self.status).await?;
        }
        self.writer.close().await?;
        Ok(())
    }

    /// Take over the raw connection
    pub fn hijack(&mut self) -> Result<Hijacked> {
        self.writer
            .as_hijack()
            .ok_or(Error::Unsupported(Capability::Hijack))?
            .hijack()
    }

    /// Get notified when the client goes away
    pub fn close_notify(&self) -> Result<CloseNotify> {
        self.writer
            .as_close_notifier()
            .map(|notifier| notifier.close_notify())
            .ok_or(Error::Unsupported(Capability::CloseNotify))
    }

    /// Active writer
    pub fn writer(&self) -> &dyn ResponseWriter {
        self.writer.as_ref()
    }

    /// Install `writer` as the active writer, returning the previous one
    pub fn replace_writer(&mut self, writer: Box<dyn ResponseWriter>) -> Box<dyn ResponseWriter> {
        std::mem::replace(&mut self.writer, writer)
    }

    /// Layer a new writer on top of the active one
    pub fn wrap_writer<F>(&mut self, wrap: F)
    where
        F: FnOnce(Box<dyn ResponseWriter>) -> Box<dyn ResponseWriter>,
    {
        let inner = self.replace_writer(Box::<Detached>::default());
        self.writer = wrap(inner);
    }

    /// Take the active writer out if it is a `W`.
    ///
    /// The slot is left detached; install a replacement with
    /// [`Response::replace_writer`] before writing again. Returns `None` and
    /// leaves the active writer untouched when it is of another type.
    pub fn take_writer<W: ResponseWriter>(&mut self) -> Option<Box<W>> {
        if !(*self.writer).as_any().is::<W>() {
            return None;
        }
        let writer = self.replace_writer(Box::<Detached>::default());
        writer.into_any().downcast::<W>().ok()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("size", &self.size)
            .field("committed", &self.committed)
            .field("writer", &self.writer)
            .finish()
    }
}
