//! Response writer that re-encodes the body through gzip

use crate::compressor::{GzipEncoder, GZIP_SCHEME};
use crate::sniff::detect_content_type;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use siphon_core::{
    Capability, CloseNotifier, Error, Hijack, Hijacked, ResponseWriter, Result,
};
use std::io;

/// What the writer does with body bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Nothing committed yet
    Pending,
    /// Body goes through the encoder under `Content-Encoding: gzip`
    Compress,
    /// Body goes to the original writer untouched
    Passthrough,
}

/// Layered writer compressing everything written to it.
///
/// Installed on top of the original writer for the lifetime of a single
/// request. Headers, hijacking and close notification go straight to the
/// original writer; body bytes pass through a [`GzipEncoder`] first.
///
/// The encoding is settled when the status is committed (or at the first
/// write): if a `Content-Encoding` is already set the body is taken to be
/// encoded by the handler and is passed through unchanged, otherwise the
/// writer claims `Content-Encoding: gzip`. Bodiless and informational
/// statuses are never compressed.
#[derive(Debug)]
pub struct GzipResponseWriter {
    inner: Box<dyn ResponseWriter>,
    encoder: GzipEncoder,
    mode: Mode,
    /// A non-empty body chunk has been accepted
    wrote: bool,
    /// Compressed bytes reached the original writer
    emitted: bool,
    rolled_back: bool,
}

impl GzipResponseWriter {
    /// Layer `encoder` on top of `inner`
    pub fn new(inner: Box<dyn ResponseWriter>, encoder: GzipEncoder) -> Self {
        Self {
            inner,
            encoder,
            mode: Mode::Pending,
            wrote: false,
            emitted: false,
            rolled_back: false,
        }
    }

    /// Original writer underneath
    pub fn inner(&self) -> &dyn ResponseWriter {
        self.inner.as_ref()
    }

    /// Whether the body is being gzip-encoded
    pub fn is_compressing(&self) -> bool {
        self.mode == Mode::Compress && !self.rolled_back
    }

    /// End the compressed stream and hand back the original writer.
    ///
    /// With `rollback` set and nothing on the wire yet, compression is undone
    /// instead: buffered output goes to the discard sink and the
    /// `Content-Encoding: gzip` header is removed. Once compressed bytes have
    /// been emitted the stream can only be finished, so the flag is ignored.
    ///
    /// The second value reports whether the response went out uncompressed,
    /// either rolled back or passed through. The original writer is returned
    /// on every path so it can be reinstalled.
    pub async fn finish(mut self, rollback: bool) -> (Box<dyn ResponseWriter>, io::Result<bool>) {
        if self.mode != Mode::Compress {
            self.step_aside();
            return (self.inner, Ok(true));
        }
        if rollback && !self.emitted {
            self.roll_back();
        }
        let result = self.write_trailer().await;
        let rolled_back = self.rolled_back;
        (self.inner, result.map(|()| rolled_back))
    }

    /// Settle the encoding for this response
    fn engage(&mut self, status: Option<StatusCode>) {
        if self.mode != Mode::Pending {
            return;
        }
        let bodiless = status.is_some_and(|s| {
            s.is_informational() || s == StatusCode::NO_CONTENT || s == StatusCode::NOT_MODIFIED
        });
        if bodiless || self.inner.headers().contains_key(CONTENT_ENCODING) {
            self.step_aside();
            return;
        }
        self.inner
            .headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static(GZIP_SCHEME));
        self.mode = Mode::Compress;
    }

    fn step_aside(&mut self) {
        self.encoder.discard();
        self.mode = Mode::Passthrough;
    }

    fn roll_back(&mut self) {
        self.encoder.discard();
        let headers = self.inner.headers_mut();
        if headers
            .get(CONTENT_ENCODING)
            .is_some_and(|v| v.as_bytes() == GZIP_SCHEME.as_bytes())
        {
            headers.remove(CONTENT_ENCODING);
        }
        self.rolled_back = true;
    }

    async fn write_trailer(&mut self) -> io::Result<()> {
        let out = self.encoder.finish()?;
        self.emit(out).await
    }

    async fn pump(&mut self) -> io::Result<()> {
        let out = self.encoder.take_output();
        self.emit(out).await
    }

    async fn emit(&mut self, out: Bytes) -> io::Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        self.emitted = true;
        self.inner.write_all(&out).await
    }
}

#[async_trait]
impl ResponseWriter for GzipResponseWriter {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    async fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        if status == StatusCode::NO_CONTENT {
            self.inner.headers_mut().remove(CONTENT_ENCODING);
        }
        self.engage(Some(status));
        if self.mode == Mode::Compress {
            self.inner.headers_mut().remove(CONTENT_LENGTH);
        }
        self.inner.write_status(status).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.engage(None);
        if !self.wrote {
            self.wrote = true;
            let compressing = self.mode == Mode::Compress;
            let headers = self.inner.headers_mut();
            // The head goes out with the first chunk.
            if compressing {
                headers.remove(CONTENT_LENGTH);
            }
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(detect_content_type(buf)),
                );
            }
        }

        if self.mode != Mode::Compress {
            return self.inner.write(buf).await;
        }
        self.encoder.write(buf)?;
        self.pump().await?;
        Ok(buf.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.mode == Mode::Compress {
            self.encoder.flush()?;
            self.pump().await?;
        }
        self.inner.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.mode == Mode::Compress {
            if !self.wrote && !self.emitted {
                self.roll_back();
            }
            self.write_trailer().await?;
        } else {
            self.step_aside();
        }
        self.inner.close().await
    }

    fn as_hijack(&mut self) -> Option<&mut dyn Hijack> {
        if self.inner.as_hijack().is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_close_notifier(&self) -> Option<&dyn CloseNotifier> {
        self.inner.as_close_notifier()
    }
}

impl Hijack for GzipResponseWriter {
    /// Hand the raw connection over uncompressed. The gzip header is removed
    /// first since the head may go out as part of the takeover.
    fn hijack(&mut self) -> Result<Hijacked> {
        if self.mode == Mode::Compress && !self.emitted {
            self.roll_back();
        }
        if !self.emitted {
            self.step_aside();
        }
        self.inner
            .as_hijack()
            .ok_or(Error::Unsupported(Capability::Hijack))?
            .hijack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use siphon_core::{Recorder, Response};
    use std::io::Read;
    use tokio_util::sync::CancellationToken;

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    fn gzip_response(recorder: Recorder) -> Response {
        let mut res = Response::new(Box::new(recorder));
        let encoder = GzipEncoder::new(None).unwrap();
        res.wrap_writer(|inner| Box::new(GzipResponseWriter::new(inner, encoder)));
        res
    }

    async fn unwrap_recorder(res: &mut Response, rollback: bool) -> (Box<Recorder>, bool) {
        let writer = res.take_writer::<GzipResponseWriter>().unwrap();
        let (inner, outcome) = (*writer).finish(rollback).await;
        let rolled_back = outcome.unwrap();
        let recorder = inner.into_any().downcast::<Recorder>().unwrap();
        (recorder, rolled_back)
    }

    #[tokio::test]
    async fn test_body_compressed_and_sniffed() {
        let mut res = gzip_response(Recorder::new());
        res.write_all(b"<html><body>hi</body></html>").await.unwrap();

        let (rec, rolled_back) = unwrap_recorder(&mut res, false).await;
        assert!(!rolled_back);
        let sent = rec.sent_headers().unwrap();
        assert_eq!(sent.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(sent.get(CONTENT_TYPE).unwrap(), "text/html; charset=utf-8");
        assert_eq!(gunzip(rec.body()), b"<html><body>hi</body></html>");
    }

    #[tokio::test]
    async fn test_content_type_sniffed_once() {
        let mut res = gzip_response(Recorder::new());
        res.write_all(b"plain text first").await.unwrap();
        res.write_all(b"\x00\x01 binary later").await.unwrap();

        let (rec, _) = unwrap_recorder(&mut res, false).await;
        assert_eq!(
            rec.headers().get_all(CONTENT_TYPE).iter().count(),
            1
        );
        assert_eq!(
            rec.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn test_explicit_content_type_kept() {
        let mut res = gzip_response(Recorder::new());
        res.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        res.write_all(b"{\"ok\":true}").await.unwrap();

        let (rec, _) = unwrap_recorder(&mut res, false).await;
        assert_eq!(rec.headers().get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_content_length_removed() {
        let mut res = gzip_response(Recorder::new());
        res.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("11"));
        res.write_status(StatusCode::OK).await.unwrap();
        // set again after the status line but before the first byte
        res.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("11"));
        res.write_all(b"hello world").await.unwrap();

        let (rec, _) = unwrap_recorder(&mut res, false).await;
        assert!(rec.sent_headers().unwrap().get(CONTENT_LENGTH).is_none());
        assert_eq!(gunzip(rec.body()), b"hello world");
    }

    #[tokio::test]
    async fn test_no_content_strips_encoding() {
        let mut res = gzip_response(Recorder::new());
        res.write_status(StatusCode::NO_CONTENT).await.unwrap();
        assert!(res.headers().get(CONTENT_ENCODING).is_none());

        let (rec, rolled_back) = unwrap_recorder(&mut res, true).await;
        assert!(rolled_back);
        assert_eq!(rec.status(), Some(StatusCode::NO_CONTENT));
        assert!(rec.body().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let mut res = gzip_response(Recorder::new());
        res.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));

        let (rec, rolled_back) = unwrap_recorder(&mut res, true).await;
        assert!(rolled_back);
        assert!(rec.body().is_empty());
        assert!(rec.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(rec.headers().get(CONTENT_LENGTH).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_rollback_ignored_after_flush() {
        let mut res = gzip_response(Recorder::new());
        res.flush().await.unwrap();

        let (rec, rolled_back) = unwrap_recorder(&mut res, true).await;
        assert!(!rolled_back);
        assert_eq!(rec.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert!(gunzip(rec.body()).is_empty());
    }

    #[tokio::test]
    async fn test_flush_streams_partial_data() {
        let mut res = gzip_response(Recorder::new());
        res.write_all(b"data: first\n\n").await.unwrap();
        res.flush().await.unwrap();

        {
            let rec = res
                .writer()
                .as_any()
                .downcast_ref::<GzipResponseWriter>()
                .unwrap()
                .inner()
                .as_any()
                .downcast_ref::<Recorder>()
                .unwrap();
            assert_eq!(rec.flushes(), 1);
            let mut out = Vec::new();
            let _ = GzDecoder::new(rec.body()).read_to_end(&mut out);
            assert_eq!(out, b"data: first\n\n");
        }

        res.write_all(b"data: second\n\n").await.unwrap();
        let (rec, _) = unwrap_recorder(&mut res, false).await;
        assert_eq!(gunzip(rec.body()), b"data: first\n\ndata: second\n\n");
    }

    #[tokio::test]
    async fn test_close_without_body_rolls_back() {
        let mut res = gzip_response(Recorder::new());
        res.close().await.unwrap();

        let (rec, rolled_back) = unwrap_recorder(&mut res, true).await;
        assert!(rolled_back);
        assert!(rec.is_closed());
        assert!(rec.body().is_empty());
        assert!(rec.sent_headers().unwrap().get(CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let mut res = gzip_response(Recorder::new());
        res.write_all(b"complete").await.unwrap();
        res.close().await.unwrap();

        let (rec, rolled_back) = unwrap_recorder(&mut res, false).await;
        assert!(!rolled_back);
        assert!(rec.is_closed());
        assert_eq!(gunzip(rec.body()), b"complete");
    }

    #[tokio::test]
    async fn test_capabilities_delegate() {
        let (client, server) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        let recorder = Recorder::new()
            .with_hijack(Box::new(server))
            .with_close_notify(token.clone());
        let mut res = gzip_response(recorder);

        let notify = res.close_notify().unwrap();
        token.cancel();
        notify.await;

        let mut conn = res.hijack().unwrap().await.unwrap();
        drop(client);
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut conn, &mut buf)
            .await
            .unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_existing_encoding_passed_through() {
        let mut res = gzip_response(Recorder::new());
        res.headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
        res.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("7"));
        res.write_all(b"encoded").await.unwrap();

        let (rec, uncompressed) = unwrap_recorder(&mut res, false).await;
        assert!(uncompressed);
        let sent = rec.sent_headers().unwrap();
        assert_eq!(sent.get(CONTENT_ENCODING).unwrap(), "br");
        assert_eq!(sent.get(CONTENT_LENGTH).unwrap(), "7");
        assert_eq!(rec.body(), b"encoded");
    }

    #[tokio::test]
    async fn test_switching_protocols_never_compressed() {
        let (_client, server) = tokio::io::duplex(64);
        let mut res = gzip_response(Recorder::new().with_hijack(Box::new(server)));
        res.write_status(StatusCode::SWITCHING_PROTOCOLS).await.unwrap();
        assert!(res.headers().get(CONTENT_ENCODING).is_none());

        let _conn = res.hijack().unwrap().await.unwrap();
        let (rec, uncompressed) = unwrap_recorder(&mut res, true).await;
        assert!(uncompressed);
        assert!(rec.headers().get(CONTENT_ENCODING).is_none());
        assert!(rec.body().is_empty());
    }

    #[tokio::test]
    async fn test_hijack_drops_gzip_header() {
        let (_client, server) = tokio::io::duplex(64);
        let mut res = gzip_response(Recorder::new().with_hijack(Box::new(server)));
        res.write_status(StatusCode::OK).await.unwrap();
        assert_eq!(res.headers().get(CONTENT_ENCODING).unwrap(), "gzip");

        let _conn = res.hijack().unwrap().await.unwrap();
        assert!(res.headers().get(CONTENT_ENCODING).is_none());

        let (rec, uncompressed) = unwrap_recorder(&mut res, true).await;
        assert!(uncompressed);
        assert!(rec.body().is_empty());
    }

    #[tokio::test]
    async fn test_capabilities_unsupported() {
        let mut res = gzip_response(Recorder::new());
        assert!(matches!(
            res.hijack(),
            Err(siphon_core::Error::Unsupported(siphon_core::Capability::Hijack))
        ));
        assert!(res.close_notify().is_err());
    }
}
