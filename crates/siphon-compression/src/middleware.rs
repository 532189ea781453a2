//! Gzip middleware implementation

use crate::compressor::{GzipEncoder, GZIP_SCHEME};
use crate::config::GzipConfig;
use crate::writer::GzipResponseWriter;
use async_trait::async_trait;
use http::header::{ACCEPT_ENCODING, VARY};
use http::{HeaderMap, HeaderValue};
use siphon_core::{Context, Error, Middleware, Next, ResponseWriter, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Gzip compression middleware
#[derive(Debug, Clone)]
pub struct Gzip {
    config: Arc<GzipConfig>,
}

impl Gzip {
    /// Gzip middleware with the default configuration
    pub fn new() -> Self {
        Self::with_config(GzipConfig::default())
    }

    /// Gzip middleware with a custom configuration
    pub fn with_config(config: GzipConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &GzipConfig {
        &self.config
    }
}

impl Default for Gzip {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for Gzip {
    async fn call(&self, ctx: &mut Context, next: Next) -> Result<()> {
        if (self.config.skipper)(ctx) {
            return next.run(ctx).await;
        }

        add_vary(ctx.response_mut().headers_mut());

        if !accepts_gzip(ctx.request().headers()) {
            return next.run(ctx).await;
        }

        let scope = GzipScope::install(ctx, self.config.level)?;
        let result = next.run(ctx).await;
        let released = scope.release(ctx).await;

        // The handler's error wins; finalization failures surface otherwise.
        result.and(released)
    }
}

/// Whether any `Accept-Encoding` value names gzip
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(GZIP_SCHEME))
}

fn add_vary(headers: &mut HeaderMap) {
    let present = headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case(ACCEPT_ENCODING.as_str()));

    if !present {
        headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));
    }
}

/// Compression engaged for one request.
///
/// Created by [`GzipScope::install`] and consumed by [`GzipScope::release`],
/// which must run once the rest of the pipeline has returned, whatever it
/// returned.
#[must_use = "the gzip stream must be released"]
#[derive(Debug)]
struct GzipScope {
    request_id: String,
}

impl GzipScope {
    fn install(ctx: &mut Context, level: Option<u32>) -> Result<Self> {
        let encoder = GzipEncoder::new(level)?;
        let request_id = ctx.request_id().to_string();

        ctx.response_mut().wrap_writer(move |inner| -> Box<dyn ResponseWriter> {
            Box::new(GzipResponseWriter::new(inner, encoder))
        });

        debug!(request_id = %request_id, "gzip interceptor installed");
        Ok(Self { request_id })
    }

    async fn release(self, ctx: &mut Context) -> Result<()> {
        let res = ctx.response_mut();
        let rollback = res.size() == 0;

        let Some(writer) = res.take_writer::<GzipResponseWriter>() else {
            warn!(
                request_id = %self.request_id,
                "gzip writer replaced by a later stage, stream cannot be finished"
            );
            return Err(Error::Internal(
                "gzip response writer was replaced before the stream was finished".to_string(),
            ));
        };

        let (inner, outcome) = (*writer).finish(rollback).await;
        res.replace_writer(inner);

        if outcome? {
            debug!(
                request_id = %self.request_id,
                "gzip compression not applied to this response"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
    use http::{Request, StatusCode};
    use siphon_core::{handler_fn, skip_path_prefixes, Body, Error, Pipeline, Recorder, Response};
    use std::io::Read;

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    fn context(path: &str, accept_encoding: Option<&str>) -> Context {
        let mut builder = Request::builder().uri(path);
        if let Some(value) = accept_encoding {
            builder = builder.header(ACCEPT_ENCODING, value);
        }
        let req = builder.body(Body::default()).unwrap();
        Context::new(req, Response::new(Box::new(Recorder::new())))
    }

    fn hello_pipeline(gzip: Gzip) -> Pipeline {
        Pipeline::builder().with(gzip).handler(handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response_mut().write_all(b"hello world").await?;
                Ok::<_, Error>(())
            })
        }))
    }

    fn recorder(ctx: &mut Context) -> Box<Recorder> {
        ctx.response_mut()
            .take_writer::<Recorder>()
            .expect("original writer restored")
    }

    fn vary_count(headers: &HeaderMap) -> usize {
        headers
            .get_all(VARY)
            .iter()
            .filter(|v| v.as_bytes().eq_ignore_ascii_case(b"accept-encoding"))
            .count()
    }

    #[tokio::test]
    async fn test_hello_world_compressed() {
        let mut ctx = context("/", Some("gzip, deflate"));
        hello_pipeline(Gzip::new()).dispatch(&mut ctx).await.unwrap();

        let rec = recorder(&mut ctx);
        let sent = rec.sent_headers().unwrap();
        assert_eq!(sent.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert!(sent.get(CONTENT_LENGTH).is_none());
        assert_eq!(sent.get(CONTENT_TYPE).unwrap(), "text/plain; charset=utf-8");
        assert_eq!(vary_count(sent), 1);
        assert_eq!(gunzip(rec.body()), b"hello world");
    }

    #[tokio::test]
    async fn test_not_negotiated_passthrough() {
        for accept in [None, Some("deflate, br"), Some("identity")] {
            let mut ctx = context("/", accept);
            hello_pipeline(Gzip::new()).dispatch(&mut ctx).await.unwrap();

            let rec = recorder(&mut ctx);
            assert_eq!(rec.body(), b"hello world");
            assert!(rec.headers().get(CONTENT_ENCODING).is_none());
            assert_eq!(vary_count(rec.headers()), 1);
        }
    }

    #[tokio::test]
    async fn test_any_accept_encoding_value_counts() {
        let req = Request::builder()
            .uri("/")
            .header(ACCEPT_ENCODING, "br")
            .header(ACCEPT_ENCODING, "gzip;q=0.5")
            .body(Body::default())
            .unwrap();
        let mut ctx = Context::new(req, Response::new(Box::new(Recorder::new())));
        hello_pipeline(Gzip::new()).dispatch(&mut ctx).await.unwrap();

        let rec = recorder(&mut ctx);
        assert_eq!(rec.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(gunzip(rec.body()), b"hello world");
    }

    #[tokio::test]
    async fn test_no_content_rolled_back() {
        let pipeline = Pipeline::builder().with(Gzip::new()).handler(handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response_mut().write_status(StatusCode::NO_CONTENT).await?;
                Ok::<_, Error>(())
            })
        }));

        let mut ctx = context("/", Some("gzip"));
        pipeline.dispatch(&mut ctx).await.unwrap();

        let rec = recorder(&mut ctx);
        assert_eq!(rec.status(), Some(StatusCode::NO_CONTENT));
        assert!(rec.headers().get(CONTENT_ENCODING).is_none());
        assert!(rec.body().is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_rolled_back() {
        let pipeline = Pipeline::builder().with(Gzip::new()).handler(handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response_mut()
                    .headers_mut()
                    .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
                ctx.response_mut().write_all(b"").await?;
                Ok::<_, Error>(())
            })
        }));

        let mut ctx = context("/", Some("gzip"));
        pipeline.dispatch(&mut ctx).await.unwrap();
        assert_eq!(ctx.response().size(), 0);

        let rec = recorder(&mut ctx);
        assert!(rec.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(rec.headers().get(CONTENT_LENGTH).unwrap(), "0");
        assert!(rec.body().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_request_untouched() {
        let config = GzipConfig::default().with_skipper(skip_path_prefixes(["/raw"]));
        let mut ctx = context("/raw/file", Some("gzip"));
        hello_pipeline(Gzip::with_config(config))
            .dispatch(&mut ctx)
            .await
            .unwrap();

        let rec = recorder(&mut ctx);
        assert_eq!(rec.body(), b"hello world");
        assert!(rec.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(vary_count(rec.headers()), 0);
    }

    #[tokio::test]
    async fn test_vary_not_duplicated() {
        let pipeline = Pipeline::builder()
            .with(Gzip::new())
            .with(Gzip::new())
            .handler(handler_fn(|ctx| {
                Box::pin(async move {
                    ctx.response_mut().write_all(b"twice").await?;
                    Ok::<_, Error>(())
                })
            }));

        let mut ctx = context("/", None);
        pipeline.dispatch(&mut ctx).await.unwrap();
        assert_eq!(vary_count(recorder(&mut ctx).headers()), 1);
    }

    #[tokio::test]
    async fn test_invalid_level_aborts() {
        let config = GzipConfig::default().with_level(12);
        let pipeline = Pipeline::builder()
            .with(Gzip::with_config(config))
            .handler(handler_fn(|_ctx| {
                Box::pin(async move { Err::<(), _>(Error::Internal("handler ran".to_string())) })
            }));

        let mut ctx = context("/", Some("gzip"));
        let err = pipeline.dispatch(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // not negotiated, so the level is never looked at
        let mut ctx = context("/", None);
        let err = pipeline.dispatch(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_handler_error_still_finalizes() {
        let pipeline = Pipeline::builder().with(Gzip::new()).handler(handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response_mut().write_all(b"partial body").await?;
                Err::<(), _>(Error::Internal("boom".to_string()))
            })
        }));

        let mut ctx = context("/", Some("gzip"));
        let err = pipeline.dispatch(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        let rec = recorder(&mut ctx);
        assert_eq!(rec.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(gunzip(rec.body()), b"partial body");
    }

    #[tokio::test]
    async fn test_error_before_body_rendered_uncompressed() {
        let pipeline = Pipeline::builder().with(Gzip::new()).handler(handler_fn(|_ctx| {
            Box::pin(async move { Err::<(), _>(Error::status(StatusCode::SERVICE_UNAVAILABLE)) })
        }));

        let mut ctx = context("/", Some("gzip"));
        pipeline.serve(&mut ctx).await;

        let rec = recorder(&mut ctx);
        assert_eq!(rec.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert!(rec.headers().get(CONTENT_ENCODING).is_none());
        let body: serde_json::Value = serde_json::from_slice(rec.body()).unwrap();
        assert_eq!(body["message"], "Service Unavailable");
    }

    #[tokio::test]
    async fn test_streaming_flush() {
        let pipeline = Pipeline::builder().with(Gzip::new()).handler(handler_fn(|ctx| {
            Box::pin(async move {
                let res = ctx.response_mut();
                res.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
                for i in 0..3 {
                    res.write_all(format!("data: {i}\n\n").as_bytes()).await?;
                    res.flush().await?;
                }
                Ok::<_, Error>(())
            })
        }));

        let mut ctx = context("/events", Some("gzip"));
        pipeline.dispatch(&mut ctx).await.unwrap();

        let rec = recorder(&mut ctx);
        assert_eq!(rec.flushes(), 3);
        assert_eq!(rec.headers().get(CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(gunzip(rec.body()), b"data: 0\n\ndata: 1\n\ndata: 2\n\n");
    }

    #[tokio::test]
    async fn test_encoded_body_passed_through() {
        for (encoding, payload) in [("br", &b"\x0bbrotli-ish"[..]), ("gzip", &b"\x1f\x8bready"[..])] {
            let pipeline = Pipeline::builder().with(Gzip::new()).handler(handler_fn(move |ctx| {
                Box::pin(async move {
                    let res = ctx.response_mut();
                    res.headers_mut()
                        .insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
                    res.headers_mut()
                        .insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));
                    res.write_all(payload).await?;
                    Ok::<_, Error>(())
                })
            }));

            let mut ctx = context("/", Some("gzip, br"));
            pipeline.dispatch(&mut ctx).await.unwrap();

            let rec = recorder(&mut ctx);
            let sent = rec.sent_headers().unwrap();
            assert_eq!(sent.get_all(CONTENT_ENCODING).iter().count(), 1);
            assert_eq!(sent.get(CONTENT_ENCODING).unwrap(), encoding);
            assert_eq!(sent.get(CONTENT_LENGTH).unwrap(), &payload.len().to_string());
            assert_eq!(rec.body(), payload);
            assert_eq!(vary_count(sent), 1);
        }
    }

    #[derive(Debug)]
    struct SwapWriter;

    #[async_trait]
    impl Middleware for SwapWriter {
        async fn call(&self, ctx: &mut Context, next: Next) -> Result<()> {
            ctx.response_mut().replace_writer(Box::new(Recorder::new()));
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_replaced_writer_reported() {
        let pipeline = Pipeline::builder()
            .with(Gzip::new())
            .with(SwapWriter)
            .handler(handler_fn(|ctx| {
                Box::pin(async move {
                    ctx.response_mut().write_all(b"lost").await?;
                    Ok::<_, Error>(())
                })
            }));

        let mut ctx = context("/", Some("gzip"));
        let err = pipeline.dispatch(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)), "{err:?}");
    }

    #[test]
    fn test_accepts_gzip() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_gzip(&headers));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("x-gzip"));
        assert!(accepts_gzip(&headers));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("deflate"));
        assert!(!accepts_gzip(&headers));
    }
}
