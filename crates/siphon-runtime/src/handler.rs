//! Per-request dispatch from hyper into the pipeline

use crate::conn::{ChannelBody, ConnWriter, Head};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use siphon_core::{render_error, Body, Context, Error, Pipeline, Response};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Turns hyper requests into pipeline runs
#[derive(Clone)]
pub struct RequestHandler {
    pipeline: Pipeline,
    max_body_size: usize,
    in_flight: Arc<AtomicUsize>,
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("pipeline", &self.pipeline)
            .field("max_body_size", &self.max_body_size)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

/// Counts a request as in flight until dropped
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RequestHandler {
    /// Create a handler running `pipeline`
    pub fn new(pipeline: Pipeline, max_body_size: usize, in_flight: Arc<AtomicUsize>) -> Self {
        Self {
            pipeline,
            max_body_size,
            in_flight,
        }
    }

    /// Run one request and return the response head as soon as the pipeline
    /// commits it. The body keeps streaming from a background task.
    pub async fn handle(&self, mut req: Request<Incoming>, remote: SocketAddr) -> Head {
        let guard = InFlight::enter(&self.in_flight);
        let on_upgrade = hyper::upgrade::on(&mut req);

        let (parts, body) = req.into_parts();
        let collected = Limited::new(body, self.max_body_size).collect().await;
        let (body, rejected) = match collected {
            Ok(collected) => (Full::new(collected.to_bytes()), None),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                (Body::default(), Some(Error::status(StatusCode::PAYLOAD_TOO_LARGE)))
            }
            Err(err) => (
                Body::default(),
                Some(Error::InvalidRequest(format!("failed to read request body: {err}"))),
            ),
        };
        let req = Request::from_parts(parts, body);

        let (head_tx, head_rx) = oneshot::channel();
        let writer = ConnWriter::new(head_tx).with_upgrade(on_upgrade);
        let mut ctx = Context::new(req, Response::new(Box::new(writer))).with_remote_addr(remote);

        debug!(
            request_id = %ctx.request_id(),
            method = %ctx.request().method(),
            path = %ctx.request().uri().path(),
            "Handling request"
        );

        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match rejected {
                Some(err) => render_error(err, &mut ctx).await,
                None => pipeline.serve(&mut ctx).await,
            }
            if let Err(err) = ctx.response_mut().close().await {
                debug!(request_id = %ctx.request_id(), error = %err, "response not completed");
            }
        });

        match head_rx.await {
            Ok(head) => head,
            Err(_) => {
                error!("request task ended without a response");
                let mut head = http::Response::new(ChannelBody::empty());
                *head.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                head
            }
        }
    }
}
