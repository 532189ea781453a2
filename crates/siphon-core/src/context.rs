//! Per-request context

use crate::response::Response;
use bytes::Bytes;
use http::Request;
use http_body_util::Full;
use std::net::SocketAddr;
use uuid::Uuid;

/// Body type alias
pub type Body = Full<Bytes>;

/// Request id header, honoured when the client sends one
pub const X_REQUEST_ID: &str = "x-request-id";

/// Everything a pipeline stage sees for one in-flight request
#[derive(Debug)]
pub struct Context {
    request: Request<Body>,
    response: Response,
    request_id: String,
    remote_addr: Option<SocketAddr>,
}

impl Context {
    /// Create a new request context
    pub fn new(request: Request<Body>, response: Response) -> Self {
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request,
            response,
            request_id,
            remote_addr: None,
        }
    }

    /// Attach the peer address
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Incoming request
    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    /// Mutable incoming request
    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    /// Response sink
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Mutable response sink
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Unique request ID for tracing
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Peer address, when known
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Split into request and response
    pub fn into_parts(self) -> (Request<Body>, Response) {
        (self.request, self.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;

    #[test]
    fn test_request_id_generated() {
        let req = Request::builder().uri("/").body(Body::default()).unwrap();
        let ctx = Context::new(req, Response::new(Box::new(Recorder::new())));
        assert!(Uuid::parse_str(ctx.request_id()).is_ok());
        assert!(ctx.remote_addr().is_none());
    }

    #[test]
    fn test_request_id_from_header() {
        let req = Request::builder()
            .uri("/")
            .header(X_REQUEST_ID, "req-42")
            .body(Body::default())
            .unwrap();
        let ctx = Context::new(req, Response::new(Box::new(Recorder::new())))
            .with_remote_addr("10.1.2.3:5555".parse().unwrap());
        assert_eq!(ctx.request_id(), "req-42");
        assert_eq!(ctx.remote_addr().unwrap().port(), 5555);
    }
}
