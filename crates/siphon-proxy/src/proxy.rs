//! Reverse proxy handlers

use crate::client::HttpClient;
use crate::target::{ProxyTarget, TargetSelector};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, HOST, VARY};
use http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use siphon_core::{Body, Context, Error, Handler, Result};
use tracing::{debug, error, warn};

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Whether to preserve the Host header
    pub preserve_host: bool,

    /// Whether to add X-Forwarded-* headers
    pub forwarded_headers: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            preserve_host: false,
            forwarded_headers: true,
        }
    }
}

/// Handler forwarding every request to one backend
#[derive(Debug, Clone)]
pub struct Forwarder {
    target: ProxyTarget,
    client: HttpClient,
    config: ProxyConfig,
}

impl Forwarder {
    /// Forward to `target` with a default client and configuration
    pub fn new(target: ProxyTarget) -> Self {
        Self::with_client(target, HttpClient::new(), ProxyConfig::default())
    }

    /// Forward to `target` through `client`
    pub fn with_client(target: ProxyTarget, client: HttpClient, config: ProxyConfig) -> Self {
        Self {
            target,
            client,
            config,
        }
    }

    /// Backend this forwarder is bound to
    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }
}

#[async_trait]
impl Handler for Forwarder {
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        forward(&self.client, &self.config, &self.target, ctx).await
    }
}

/// Handler asking a [`TargetSelector`] for the backend of each request
#[derive(Debug)]
pub struct Proxy<S> {
    selector: S,
    client: HttpClient,
    config: ProxyConfig,
}

impl<S: TargetSelector> Proxy<S> {
    /// Create a proxy with a default client and configuration
    pub fn new(selector: S) -> Self {
        Self::with_client(selector, HttpClient::new(), ProxyConfig::default())
    }

    /// Create a proxy sending through `client`
    pub fn with_client(selector: S, client: HttpClient, config: ProxyConfig) -> Self {
        Self {
            selector,
            client,
            config,
        }
    }
}

#[async_trait]
impl<S: TargetSelector + 'static> Handler for Proxy<S> {
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        let Some(target) = self.selector.select(ctx) else {
            warn!(request_id = %ctx.request_id(), "no proxy target available");
            return Err(Error::status(StatusCode::SERVICE_UNAVAILABLE));
        };
        forward(&self.client, &self.config, &target, ctx).await
    }
}

/// Relay the request in `ctx` to `target` and copy the answer back.
///
/// Failing to reach the backend is logged with the target's identity and
/// reported as `503 Service Unavailable`; the transport error itself never
/// reaches the client.
pub async fn forward(
    client: &HttpClient,
    config: &ProxyConfig,
    target: &ProxyTarget,
    ctx: &mut Context,
) -> Result<()> {
    let req = upstream_request(ctx, target, config)?;

    debug!(
        request_id = %ctx.request_id(),
        upstream = %target,
        uri = %req.uri(),
        "Forwarding request"
    );

    let response = match client.send(req).await {
        Ok(response) => response,
        Err(err) => {
            error!(
                request_id = %ctx.request_id(),
                upstream = %target,
                error = %err,
                "remote {target} unreachable, could not forward: {err}"
            );
            return Err(Error::status(StatusCode::SERVICE_UNAVAILABLE));
        }
    };

    relay(response, ctx).await
}

/// Build the outgoing request, moving the body out of `ctx`
fn upstream_request(
    ctx: &mut Context,
    target: &ProxyTarget,
    config: &ProxyConfig,
) -> Result<Request<Body>> {
    let uri = join_uri(target.url(), ctx.request().uri())?;
    let remote_addr = ctx.remote_addr();

    let incoming = ctx.request_mut();
    let body = std::mem::take(incoming.body_mut());
    let mut headers = incoming.headers().clone();
    strip_hop_by_hop(&mut headers);

    if !config.preserve_host {
        if let Some(authority) = target.url().authority() {
            let host = HeaderValue::from_str(authority.as_str())
                .map_err(|e| Error::InvalidRequest(format!("Invalid host: {e}")))?;
            headers.insert(HOST, host);
        }
    }

    if config.forwarded_headers {
        if let Some(addr) = remote_addr {
            let client_ip = addr.ip().to_string();
            let prior = headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok());
            let forwarded_for = match prior {
                Some(prior) => format!("{prior}, {client_ip}"),
                None => client_ip,
            };
            let value = HeaderValue::from_str(&forwarded_for)
                .map_err(|e| Error::InvalidRequest(format!("Invalid X-Forwarded-For: {e}")))?;
            headers.insert(X_FORWARDED_FOR, value);
        }
        if !headers.contains_key(X_FORWARDED_PROTO) {
            headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
        }
    }

    let mut req = Request::builder()
        .method(incoming.method().clone())
        .uri(uri)
        .body(body)?;
    *req.headers_mut() = headers;
    Ok(req)
}

/// Put the request path and query under the target URL
fn join_uri(target: &Uri, request: &Uri) -> Result<Uri> {
    let base = target.path();
    let path = request.path();
    let joined = match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    };

    let query = match (target.query(), request.query()) {
        (Some(t), Some(r)) if !t.is_empty() && !r.is_empty() => format!("?{t}&{r}"),
        (Some(q), _) | (_, Some(q)) if !q.is_empty() => format!("?{q}"),
        _ => String::new(),
    };

    let authority = target.authority().map(|a| a.as_str()).unwrap_or_default();
    let scheme = target.scheme_str().unwrap_or("http");

    format!("{scheme}://{authority}{joined}{query}")
        .parse()
        .map_err(|e| Error::InvalidRequest(format!("Invalid upstream URI: {e}")))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Copy the backend response into the response sink, frame by frame
async fn relay(response: http::Response<Incoming>, ctx: &mut Context) -> Result<()> {
    let (mut parts, mut body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let streaming = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"));

    let res = ctx.response_mut();
    let headers = res.headers_mut();
    let mut last: Option<HeaderName> = None;
    for (name, value) in parts.headers {
        match name {
            // Vary entries added by earlier stages stay
            Some(name) if name == VARY => {
                headers.append(name.clone(), value);
                last = Some(name);
            }
            Some(name) => {
                headers.insert(name.clone(), value);
                last = Some(name);
            }
            // Further values of the previous header
            None => {
                if let Some(name) = &last {
                    headers.append(name.clone(), value);
                }
            }
        }
    }

    res.write_status(parts.status).await?;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| Error::UpstreamConnection(e.to_string()))?;
        if let Ok(data) = frame.into_data() {
            write_chunk(ctx, &data, streaming).await?;
        }
    }
    Ok(())
}

async fn write_chunk(ctx: &mut Context, data: &Bytes, flush: bool) -> Result<()> {
    let res = ctx.response_mut();
    res.write_all(data).await?;
    if flush {
        res.flush().await?;
    }
    Ok(())
}
