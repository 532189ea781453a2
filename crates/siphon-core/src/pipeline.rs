//! Pipeline assembly and the standard error renderer

use crate::context::Context;
use crate::middleware::{Handler, Middleware, Next};
use crate::{Error, Result};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Method};
use std::fmt;
use std::sync::Arc;

/// Middleware stack in front of a single handler
#[derive(Clone)]
pub struct Pipeline {
    middleware_stack: Arc<[Arc<dyn Middleware>]>,
    handler: Arc<dyn Handler>,
}

impl Pipeline {
    /// Create a pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Number of middleware in front of the handler
    pub fn len(&self) -> usize {
        self.middleware_stack.len()
    }

    /// Whether the handler is called directly
    pub fn is_empty(&self) -> bool {
        self.middleware_stack.is_empty()
    }

    /// Run the request through every stage, returning the first error
    pub async fn dispatch(&self, ctx: &mut Context) -> Result<()> {
        Next::new(Arc::clone(&self.middleware_stack), Arc::clone(&self.handler))
            .run(ctx)
            .await
    }

    /// Run the request and render any error it produced
    pub async fn serve(&self, ctx: &mut Context) {
        if let Err(err) = self.dispatch(ctx).await {
            render_error(err, ctx).await;
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("middleware", &self.middleware_stack)
            .field("handler", &self.handler)
            .finish()
    }
}

/// Pipeline builder
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware; earlier middleware wrap later ones
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware
    #[must_use]
    pub fn with_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Finish with the terminal handler
    pub fn handler<H: Handler + 'static>(self, handler: H) -> Pipeline {
        self.shared_handler(Arc::new(handler))
    }

    /// Finish with an already shared handler
    pub fn shared_handler(self, handler: Arc<dyn Handler>) -> Pipeline {
        Pipeline {
            middleware_stack: Arc::from(self.middlewares),
            handler,
        }
    }
}

/// Standard error renderer.
///
/// Writes the error status and a JSON `{"message": ...}` body unless the
/// response has already been committed, in which case the error can only be
/// logged.
pub async fn render_error(err: Error, ctx: &mut Context) {
    let status = err.to_status_code();

    if status.is_server_error() {
        tracing::error!(
            request_id = %ctx.request_id(),
            status = status.as_u16(),
            error = %err,
            "Request failed"
        );
    } else {
        tracing::debug!(
            request_id = %ctx.request_id(),
            status = status.as_u16(),
            error = %err,
            "Request rejected"
        );
    }

    if ctx.response().committed() {
        tracing::debug!(
            request_id = %ctx.request_id(),
            "Response already committed, error not rendered"
        );
        return;
    }

    let head_only = ctx.request().method() == Method::HEAD;
    let body = serde_json::json!({ "message": err.public_message() }).to_string();
    let res = ctx.response_mut();

    let written = async {
        if !head_only {
            let headers = res.headers_mut();
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=utf-8"),
            );
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        res.write_status(status).await?;
        if !head_only {
            res.write_all(body.as_bytes()).await?;
        }
        Ok::<_, Error>(())
    }
    .await;

    if let Err(e) = written {
        tracing::error!(error = %e, "Failed to write error response");
    }
}
