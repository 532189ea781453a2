//! Middleware trait and utilities

use crate::context::Context;
use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Middleware trait for request/response processing
#[async_trait]
pub trait Middleware: Send + Sync + fmt::Debug {
    /// Process a request
    ///
    /// # Arguments
    ///
    /// * `ctx` - The in-flight request and its response sink
    /// * `next` - The next middleware/handler in the chain
    ///
    /// # Returns
    ///
    /// Returns an error to hand the request to the pipeline's error renderer
    async fn call(&self, ctx: &mut Context, next: Next) -> Result<()>;
}

/// Terminal stage of a pipeline
#[async_trait]
pub trait Handler: Send + Sync + fmt::Debug {
    /// Produce the response for `ctx`
    async fn handle(&self, ctx: &mut Context) -> Result<()>;
}

/// Handler backed by a closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

/// Build a [`Handler`] from a closure returning a boxed future
///
/// ```ignore
/// let hello = handler_fn(|ctx| Box::pin(async move {
///     ctx.response_mut().write_all(b"hello").await?;
///     Ok::<_, Error>(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        (self.f)(ctx).await
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Predicate deciding whether a middleware steps aside for a request
pub type Skipper = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Skipper that never skips
pub fn default_skipper() -> Skipper {
    Arc::new(|_: &Context| false)
}

/// Skipper matching requests whose path starts with any of `prefixes`
pub fn skip_path_prefixes<I, S>(prefixes: I) -> Skipper
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    Arc::new(move |ctx: &Context| {
        let path = ctx.request().uri().path();
        prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    })
}

/// Represents the next middleware/handler in the chain
pub struct Next {
    middleware_stack: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    handler: Arc<dyn Handler>,
}

impl Next {
    /// Create a new Next from a middleware stack and its final handler
    pub fn new(middleware_stack: Arc<[Arc<dyn Middleware>]>, handler: Arc<dyn Handler>) -> Self {
        Self {
            middleware_stack,
            index: 0,
            handler,
        }
    }

    /// Run the next middleware or final handler
    pub async fn run(self, ctx: &mut Context) -> Result<()> {
        if let Some(middleware) = self.middleware_stack.get(self.index) {
            let next = Self {
                middleware_stack: Arc::clone(&self.middleware_stack),
                index: self.index + 1,
                handler: Arc::clone(&self.handler),
            };
            middleware.call(ctx, next).await
        } else {
            self.handler.handle(ctx).await
        }
    }
}

impl Clone for Next {
    fn clone(&self) -> Self {
        Self {
            middleware_stack: Arc::clone(&self.middleware_stack),
            index: self.index,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &(self.middleware_stack.len() - self.index))
            .field("handler", &self.handler)
            .finish()
    }
}
