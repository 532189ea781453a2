//! HTTP server implementation

use crate::handler::RequestHandler;
use crate::shutdown::ShutdownSignal;
use crate::RuntimeState;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use siphon_core::{Error, Pipeline, Result};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Interval between in-flight checks while draining
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind in [`Server::run`]
    pub listen: SocketAddr,

    /// Max request body size (bytes)
    pub max_body_size: usize,

    /// How long shutdown waits for in-flight requests
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_body_size: 10 * 1024 * 1024,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP/1 server running every request through a [`Pipeline`]
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    pipeline: Pipeline,
    state: Arc<RwLock<RuntimeState>>,
    shutdown: ShutdownSignal,
    request_count: Arc<AtomicUsize>,
}

impl Server {
    /// Create a server for `pipeline`
    pub fn new(pipeline: Pipeline, config: ServerConfig) -> Self {
        Self {
            config,
            pipeline,
            state: Arc::new(RwLock::new(RuntimeState::Initializing)),
            shutdown: ShutdownSignal::new(),
            request_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Use an externally owned shutdown signal
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Get the current state
    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// Get listen address
    pub fn listen_addr(&self) -> SocketAddr {
        self.config.listen
    }

    /// Requests currently being served
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Get shutdown signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr()).await.map_err(|e| {
            Error::Runtime(format!("Failed to bind to {}: {e}", self.listen_addr()))
        })?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown, then drain
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        *self.state.write().await = RuntimeState::Running;
        tracing::info!(listen = %local_addr, "Server starting");

        let handler = RequestHandler::new(
            self.pipeline.clone(),
            self.config.max_body_size,
            Arc::clone(&self.request_count),
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => {
                            tracing::trace!("Accepted connection from {}", remote);
                            let handler = handler.clone();

                            tokio::spawn(async move {
                                let service = service_fn(move |req: http::Request<Incoming>| {
                                    let handler = handler.clone();
                                    async move { Ok::<_, Infallible>(handler.handle(req, remote).await) }
                                });

                                if let Err(e) = hyper::server::conn::http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .with_upgrades()
                                    .await
                                {
                                    tracing::debug!("HTTP connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = self.shutdown.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(listener);
        *self.state.write().await = RuntimeState::ShuttingDown;
        self.drain().await;
        *self.state.write().await = RuntimeState::Stopped;
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Wait for in-flight requests, at most `shutdown_timeout`
    async fn drain(&self) {
        let timeout = self.config.shutdown_timeout;
        let start = Instant::now();
        tracing::info!(
            timeout_secs = timeout.as_secs(),
            "Waiting for in-flight requests to complete"
        );

        loop {
            let active = self.request_count();
            if active == 0 {
                tracing::info!("All requests completed, shutting down cleanly");
                return;
            }
            if start.elapsed() >= timeout {
                tracing::warn!(
                    active_requests = active,
                    "Shutdown timeout reached, abandoning in-flight requests"
                );
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
