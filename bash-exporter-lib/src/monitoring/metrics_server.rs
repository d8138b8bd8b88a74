//! HTTP server for Prometheus-compatible metrics exposition
//!
//! # Available Endpoints
//!
//! - `GET <metrics_path>` - extracted metrics followed by the exporter's own metrics
//! - `GET /reload` - reload the configuration, 500 with the reason on failure
//! - `GET /health` - health check endpoint
//!
//! Any other method on a known path is answered with 405, unknown paths with 404.

use crate::collector::CommandCollector;
use crate::config::ServerConfig;
use crate::error::{ExporterError, Result};
use crate::monitoring::metrics::{encode_families, TEXT_CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const RELOAD_PATH: &str = "/reload";
pub const HEALTH_PATH: &str = "/health";

/// Configuration for the metrics HTTP server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsServerConfig {
    /// `host:port` to listen on
    pub bind_address: String,
    pub metrics_path: String,
}

impl From<&ServerConfig> for MetricsServerConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            bind_address: server.bind_address(),
            metrics_path: server.metrics_path.clone(),
        }
    }
}

/// Shared request handling state
#[derive(Debug, Clone)]
pub struct ServerState {
    collector: Arc<CommandCollector>,
    metrics_path: Arc<str>,
}

impl ServerState {
    pub fn new<S: AsRef<str>>(collector: Arc<CommandCollector>, metrics_path: S) -> Self {
        Self {
            collector,
            metrics_path: Arc::from(metrics_path.as_ref()),
        }
    }
}

/// HTTP server exposing the collector
#[derive(Debug)]
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: ServerState,
}

impl MetricsServer {
    /// Create a new metrics server for `collector`
    pub fn new(config: MetricsServerConfig, collector: Arc<CommandCollector>) -> Self {
        let state = ServerState::new(collector, &config.metrics_path);
        Self { config, state }
    }

    /// Get the server configuration
    pub fn config(&self) -> &MetricsServerConfig {
        &self.config
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self.config.bind_address.parse().map_err(|e| {
            ExporterError::server(format!(
                "invalid listen address {}: {}",
                self.config.bind_address, e
            ))
        })?;
        TcpListener::bind(addr).await.map_err(|e| {
            ExporterError::server(format!("failed to bind listener on {}: {}", addr, e))
        })
    }

    /// Bind and serve until `shutdown` is cancelled
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until `shutdown` is
    /// cancelled
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        info!(
            "Metrics server listening on http://{}{}",
            local, self.config.metrics_path
        );

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
                _ = shutdown.cancelled() => {
                    info!("Metrics server shutting down");
                    return Ok(());
                }
            };
            debug!("Accepted connection from {}", peer);

            let io = TokioIo::new(stream);
            let state = self.state.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let state = state.clone();
                    async move {
                        Ok::<_, Infallible>(route(&state, req.method(), req.uri().path()).await)
                    }
                });
                if let Err(err) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    if !err.is_incomplete_message() {
                        error!("Error serving connection: {:?}", err);
                    }
                }
            });
        }
    }
}

/// Dispatch one request
pub async fn route(state: &ServerState, method: &Method, path: &str) -> Response<Full<Bytes>> {
    let known = path == &*state.metrics_path || path == RELOAD_PATH || path == HEALTH_PATH;
    if known && *method != Method::GET {
        let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
        return response;
    }

    if path == &*state.metrics_path {
        metrics_response(state).await
    } else if path == RELOAD_PATH {
        reload_response(state).await
    } else if path == HEALTH_PATH {
        health_response(state).await
    } else {
        text_response(StatusCode::NOT_FOUND, "Not Found")
    }
}

async fn metrics_response(state: &ServerState) -> Response<Full<Bytes>> {
    let mut families = state.collector.collect().await;
    families.extend(state.collector.metrics().gather());

    match encode_families(&families) {
        Ok(body) => {
            let mut response = text_response(StatusCode::OK, body);
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
            response
        }
        Err(err) => {
            error!("Failed to encode metrics: {}", err);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to collect metrics")
        }
    }
}

async fn reload_response(state: &ServerState) -> Response<Full<Bytes>> {
    match state.collector.reload_config().await {
        Ok(()) => text_response(StatusCode::OK, "Configuration reloaded"),
        Err(err) => text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to reload configuration: {}", err),
        ),
    }
}

async fn health_response(state: &ServerState) -> Response<Full<Bytes>> {
    let config = state.collector.current_config().await;
    let body = serde_json::json!({
        "status": "healthy",
        "metrics": config.metrics.len(),
    });
    let mut response = text_response(StatusCode::OK, body.to_string());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text_response<B: Into<Bytes>>(status: StatusCode, body: B) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
