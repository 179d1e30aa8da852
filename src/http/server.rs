//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all gateway handler
//! - Wire up middleware (tracing, request ID)
//! - Bind server to listener and serve until shutdown
//! - Apply configuration updates from the file watcher

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::handler::Gateway;
use crate::config::GatewayConfig;
use crate::exchange::Exchange;
use crate::lifecycle::Shutdown;

/// HTTP server in front of a [`Gateway`].
pub struct HttpServer {
    router: Router,
    gateway: Arc<Gateway>,
}

impl HttpServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let router = Self::build_router(gateway.clone());
        Self { router, gateway }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(gateway: Arc<Gateway>) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(gateway)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Run the server, accepting connections on the given listener, until
    /// `shutdown` fires or Ctrl+C is received.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Gateway handler for every path and method.
async fn gateway_handler(State(gateway): State<Arc<Gateway>>, request: Request<Body>) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let mut exchange = Exchange::new(request);
    if let Some(addr) = remote_addr {
        exchange = exchange.with_remote_addr(addr);
    }
    tracing::debug!(
        request_id = %request_id,
        method = %exchange.method(),
        path = %exchange.path(),
        "gateway request"
    );
    gateway.handle(exchange).await
}

/// Apply configuration updates until the channel closes or shutdown fires.
pub async fn apply_config_updates(
    gateway: Arc<Gateway>,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    shutdown: Shutdown,
) {
    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                match gateway.reload(&config) {
                    Ok(()) => tracing::info!(routes = config.routes.len(), "configuration reloaded"),
                    Err(e) => tracing::error!(error = %e, "reload rejected, keeping current routes"),
                }
            }
            _ = stop.recv() => break,
        }
    }
    tracing::debug!("config update task stopped");
}

/// Wait for a shutdown trigger or Ctrl+C. Ctrl+C also triggers `shutdown`
/// so that background tasks stop with the server.
async fn shutdown_signal(shutdown: Shutdown) {
    let mut rx = shutdown.subscribe();
    let mut fallback = shutdown.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("shutdown signal received"),
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for Ctrl+C");
                    let _ = fallback.recv().await;
                }
            }
            shutdown.trigger();
        }
        _ = rx.recv() => tracing::info!("shutdown requested"),
    }
}
