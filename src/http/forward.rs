//! Terminal forward to the backend.
//!
//! # Responsibilities
//! - Mark the exchange as routed and resolve the outgoing URL
//! - Apply the per-attempt response timeout
//! - Send the request through a [`Transport`]
//!
//! # Design Decisions
//! - The request body is buffered so every retry attempt can resend it
//! - Hop-by-hop headers are stripped in both directions
//! - Transport failures surface as `UpstreamConnection`, deadlines as
//!   `UpstreamTimeout`; the retry filter classifies them by kind

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request, Response};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;
use crate::filter::{FilterResponse, RouteToRequestUrlFilter, Terminal};
use crate::resilience::with_timeout;

/// Default cap on a buffered request body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Sends one attempt of the exchange to `exchange.request_url()`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn forward(&self, exchange: &mut Exchange) -> GatewayResult<Response<Body>>;
}

/// Innermost step of every route chain.
pub struct ForwardingTerminal {
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl ForwardingTerminal {
    pub fn new(transport: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

#[async_trait]
impl Terminal for ForwardingTerminal {
    async fn call(&self, exchange: &mut Exchange) -> FilterResponse {
        if exchange.is_already_routed() {
            return Err(GatewayError::filter("Forward", "exchange was already forwarded"));
        }
        exchange.mark_routed();

        let route = exchange.route().cloned();
        if exchange.request_url().is_none() {
            if let Some(route) = &route {
                let url = RouteToRequestUrlFilter::merge(route.uri(), exchange.uri())?;
                exchange.set_request_url(url);
            }
        }
        let url = exchange
            .request_url()
            .cloned()
            .ok_or_else(|| GatewayError::filter("Forward", "no request url to forward to"))?;

        let timeout = route
            .as_ref()
            .and_then(|r| r.response_timeout())
            .unwrap_or(self.default_timeout);
        let route_id = route.as_ref().map(|r| r.id().to_string()).unwrap_or_default();

        tracing::debug!(route_id = %route_id, url = %url, timeout = ?timeout, "forwarding");
        let result = with_timeout(timeout, self.transport.forward(exchange)).await;
        match &result {
            Ok(response) => {
                tracing::debug!(route_id = %route_id, status = %response.status(), "upstream responded")
            }
            Err(e) => tracing::warn!(route_id = %route_id, url = %url, error = %e, "upstream failed"),
        }
        result
    }
}

/// HTTP/1.1 transport on the `hyper-util` pooled client.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Body>,
    max_body_bytes: usize,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, max_body_bytes: usize) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            max_body_bytes,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), DEFAULT_MAX_BODY_BYTES)
    }
}

/// Drop hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

#[async_trait]
impl Transport for HttpTransport {
    async fn forward(&self, exchange: &mut Exchange) -> GatewayResult<Response<Body>> {
        let url = exchange
            .request_url()
            .cloned()
            .ok_or_else(|| GatewayError::filter("Forward", "no request url to forward to"))?;
        let body = exchange.cache_body(self.max_body_bytes).await?;

        let mut headers = exchange.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let mut request = Request::builder()
            .method(exchange.method().clone())
            .uri(url)
            .body(Body::from(body))
            .map_err(|e| GatewayError::filter("Forward", e.to_string()))?;
        *request.headers_mut() = headers;

        let response: Response<Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| GatewayError::UpstreamConnection(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}
