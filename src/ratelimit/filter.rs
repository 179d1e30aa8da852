use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Response, StatusCode};

use super::{KeyResolver, RateLimiter};
use crate::error::GatewayError;
use crate::exchange::Exchange;
use crate::filter::headers::{header_name, header_value};
use crate::filter::{Chain, FilterResponse, GatewayFilter};
use crate::observability::metrics;

/// Consults a [`RateLimiter`] and short-circuits on denial.
pub struct RequestRateLimiterFilter {
    limiter: Arc<dyn RateLimiter>,
    key_resolver: Arc<dyn KeyResolver>,
    route_id: Option<String>,
    deny_empty_key: bool,
    empty_key_status: StatusCode,
    status: StatusCode,
}

impl RequestRateLimiterFilter {
    /// Defaults: deny empty keys with 403, deny limited requests with 429.
    pub fn new(limiter: Arc<dyn RateLimiter>, key_resolver: Arc<dyn KeyResolver>) -> Self {
        Self {
            limiter,
            key_resolver,
            route_id: None,
            deny_empty_key: true,
            empty_key_status: StatusCode::FORBIDDEN,
            status: StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Limit under this id instead of the matched route's id.
    pub fn route_id(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = Some(route_id.into());
        self
    }

    pub fn deny_empty_key(mut self, deny: bool) -> Self {
        self.deny_empty_key = deny;
        self
    }

    pub fn empty_key_status(mut self, status: StatusCode) -> Self {
        self.empty_key_status = status;
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    fn reject(status: StatusCode) -> FilterResponse {
        Response::builder()
            .status(status)
            .body(Body::empty())
            .map_err(|e| GatewayError::filter("RequestRateLimiter", e.to_string()))
    }
}

#[async_trait]
impl GatewayFilter for RequestRateLimiterFilter {
    fn name(&self) -> &str {
        "RequestRateLimiter"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let key = self
            .key_resolver
            .resolve(exchange)
            .filter(|k| !k.is_empty());

        let Some(key) = key else {
            if self.deny_empty_key {
                tracing::warn!(path = %exchange.path(), status = %self.empty_key_status, "empty rate limit key denied");
                return Self::reject(self.empty_key_status);
            }
            return chain.proceed(exchange).await;
        };

        let route_id = match (&self.route_id, exchange.route()) {
            (Some(id), _) => id.clone(),
            (None, Some(route)) => route.id().to_string(),
            (None, None) => {
                return Err(GatewayError::filter(
                    "RequestRateLimiter",
                    "no route id configured and no route on the exchange",
                ))
            }
        };

        let decision = self.limiter.is_allowed(&route_id, &key).await?;

        for (name, value) in &decision.headers {
            match (header_name(name), header_value(value)) {
                (Ok(name), Ok(value)) => exchange.add_response_header(name, value),
                _ => tracing::debug!(header = %name, "limiter returned an invalid header"),
            }
        }

        if decision.allowed {
            return chain.proceed(exchange).await;
        }

        tracing::warn!(
            route_id = %route_id,
            key = %key,
            remaining = ?decision.tokens_remaining,
            "rate limit exceeded"
        );
        metrics::record_rate_limited(&route_id);
        Self::reject(self.status)
    }
}
