use async_trait::async_trait;
use axum::http::{uri::PathAndQuery, Uri};

use super::{order, Chain, FilterResponse, GatewayFilter};
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

/// Global filter that builds the outgoing URL from the route URI's scheme
/// and authority plus the (possibly rewritten) request path and query.
pub struct RouteToRequestUrlFilter;

impl RouteToRequestUrlFilter {
    pub fn merge(route_uri: &Uri, request_uri: &Uri) -> GatewayResult<Uri> {
        let path_and_query = request_uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        let mut parts = route_uri.clone().into_parts();
        parts.path_and_query = Some(path_and_query);
        Uri::from_parts(parts).map_err(|e| {
            GatewayError::filter(
                "RouteToRequestUrl",
                format!("cannot merge '{}' with '{}': {}", route_uri, request_uri, e),
            )
        })
    }
}

#[async_trait]
impl GatewayFilter for RouteToRequestUrlFilter {
    fn name(&self) -> &str {
        "RouteToRequestUrl"
    }

    fn order(&self) -> Option<i32> {
        Some(order::ROUTE_TO_REQUEST_URL)
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        if let Some(route) = exchange.route().cloned() {
            let url = Self::merge(route.uri(), exchange.uri())?;
            tracing::trace!(route_id = %route.id(), url = %url, "request url");
            exchange.set_request_url(url);
        }
        chain.proceed(exchange).await
    }
}
