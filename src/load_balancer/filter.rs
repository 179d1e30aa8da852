use std::sync::Arc;

use async_trait::async_trait;
use axum::http::uri::PathAndQuery;
use axum::http::Uri;

use super::{ServiceInstance, ServiceRegistry, LB_SCHEME};
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;
use crate::filter::{order, Chain, FilterResponse, GatewayFilter};

/// Global filter resolving `lb://service` request URLs to an instance.
pub struct LoadBalancerFilter {
    registry: Arc<ServiceRegistry>,
}

impl LoadBalancerFilter {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Scheme and authority from the instance, path and query from `url`.
    pub fn reconstruct(instance: &ServiceInstance, url: &Uri) -> GatewayResult<Uri> {
        let mut parts = instance.uri().clone().into_parts();
        parts.path_and_query = Some(
            url.path_and_query()
                .cloned()
                .unwrap_or_else(|| PathAndQuery::from_static("/")),
        );
        Uri::from_parts(parts).map_err(|e| {
            GatewayError::filter(
                "LoadBalancer",
                format!("cannot rewrite '{}' for {}: {}", url, instance, e),
            )
        })
    }
}

#[async_trait]
impl GatewayFilter for LoadBalancerFilter {
    fn name(&self) -> &str {
        "LoadBalancer"
    }

    fn order(&self) -> Option<i32> {
        Some(order::LOAD_BALANCER)
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let Some(url) = exchange.request_url().cloned() else {
            return chain.proceed(exchange).await;
        };
        if url.scheme_str() != Some(LB_SCHEME) {
            return chain.proceed(exchange).await;
        }

        let service_id = url.host().unwrap_or_default().to_string();
        let instance = self
            .registry
            .choose(&service_id)
            .ok_or_else(|| GatewayError::ServiceUnavailable(service_id.clone()))?;
        let resolved = Self::reconstruct(&instance, &url)?;
        tracing::debug!(service = %service_id, url = %resolved, "load balanced");
        exchange.set_request_url(resolved);

        chain.proceed(exchange).await
    }
}
