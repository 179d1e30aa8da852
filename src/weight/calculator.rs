use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::WeightRegistry;
use crate::exchange::{keys, Exchange};
use crate::filter::{order, Chain, FilterResponse, GatewayFilter};

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn next_f64(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FastRandom;

impl RandomSource for FastRandom {
    fn next_f64(&self) -> f64 {
        fastrand::f64()
    }
}

impl<F> RandomSource for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn next_f64(&self) -> f64 {
        self()
    }
}

/// Pre-routing filter that picks one route per weight group and records
/// the choice in the exchange's `WEIGHTS` attribute.
pub struct WeightCalculatorFilter {
    registry: Arc<WeightRegistry>,
    random: Arc<dyn RandomSource>,
}

impl WeightCalculatorFilter {
    pub fn new(registry: Arc<WeightRegistry>) -> Self {
        Self::with_random(registry, Arc::new(FastRandom))
    }

    pub fn with_random(registry: Arc<WeightRegistry>, random: Arc<dyn RandomSource>) -> Self {
        Self { registry, random }
    }

    /// Write the per-group selection into the exchange.
    pub fn assign(&self, exchange: &mut Exchange) {
        let groups = self.registry.snapshot();
        if groups.is_empty() {
            return;
        }
        exchange.attributes_mut().update_with(
            keys::WEIGHTS,
            HashMap::new,
            |weights: &mut HashMap<String, String>| {
                for (group, config) in groups.iter() {
                    let r = self.random.next_f64();
                    if let Some(route_id) = config.select(r) {
                        tracing::trace!(group = %group, r, route_id, "weight selected");
                        weights.insert(group.clone(), route_id.to_string());
                    }
                }
            },
        );
    }
}

#[async_trait]
impl GatewayFilter for WeightCalculatorFilter {
    fn name(&self) -> &str {
        "WeightCalculator"
    }

    fn order(&self) -> Option<i32> {
        Some(order::WEIGHT_CALCULATOR)
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        self.assign(exchange);
        chain.proceed(exchange).await
    }
}
