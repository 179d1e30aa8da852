//! Gateway facade.
//!
//! # Data Flow
//! ```text
//! Exchange
//!     → web filters (WeightCalculator)
//!     → RoutingTerminal: route table lookup
//!         miss → RouteNotMatched (404)
//!         hit  → exchange.route = route
//!              → route chain (route filters + global filters)
//!              → ForwardingTerminal → Transport
//!     → Err(Fallback) from a circuit breaker: path set to the fallback
//!       path, routing cleared, exchange dispatched once more
//!     → Err(e) turned into a response
//!     → staged response headers applied
//!     → request metrics recorded
//! ```
//!
//! # Design Decisions
//! - `handle` always produces a response; errors stop at this boundary
//! - Route tables are rebuilt off the request path and published with a
//!   single atomic swap; in-flight requests keep their snapshot
//! - Weight registrations from configuration are applied only after the
//!   new table built, so a failed reload leaves the registry untouched

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Response;
use axum::response::IntoResponse;

use super::forward::{ForwardingTerminal, HttpTransport, Transport};
use crate::config::factory::{Components, FactoryRegistry, WeightRegistration};
use crate::config::schema::{GatewayConfig, XForwardedConfig};
use crate::error::{ExecutionFailure, GatewayError, GatewayResult};
use crate::exchange::{keys, Exchange};
use crate::filter::{
    FilterChain, FilterResponse, GatewayFilter, OrderedFilter, RouteToRequestUrlFilter, Terminal,
    XForwardedHeadersFilter,
};
use crate::load_balancer::{LoadBalancerFilter, ServiceRegistry};
use crate::observability::metrics;
use crate::ratelimit::{KeyResolver, RateLimiter};
use crate::routing::{Route, RouteLocator, RouteTable};
use crate::weight::{RandomSource, WeightCalculatorFilter, WeightRegistry};

/// Label used for requests that matched no route.
const NO_ROUTE: &str = "none";

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    factories: FactoryRegistry,
    components: Components,
    transport: Option<Arc<dyn Transport>>,
    random: Option<Arc<dyn RandomSource>>,
    default_timeout: Duration,
    x_forwarded: XForwardedConfig,
    global_filters: Vec<Arc<dyn GatewayFilter>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            factories: FactoryRegistry::with_defaults(),
            components: Components::new(),
            transport: None,
            random: None,
            default_timeout: Duration::from_secs(30),
            x_forwarded: XForwardedConfig::default(),
            global_filters: Vec::new(),
        }
    }

    pub fn factories(mut self, factories: FactoryRegistry) -> Self {
        self.factories = factories;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Source of weight draws, mainly for deterministic tests.
    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    /// Response timeout for routes that do not set their own.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn x_forwarded(mut self, config: XForwardedConfig) -> Self {
        self.x_forwarded = config;
        self
    }

    pub fn rate_limiter(mut self, name: impl Into<String>, limiter: Arc<dyn RateLimiter>) -> Self {
        self.components.register_rate_limiter(name, limiter);
        self
    }

    pub fn key_resolver(mut self, name: impl Into<String>, resolver: Arc<dyn KeyResolver>) -> Self {
        self.components.register_key_resolver(name, resolver);
        self
    }

    /// Extra filter applied to every route.
    pub fn global_filter(mut self, filter: Arc<dyn GatewayFilter>) -> Self {
        self.global_filters.push(filter);
        self
    }

    pub fn build(self) -> Gateway {
        let weights = Arc::new(WeightRegistry::new());
        let services = Arc::new(ServiceRegistry::new());

        let calculator = match self.random {
            Some(random) => WeightCalculatorFilter::with_random(weights.clone(), random),
            None => WeightCalculatorFilter::new(weights.clone()),
        };
        let calculator: Arc<dyn GatewayFilter> = Arc::new(calculator);
        let web_filters = FilterChain::from_filters(vec![OrderedFilter::with_fallback(calculator, 0)]);

        let route_to_url: Arc<dyn GatewayFilter> = Arc::new(RouteToRequestUrlFilter);
        let load_balancer: Arc<dyn GatewayFilter> = Arc::new(LoadBalancerFilter::new(services.clone()));
        let forwarded: Arc<dyn GatewayFilter> = Arc::new(XForwardedHeadersFilter::new(self.x_forwarded));
        let global_filters = [route_to_url, load_balancer, forwarded]
            .into_iter()
            .chain(self.global_filters)
            .map(|f| OrderedFilter::with_fallback(f, 0))
            .collect();

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::default()));

        Gateway {
            factories: self.factories,
            components: self.components,
            weights,
            services,
            locator: RouteLocator::default(),
            global_filters,
            web_filters,
            terminal: ForwardingTerminal::new(transport, self.default_timeout),
        }
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Route matching and filter execution for every request.
pub struct Gateway {
    factories: FactoryRegistry,
    components: Components,
    weights: Arc<WeightRegistry>,
    services: Arc<ServiceRegistry>,
    locator: RouteLocator,
    global_filters: Vec<OrderedFilter>,
    web_filters: FilterChain,
    terminal: ForwardingTerminal,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Build a gateway with the HTTP transport described by `config` and
    /// load its routes.
    pub fn from_config(config: &GatewayConfig, builder: GatewayBuilder) -> GatewayResult<Self> {
        let client = &config.http_client;
        let builder = if builder.transport.is_none() {
            builder.transport(Arc::new(HttpTransport::new(
                Duration::from_millis(client.connect_timeout_ms),
                client.max_body_bytes,
            )))
        } else {
            builder
        };
        let gateway = builder
            .default_timeout(Duration::from_millis(client.response_timeout_ms))
            .x_forwarded(config.x_forwarded.clone())
            .build();
        gateway.reload(config)?;
        Ok(gateway)
    }

    pub fn weights(&self) -> &Arc<WeightRegistry> {
        &self.weights
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        self.locator.current()
    }

    pub fn global_filters(&self) -> &[OrderedFilter] {
        &self.global_filters
    }

    /// Publish routes built in code.
    pub fn set_routes(&self, routes: Vec<Route>) -> GatewayResult<()> {
        let table = RouteTable::new(routes, &self.global_filters)?;
        self.publish(table, None);
        Ok(())
    }

    /// Rebuild services and routes from configuration and swap them in.
    /// On error the current routes, services and weights stay in place.
    pub fn reload(&self, config: &GatewayConfig) -> GatewayResult<()> {
        let mut routes = Vec::with_capacity(config.routes.len());
        let mut registrations = Vec::new();
        for definition in &config.routes {
            let built = self.factories.build_route(
                definition,
                &config.default_filters,
                &self.components,
            )?;
            routes.push(built.route);
            registrations.extend(built.weights);
        }
        let table = RouteTable::new(routes, &self.global_filters)?;

        self.services.replace(
            config
                .services
                .iter()
                .map(|s| (s.id.clone(), s.instances.clone())),
        )?;
        self.publish(table, Some(registrations));
        Ok(())
    }

    /// Swap in `table`. With `registrations`, the weight registry is made
    /// to match them; without, only routes that left the table lose their
    /// weights.
    fn publish(&self, table: RouteTable, registrations: Option<Vec<WeightRegistration>>) {
        let kept: HashSet<String> = table.route_ids().into_iter().map(str::to_string).collect();
        let weighted: Option<HashSet<String>> = registrations
            .as_ref()
            .map(|r| r.iter().map(|r| r.route_id.clone()).collect());

        for registration in registrations.iter().flatten() {
            if let Err(e) = self.weights.add_weight(
                &registration.group,
                &registration.route_id,
                registration.weight,
            ) {
                tracing::warn!(route_id = %registration.route_id, error = %e, "weight not registered");
            }
        }

        let previous = self.locator.publish(table);
        for id in previous.route_ids() {
            let dropped = !kept.contains(id);
            let unweighted = weighted.as_ref().is_some_and(|w| !w.contains(id));
            if (dropped || unweighted) && self.weights.remove_route(id) {
                tracing::debug!(route_id = %id, "weight unregistered");
            }
        }
    }

    /// Run one exchange end to end.
    pub async fn handle(&self, mut exchange: Exchange) -> Response<Body> {
        let start = Instant::now();
        let method = exchange.method().to_string();

        let routing = RoutingTerminal {
            locator: &self.locator,
            forward: &self.terminal,
        };
        let result = match self.web_filters.execute(&mut exchange, &routing).await {
            Err(GatewayError::Fallback {
                breaker,
                path,
                failure,
            }) => {
                self.dispatch_fallback(&mut exchange, &routing, &breaker, &path, failure)
                    .await
            }
            other => other,
        };

        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    GatewayError::RouteNotMatched { .. } => {
                        tracing::debug!(error = %e, "request rejected")
                    }
                    _ => tracing::warn!(error = %e, kind = ?e.kind(), "request failed"),
                }
                e.into_response()
            }
        };
        exchange.apply_response_headers(&mut response);

        let route_id = exchange
            .route()
            .map(|r| r.id().to_string())
            .unwrap_or_else(|| NO_ROUTE.to_string());
        metrics::record_request(&route_id, &method, response.status().as_u16(), start);
        response
    }
}

impl Gateway {
    /// Route the exchange again under the fallback path of `breaker`.
    async fn dispatch_fallback(
        &self,
        exchange: &mut Exchange,
        routing: &RoutingTerminal<'_>,
        breaker: &str,
        path: &str,
        failure: ExecutionFailure,
    ) -> FilterResponse {
        tracing::info!(breaker = %breaker, path = %path, failure = %failure, "dispatching fallback");
        exchange.set_path(path)?;
        exchange.clear_routing();
        exchange
            .attributes_mut()
            .insert(keys::CIRCUIT_BREAKER_EXECUTION_FAILURE, failure);

        match self.web_filters.execute(exchange, routing).await {
            Err(GatewayError::Fallback { breaker: nested, .. }) => {
                tracing::warn!(breaker = %breaker, nested = %nested, "fallback route fell back again");
                Err(GatewayError::CircuitOpen(nested))
            }
            other => other,
        }
    }
}

/// Innermost step of the web filter chain: route lookup, then the route chain.
struct RoutingTerminal<'a> {
    locator: &'a RouteLocator,
    forward: &'a ForwardingTerminal,
}

#[async_trait]
impl<'a> Terminal for RoutingTerminal<'a> {
    async fn call(&self, exchange: &mut Exchange) -> FilterResponse {
        let table = self.locator.current();
        let Some(entry) = table.lookup(exchange).await.cloned() else {
            metrics::record_route_miss();
            return Err(GatewayError::RouteNotMatched {
                method: exchange.method().to_string(),
                path: exchange.path().to_string(),
            });
        };
        exchange.set_route(entry.route.clone());
        entry.chain.execute(exchange, self.forward).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;
    use crate::predicate::PathPredicate;
    use axum::http::{Request, StatusCode};

    struct Echo;

    #[async_trait]
    impl Transport for Echo {
        async fn forward(&self, exchange: &mut Exchange) -> GatewayResult<Response<Body>> {
            let url = exchange.request_url().map(|u| u.to_string()).unwrap_or_default();
            Ok(Response::new(Body::from(url)))
        }
    }

    fn gateway() -> Gateway {
        Gateway::builder().transport(Arc::new(Echo)).build()
    }

    fn exchange(uri: &str) -> Exchange {
        Exchange::new(Request::builder().uri(uri).body(Body::empty()).unwrap())
    }

    async fn body(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_route_miss_is_404() {
        let gw = gateway();
        let resp = gw.handle(exchange("/nothing")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(body(resp).await.contains("ROUTE_NOT_MATCHED"));
    }

    #[tokio::test]
    async fn test_forwards_to_route_uri() {
        let gw = gateway();
        gw.set_routes(vec![Route::builder("users")
            .uri("http://users:8080")
            .predicate(PathPredicate::new(["/users/**"], true).unwrap())
            .build()
            .unwrap()])
            .unwrap();

        let resp = gw.handle(exchange("/users/1?a=b")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body(resp).await, "http://users:8080/users/1?a=b");
    }

    #[tokio::test]
    async fn test_reload_swaps_routes_and_weights() {
        let gw = gateway();
        let first = parse_config(
            r#"
            [[routes]]
            id = "v1"
            uri = "http://v1"
            predicates = ["Weight=svc,1"]

            [[routes]]
            id = "v2"
            uri = "http://v2"
            predicates = ["Weight=svc,1"]
            "#,
        )
        .unwrap();
        gw.reload(&first).unwrap();
        assert_eq!(gw.weights().group("svc").unwrap().len(), 2);

        let second = parse_config(
            r#"
            [[routes]]
            id = "v1"
            uri = "http://v1"
            predicates = ["Weight=svc,1"]
            "#,
        )
        .unwrap();
        gw.reload(&second).unwrap();
        assert_eq!(gw.routes().route_ids(), vec!["v1"]);
        assert_eq!(gw.weights().group("svc").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_current_table() {
        let gw = gateway();
        let good = parse_config(
            r#"
            [[routes]]
            id = "ok"
            uri = "http://ok"
            "#,
        )
        .unwrap();
        gw.reload(&good).unwrap();

        let bad = parse_config(
            r#"
            [[routes]]
            id = "broken"
            uri = "http://x"
            filters = ["NoSuchFilter=1"]
            "#,
        )
        .unwrap();
        assert!(gw.reload(&bad).is_err());
        assert_eq!(gw.routes().route_ids(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_lb_route_without_instances_is_503() {
        let gw = gateway();
        let config = parse_config(
            r#"
            [[services]]
            id = "orders"

            [[routes]]
            id = "orders"
            uri = "lb://orders"
            "#,
        )
        .unwrap();
        gw.reload(&config).unwrap();

        let resp = gw.handle(exchange("/orders")).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
