//! Filter chain.
//!
//! # Data Flow
//! ```text
//! Route filters (order = explicit or 1-based position)
//!   + global filters (RouteToRequestUrl 10000, LoadBalancer 10150,
//!     XForwardedHeaders 10200, ...)
//!     → stable sort by order
//!     → FilterChain (built once per route table)
//!
//! Per request (onion):
//!   f1 before → f2 before → ... → terminal forward
//!   f1 after  ← f2 after  ← ... ← response / error
//! ```
//!
//! # Design Decisions
//! - A filter receives the exchange and a `Chain` for the rest of the
//!   pipeline; not calling `proceed` short-circuits everything inside it
//! - `Chain` is `Copy`, so a filter may proceed more than once (retry)
//! - Errors travel back out as `Err`; each filter's after-code sees them
//!   and the boundary turns the final one into a response
//! - Equal orders keep insertion order (stable sort)

pub mod forwarded;
pub mod headers;
pub mod path;
pub mod route_to_url;
pub mod status;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Response;
use futures_util::future::BoxFuture;

use crate::error::GatewayResult;
use crate::exchange::Exchange;

pub use forwarded::XForwardedHeadersFilter;
pub use headers::{
    AddRequestHeader, AddResponseHeader, RemoveRequestHeader, RemoveResponseHeader,
    SetRequestHeader, SetResponseHeader,
};
pub use path::{PrefixPath, RewritePath, SetPath, StripPrefix};
pub use route_to_url::RouteToRequestUrlFilter;
pub use status::SetStatus;

/// Well-known order slots.
pub mod order {
    pub const HIGHEST_PRECEDENCE: i32 = i32::MIN;
    pub const LOWEST_PRECEDENCE: i32 = i32::MAX;
    /// Merges the route URI into the request URL.
    pub const ROUTE_TO_REQUEST_URL: i32 = 10000;
    /// Draws a route for every weight group (pre-routing).
    pub const WEIGHT_CALCULATOR: i32 = 10001;
    /// Resolves `lb://` URLs to a service instance.
    pub const LOAD_BALANCER: i32 = 10150;
    /// Adds `X-Forwarded-*` request headers.
    pub const X_FORWARDED_HEADERS: i32 = 10200;
}

pub type FilterResponse = GatewayResult<Response<Body>>;

/// A step in the onion around the terminal forward.
#[async_trait]
pub trait GatewayFilter: Send + Sync {
    /// Stable identifier used in logs.
    fn name(&self) -> &str;

    /// Explicit order. Route filters without one get their position.
    fn order(&self) -> Option<i32> {
        None
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse;
}

/// Innermost step of a chain.
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn call(&self, exchange: &mut Exchange) -> FilterResponse;
}

/// A filter with its resolved order.
#[derive(Clone)]
pub struct OrderedFilter {
    pub order: i32,
    pub filter: Arc<dyn GatewayFilter>,
}

impl OrderedFilter {
    pub fn new(order: i32, filter: Arc<dyn GatewayFilter>) -> Self {
        Self { order, filter }
    }

    /// Uses the filter's own order, or `fallback` when it has none.
    pub fn with_fallback(filter: Arc<dyn GatewayFilter>, fallback: i32) -> Self {
        let order = filter.order().unwrap_or(fallback);
        Self { order, filter }
    }
}

impl fmt::Debug for OrderedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedFilter")
            .field("order", &self.order)
            .field("filter", &self.filter.name())
            .finish()
    }
}

/// Remaining filters plus the terminal.
#[derive(Clone, Copy)]
pub struct Chain<'a> {
    filters: &'a [OrderedFilter],
    terminal: &'a dyn Terminal,
}

impl<'a> Chain<'a> {
    pub fn new(filters: &'a [OrderedFilter], terminal: &'a dyn Terminal) -> Self {
        Self { filters, terminal }
    }

    /// Run the next filter, or the terminal when none remain.
    pub fn proceed<'b>(self, exchange: &'b mut Exchange) -> BoxFuture<'b, FilterResponse>
    where
        'a: 'b,
    {
        Box::pin(async move {
            match self.filters.split_first() {
                Some((next, rest)) => {
                    tracing::trace!(filter = next.filter.name(), order = next.order, "filter");
                    let chain = Chain {
                        filters: rest,
                        terminal: self.terminal,
                    };
                    next.filter.filter(exchange, chain).await
                }
                None => self.terminal.call(exchange).await,
            }
        })
    }

    pub fn remaining(&self) -> usize {
        self.filters.len()
    }
}

/// Filters of one route merged with the global filters, sorted by order.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<OrderedFilter>,
}

impl FilterChain {
    /// Globals are placed first so that on equal order they run first.
    pub fn build(route_filters: &[OrderedFilter], global_filters: &[OrderedFilter]) -> Self {
        Self::from_filters(
            global_filters
                .iter()
                .chain(route_filters.iter())
                .cloned()
                .collect(),
        )
    }

    pub fn from_filters(mut filters: Vec<OrderedFilter>) -> Self {
        filters.sort_by_key(|f| f.order);
        Self { filters }
    }

    pub fn filters(&self) -> &[OrderedFilter] {
        &self.filters
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.filter.name()).collect()
    }

    pub async fn execute(&self, exchange: &mut Exchange, terminal: &dyn Terminal) -> FilterResponse {
        Chain::new(&self.filters, terminal).proceed(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use axum::http::{Request, StatusCode};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: String,
        log: Log,
        short_circuit: bool,
    }

    #[async_trait]
    impl GatewayFilter for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
            self.log.lock().unwrap().push(format!("{} before", self.name));
            let result = if self.short_circuit {
                Ok(Response::builder()
                    .status(StatusCode::FORBIDDEN)
                    .body(Body::empty())
                    .unwrap())
            } else {
                chain.proceed(exchange).await
            };
            self.log.lock().unwrap().push(format!("{} after", self.name));
            result
        }
    }

    struct Backend {
        log: Log,
        fail: bool,
    }

    #[async_trait]
    impl Terminal for Backend {
        async fn call(&self, _exchange: &mut Exchange) -> FilterResponse {
            self.log.lock().unwrap().push("terminal".into());
            if self.fail {
                return Err(GatewayError::UpstreamConnection("refused".into()));
            }
            Ok(Response::new(Body::empty()))
        }
    }

    fn filter(name: &str, order: i32, log: &Log, short_circuit: bool) -> OrderedFilter {
        OrderedFilter::new(
            order,
            Arc::new(Recording {
                name: name.into(),
                log: log.clone(),
                short_circuit,
            }),
        )
    }

    fn exchange() -> Exchange {
        Exchange::new(Request::builder().uri("/").body(Body::empty()).unwrap())
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log: Log = Arc::default();
        let chain = FilterChain::from_filters(vec![
            filter("b", 2, &log, false),
            filter("a", 1, &log, false),
        ]);
        let terminal = Backend { log: log.clone(), fail: false };

        chain.execute(&mut exchange(), &terminal).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a before", "b before", "terminal", "b after", "a after"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner() {
        let log: Log = Arc::default();
        let chain = FilterChain::from_filters(vec![
            filter("outer", 1, &log, false),
            filter("gate", 2, &log, true),
            filter("inner", 3, &log, false),
        ]);
        let terminal = Backend { log: log.clone(), fail: false };

        let resp = chain.execute(&mut exchange(), &terminal).await.unwrap();

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer before", "gate before", "gate after", "outer after"]
        );
    }

    #[tokio::test]
    async fn test_after_code_runs_on_error() {
        let log: Log = Arc::default();
        let chain = FilterChain::from_filters(vec![filter("a", 1, &log, false)]);
        let terminal = Backend { log: log.clone(), fail: true };

        let err = chain.execute(&mut exchange(), &terminal).await.unwrap_err();

        assert!(matches!(err, GatewayError::UpstreamConnection(_)));
        assert_eq!(*log.lock().unwrap(), vec!["a before", "terminal", "a after"]);
    }

    #[test]
    fn test_build_is_stable_with_globals_first() {
        let log: Log = Arc::default();
        let route = vec![filter("route-1", 1, &log, false), filter("route-2", 10000, &log, false)];
        let global = vec![filter("global", 10000, &log, false)];

        let chain = FilterChain::build(&route, &global);

        assert_eq!(chain.names(), vec!["route-1", "global", "route-2"]);
    }
}
