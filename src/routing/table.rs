//! Route lookup.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::Route;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::{keys, Exchange};
use crate::filter::{FilterChain, OrderedFilter};

/// A route together with its pre-built filter chain.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub route: Arc<Route>,
    pub chain: Arc<FilterChain>,
}

/// Immutable, ordered set of routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Sorts routes by order (stable) and builds each route's chain with
    /// the global filters.
    pub fn new(mut routes: Vec<Route>, global_filters: &[OrderedFilter]) -> GatewayResult<Self> {
        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.id().to_string()) {
                return Err(GatewayError::config(format!(
                    "duplicate route id '{}'",
                    route.id()
                )));
            }
        }

        routes.sort_by_key(Route::order);
        let entries = routes
            .into_iter()
            .map(|route| {
                let chain = FilterChain::build(route.filters(), global_filters);
                RouteEntry {
                    route: Arc::new(route),
                    chain: Arc::new(chain),
                }
            })
            .collect();
        Ok(Self { entries })
    }

    /// First route whose predicate matches.
    ///
    /// Template variables written by a route that ultimately did not match
    /// are discarded before the next route is tried.
    pub async fn lookup(&self, exchange: &mut Exchange) -> Option<&RouteEntry> {
        for entry in &self.entries {
            if entry.route.predicate().test(exchange).await {
                tracing::debug!(
                    route_id = %entry.route.id(),
                    predicate = %entry.route.predicate(),
                    "route matched"
                );
                return Some(entry);
            }
            exchange.attributes_mut().remove(keys::URI_TEMPLATE_VARIABLES);
        }
        None
    }

    pub fn get(&self, id: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.route.id() == id)
    }

    pub fn route_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.route.id()).collect()
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Atomically swappable handle to the current route table.
///
/// Requests load a snapshot; a reload publishes a whole new table.
#[derive(Debug)]
pub struct RouteLocator {
    current: ArcSwap<RouteTable>,
}

impl RouteLocator {
    pub fn new(table: RouteTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(table),
        }
    }

    pub fn current(&self) -> Arc<RouteTable> {
        self.current.load_full()
    }

    /// Replace the table, returning the previous one.
    pub fn publish(&self, table: RouteTable) -> Arc<RouteTable> {
        let previous = self.current.swap(Arc::new(table));
        tracing::info!(
            routes = self.current.load().len(),
            previous = previous.len(),
            "route table published"
        );
        previous
    }
}

impl Default for RouteLocator {
    fn default() -> Self {
        Self::new(RouteTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{HeaderPredicate, PathPredicate};
    use axum::body::Body;
    use axum::http::Request;

    fn exchange(uri: &str, header: Option<&str>) -> Exchange {
        let mut builder = Request::builder().uri(uri);
        if let Some(h) = header {
            builder = builder.header(h, "1");
        }
        Exchange::new(builder.body(Body::empty()).unwrap())
    }

    fn table() -> RouteTable {
        let routes = vec![
            Route::builder("fallback")
                .uri("http://fallback")
                .order(100)
                .build()
                .unwrap(),
            Route::builder("debug-users")
                .uri("http://debug")
                .predicate(PathPredicate::new(["/users/{id}"], true).unwrap())
                .predicate(HeaderPredicate::new("x-debug", None).unwrap())
                .build()
                .unwrap(),
            Route::builder("users")
                .uri("http://users")
                .predicate(PathPredicate::new(["/users/{uid}"], true).unwrap())
                .build()
                .unwrap(),
        ];
        RouteTable::new(routes, &[]).unwrap()
    }

    #[tokio::test]
    async fn test_first_match_by_order() {
        let table = table();
        assert_eq!(table.route_ids(), vec!["debug-users", "users", "fallback"]);

        let mut ex = exchange("/users/7", Some("x-debug"));
        assert_eq!(table.lookup(&mut ex).await.unwrap().route.id(), "debug-users");

        let mut ex = exchange("/other", None);
        assert_eq!(table.lookup(&mut ex).await.unwrap().route.id(), "fallback");
    }

    #[tokio::test]
    async fn test_failed_route_variables_discarded() {
        let table = table();
        let mut ex = exchange("/users/7", None);

        let entry = table.lookup(&mut ex).await.unwrap();
        assert_eq!(entry.route.id(), "users");
        let vars = ex.uri_template_variables().unwrap();
        assert_eq!(vars.get("uid").map(String::as_str), Some("7"));
        // "debug-users" matched its path but not its header
        assert!(!vars.contains_key("id"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let routes = vec![
            Route::builder("a").uri("http://x").build().unwrap(),
            Route::builder("a").uri("http://y").build().unwrap(),
        ];
        assert!(RouteTable::new(routes, &[]).is_err());
    }

    #[test]
    fn test_locator_publish() {
        let locator = RouteLocator::default();
        assert!(locator.current().is_empty());

        let previous = locator.publish(table());
        assert!(previous.is_empty());
        assert_eq!(locator.current().len(), 3);
    }
}
