//! Route definition.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Uri;

use crate::error::{GatewayError, GatewayResult};
use crate::filter::{GatewayFilter, OrderedFilter};
use crate::predicate::{And, Predicate};

/// An immutable route.
pub struct Route {
    id: String,
    uri: Uri,
    order: i32,
    predicate: Arc<dyn Predicate>,
    filters: Vec<OrderedFilter>,
    response_timeout: Option<Duration>,
    metadata: HashMap<String, String>,
}

impl Route {
    pub fn builder(id: impl Into<String>) -> RouteBuilder {
        RouteBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn predicate(&self) -> &Arc<dyn Predicate> {
        &self.predicate
    }

    pub fn filters(&self) -> &[OrderedFilter] {
        &self.filters
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("order", &self.order)
            .field("predicate", &self.predicate.to_string())
            .field("filters", &self.filters)
            .finish()
    }
}

/// Builder for [`Route`]. Predicates are ANDed in the order added.
pub struct RouteBuilder {
    id: String,
    uri: Option<String>,
    order: i32,
    predicates: Vec<Arc<dyn Predicate>>,
    filters: Vec<(Arc<dyn GatewayFilter>, Option<i32>)>,
    response_timeout: Option<Duration>,
    metadata: HashMap<String, String>,
}

impl RouteBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: None,
            order: 0,
            predicates: Vec::new(),
            filters: Vec::new(),
            response_timeout: None,
            metadata: HashMap::new(),
        }
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn predicate<P: Predicate + 'static>(self, predicate: P) -> Self {
        self.predicate_arc(Arc::new(predicate))
    }

    pub fn predicate_arc(mut self, predicate: Arc<dyn Predicate>) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds a filter ordered by its own `order()` or its position.
    pub fn filter<F: GatewayFilter + 'static>(self, filter: F) -> Self {
        self.filter_arc(Arc::new(filter))
    }

    pub fn filter_arc(mut self, filter: Arc<dyn GatewayFilter>) -> Self {
        self.filters.push((filter, None));
        self
    }

    pub fn filter_with_order(mut self, filter: Arc<dyn GatewayFilter>, order: i32) -> Self {
        self.filters.push((filter, Some(order)));
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> GatewayResult<Route> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::config("route id must not be empty"));
        }
        let raw = self
            .uri
            .ok_or_else(|| GatewayError::config(format!("route '{}' has no uri", self.id)))?;
        let uri: Uri = raw
            .parse()
            .map_err(|e| GatewayError::config(format!("route '{}' has invalid uri '{}': {}", self.id, raw, e)))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(GatewayError::config(format!(
                "route '{}' uri '{}' needs a scheme and host",
                self.id, raw
            )));
        }

        let filters = self
            .filters
            .into_iter()
            .enumerate()
            .map(|(i, (filter, order))| match order {
                Some(order) => OrderedFilter::new(order, filter),
                None => OrderedFilter::with_fallback(filter, i as i32 + 1),
            })
            .collect();

        Ok(Route {
            id: self.id,
            uri,
            order: self.order,
            predicate: And::all(self.predicates),
            filters,
            response_timeout: self.response_timeout,
            metadata: self.metadata,
        })
    }
}
