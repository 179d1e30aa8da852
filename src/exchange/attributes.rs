//! Per-request attribute bag.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Well-known attribute names shared between predicates and filters.
pub mod keys {
    /// `HashMap<String, String>` of template variables captured by Path/Host.
    pub const URI_TEMPLATE_VARIABLES: &str = "gateway.uri_template_variables";
    /// `HashMap<String, String>` of weight group -> selected route id.
    pub const WEIGHTS: &str = "gateway.weights";
    /// Marker set by the forwarding terminal for the current attempt.
    pub const ALREADY_ROUTED: &str = "gateway.already_routed";
    /// `RetryState` of the enclosing retry filter.
    pub const RETRY_STATE: &str = "gateway.retry_state";
    /// Decoded body cached by the ReadBody predicate.
    pub const CACHED_BODY_OBJECT: &str = "gateway.cached_body_object";
    /// `ExecutionFailure` that sent the request to a circuit breaker fallback.
    pub const CIRCUIT_BREAKER_EXECUTION_FAILURE: &str = "gateway.circuit_breaker_execution_failure";
}

/// String-keyed map of typed values owned by a single exchange.
///
/// Values are stored as `Any`; a typed lookup with the wrong type behaves
/// like a missing key.
#[derive(Default)]
pub struct Attributes {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Applies `f` to the value under `key`, starting from `default()` when
    /// the key is missing or holds a value of another type.
    pub fn update_with<T, D, F>(&mut self, key: &str, default: D, f: F)
    where
        T: Any + Send + Sync,
        D: FnOnce() -> T,
        F: FnOnce(&mut T),
    {
        let mut value: Box<T> = match self.values.remove(key).map(|v| v.downcast::<T>()) {
            Some(Ok(value)) => value,
            _ => Box::new(default()),
        };
        f(&mut value);
        self.values.insert(key.to_string(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}
