//! Weight group membership predicate.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use super::Predicate;
use crate::exchange::{keys, Exchange};

/// Matches when the weight calculator picked this route for its group.
///
/// The route must also be registered in the weight registry; the route
/// factory does that when it builds the predicate.
#[derive(Debug, Clone)]
pub struct WeightPredicate {
    group: String,
    route_id: String,
}

impl WeightPredicate {
    pub fn new(group: impl Into<String>, route_id: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            route_id: route_id.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

#[async_trait]
impl Predicate for WeightPredicate {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        exchange
            .attributes()
            .get::<HashMap<String, String>>(keys::WEIGHTS)
            .and_then(|weights| weights.get(&self.group))
            .map(|chosen| chosen == &self.route_id)
            .unwrap_or(false)
    }
}

impl fmt::Display for WeightPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Weight {} ({})", self.group, self.route_id)
    }
}
