//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request URL lb://users/path (set by RouteToRequestUrl)
//!     → filter.rs (LoadBalancerFilter, order 10150)
//!     → registry.rs (instances of service "users")
//!     → round_robin.rs (rotate through instances)
//!     → request URL rewritten to http://10.0.0.5:8080/path
//! ```
//!
//! # Design Decisions
//! - Load balancing is an ordinary global filter, not part of the transport
//! - Instances are static, taken from the `services` config section
//! - The balancer is stateless apart from its rotation counter
//! - No instance for a service is a 503, not a routing miss

pub mod filter;
pub mod registry;
pub mod round_robin;

use std::fmt;
use std::sync::Arc;

use axum::http::Uri;

use crate::error::{GatewayError, GatewayResult};

pub use filter::LoadBalancerFilter;
pub use registry::ServiceRegistry;
pub use round_robin::RoundRobin;

/// URL scheme routed through the load balancer.
pub const LB_SCHEME: &str = "lb";

/// One addressable instance of a logical service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    service_id: String,
    uri: Uri,
}

impl ServiceInstance {
    /// `uri` must carry a scheme and an authority, e.g. `http://10.0.0.5:8080`.
    pub fn new(service_id: impl Into<String>, uri: &str) -> GatewayResult<Self> {
        let service_id = service_id.into();
        let parsed: Uri = uri.parse().map_err(|e| {
            GatewayError::config(format!(
                "service '{}' instance '{}' is not a valid uri: {}",
                service_id, uri, e
            ))
        })?;
        if parsed.scheme().is_none() || parsed.authority().is_none() {
            return Err(GatewayError::config(format!(
                "service '{}' instance '{}' needs a scheme and host",
                service_id, uri
            )));
        }
        Ok(Self {
            service_id,
            uri: parsed,
        })
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.service_id, self.uri)
    }
}

/// Picks one instance out of a service's instance list.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    fn choose(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>>;
}
