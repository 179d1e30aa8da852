//! Rate limiter enforcement.
//!
//! # Data Flow
//! ```text
//! RequestRateLimiter filter
//!     → KeyResolver::resolve(exchange)
//!         empty key: deny_empty_key ? short-circuit (403) : proceed
//!     → RateLimiter::is_allowed(route_id, key)     (suspends)
//!     → decision headers staged on the response (always)
//!     → allowed ? proceed : short-circuit (429)
//! ```
//!
//! # Design Decisions
//! - Only the limiter contract lives here; storage and algorithm belong to
//!   the `RateLimiter` implementation registered with the gateway
//! - A denial is a response, not an error

pub mod filter;
pub mod key_resolver;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::GatewayResult;

pub use filter::RequestRateLimiterFilter;
pub use key_resolver::{HeaderKeyResolver, KeyResolver, RemoteAddrKeyResolver};

/// Outcome of a limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Remaining tokens, `None` when the limiter does not report it.
    pub tokens_remaining: Option<u64>,
    /// Headers to add to the response whatever the outcome.
    pub headers: HashMap<String, String>,
}

impl RateLimitDecision {
    pub fn allowed(tokens_remaining: Option<u64>) -> Self {
        Self {
            allowed: true,
            tokens_remaining,
            headers: HashMap::new(),
        }
    }

    pub fn denied() -> Self {
        Self {
            allowed: false,
            tokens_remaining: Some(0),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// External limiter contract.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn is_allowed(&self, route_id: &str, key: &str) -> GatewayResult<RateLimitDecision>;
}
