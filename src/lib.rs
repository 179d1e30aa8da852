//! Programmable API gateway library.
//!
//! Routes are predicates plus ordered filter chains. Requests pass through
//! web filters (weight assignment), route lookup, the matched route's
//! chain and finally a forwarding terminal that calls the backend.

// Core engine
pub mod error;
pub mod exchange;
pub mod filter;
pub mod predicate;
pub mod routing;

// Traffic management
pub mod load_balancer;
pub mod ratelimit;
pub mod resilience;
pub mod weight;

// Surfaces and cross-cutting concerns
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use exchange::Exchange;
pub use http::{Gateway, GatewayBuilder, HttpServer};
pub use lifecycle::Shutdown;
