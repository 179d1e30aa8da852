//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Route chain:
//!     → retries.rs (RetryFilter wraps the rest of the chain)
//!         → attempt: proceed → forwarding terminal
//!             → timeouts.rs (per-attempt deadline)
//!         → retryable status / error? reset attempt state
//!         → backoff.rs (delay before the next attempt)
//!     → circuit_breaker.rs (CircuitBreakerFilter counts failures, refuses
//!       calls while open, hands failed calls to a forward: fallback)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every forward has a deadline
//! - Status-based retries only for configured methods (GET by default)
//! - All resilience logic is a composable gateway filter

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffConfig;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerFilter, CircuitState, FallbackHeaders,
};
pub use retries::{RetryConfig, RetryFilter, RetryState, StatusSeries};
pub use timeouts::with_timeout;
