//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway, filters, retry, rate limiter:
//!     → tracing events with route_id / filter / attempt fields
//!     → logging.rs (EnvFilter + fmt subscriber)
//!     → metrics.rs (counters, histograms via the metrics facade)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID (`x-request-id`) is set and propagated by the HTTP layer
//! - Metrics are cheap (atomic increments behind the facade)

pub mod logging;
pub mod metrics;
