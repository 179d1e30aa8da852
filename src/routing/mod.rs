//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route definitions (config or RouteBuilder)
//!     → route.rs (Route: id, uri, order, predicate, filters)
//!     → table.rs (sort by order, pre-build each route's FilterChain)
//!     → RouteLocator (ArcSwap, swapped wholesale on reload)
//!
//! Incoming Exchange
//!     → RouteTable::lookup (first route whose predicate passes)
//!     → Return: matched RouteEntry or None
//! ```
//!
//! # Design Decisions
//! - Routes are immutable once published; a reload builds a new table
//! - Deterministic: lower order first, ties keep definition order
//! - First match wins

pub mod route;
pub mod table;

pub use route::{Route, RouteBuilder};
pub use table::{RouteEntry, RouteLocator, RouteTable};
