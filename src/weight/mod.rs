//! Weighted route selection.
//!
//! # Data Flow
//! ```text
//! Weight predicate built for route R (group G, weight W)
//!     → WeightRegistry::add_weight(G, R, W)
//!     → new WeightGroupConfig for G (normalize, cumulative ranges)
//!     → published atomically (copy-on-write map)
//!
//! Per request (web filter, before route lookup):
//!     WeightCalculatorFilter
//!     → for each group: draw r in [0, 1), find bucket owner
//!     → exchange attribute WEIGHTS[G] = chosen route id
//!     → WeightPredicate on route R matches iff WEIGHTS[G] == R
//! ```
//!
//! # Design Decisions
//! - Group configs are immutable values; every update builds a new one
//! - Readers never lock: a request sees one consistent snapshot
//! - Buckets follow insertion order of the routes in a group
//! - A route belongs to at most one group

pub mod calculator;
pub mod config;
pub mod registry;

pub use calculator::{FastRandom, RandomSource, WeightCalculatorFilter};
pub use config::WeightGroupConfig;
pub use registry::WeightRegistry;
