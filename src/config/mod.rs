//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → factory.rs (definitions → predicates, filters, routes)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Gateway::reload builds a new route table
//!     → atomic swap of the route table
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod factory;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use factory::{Args, Components, FactoryContext, FactoryRegistry, FilterFactory, PredicateFactory, ShortcutType};
pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{ComponentDefinition, GatewayConfig, ListenerConfig, RouteDefinition, ServiceConfig};
pub use watcher::ConfigWatcher;
