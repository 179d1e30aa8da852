//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Build gateway → Start watcher → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C or trigger → Stop accepting → Drain connections
//!     → Config update task exits → Watcher dropped
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then gateway, then listener
//! - One broadcast channel reaches every long-running task

pub mod shutdown;

pub use shutdown::Shutdown;
