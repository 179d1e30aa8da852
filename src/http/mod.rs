//! HTTP layer.
//!
//! # Data Flow
//! ```text
//! TCP listener
//!     → server.rs (axum Router, TraceLayer, x-request-id)
//!     → handler.rs (Gateway: web filters, route lookup, route chain)
//!     → forward.rs (ForwardingTerminal → Transport → backend)
//! ```

pub mod forward;
pub mod handler;
pub mod server;

pub use forward::{ForwardingTerminal, HttpTransport, Transport};
pub use handler::{Gateway, GatewayBuilder};
pub use server::HttpServer;
