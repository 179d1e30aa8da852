//! Timeout enforcement.
//!
//! # Design Decisions
//! - Each terminal forward attempt gets its own deadline; a retry starts a
//!   fresh one and does not refund the retry budget
//! - Timeout errors are distinct from connection errors (504 vs 502)

use std::future::Future;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Run `fut` with a deadline, mapping expiry to `UpstreamTimeout`.
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::UpstreamTimeout(duration)),
    }
}
