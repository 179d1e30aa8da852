//! Gateway error taxonomy.
//!
//! # Design Decisions
//! - One enum for every per-request and construction-time failure
//! - `ErrorKind` is the `Copy` discriminant inspected by retry policies,
//!   so classification never depends on the concrete error payload
//! - Errors are turned into HTTP responses only at the chain boundary

use std::fmt;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Discriminant of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigValidation,
    RouteNotMatched,
    UpstreamTimeout,
    UpstreamConnection,
    ServiceUnavailable,
    FilterExecution,
    CircuitOpen,
    Fallback,
}

impl std::str::FromStr for ErrorKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "configvalidation" => Ok(ErrorKind::ConfigValidation),
            "routenotmatched" => Ok(ErrorKind::RouteNotMatched),
            "upstreamtimeout" | "timeout" => Ok(ErrorKind::UpstreamTimeout),
            "upstreamconnection" | "connection" => Ok(ErrorKind::UpstreamConnection),
            "serviceunavailable" => Ok(ErrorKind::ServiceUnavailable),
            "filterexecution" => Ok(ErrorKind::FilterExecution),
            "circuitopen" => Ok(ErrorKind::CircuitOpen),
            "fallback" => Ok(ErrorKind::Fallback),
            _ => Err(GatewayError::config(format!("unknown error kind '{}'", s))),
        }
    }
}

/// Why a circuit breaker gave up on its route, handed to the fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    /// Error kind name, or `Status` for a response counted as a failure.
    pub kind: String,
    pub message: String,
}

impl ExecutionFailure {
    pub fn from_error(error: &GatewayError) -> Self {
        Self {
            kind: format!("{:?}", error.kind()),
            message: error.to_string(),
        }
    }

    pub fn from_status(status: StatusCode) -> Self {
        Self {
            kind: "Status".to_string(),
            message: format!("upstream answered {}", status),
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors produced while building or executing routes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed predicate, filter or route configuration.
    #[error("invalid configuration: {0}")]
    ConfigValidation(String),

    /// No route predicate matched the request.
    #[error("no route matched {method} {path}")]
    RouteNotMatched { method: String, path: String },

    /// The terminal forward did not complete within the attempt deadline.
    #[error("upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// The terminal forward failed to reach or talk to the backend.
    #[error("upstream connection failed: {0}")]
    UpstreamConnection(String),

    /// A logical service had no instance to route to.
    #[error("no instance available for service '{0}'")]
    ServiceUnavailable(String),

    /// A filter's own logic failed.
    #[error("filter '{filter}' failed: {message}")]
    FilterExecution { filter: String, message: String },

    /// A circuit breaker without a fallback rejected the request.
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// A circuit breaker hands the request to its fallback path. The
    /// gateway re-dispatches it; it only becomes a response when the
    /// fallback itself falls back again.
    #[error("circuit breaker '{breaker}' falling back to '{path}' after {failure}")]
    Fallback {
        breaker: String,
        path: String,
        failure: ExecutionFailure,
    },
}

impl GatewayError {
    pub fn config(message: impl Into<String>) -> Self {
        GatewayError::ConfigValidation(message.into())
    }

    pub fn filter(filter: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::FilterExecution {
            filter: filter.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::ConfigValidation(_) => ErrorKind::ConfigValidation,
            GatewayError::RouteNotMatched { .. } => ErrorKind::RouteNotMatched,
            GatewayError::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            GatewayError::UpstreamConnection(_) => ErrorKind::UpstreamConnection,
            GatewayError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            GatewayError::FilterExecution { .. } => ErrorKind::FilterExecution,
            GatewayError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            GatewayError::Fallback { .. } => ErrorKind::Fallback,
        }
    }

    /// HTTP status used when the error reaches the chain boundary.
    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::ConfigValidation => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::RouteNotMatched => StatusCode::NOT_FOUND,
            ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamConnection => StatusCode::BAD_GATEWAY,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::FilterExecution => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::CircuitOpen | ErrorKind::Fallback => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ConfigValidation => "CONFIG_VALIDATION",
            ErrorKind::RouteNotMatched => "ROUTE_NOT_MATCHED",
            ErrorKind::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorKind::UpstreamConnection => "UPSTREAM_CONNECTION",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::FilterExecution => "FILTER_EXECUTION",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::Fallback => "FALLBACK",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (self.status(), body).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
