//! Retry orchestration.
//!
//! # Responsibilities
//! - Re-run the inner chain when the response status or error is retryable
//! - Rewind the exchange to its pre-retry snapshot between attempts, so
//!   inner rewrites apply to the same request every time
//! - Wait out the configured backoff between attempts
//!
//! # Design Decisions
//! - The iteration counter is bumped after every attempt, before the
//!   retry decision; `retries = N` allows at most N+1 forwards
//! - Status-based repeats require a retryable method; error-based retries
//!   only look at the error kind
//! - When the budget runs out the last response or error is returned as-is
//! - Dropping the request future cancels the loop, including a pending
//!   backoff sleep

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};

use super::backoff::BackoffConfig;
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::exchange::{keys, Exchange};
use crate::filter::{Chain, FilterResponse, GatewayFilter};
use crate::observability::metrics;

/// HTTP status class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusSeries {
    Informational,
    Successful,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusSeries {
    pub fn of(status: StatusCode) -> Option<Self> {
        match status.as_u16() / 100 {
            1 => Some(StatusSeries::Informational),
            2 => Some(StatusSeries::Successful),
            3 => Some(StatusSeries::Redirection),
            4 => Some(StatusSeries::ClientError),
            5 => Some(StatusSeries::ServerError),
            _ => None,
        }
    }
}

impl FromStr for StatusSeries {
    type Err = GatewayError;

    /// Accepts `SERVER_ERROR`, `server-error`, `5xx` or `5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "informational" | "1xx" | "1" => Ok(StatusSeries::Informational),
            "successful" | "2xx" | "2" => Ok(StatusSeries::Successful),
            "redirection" | "3xx" | "3" => Ok(StatusSeries::Redirection),
            "clienterror" | "4xx" | "4" => Ok(StatusSeries::ClientError),
            "servererror" | "5xx" | "5" => Ok(StatusSeries::ServerError),
            _ => Err(GatewayError::config(format!("unknown status series '{}'", s))),
        }
    }
}

impl fmt::Display for StatusSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusSeries::Informational => "INFORMATIONAL",
            StatusSeries::Successful => "SUCCESSFUL",
            StatusSeries::Redirection => "REDIRECTION",
            StatusSeries::ClientError => "CLIENT_ERROR",
            StatusSeries::ServerError => "SERVER_ERROR",
        };
        f.write_str(name)
    }
}

/// Retry policy of one `Retry` filter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub retries: u32,
    pub series: Vec<StatusSeries>,
    pub statuses: Vec<StatusCode>,
    pub methods: Vec<Method>,
    pub exceptions: Vec<ErrorKind>,
    pub backoff: Option<BackoffConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            series: vec![StatusSeries::ServerError],
            statuses: Vec::new(),
            methods: vec![Method::GET],
            exceptions: vec![ErrorKind::UpstreamConnection, ErrorKind::UpstreamTimeout],
            backoff: None,
        }
    }
}

impl RetryConfig {
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn series(mut self, series: Vec<StatusSeries>) -> Self {
        self.series = series;
        self
    }

    pub fn statuses(mut self, statuses: Vec<StatusCode>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }

    pub fn exceptions(mut self, exceptions: Vec<ErrorKind>) -> Self {
        self.exceptions = exceptions;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.retries == 0 {
            return Err(GatewayError::config("retries must be greater than 0"));
        }
        if self.methods.is_empty() {
            return Err(GatewayError::config("retry methods may not be empty"));
        }
        if self.series.is_empty() && self.statuses.is_empty() && self.exceptions.is_empty() {
            return Err(GatewayError::config(
                "retry series, statuses and exceptions may not all be empty",
            ));
        }
        if let Some(backoff) = &self.backoff {
            backoff.validate()?;
        }
        Ok(())
    }

    fn is_retryable_status(&self, method: &Method, status: StatusCode) -> bool {
        if !self.methods.contains(method) {
            return false;
        }
        self.statuses.contains(&status)
            || StatusSeries::of(status)
                .map(|s| self.series.contains(&s))
                .unwrap_or(false)
    }

    fn is_retryable_error(&self, error: &GatewayError) -> bool {
        self.exceptions.contains(&error.kind())
    }
}

/// Retry progress stored on the exchange under [`keys::RETRY_STATE`].
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Attempts completed so far.
    pub iteration: u32,
    /// Policy of the retry filter driving this exchange.
    pub config: Arc<RetryConfig>,
}

impl RetryState {
    pub fn new(config: Arc<RetryConfig>) -> Self {
        Self {
            iteration: 0,
            config,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.retries
    }

    pub fn exhausted(&self) -> bool {
        self.iteration > self.config.retries
    }
}

/// Re-invokes the rest of the chain on retryable outcomes.
pub struct RetryFilter {
    config: Arc<RetryConfig>,
}

impl RetryFilter {
    pub fn new(config: RetryConfig) -> GatewayResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl GatewayFilter for RetryFilter {
    fn name(&self) -> &str {
        "Retry"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let method = exchange.method().clone();
        let route_id = exchange
            .route()
            .map(|r| r.id().to_string())
            .unwrap_or_default();
        let mut state = RetryState::new(self.config.clone());
        let snapshot = exchange.snapshot();

        loop {
            let result = chain.proceed(exchange).await;
            state.iteration += 1;
            exchange.attributes_mut().insert(keys::RETRY_STATE, state.clone());

            let reason = match &result {
                Ok(response) if self.config.is_retryable_status(&method, response.status()) => {
                    Some(format!("status {}", response.status().as_u16()))
                }
                Err(e) if self.config.is_retryable_error(e) => Some(format!("{:?}", e.kind())),
                _ => None,
            };
            let Some(reason) = reason else {
                return result;
            };

            if state.exhausted() {
                tracing::info!(
                    route_id = %route_id,
                    attempts = state.iteration,
                    reason = %reason,
                    "retries exhausted"
                );
                return result;
            }

            drop(result);
            exchange.restore(&snapshot);
            metrics::record_retry(&route_id, &reason);

            let delay = self
                .config
                .backoff
                .as_ref()
                .map(|b| b.delay(state.iteration));
            tracing::debug!(
                route_id = %route_id,
                attempt = state.iteration,
                reason = %reason,
                delay = ?delay,
                "retrying"
            );
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
