//! Circuit breaker route filter.
//!
//! # States
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: calls are refused without touching the backend
//! - Half-Open: one trial call decides whether to close again
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures reach failure_threshold
//! Open → Half-Open: first call after wait_in_open has elapsed
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails
//! ```
//!
//! # Design Decisions
//! - One breaker per filter instance, so per route
//! - Errors always count as failures; responses only when their status is
//!   listed in `status_codes`
//! - With a `forward:` fallback the request is rewound to what the breaker
//!   saw and returned as `GatewayError::Fallback`; the error unwinds through
//!   the outer filters and the gateway dispatches the fallback path
//! - A dropped trial call frees the Half-Open slot

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use tokio::time::Instant;

use crate::error::{ExecutionFailure, GatewayError, GatewayResult};
use crate::exchange::{keys, Exchange};
use crate::filter::{Chain, FilterResponse, GatewayFilter};
use crate::observability::metrics;

/// Scheme of the only supported fallback URI form, `forward:/path`.
pub const FORWARD_SCHEME: &str = "forward:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub wait_in_open: Duration,
    /// Response statuses counted as failures.
    pub status_codes: Vec<StatusCode>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            wait_in_open: Duration::from_secs(60),
            status_codes: Vec::new(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.failure_threshold == 0 {
            return Err(GatewayError::config("failure threshold must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// State machine shared by every request through one filter.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Breaker>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> GatewayResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Breaker {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, Breaker> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, breaker: &mut Breaker, to: CircuitState) {
        if breaker.state == to {
            return;
        }
        tracing::info!(
            breaker = %self.name,
            from = breaker.state.as_str(),
            to = to.as_str(),
            failures = breaker.consecutive_failures,
            "circuit breaker state changed"
        );
        metrics::record_circuit_transition(&self.name, to.as_str());
        breaker.state = to;
    }

    /// Permission for one call, or `None` while the circuit refuses calls.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut breaker = self.lock();
        let state = breaker.state;
        match state {
            CircuitState::Closed => Some(Permit::new(self, false)),
            CircuitState::Open => {
                let waited = breaker
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.wait_in_open)
                    .unwrap_or(true);
                if !waited {
                    return None;
                }
                self.transition(&mut breaker, CircuitState::HalfOpen);
                breaker.trial_in_flight = true;
                Some(Permit::new(self, true))
            }
            CircuitState::HalfOpen if breaker.trial_in_flight => None,
            CircuitState::HalfOpen => {
                breaker.trial_in_flight = true;
                Some(Permit::new(self, true))
            }
        }
    }

    fn record(&self, success: bool, trial: bool) {
        let mut breaker = self.lock();
        if trial {
            breaker.trial_in_flight = false;
        }
        if success {
            breaker.consecutive_failures = 0;
            if breaker.state == CircuitState::HalfOpen {
                breaker.opened_at = None;
                self.transition(&mut breaker, CircuitState::Closed);
            }
            return;
        }

        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
        let trip = match breaker.state {
            CircuitState::Closed => breaker.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            breaker.opened_at = Some(Instant::now());
            self.transition(&mut breaker, CircuitState::Open);
        }
    }

    fn release_trial(&self) {
        self.lock().trial_in_flight = false;
    }
}

/// One admitted call. Dropping it unrecorded frees a Half-Open trial slot.
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    recorded: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            recorded: false,
        }
    }

    pub fn record(mut self, success: bool) {
        self.recorded = true;
        self.breaker.record(success, self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.recorded {
            self.breaker.release_trial();
        }
    }
}

/// Path of a `forward:/path` fallback URI.
pub fn parse_fallback_uri(uri: &str) -> GatewayResult<String> {
    let path = uri.trim().strip_prefix(FORWARD_SCHEME).ok_or_else(|| {
        GatewayError::config(format!(
            "fallback uri '{}' must use the '{}' scheme",
            uri, FORWARD_SCHEME
        ))
    })?;
    if !path.starts_with('/') {
        return Err(GatewayError::config(format!(
            "fallback uri '{}' needs an absolute path",
            uri
        )));
    }
    Ok(path.to_string())
}

/// Route filter guarding the rest of the chain with a [`CircuitBreaker`].
pub struct CircuitBreakerFilter {
    breaker: CircuitBreaker,
    fallback: Option<String>,
}

impl CircuitBreakerFilter {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> GatewayResult<Self> {
        Ok(Self {
            breaker: CircuitBreaker::new(name, config)?,
            fallback: None,
        })
    }

    /// Dispatch failed calls to `uri` (`forward:/path`).
    pub fn fallback_uri(mut self, uri: &str) -> GatewayResult<Self> {
        self.fallback = Some(parse_fallback_uri(uri)?);
        Ok(self)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn fail(&self, error: Option<GatewayError>, failure: ExecutionFailure) -> FilterResponse {
        match &self.fallback {
            Some(path) => Err(GatewayError::Fallback {
                breaker: self.breaker.name().to_string(),
                path: path.clone(),
                failure,
            }),
            None => Err(error
                .unwrap_or_else(|| GatewayError::CircuitOpen(self.breaker.name().to_string()))),
        }
    }
}

#[async_trait]
impl GatewayFilter for CircuitBreakerFilter {
    fn name(&self) -> &str {
        "CircuitBreaker"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let Some(permit) = self.breaker.try_acquire() else {
            tracing::debug!(breaker = %self.breaker.name(), "circuit open, call refused");
            metrics::record_circuit_rejected(self.breaker.name());
            let open = GatewayError::CircuitOpen(self.breaker.name().to_string());
            let failure = ExecutionFailure::from_error(&open);
            return self.fail(Some(open), failure);
        };

        let snapshot = self.fallback.as_ref().map(|_| exchange.snapshot());
        let result = chain.proceed(exchange).await;

        let failure = match &result {
            Ok(response) if self.breaker.config.status_codes.contains(&response.status()) => {
                Some(ExecutionFailure::from_status(response.status()))
            }
            Ok(_) => None,
            Err(e) => Some(ExecutionFailure::from_error(e)),
        };
        permit.record(failure.is_none());

        match (failure, snapshot) {
            (Some(failure), Some(snapshot)) => {
                exchange.restore(&snapshot);
                self.fail(result.err(), failure)
            }
            _ => result,
        }
    }
}

/// Copies the failure that triggered a fallback into request headers, for
/// use on the fallback route.
pub struct FallbackHeaders {
    type_header: HeaderName,
    message_header: HeaderName,
}

impl FallbackHeaders {
    pub const EXECUTION_EXCEPTION_TYPE: &'static str = "execution-exception-type";
    pub const EXECUTION_EXCEPTION_MESSAGE: &'static str = "execution-exception-message";

    pub fn new(type_header: &str, message_header: &str) -> GatewayResult<Self> {
        let parse = |name: &str| {
            HeaderName::try_from(name)
                .map_err(|e| GatewayError::config(format!("invalid header name '{}': {}", name, e)))
        };
        Ok(Self {
            type_header: parse(type_header)?,
            message_header: parse(message_header)?,
        })
    }
}

impl Default for FallbackHeaders {
    fn default() -> Self {
        Self {
            type_header: HeaderName::from_static(Self::EXECUTION_EXCEPTION_TYPE),
            message_header: HeaderName::from_static(Self::EXECUTION_EXCEPTION_MESSAGE),
        }
    }
}

#[async_trait]
impl GatewayFilter for FallbackHeaders {
    fn name(&self) -> &str {
        "FallbackHeaders"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let failure = exchange
            .attributes()
            .get::<ExecutionFailure>(keys::CIRCUIT_BREAKER_EXECUTION_FAILURE)
            .cloned();
        if let Some(failure) = failure {
            for (name, value) in [
                (&self.type_header, failure.kind),
                (&self.message_header, failure.message),
            ] {
                match HeaderValue::try_from(value) {
                    Ok(value) => {
                        exchange.headers_mut().insert(name.clone(), value);
                    }
                    Err(e) => tracing::debug!(header = %name, error = %e, "fallback header skipped"),
                }
            }
        }
        chain.proceed(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                wait_in_open: Duration::from_secs(10),
                status_codes: Vec::new(),
            },
        )
        .unwrap()
    }

    fn call(breaker: &CircuitBreaker, success: bool) -> bool {
        match breaker.try_acquire() {
            Some(permit) => {
                permit.record(success);
                true
            }
            None => false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_consecutive_failures() {
        let b = breaker(3);
        call(&b, false);
        call(&b, false);
        call(&b, true);
        assert_eq!(b.state(), CircuitState::Closed);

        for _ in 0..3 {
            call(&b, false);
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!call(&b, true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_decides() {
        let b = breaker(1);
        call(&b, false);
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        let trial = b.try_acquire().unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        // Only one trial at a time
        assert!(b.try_acquire().is_none());
        trial.record(false);
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(call(&b, true));
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_slot() {
        let b = breaker(1);
        call(&b, false);
        tokio::time::advance(Duration::from_secs(10)).await;

        drop(b.try_acquire().unwrap());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.try_acquire().is_some());
    }

    #[test]
    fn test_fallback_uri_forms() {
        assert_eq!(parse_fallback_uri("forward:/fallback").unwrap(), "/fallback");
        assert!(parse_fallback_uri("http://elsewhere/fallback").is_err());
        assert!(parse_fallback_uri("forward:fallback").is_err());
        let never_trips = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(CircuitBreaker::new("x", never_trips).is_err());
    }
}
