//! Time window predicates.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use super::Predicate;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

/// Parse an RFC 3339 instant such as `2017-01-20T17:42:47.789-07:00`.
pub fn parse_instant(value: &str) -> GatewayResult<DateTime<Utc>> {
    DateTime::<FixedOffset>::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GatewayError::config(format!("invalid datetime '{}': {}", value, e)))
}

/// Matches requests received strictly before an instant.
#[derive(Debug, Clone, Copy)]
pub struct Before {
    instant: DateTime<Utc>,
}

impl Before {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }

    pub fn test_at(&self, now: DateTime<Utc>) -> bool {
        now < self.instant
    }
}

#[async_trait]
impl Predicate for Before {
    async fn test(&self, _exchange: &mut Exchange) -> bool {
        self.test_at(Utc::now())
    }
}

impl fmt::Display for Before {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Before {}", self.instant.to_rfc3339())
    }
}

/// Matches requests received strictly after an instant.
#[derive(Debug, Clone, Copy)]
pub struct After {
    instant: DateTime<Utc>,
}

impl After {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }

    pub fn test_at(&self, now: DateTime<Utc>) -> bool {
        now > self.instant
    }
}

#[async_trait]
impl Predicate for After {
    async fn test(&self, _exchange: &mut Exchange) -> bool {
        self.test_at(Utc::now())
    }
}

impl fmt::Display for After {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "After {}", self.instant.to_rfc3339())
    }
}

/// Matches requests received in the open interval `(start, end)`.
#[derive(Debug, Clone, Copy)]
pub struct Between {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Between {
    /// Fails unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> GatewayResult<Self> {
        if start >= end {
            return Err(GatewayError::config(format!(
                "Between start {} must be before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn test_at(&self, now: DateTime<Utc>) -> bool {
        now > self.start && now < self.end
    }
}

#[async_trait]
impl Predicate for Between {
    async fn test(&self, _exchange: &mut Exchange) -> bool {
        self.test_at(Utc::now())
    }
}

impl fmt::Display for Between {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Between {} and {}",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}
