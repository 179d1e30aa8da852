//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::error::{GatewayError, GatewayResult};

/// Delay between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub first_backoff: Duration,
    pub max_backoff: Option<Duration>,
    pub factor: u32,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            first_backoff: Duration::from_millis(5),
            max_backoff: None,
            factor: 2,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.first_backoff.is_zero() {
            return Err(GatewayError::config("first_backoff must be greater than 0"));
        }
        if self.factor == 0 {
            return Err(GatewayError::config("backoff factor must be greater than 0"));
        }
        if let Some(max) = self.max_backoff {
            if max < self.first_backoff {
                return Err(GatewayError::config(
                    "max_backoff must be greater than or equal to first_backoff",
                ));
            }
        }
        Ok(())
    }

    /// Delay before the retry that follows attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_ms = self
            .max_backoff
            .map(|d| d.as_millis() as u64)
            .unwrap_or(u64::MAX);
        calculate_backoff(
            attempt,
            self.first_backoff.as_millis() as u64,
            max_ms,
            self.factor,
            self.jitter,
        )
    }
}

/// `base_ms * factor^(attempt-1)`, capped at `max_ms`, plus up to 10%
/// jitter when enabled.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, factor: u32, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = (factor as u64).saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter_ms = if jitter && jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay.saturating_add(jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(1, 100, 2000, 2, false), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, 100, 2000, 2, false), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, 100, 2000, 3, false), Duration::from_millis(900));
        assert_eq!(calculate_backoff(10, 100, 1000, 2, false), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(0, 100, 1000, 2, false), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounded() {
        for _ in 0..50 {
            let d = calculate_backoff(2, 100, 2000, 2, true).as_millis();
            assert!((200..220).contains(&d));
        }
    }

    #[test]
    fn test_validate() {
        assert!(BackoffConfig::default().validate().is_ok());
        let bad = BackoffConfig {
            first_backoff: Duration::from_millis(50),
            max_backoff: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
