use async_trait::async_trait;
use axum::http::StatusCode;

use super::{Chain, FilterResponse, GatewayFilter};
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

/// Overrides the status of a successful response.
pub struct SetStatus {
    status: StatusCode,
}

impl SetStatus {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }

    /// Accepts a numeric code (`401`) or a reason name (`UNAUTHORIZED`).
    pub fn parse(value: &str) -> GatewayResult<Self> {
        parse_status(value).map(Self::new)
    }
}

/// Parse a numeric status code or a reason name such as `TOO_MANY_REQUESTS`.
pub fn parse_status(value: &str) -> GatewayResult<StatusCode> {
    let value = value.trim();
    if let Ok(code) = value.parse::<u16>() {
        return StatusCode::from_u16(code)
            .map_err(|_| GatewayError::config(format!("invalid status code {}", code)));
    }
    let wanted = value.replace('_', " ").to_ascii_lowercase();
    (100u16..600)
        .filter_map(|c| StatusCode::from_u16(c).ok())
        .find(|s| {
            s.canonical_reason()
                .map(|r| r.to_ascii_lowercase() == wanted)
                .unwrap_or(false)
        })
        .ok_or_else(|| GatewayError::config(format!("unknown status '{}'", value)))
}

#[async_trait]
impl GatewayFilter for SetStatus {
    fn name(&self) -> &str {
        "SetStatus"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let mut response = chain.proceed(exchange).await?;
        *response.status_mut() = self.status;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(SetStatus::parse("401").unwrap().status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            SetStatus::parse("NOT_FOUND").unwrap().status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SetStatus::parse("too_many_requests").unwrap().status,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert!(SetStatus::parse("SOMETHING").is_err());
        assert!(SetStatus::parse("99").is_err());
    }
}
