use axum::http::HeaderName;

use crate::error::GatewayResult;
use crate::exchange::Exchange;
use crate::filter::headers::header_name;
use crate::predicate::remote_addr::forwarded_client_ip;

/// Derives the rate-limit key of a request. `None` or `""` means no key.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, exchange: &Exchange) -> Option<String>;
}

impl<F> KeyResolver for F
where
    F: Fn(&Exchange) -> Option<String> + Send + Sync,
{
    fn resolve(&self, exchange: &Exchange) -> Option<String> {
        self(exchange)
    }
}

/// Client IP, optionally taken from `X-Forwarded-For`.
#[derive(Debug, Clone, Default)]
pub struct RemoteAddrKeyResolver {
    max_trusted_index: Option<usize>,
}

impl RemoteAddrKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarded(max_trusted_index: usize) -> Self {
        Self {
            max_trusted_index: Some(max_trusted_index.max(1)),
        }
    }
}

impl KeyResolver for RemoteAddrKeyResolver {
    fn resolve(&self, exchange: &Exchange) -> Option<String> {
        let ip = match self.max_trusted_index {
            Some(index) => forwarded_client_ip(exchange, index),
            None => exchange.remote_addr().map(|a| a.ip()),
        };
        ip.map(|ip| ip.to_string())
    }
}

/// First value of a request header.
#[derive(Debug, Clone)]
pub struct HeaderKeyResolver {
    name: HeaderName,
}

impl HeaderKeyResolver {
    pub fn new(name: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
        })
    }
}

impl KeyResolver for HeaderKeyResolver {
    fn resolve(&self, exchange: &Exchange) -> Option<String> {
        exchange
            .headers()
            .get(&self.name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[test]
    fn test_resolvers() {
        let ex = Exchange::new(
            Request::builder()
                .uri("/")
                .header("x-api-key", "k1")
                .header("x-forwarded-for", "8.8.8.8")
                .body(Body::empty())
                .unwrap(),
        )
        .with_remote_addr("10.0.0.1:4000".parse().unwrap());

        assert_eq!(RemoteAddrKeyResolver::new().resolve(&ex).as_deref(), Some("10.0.0.1"));
        assert_eq!(
            RemoteAddrKeyResolver::forwarded(1).resolve(&ex).as_deref(),
            Some("8.8.8.8")
        );
        assert_eq!(
            HeaderKeyResolver::new("x-api-key").unwrap().resolve(&ex).as_deref(),
            Some("k1")
        );
        assert!(HeaderKeyResolver::new("x-missing").unwrap().resolve(&ex).is_none());

        let by_path = |ex: &Exchange| Some(ex.path().to_string());
        assert_eq!(by_path.resolve(&ex).as_deref(), Some("/"));
    }
}
