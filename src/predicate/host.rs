//! Host header matching.

use std::fmt;

use async_trait::async_trait;
use axum::http::header;

use super::path::PathPattern;
use super::Predicate;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

/// Matches the `Host` header against `.`-separated templates,
/// e.g. `{sub}.example.com` or `**.example.org`.
///
/// Matching is case-insensitive. A header carrying a port is tried as-is
/// first, then without the port, unless `include_port` is set.
#[derive(Debug, Clone)]
pub struct HostPredicate {
    patterns: Vec<PathPattern>,
    include_port: bool,
}

impl HostPredicate {
    pub fn new<I, S>(patterns: I) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| PathPattern::compile(p.as_ref(), '.', true, false))
            .collect::<GatewayResult<Vec<_>>>()?;
        if patterns.is_empty() {
            return Err(GatewayError::config("Host predicate needs at least one pattern"));
        }
        Ok(Self {
            patterns,
            include_port: false,
        })
    }

    /// Match the header exactly as sent, port included.
    pub fn include_port(mut self, include_port: bool) -> Self {
        self.include_port = include_port;
        self
    }

    fn host(exchange: &Exchange) -> Option<String> {
        exchange
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| exchange.uri().authority().map(|a| a.to_string()))
    }
}

#[async_trait]
impl Predicate for HostPredicate {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        let Some(host) = Self::host(exchange) else {
            return false;
        };
        let without_port = match host.rsplit_once(':') {
            Some((name, port)) if !self.include_port && port.chars().all(|c| c.is_ascii_digit()) => {
                Some(name)
            }
            _ => None,
        };

        for pattern in &self.patterns {
            let vars = pattern
                .match_and_extract(&host)
                .or_else(|| without_port.and_then(|h| pattern.match_and_extract(h)));
            if let Some(vars) = vars {
                exchange.put_uri_template_variables(vars);
                return true;
            }
        }
        false
    }
}

impl fmt::Display for HostPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<&str> = self.patterns.iter().map(PathPattern::as_str).collect();
        write!(f, "Host {:?}", patterns)?;
        if self.include_port {
            f.write_str(" (port included)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn exchange(host: &str) -> Exchange {
        Exchange::new(
            Request::builder()
                .uri("/")
                .header("Host", host)
                .body(Body::empty())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_host_variables() {
        let p = HostPredicate::new(["{sub}.example.com"]).unwrap();

        let mut ex = exchange("API.Example.com:8080");
        assert!(p.test(&mut ex).await);
        assert_eq!(ex.uri_template_variables().unwrap()["sub"], "API");

        assert!(!p.test(&mut exchange("example.com")).await);
        assert!(!p.test(&mut exchange("a.b.example.com")).await);
    }

    #[tokio::test]
    async fn test_include_port_disables_port_stripping() {
        let strict = HostPredicate::new(["example.com"]).unwrap().include_port(true);
        assert!(strict.test(&mut exchange("example.com")).await);
        assert!(!strict.test(&mut exchange("example.com:8080")).await);

        let with_port = HostPredicate::new(["example.com:8080"]).unwrap().include_port(true);
        assert!(with_port.test(&mut exchange("example.com:8080")).await);

        let lenient = HostPredicate::new(["example.com"]).unwrap();
        assert!(lenient.test(&mut exchange("example.com:8080")).await);
    }

    #[tokio::test]
    async fn test_host_double_wildcard() {
        let p = HostPredicate::new(["**.example.org"]).unwrap();
        assert!(p.test(&mut exchange("a.b.example.org")).await);
        assert!(!p.test(&mut exchange("example.net")).await);
    }
}
