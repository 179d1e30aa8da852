use async_trait::async_trait;
use axum::http::header::HOST;
use axum::http::{HeaderName, HeaderValue};

use super::{order, Chain, FilterResponse, GatewayFilter};
use crate::config::schema::XForwardedConfig;
use crate::exchange::Exchange;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Global filter that tells the upstream who called the gateway and how.
///
/// With append on, a value is joined onto an incoming header with `,`.
/// Otherwise the incoming header is replaced. A peer address already
/// listed in `X-Forwarded-For` is not added again.
pub struct XForwardedHeadersFilter {
    config: XForwardedConfig,
}

impl XForwardedHeadersFilter {
    pub fn new(config: XForwardedConfig) -> Self {
        Self { config }
    }

    fn write(exchange: &mut Exchange, name: HeaderName, value: &str, append: bool) {
        let headers = exchange.headers_mut();
        let joined = match headers.get(&name).and_then(|v| v.to_str().ok()) {
            Some(existing) if append && !existing.trim().is_empty() => {
                format!("{},{}", existing, value)
            }
            _ => value.to_string(),
        };
        match HeaderValue::from_str(&joined) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(e) => tracing::debug!(header = %name, error = %e, "forwarded header skipped"),
        }
    }
}

fn default_port(proto: &str) -> u16 {
    if proto.eq_ignore_ascii_case("https") {
        443
    } else {
        80
    }
}

#[async_trait]
impl GatewayFilter for XForwardedHeadersFilter {
    fn name(&self) -> &str {
        "XForwardedHeaders"
    }

    fn order(&self) -> Option<i32> {
        Some(order::X_FORWARDED_HEADERS)
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let c = &self.config;
        if !c.enabled {
            return chain.proceed(exchange).await;
        }

        let proto = exchange.uri().scheme_str().unwrap_or("http").to_string();
        let host = exchange
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| exchange.uri().authority().map(|a| a.to_string()));

        if c.for_enabled {
            if let Some(addr) = exchange.remote_addr() {
                let ip = addr.ip().to_string();
                let listed = exchange
                    .headers()
                    .get_all(&X_FORWARDED_FOR)
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .flat_map(|v| v.split(','))
                    .any(|v| v.trim() == ip);
                if !listed {
                    Self::write(exchange, X_FORWARDED_FOR, &ip, c.for_append);
                }
            }
        }
        if c.proto_enabled {
            Self::write(exchange, X_FORWARDED_PROTO, &proto, c.proto_append);
        }
        if let Some(host) = host {
            if c.port_enabled {
                let port = host
                    .rsplit_once(':')
                    .and_then(|(_, p)| p.parse::<u16>().ok())
                    .unwrap_or_else(|| default_port(&proto));
                Self::write(exchange, X_FORWARDED_PORT, &port.to_string(), c.port_append);
            }
            if c.host_enabled {
                Self::write(exchange, X_FORWARDED_HOST, &host, c.host_append);
            }
        }
        chain.proceed(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterChain, OrderedFilter, Terminal};
    use crate::error::GatewayResult;
    use axum::body::Body;
    use axum::http::{Request, Response};
    use std::sync::{Arc, Mutex};

    /// Keeps the headers the upstream would have received.
    #[derive(Default)]
    struct Capture(Mutex<Vec<(String, String)>>);

    #[async_trait]
    impl Terminal for Capture {
        async fn call(&self, exchange: &mut Exchange) -> GatewayResult<Response<Body>> {
            let mut seen = self.0.lock().unwrap();
            for (name, value) in exchange.headers() {
                if name.as_str().starts_with("x-forwarded-") {
                    seen.push((name.to_string(), value.to_str().unwrap().to_string()));
                }
            }
            Ok(Response::new(Body::empty()))
        }
    }

    fn exchange(headers: &[(&str, &str)]) -> Exchange {
        let mut request = Request::builder().uri("/users");
        for (k, v) in headers {
            request = request.header(*k, *v);
        }
        Exchange::new(request.body(Body::empty()).unwrap())
            .with_remote_addr("10.1.2.3:51000".parse().unwrap())
    }

    async fn run(config: XForwardedConfig, exchange: &mut Exchange) -> Vec<(String, String)> {
        let f: Arc<dyn GatewayFilter> = Arc::new(XForwardedHeadersFilter::new(config));
        let chain = FilterChain::from_filters(vec![OrderedFilter::with_fallback(f, 0)]);
        let capture = Capture::default();
        chain.execute(exchange, &capture).await.unwrap();
        let mut seen = capture.0.into_inner().unwrap();
        seen.sort();
        seen
    }

    fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut v: Vec<_> = expected
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort();
        v
    }

    #[tokio::test]
    async fn test_adds_all_headers() {
        let mut ex = exchange(&[("host", "api.example.com:8443")]);
        let seen = run(XForwardedConfig::default(), &mut ex).await;
        assert_eq!(
            seen,
            pairs(&[
                ("x-forwarded-for", "10.1.2.3"),
                ("x-forwarded-host", "api.example.com:8443"),
                ("x-forwarded-port", "8443"),
                ("x-forwarded-proto", "http"),
            ])
        );
    }

    #[tokio::test]
    async fn test_appends_or_replaces_incoming_values() {
        let incoming = [
            ("host", "api.example.com"),
            ("x-forwarded-for", "192.168.0.9"),
            ("x-forwarded-proto", "https"),
        ];

        let mut ex = exchange(&incoming);
        let seen = run(XForwardedConfig::default(), &mut ex).await;
        assert!(seen.contains(&("x-forwarded-for".into(), "192.168.0.9,10.1.2.3".into())));
        assert!(seen.contains(&("x-forwarded-proto".into(), "https,http".into())));
        assert!(seen.contains(&("x-forwarded-port".into(), "80".into())));

        let mut ex = exchange(&incoming);
        let config = XForwardedConfig {
            for_append: false,
            proto_append: false,
            ..XForwardedConfig::default()
        };
        let seen = run(config, &mut ex).await;
        assert!(seen.contains(&("x-forwarded-for".into(), "10.1.2.3".into())));
        assert!(seen.contains(&("x-forwarded-proto".into(), "http".into())));
    }

    #[tokio::test]
    async fn test_known_peer_is_not_repeated() {
        let mut ex = exchange(&[("x-forwarded-for", "192.168.0.9, 10.1.2.3")]);
        let seen = run(XForwardedConfig::default(), &mut ex).await;
        assert!(seen.contains(&("x-forwarded-for".into(), "192.168.0.9, 10.1.2.3".into())));
    }

    #[tokio::test]
    async fn test_switches_turn_headers_off() {
        let mut ex = exchange(&[("host", "api.example.com")]);
        let config = XForwardedConfig {
            host_enabled: false,
            port_enabled: false,
            ..XForwardedConfig::default()
        };
        let seen = run(config, &mut ex).await;
        assert_eq!(
            seen,
            pairs(&[("x-forwarded-for", "10.1.2.3"), ("x-forwarded-proto", "http")])
        );

        let mut ex = exchange(&[("host", "api.example.com")]);
        let config = XForwardedConfig {
            enabled: false,
            ..XForwardedConfig::default()
        };
        assert!(run(config, &mut ex).await.is_empty());
    }
}
