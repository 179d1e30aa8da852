//! Request and response header filters.
//!
//! Request header filters act before proceeding. `AddResponseHeader`
//! stages its header on the exchange before proceeding, so a retry can
//! drop it with the failed attempt. `SetResponseHeader` and
//! `RemoveResponseHeader` act on the way out.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

use super::{Chain, FilterResponse, GatewayFilter};
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

pub(crate) fn header_name(name: &str) -> GatewayResult<HeaderName> {
    HeaderName::try_from(name)
        .map_err(|e| GatewayError::config(format!("invalid header name '{}': {}", name, e)))
}

pub(crate) fn header_value(value: &str) -> GatewayResult<HeaderValue> {
    HeaderValue::try_from(value)
        .map_err(|e| GatewayError::config(format!("invalid header value '{}': {}", value, e)))
}

/// Expand `{var}` references from the exchange's template variables.
/// Unknown variables are left as written.
fn expand(exchange: &Exchange, template: &HeaderValue) -> HeaderValue {
    let (Some(vars), Ok(raw)) = (exchange.uri_template_variables(), template.to_str()) else {
        return template.clone();
    };
    if !raw.contains('{') {
        return template.clone();
    }
    let mut out = raw.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    HeaderValue::try_from(out).unwrap_or_else(|_| template.clone())
}

pub struct AddRequestHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl AddRequestHeader {
    pub fn new(name: &str, value: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
            value: header_value(value)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for AddRequestHeader {
    fn name(&self) -> &str {
        "AddRequestHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let value = expand(exchange, &self.value);
        exchange.headers_mut().append(self.name.clone(), value);
        chain.proceed(exchange).await
    }
}

pub struct SetRequestHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl SetRequestHeader {
    pub fn new(name: &str, value: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
            value: header_value(value)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for SetRequestHeader {
    fn name(&self) -> &str {
        "SetRequestHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let value = expand(exchange, &self.value);
        exchange.headers_mut().insert(self.name.clone(), value);
        chain.proceed(exchange).await
    }
}

pub struct RemoveRequestHeader {
    name: HeaderName,
}

impl RemoveRequestHeader {
    pub fn new(name: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for RemoveRequestHeader {
    fn name(&self) -> &str {
        "RemoveRequestHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        exchange.headers_mut().remove(&self.name);
        chain.proceed(exchange).await
    }
}

pub struct AddResponseHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl AddResponseHeader {
    pub fn new(name: &str, value: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
            value: header_value(value)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for AddResponseHeader {
    fn name(&self) -> &str {
        "AddResponseHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let value = expand(exchange, &self.value);
        exchange.add_response_header(self.name.clone(), value);
        chain.proceed(exchange).await
    }
}

pub struct SetResponseHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl SetResponseHeader {
    pub fn new(name: &str, value: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
            value: header_value(value)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for SetResponseHeader {
    fn name(&self) -> &str {
        "SetResponseHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let result = chain.proceed(exchange).await;
        let value = expand(exchange, &self.value);
        match result {
            Ok(mut response) => {
                exchange.remove_response_header(&self.name);
                response.headers_mut().insert(self.name.clone(), value);
                Ok(response)
            }
            Err(e) => {
                // The error response is built at the boundary from staged headers
                exchange.set_response_header(self.name.clone(), value);
                Err(e)
            }
        }
    }
}

pub struct RemoveResponseHeader {
    name: HeaderName,
}

impl RemoveResponseHeader {
    pub fn new(name: &str) -> GatewayResult<Self> {
        Ok(Self {
            name: header_name(name)?,
        })
    }
}

#[async_trait]
impl GatewayFilter for RemoveResponseHeader {
    fn name(&self) -> &str {
        "RemoveResponseHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let result = chain.proceed(exchange).await;
        exchange.remove_response_header(&self.name);
        result.map(|mut response| {
            response.headers_mut().remove(&self.name);
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterChain, OrderedFilter, Terminal};
    use axum::body::Body;
    use axum::http::{Request, Response};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Echoes the request headers it saw and adds `x-upstream`.
    #[derive(Default)]
    struct Echo {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Terminal for Echo {
        async fn call(&self, exchange: &mut Exchange) -> FilterResponse {
            let mut seen = self.seen.lock().unwrap();
            for (k, v) in exchange.headers() {
                seen.push((k.to_string(), v.to_str().unwrap_or_default().to_string()));
            }
            Ok(Response::builder()
                .header("x-upstream", "1")
                .header("server", "backend")
                .body(Body::empty())
                .unwrap())
        }
    }

    fn chain(filters: Vec<Arc<dyn GatewayFilter>>) -> FilterChain {
        FilterChain::from_filters(
            filters
                .into_iter()
                .enumerate()
                .map(|(i, f)| OrderedFilter::new(i as i32 + 1, f))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_request_headers() {
        let mut ex = Exchange::new(
            Request::builder()
                .uri("/")
                .header("x-secret", "s")
                .header("x-mode", "old")
                .body(Body::empty())
                .unwrap(),
        );
        let mut vars = HashMap::new();
        vars.insert("segment".to_string(), "abc".to_string());
        ex.put_uri_template_variables(vars);

        let chain = chain(vec![
            Arc::new(AddRequestHeader::new("x-seg", "seg-{segment}").unwrap()),
            Arc::new(SetRequestHeader::new("x-mode", "new").unwrap()),
            Arc::new(RemoveRequestHeader::new("x-secret").unwrap()),
        ]);
        let echo = Echo::default();
        chain.execute(&mut ex, &echo).await.unwrap();

        let seen = echo.seen.lock().unwrap();
        assert!(seen.contains(&("x-seg".into(), "seg-abc".into())));
        assert!(seen.contains(&("x-mode".into(), "new".into())));
        assert!(!seen.iter().any(|(k, _)| k == "x-secret"));
    }

    #[tokio::test]
    async fn test_response_headers() {
        let mut ex = Exchange::new(Request::builder().uri("/").body(Body::empty()).unwrap());
        let chain = chain(vec![
            Arc::new(AddResponseHeader::new("x-added", "yes").unwrap()),
            Arc::new(SetResponseHeader::new("x-upstream", "overridden").unwrap()),
            Arc::new(RemoveResponseHeader::new("server").unwrap()),
        ]);

        let mut resp = chain.execute(&mut ex, &Echo::default()).await.unwrap();
        ex.apply_response_headers(&mut resp);

        assert_eq!(resp.headers()["x-added"], "yes");
        assert_eq!(resp.headers()["x-upstream"], "overridden");
        assert!(resp.headers().get("server").is_none());
    }

    #[test]
    fn test_invalid_header_name() {
        assert!(AddRequestHeader::new("bad header", "v").is_err());
        assert!(SetResponseHeader::new("x-ok", "bad\nvalue").is_err());
    }
}
