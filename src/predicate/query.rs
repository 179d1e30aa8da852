//! Query parameter predicate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use super::Predicate;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

type ValueFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

enum ValueTest {
    Present,
    Regex(Regex),
    Fn(ValueFn),
}

/// Parameter present and at least one of its values passes the value test.
pub struct QueryPredicate {
    param: String,
    value: ValueTest,
}

impl QueryPredicate {
    /// Without a regex the parameter only has to be present.
    pub fn new(param: impl Into<String>, regex: Option<&str>) -> GatewayResult<Self> {
        let param = param.into();
        if param.is_empty() {
            return Err(GatewayError::config("Query predicate needs a parameter name"));
        }
        let value = match regex.filter(|r| !r.is_empty()) {
            Some(r) => ValueTest::Regex(
                Regex::new(&format!("^(?:{})$", r))
                    .map_err(|e| GatewayError::config(format!("invalid regex '{}': {}", r, e)))?,
            ),
            None => ValueTest::Present,
        };
        Ok(Self { param, value })
    }

    pub fn with_fn<F>(param: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            param: param.into(),
            value: ValueTest::Fn(Arc::new(f)),
        }
    }
}

#[async_trait]
impl Predicate for QueryPredicate {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        let values = exchange.query_values(&self.param);
        match &self.value {
            ValueTest::Present => !values.is_empty(),
            ValueTest::Regex(regex) => values.iter().any(|v| regex.is_match(v)),
            ValueTest::Fn(f) => values.iter().any(|v| f(v)),
        }
    }
}

impl fmt::Display for QueryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ValueTest::Present => write!(f, "Query {}", self.param),
            ValueTest::Regex(regex) => write!(f, "Query {}={}", self.param, regex.as_str()),
            ValueTest::Fn(_) => write!(f, "Query {}=<fn>", self.param),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn exchange(uri: &str) -> Exchange {
        Exchange::new(Request::builder().uri(uri).body(Body::empty()).unwrap())
    }

    #[tokio::test]
    async fn test_query_regex_any_value() {
        let p = QueryPredicate::new("green", Some("gree.")).unwrap();
        assert!(p.test(&mut exchange("/?green=blue&green=greet")).await);
        assert!(!p.test(&mut exchange("/?green=blue")).await);
        assert!(!p.test(&mut exchange("/")).await);
    }

    #[tokio::test]
    async fn test_query_presence_and_fn() {
        let present = QueryPredicate::new("debug", None).unwrap();
        assert!(present.test(&mut exchange("/?debug=")).await);

        let numeric = QueryPredicate::with_fn("page", |v| v.parse::<u32>().is_ok());
        assert!(numeric.test(&mut exchange("/?page=2")).await);
        assert!(!numeric.test(&mut exchange("/?page=two")).await);
    }
}
