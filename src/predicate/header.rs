//! Header, cookie and method predicates.

use std::fmt;

use async_trait::async_trait;
use axum::http::{HeaderName, Method};
use regex::Regex;

use super::Predicate;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

fn compile_full(regex: &str) -> GatewayResult<Regex> {
    Regex::new(&format!("^(?:{})$", regex))
        .map_err(|e| GatewayError::config(format!("invalid regex '{}': {}", regex, e)))
}

/// Header present and, when a regex is set, any of its values matches.
#[derive(Debug, Clone)]
pub struct HeaderPredicate {
    name: HeaderName,
    regex: Option<Regex>,
}

impl HeaderPredicate {
    pub fn new(name: &str, regex: Option<&str>) -> GatewayResult<Self> {
        let name = HeaderName::try_from(name)
            .map_err(|e| GatewayError::config(format!("invalid header name '{}': {}", name, e)))?;
        let regex = regex.filter(|r| !r.is_empty()).map(compile_full).transpose()?;
        Ok(Self { name, regex })
    }
}

#[async_trait]
impl Predicate for HeaderPredicate {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        let mut values = exchange.headers().get_all(&self.name).iter().peekable();
        match &self.regex {
            None => values.peek().is_some(),
            Some(regex) => values
                .filter_map(|v| v.to_str().ok())
                .any(|v| regex.is_match(v)),
        }
    }
}

impl fmt::Display for HeaderPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.regex {
            Some(regex) => write!(f, "Header {}={}", self.name, regex.as_str()),
            None => write!(f, "Header {}", self.name),
        }
    }
}

/// Cookie present with a value matching the regex.
#[derive(Debug, Clone)]
pub struct CookiePredicate {
    name: String,
    regex: Regex,
}

impl CookiePredicate {
    pub fn new(name: impl Into<String>, regex: &str) -> GatewayResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(GatewayError::config("Cookie predicate needs a cookie name"));
        }
        Ok(Self {
            name,
            regex: compile_full(regex)?,
        })
    }
}

#[async_trait]
impl Predicate for CookiePredicate {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        exchange
            .cookie_values(&self.name)
            .iter()
            .any(|v| self.regex.is_match(v))
    }
}

impl fmt::Display for CookiePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie {}={}", self.name, self.regex.as_str())
    }
}

/// Request method is one of a set.
#[derive(Debug, Clone)]
pub struct MethodPredicate {
    methods: Vec<Method>,
}

impl MethodPredicate {
    pub fn new<I, S>(methods: I) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let methods = methods
            .into_iter()
            .map(|m| {
                let m = m.as_ref().trim().to_ascii_uppercase();
                Method::from_bytes(m.as_bytes())
                    .map_err(|_| GatewayError::config(format!("invalid method '{}'", m)))
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        if methods.is_empty() {
            return Err(GatewayError::config("Method predicate needs at least one method"));
        }
        Ok(Self { methods })
    }
}

#[async_trait]
impl Predicate for MethodPredicate {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        self.methods.contains(exchange.method())
    }
}

impl fmt::Display for MethodPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
        write!(f, "Method {:?}", methods)
    }
}
