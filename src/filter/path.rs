//! Path rewriting filters.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;

use super::{Chain, FilterResponse, GatewayFilter};
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

/// Prepends a fixed prefix to the request path.
pub struct PrefixPath {
    prefix: String,
}

impl PrefixPath {
    pub fn new(prefix: impl Into<String>) -> GatewayResult<Self> {
        let prefix = prefix.into();
        if !prefix.starts_with('/') {
            return Err(GatewayError::config(format!(
                "PrefixPath '{}' must start with '/'",
                prefix
            )));
        }
        Ok(Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GatewayFilter for PrefixPath {
    fn name(&self) -> &str {
        "PrefixPath"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let path = format!("{}{}", self.prefix, exchange.path());
        exchange.set_path(&path)?;
        chain.proceed(exchange).await
    }
}

/// Drops the first `parts` path segments.
pub struct StripPrefix {
    parts: usize,
}

impl StripPrefix {
    pub fn new(parts: usize) -> Self {
        Self { parts }
    }

    pub fn strip(&self, path: &str) -> String {
        let rest: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .skip(self.parts)
            .collect();
        let mut stripped = format!("/{}", rest.join("/"));
        if path.ends_with('/') && stripped.len() > 1 {
            stripped.push('/');
        }
        stripped
    }
}

#[async_trait]
impl GatewayFilter for StripPrefix {
    fn name(&self) -> &str {
        "StripPrefix"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let path = self.strip(exchange.path());
        exchange.set_path(&path)?;
        chain.proceed(exchange).await
    }
}

/// Replaces the path with a template expanded from URI template variables,
/// e.g. `/{segment}` after `Path=/red/{segment}`.
pub struct SetPath {
    template: String,
}

impl SetPath {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn expand(&self, vars: &HashMap<String, String>) -> GatewayResult<String> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let end = rest[start..]
                .find('}')
                .map(|i| start + i)
                .ok_or_else(|| GatewayError::filter("SetPath", format!("unclosed '{{' in '{}'", self.template)))?;
            let name = &rest[start + 1..end];
            let value = vars.get(name).ok_or_else(|| {
                GatewayError::filter("SetPath", format!("no value for template variable '{}'", name))
            })?;
            out.push_str(value);
            rest = &rest[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[async_trait]
impl GatewayFilter for SetPath {
    fn name(&self) -> &str {
        "SetPath"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let empty = HashMap::new();
        let vars = exchange.uri_template_variables().unwrap_or(&empty);
        let path = self.expand(vars)?;
        exchange.set_path(&path)?;
        chain.proceed(exchange).await
    }
}

/// Regex replace over the path. `$\{name}` in the replacement is accepted
/// as an alias for `${name}`.
pub struct RewritePath {
    regex: Regex,
    replacement: String,
}

impl RewritePath {
    pub fn new(regex: &str, replacement: &str) -> GatewayResult<Self> {
        let regex = Regex::new(regex)
            .map_err(|e| GatewayError::config(format!("invalid regex '{}': {}", regex, e)))?;
        Ok(Self {
            regex,
            replacement: replacement.replace("$\\", "$"),
        })
    }

    pub fn rewrite(&self, path: &str) -> String {
        self.regex
            .replace_all(path, self.replacement.as_str())
            .into_owned()
    }
}

#[async_trait]
impl GatewayFilter for RewritePath {
    fn name(&self) -> &str {
        "RewritePath"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: Chain<'_>) -> FilterResponse {
        let path = self.rewrite(exchange.path());
        let path = if path.is_empty() { "/".to_string() } else { path };
        exchange.set_path(&path)?;
        chain.proceed(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_prefix() {
        let strip = StripPrefix::new(2);
        assert_eq!(strip.strip("/name/blue/red"), "/red");
        assert_eq!(strip.strip("/name/blue/red/"), "/red/");
        assert_eq!(strip.strip("/name"), "/");
        assert_eq!(StripPrefix::new(0).strip("/a/b"), "/a/b");
    }

    #[test]
    fn test_set_path_expansion() {
        let set = SetPath::new("/api/{segment}");
        let mut vars = HashMap::new();
        vars.insert("segment".to_string(), "users".to_string());
        assert_eq!(set.expand(&vars).unwrap(), "/api/users");
        assert!(SetPath::new("/{missing}").expand(&vars).is_err());
    }

    #[test]
    fn test_rewrite_path() {
        let rewrite = RewritePath::new("/red/?(?P<segment>.*)", "/$\\{segment}").unwrap();
        assert_eq!(rewrite.rewrite("/red/blue"), "/blue");
        assert_eq!(rewrite.rewrite("/red"), "/");
        assert!(RewritePath::new("(", "/").is_err());
    }

    #[test]
    fn test_prefix_path_requires_slash() {
        assert!(PrefixPath::new("mypath").is_err());
        assert!(PrefixPath::new("/mypath").is_ok());
    }
}
