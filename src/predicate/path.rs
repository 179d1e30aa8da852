//! URI template matching shared by the Path and Host predicates.
//!
//! # Template Syntax
//! - `{name}` one segment, captured as `name`
//! - `{name:regex}` captured when the regex matches
//! - `*` one segment, not captured
//! - `**` any remaining segments, including none
//! - `{*name}` captures the remaining path (may be empty), last element only
//!
//! Segments are delimited by a separator: `/` for paths, `.` for hosts.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use super::Predicate;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

/// A compiled URI template.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    names: Vec<String>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> GatewayResult<Self> {
        Self::compile(pattern, '/', false, true)
    }

    /// Compile a template.
    ///
    /// `optional_trailing` lets a pattern without a trailing separator also
    /// match the same input with one appended.
    pub fn compile(
        pattern: &str,
        separator: char,
        case_insensitive: bool,
        optional_trailing: bool,
    ) -> GatewayResult<Self> {
        let sep = regex::escape(&separator.to_string());
        let segment = format!("[^{}]", sep);
        let mut out = String::from("^");
        let mut names = Vec::new();
        let chars: Vec<char> = pattern.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '{' => {
                    let (body, next) = read_braces(&chars, i).ok_or_else(|| {
                        GatewayError::config(format!("unclosed '{{' in pattern '{}'", pattern))
                    })?;
                    i = next;

                    if let Some(name) = body.strip_prefix('*') {
                        if i != chars.len() {
                            return Err(GatewayError::config(format!(
                                "'{{*{}}}' must be the last element of '{}'",
                                name, pattern
                            )));
                        }
                        let name = validate_name(name, pattern)?;
                        // The capture keeps its leading separator
                        let preceded = out.ends_with(&sep) && out.len() > 1;
                        if preceded {
                            out.truncate(out.len() - sep.len());
                        }
                        out.push_str(&format!("(?P<{}>(?:{}.*)?)", name, sep));
                        names.push(name);
                        continue;
                    }

                    let (name, regex) = match body.split_once(':') {
                        Some((name, regex)) => (name, regex.to_string()),
                        None => (body.as_str(), format!("{}+", segment)),
                    };
                    let name = validate_name(name, pattern)?;
                    out.push_str(&format!("(?P<{}>{})", name, regex));
                    names.push(name);
                }
                '*' if chars.get(i + 1) == Some(&'*') => {
                    i += 2;
                    if out.ends_with(&sep) && out.len() > 1 {
                        out.truncate(out.len() - sep.len());
                        out.push_str(&format!("(?:{}.*)?", sep));
                    } else {
                        out.push_str(".*");
                    }
                }
                '*' => {
                    i += 1;
                    out.push_str(&format!("{}*", segment));
                }
                c => {
                    i += 1;
                    out.push_str(&regex::escape(&c.to_string()));
                }
            }
        }

        if optional_trailing && !pattern.ends_with(separator) {
            out.push_str(&format!("{}?", sep));
        }
        out.push('$');

        let regex = RegexBuilder::new(&out)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| GatewayError::config(format!("invalid pattern '{}': {}", pattern, e)))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            names,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// Match and return the captured variables.
    pub fn match_and_extract(&self, input: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(input)?;
        Some(
            self.names
                .iter()
                .map(|name| {
                    let value = caps.name(name).map(|m| m.as_str()).unwrap_or_default();
                    (name.clone(), value.to_string())
                })
                .collect(),
        )
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Returns the text between `{` at `start` and its matching `}` plus the
/// index after the closing brace. Nested braces (regex quantifiers) count.
fn read_braces(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut depth = 0usize;
    for (offset, c) in chars[start..].iter().enumerate() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let body: String = chars[start + 1..start + offset].iter().collect();
                    return Some((body, start + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

fn validate_name(name: &str, pattern: &str) -> GatewayResult<String> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name.to_string())
    } else {
        Err(GatewayError::config(format!(
            "invalid variable name '{}' in pattern '{}'",
            name, pattern
        )))
    }
}

/// Matches the request path against a set of templates.
///
/// The first matching template wins and its variables are merged into the
/// exchange's template variables.
#[derive(Debug, Clone)]
pub struct PathPredicate {
    patterns: Vec<PathPattern>,
    match_trailing_slash: bool,
}

impl PathPredicate {
    pub fn new<I, S>(patterns: I, match_trailing_slash: bool) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| PathPattern::compile(p.as_ref(), '/', false, match_trailing_slash))
            .collect::<GatewayResult<Vec<_>>>()?;
        if patterns.is_empty() {
            return Err(GatewayError::config("Path predicate needs at least one pattern"));
        }
        Ok(Self {
            patterns,
            match_trailing_slash,
        })
    }
}

#[async_trait]
impl Predicate for PathPredicate {
    async fn test(&self, exchange: &mut Exchange) -> bool {
        let path = exchange.path().to_string();
        for pattern in &self.patterns {
            if let Some(vars) = pattern.match_and_extract(&path) {
                tracing::trace!(pattern = %pattern, path = %path, "path matched");
                exchange.put_uri_template_variables(vars);
                return true;
            }
        }
        tracing::trace!(path = %path, "no path pattern matched");
        false
    }
}

impl fmt::Display for PathPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<&str> = self.patterns.iter().map(PathPattern::as_str).collect();
        write!(f, "Path {:?}", patterns)?;
        if !self.match_trailing_slash {
            f.write_str(" (strict trailing slash)")?;
        }
        Ok(())
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

    #[test]
    fn test_template_variable() {
        let p = PathPattern::parse("/foo/{id}").unwrap();
        let vars = p.match_and_extract("/foo/123").unwrap();
        assert_eq!(vars.get("id").map(String::as_str), Some("123"));
        assert!(p.match_and_extract("/bar/123").is_none());
        assert!(p.match_and_extract("/foo/1/2").is_none());
    }

    #[test]
    fn test_regex_variable() {
        let p = PathPattern::parse("/orders/{id:\\d{3}}").unwrap();
        assert!(p.is_match("/orders/123"));
        assert!(!p.is_match("/orders/12"));
        assert!(!p.is_match("/orders/abc"));
    }

    #[test]
    fn test_wildcards() {
        let one = PathPattern::parse("/static/*/logo.png").unwrap();
        assert!(one.is_match("/static/v1/logo.png"));
        assert!(!one.is_match("/static/v1/v2/logo.png"));

        let any = PathPattern::parse("/docs/**").unwrap();
        assert!(any.is_match("/docs"));
        assert!(any.is_match("/docs/a/b/c"));
        assert!(!any.is_match("/doc"));
    }

    #[test]
    fn test_capture_rest() {
        let p = PathPattern::parse("/files/{*path}").unwrap();
        let vars = p.match_and_extract("/files/a/b.txt").unwrap();
        assert_eq!(vars["path"], "/a/b.txt");
        let vars = p.match_and_extract("/files").unwrap();
        assert_eq!(vars["path"], "");

        assert!(PathPattern::parse("/files/{*path}/more").is_err());
    }

    #[test]
    fn test_trailing_slash_option() {
        let lenient = PathPattern::compile("/api", '/', false, true).unwrap();
        assert!(lenient.is_match("/api/"));
        let strict = PathPattern::compile("/api", '/', false, false).unwrap();
        assert!(!strict.is_match("/api/"));
        assert!(strict.is_match("/api"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::parse("/foo/{id").is_err());
        assert!(PathPattern::parse("/foo/{1abc}").is_err());
        assert!(PathPattern::parse("/foo/{id:[}").is_err());
    }

    #[tokio::test]
    async fn test_predicate_writes_variables() {
        let p = PathPredicate::new(["/bar/{x}", "/foo/{segment}"], true).unwrap();
        let mut ex = exchange("http://localhost/foo/abc");
        assert!(p.test(&mut ex).await);
        assert_eq!(
            ex.uri_template_variables().and_then(|v| v.get("segment")).map(String::as_str),
            Some("abc")
        );

        let mut miss = exchange("http://localhost/baz/abc");
        assert!(!p.test(&mut miss).await);
        assert!(miss.uri_template_variables().is_none());
    }
}
