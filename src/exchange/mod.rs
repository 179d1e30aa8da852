//! Per-request exchange.
//!
//! # Data Flow
//! ```text
//! axum Request<Body>
//!     → Exchange::new (request head + unread body)
//!     → predicates read head, may cache body and write attributes
//!     → filters mutate head, stage response headers, read attributes
//!     → forwarding terminal takes the body and the request URL
//!     → staged response headers applied to the final response
//! ```
//!
//! # Design Decisions
//! - Exclusively owned by one in-flight request, passed as `&mut`
//! - The body can be read once; `cache_body` buffers it so predicates and
//!   retry attempts can replay it
//! - Response headers added by filters are staged here
//! - A retry snapshots the request head, request URL, template variables
//!   and staged headers once, then restores them before every attempt so
//!   inner filters always rewrite the same input

pub mod attributes;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{
    header, request::Parts, uri::PathAndQuery, HeaderMap, HeaderName, HeaderValue, Method,
    Request, Response, Uri,
};

pub use attributes::{keys, Attributes};

use crate::error::{GatewayError, GatewayResult};
use crate::routing::Route;

/// Mutable state of a single request travelling through the gateway.
#[derive(Debug)]
pub struct Exchange {
    request: Parts,
    body: Option<Body>,
    cached_body: Option<Bytes>,
    remote_addr: Option<SocketAddr>,
    route: Option<Arc<Route>>,
    request_url: Option<Uri>,
    response_headers: HeaderMap,
    attributes: Attributes,
}

/// Per-attempt state captured by [`Exchange::snapshot`].
#[derive(Debug, Clone)]
pub struct AttemptSnapshot {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    request_url: Option<Uri>,
    template_variables: Option<HashMap<String, String>>,
    response_headers: HeaderMap,
}

impl Exchange {
    pub fn new(request: Request<Body>) -> Self {
        let (request, body) = request.into_parts();
        Self {
            request,
            body: Some(body),
            cached_body: None,
            remote_addr: None,
            route: None,
            request_url: None,
            response_headers: HeaderMap::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    // --- Request head ---

    pub fn request(&self) -> &Parts {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Parts {
        &mut self.request
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn uri(&self) -> &Uri {
        &self.request.uri
    }

    pub fn path(&self) -> &str {
        self.request.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.request.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.request.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Replace the request path, keeping the query string.
    pub fn set_path(&mut self, path: &str) -> GatewayResult<()> {
        let path_and_query = match self.request.uri.query() {
            Some(q) => format!("{}?{}", path, q),
            None => path.to_string(),
        };
        let path_and_query = PathAndQuery::try_from(path_and_query.as_str())
            .map_err(|e| GatewayError::filter("path", format!("invalid path '{}': {}", path, e)))?;

        let mut parts = self.request.uri.clone().into_parts();
        parts.path_and_query = Some(path_and_query);
        self.request.uri = Uri::from_parts(parts)
            .map_err(|e| GatewayError::filter("path", e.to_string()))?;
        Ok(())
    }

    /// Decoded query parameters in request order.
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All values of a query parameter.
    pub fn query_values(&self, name: &str) -> Vec<String> {
        self.query_params()
            .into_iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v)
            .collect()
    }

    /// Values of a named cookie across all `Cookie` headers.
    pub fn cookie_values(&self, name: &str) -> Vec<String> {
        self.request
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|h| h.split(';'))
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                (k.trim() == name).then(|| v.trim().to_string())
            })
            .collect()
    }

    // --- Body ---

    /// Read the request body once and keep it for later readers.
    pub async fn cache_body(&mut self, limit: usize) -> GatewayResult<Bytes> {
        if let Some(bytes) = &self.cached_body {
            return Ok(bytes.clone());
        }
        let body = self.body.take().unwrap_or_else(Body::empty);
        let bytes = axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| GatewayError::filter("body", format!("failed to read request body: {}", e)))?;
        self.cached_body = Some(bytes.clone());
        Ok(bytes)
    }

    pub fn cached_body(&self) -> Option<&Bytes> {
        self.cached_body.as_ref()
    }

    /// Body for the outgoing request. Replays the cached copy when present.
    pub fn take_body(&mut self) -> Body {
        match &self.cached_body {
            Some(bytes) => Body::from(bytes.clone()),
            None => self.body.take().unwrap_or_else(Body::empty),
        }
    }

    // --- Routing state ---

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    pub fn set_route(&mut self, route: Arc<Route>) {
        self.route = Some(route);
    }

    /// URL the forwarding terminal will call.
    pub fn request_url(&self) -> Option<&Uri> {
        self.request_url.as_ref()
    }

    pub fn set_request_url(&mut self, url: Uri) {
        self.request_url = Some(url);
    }

    pub fn is_already_routed(&self) -> bool {
        self.attributes.contains(keys::ALREADY_ROUTED)
    }

    pub fn mark_routed(&mut self) {
        self.attributes.insert(keys::ALREADY_ROUTED, true);
    }

    pub fn uri_template_variables(&self) -> Option<&HashMap<String, String>> {
        self.attributes
            .get::<HashMap<String, String>>(keys::URI_TEMPLATE_VARIABLES)
    }

    /// Merge captured template variables into the attribute bag.
    pub fn put_uri_template_variables(&mut self, vars: HashMap<String, String>) {
        self.attributes.update_with(
            keys::URI_TEMPLATE_VARIABLES,
            HashMap::new,
            |current: &mut HashMap<String, String>| current.extend(vars),
        );
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    // --- Response staging ---

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Stage a header for the final response.
    pub fn add_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.append(name, value);
    }

    pub fn set_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    pub fn remove_response_header(&mut self, name: &HeaderName) {
        self.response_headers.remove(name);
    }

    // --- Attempts ---

    /// Capture everything an attempt may rewrite.
    pub fn snapshot(&self) -> AttemptSnapshot {
        AttemptSnapshot {
            method: self.request.method.clone(),
            uri: self.request.uri.clone(),
            headers: self.request.headers.clone(),
            request_url: self.request_url.clone(),
            template_variables: self.uri_template_variables().cloned(),
            response_headers: self.response_headers.clone(),
        }
    }

    /// Rewind to `snapshot` so the next attempt starts from the same
    /// request and can forward again.
    pub fn restore(&mut self, snapshot: &AttemptSnapshot) {
        self.request.method = snapshot.method.clone();
        self.request.uri = snapshot.uri.clone();
        self.request.headers = snapshot.headers.clone();
        self.request_url = snapshot.request_url.clone();
        match &snapshot.template_variables {
            Some(vars) => self
                .attributes
                .insert(keys::URI_TEMPLATE_VARIABLES, vars.clone()),
            None => {
                self.attributes.remove(keys::URI_TEMPLATE_VARIABLES);
            }
        }
        self.response_headers = snapshot.response_headers.clone();
        self.attributes.remove(keys::ALREADY_ROUTED);
    }

    /// Drop the routing outcome so the exchange can be routed again.
    pub fn clear_routing(&mut self) {
        self.route = None;
        self.request_url = None;
        self.attributes.remove(keys::ALREADY_ROUTED);
    }

    /// Move the staged headers onto the outgoing response.
    pub fn apply_response_headers(&mut self, response: &mut Response<Body>) {
        let staged = std::mem::take(&mut self.response_headers);
        let mut current = None;
        for (name, value) in staged {
            if let Some(name) = name {
                current = Some(name);
            }
            if let Some(name) = &current {
                response.headers_mut().append(name.clone(), value);
            }
        }
    }
}
