//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Outgoing HTTP client settings.
    pub http_client: HttpClientConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Static service instances for `lb://` route URIs.
    pub services: Vec<ServiceConfig>,

    /// Filters applied to every route.
    pub default_filters: Vec<ComponentDefinition>,

    /// Route definitions.
    pub routes: Vec<RouteDefinition>,

    /// `X-Forwarded-*` headers added to proxied requests.
    pub x_forwarded: XForwardedConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Outgoing HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Response timeout per forward attempt in milliseconds.
    /// Routes may override it with `response_timeout_ms`.
    pub response_timeout_ms: u64,

    /// Largest request body buffered for forwarding and retries.
    pub max_body_bytes: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            response_timeout_ms: 30_000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// `X-Forwarded-*` header settings. Every switch defaults to on.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct XForwardedConfig {
    pub enabled: bool,
    pub for_enabled: bool,
    pub host_enabled: bool,
    pub port_enabled: bool,
    pub proto_enabled: bool,

    /// Append to an incoming header instead of replacing it.
    pub for_append: bool,
    pub host_append: bool,
    pub port_append: bool,
    pub proto_append: bool,
}

impl Default for XForwardedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            for_enabled: true,
            host_enabled: true,
            port_enabled: true,
            proto_enabled: true,
            for_append: true,
            host_append: true,
            port_append: true,
            proto_append: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (e.g. "info" or "gateway=debug").
    pub log_level: Option<String>,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A logical service and its instances.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service id used as the host of `lb://` URIs.
    pub id: String,

    /// Instance base URIs (e.g., "http://10.0.0.5:8080").
    #[serde(default)]
    pub instances: Vec<String>,
}

/// Route definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteDefinition {
    /// Unique route identifier.
    pub id: String,

    /// Target URI (`http://host:port` or `lb://service`).
    pub uri: String,

    /// Lower orders are matched first.
    #[serde(default)]
    pub order: i32,

    /// Predicates, all of which must match.
    #[serde(default)]
    pub predicates: Vec<ComponentDefinition>,

    /// Route filters in declaration order.
    #[serde(default)]
    pub filters: Vec<ComponentDefinition>,

    /// Per-route response timeout in milliseconds.
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,

    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A predicate or filter entry.
///
/// ```toml
/// predicates = ["Path=/users/{id}", { name = "Header", args = { header = "x-debug" } }]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ComponentDefinition {
    /// `Name=arg1,arg2,...`
    Shortcut(String),
    /// `{ name, args }`
    Structured {
        name: String,
        #[serde(default)]
        args: BTreeMap<String, toml::Value>,
    },
}

impl ComponentDefinition {
    pub fn name(&self) -> &str {
        match self {
            ComponentDefinition::Shortcut(s) => s.split('=').next().unwrap_or_default().trim(),
            ComponentDefinition::Structured { name, .. } => name,
        }
    }
}

impl fmt::Display for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentDefinition::Shortcut(s) => f.write_str(s),
            ComponentDefinition::Structured { name, args } => {
                write!(f, "{} {{", name)?;
                for (i, (k, v)) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, " {} = {}", k, v)?;
                }
                f.write_str(" }")
            }
        }
    }
}
