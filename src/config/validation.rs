//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Unique, non-empty route ids and parseable route URIs
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Predicate and filter arguments are checked when routes are built,
//!   where the factory that owns them knows their shape

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::Uri;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// One semantic problem in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    let client = &config.http_client;
    if client.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("http_client.connect_timeout_ms", "must be greater than 0"));
    }
    if client.response_timeout_ms == 0 {
        errors.push(ValidationError::new("http_client.response_timeout_ms", "must be greater than 0"));
    }
    if client.max_body_bytes == 0 {
        errors.push(ValidationError::new("http_client.max_body_bytes", "must be greater than 0"));
    }

    let mut service_ids = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        let field = format!("services[{}]", i);
        if service.id.trim().is_empty() {
            errors.push(ValidationError::new(&field, "id must not be empty"));
        } else if !service_ids.insert(service.id.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate service id '{}'", service.id)));
        }
        for instance in &service.instances {
            if !has_scheme_and_host(instance) {
                errors.push(ValidationError::new(
                    &field,
                    format!("instance '{}' needs a scheme and host", instance),
                ));
            }
        }
    }

    let mut route_ids = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        if route.id.trim().is_empty() {
            errors.push(ValidationError::new(&field, "id must not be empty"));
        } else if !route_ids.insert(route.id.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate route id '{}'", route.id)));
        }
        if !has_scheme_and_host(&route.uri) {
            errors.push(ValidationError::new(
                format!("{}.uri", field),
                format!("'{}' needs a scheme and host", route.uri),
            ));
        }
        if route.response_timeout_ms == Some(0) {
            errors.push(ValidationError::new(
                format!("{}.response_timeout_ms", field),
                "must be greater than 0",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn has_scheme_and_host(uri: &str) -> bool {
    uri.parse::<Uri>()
        .map(|u| u.scheme().is_some() && u.authority().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_problem() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "nowhere"

            [http_client]
            response_timeout_ms = 0

            [[routes]]
            id = "a"
            uri = "http://a"

            [[routes]]
            id = "a"
            uri = "/relative"
            "#,
        )
        .unwrap();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "http_client.response_timeout_ms",
                "routes[1]",
                "routes[1].uri"
            ]
        );
    }
}
