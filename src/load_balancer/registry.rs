//! Service instance registry.
//!
//! # Responsibilities
//! - Hold the instances of every logical service
//! - Pair each service with its load balancing strategy
//! - Swap the whole set atomically on config reload

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{LoadBalancer, RoundRobin, ServiceInstance};
use crate::error::{GatewayError, GatewayResult};

#[derive(Debug)]
struct ServiceGroup {
    instances: Vec<Arc<ServiceInstance>>,
    balancer: Box<dyn LoadBalancer>,
}

type Services = HashMap<String, ServiceGroup>;

/// Static service discovery backed by configuration.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: ArcSwap<Services>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Build from `(service id, instance uris)` pairs.
    pub fn from_services<I, S>(services: I) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let registry = Self::new();
        registry.replace(services)?;
        Ok(registry)
    }

    /// Replace every service. The current set is kept on error.
    pub fn replace<I, S>(&self, services: I) -> GatewayResult<()>
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let mut groups = HashMap::new();
        for (id, uris) in services {
            let id = id.into();
            if id.trim().is_empty() {
                return Err(GatewayError::config("service id must not be empty"));
            }
            let instances = uris
                .iter()
                .map(|uri| ServiceInstance::new(id.clone(), uri).map(Arc::new))
                .collect::<GatewayResult<Vec<_>>>()?;
            let balancer: Box<dyn LoadBalancer> = Box::new(RoundRobin::new());
            groups.insert(id, ServiceGroup { instances, balancer });
        }
        tracing::debug!(services = groups.len(), "service registry updated");
        self.services.store(Arc::new(groups));
        Ok(())
    }

    /// Choose an instance of `service_id`.
    pub fn choose(&self, service_id: &str) -> Option<Arc<ServiceInstance>> {
        let services = self.services.load();
        match services.get(service_id) {
            Some(group) => {
                let chosen = group.balancer.choose(&group.instances);
                if chosen.is_none() {
                    tracing::debug!(service = %service_id, "service has no instances");
                }
                chosen
            }
            None => {
                tracing::debug!(service = %service_id, "service not found in registry");
                None
            }
        }
    }

    /// All instances of a service.
    pub fn instances(&self, service_id: &str) -> Vec<Arc<ServiceInstance>> {
        self.services
            .load()
            .get(service_id)
            .map(|g| g.instances.clone())
            .unwrap_or_default()
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.services.load().keys().cloned().collect()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
