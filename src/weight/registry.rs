use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::WeightGroupConfig;
use crate::error::{GatewayError, GatewayResult};

type Groups = HashMap<String, Arc<WeightGroupConfig>>;

/// Copy-on-write map of weight groups.
#[derive(Debug, Default)]
pub struct WeightRegistry {
    groups: ArcSwap<Groups>,
}

impl WeightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `route_id` in `group` with `weight`.
    ///
    /// Moving a route to another group removes it from the old one.
    pub fn add_weight(&self, group: &str, route_id: &str, weight: u32) -> GatewayResult<()> {
        if group.is_empty() {
            return Err(GatewayError::config("weight group must not be empty"));
        }
        if route_id.is_empty() {
            return Err(GatewayError::config("weighted route id must not be empty"));
        }
        if weight == 0 {
            return Err(GatewayError::config(format!(
                "weight for route '{}' in group '{}' must be greater than 0",
                route_id, group
            )));
        }

        self.groups.rcu(|current| {
            let mut next = without_route(current, route_id, Some(group));
            let config = match next.get(group) {
                Some(existing) => existing.with_weight(route_id, weight),
                None => WeightGroupConfig::from_weights(group, vec![(route_id.to_string(), weight)]),
            };
            next.insert(group.to_string(), Arc::new(config));
            next
        });

        tracing::debug!(group, route_id, weight, "weight registered");
        Ok(())
    }

    /// Remove a route from whichever group holds it. Empty groups are dropped.
    pub fn remove_route(&self, route_id: &str) -> bool {
        let previous = self
            .groups
            .rcu(|current| without_route(current, route_id, None));
        previous.values().any(|c| c.contains(route_id))
    }

    /// Draw a route id for `group`.
    pub fn select(&self, group: &str) -> Option<String> {
        self.select_with(group, fastrand::f64())
    }

    /// Route id owning the bucket containing `r`.
    pub fn select_with(&self, group: &str, r: f64) -> Option<String> {
        self.groups
            .load()
            .get(group)
            .and_then(|c| c.select(r).map(str::to_string))
    }

    pub fn group(&self, group: &str) -> Option<Arc<WeightGroupConfig>> {
        self.groups.load().get(group).cloned()
    }

    /// Consistent view of all groups.
    pub fn snapshot(&self) -> Arc<Groups> {
        self.groups.load_full()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.load().is_empty()
    }
}

/// Copy of `groups` with `route_id` removed, except from `keep`.
fn without_route(groups: &Groups, route_id: &str, keep: Option<&str>) -> Groups {
    groups
        .iter()
        .filter_map(|(name, config)| {
            if Some(name.as_str()) == keep || !config.contains(route_id) {
                return Some((name.clone(), config.clone()));
            }
            config
                .without(route_id)
                .map(|c| (name.clone(), Arc::new(c)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_select_buckets() {
        let registry = WeightRegistry::new();
        registry.add_weight("g", "A", 1).unwrap();
        registry.add_weight("g", "B", 3).unwrap();

        assert_eq!(registry.select_with("g", 0.1).as_deref(), Some("A"));
        assert_eq!(registry.select_with("g", 0.5).as_deref(), Some("B"));
        assert!(registry.select_with("missing", 0.5).is_none());
        assert!(registry.select("g").is_some());
    }

    #[test]
    fn test_rejects_zero_weight() {
        let registry = WeightRegistry::new();
        assert!(registry.add_weight("g", "A", 0).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_route_drops_empty_group() {
        let registry = WeightRegistry::new();
        registry.add_weight("g", "A", 1).unwrap();
        registry.add_weight("g", "B", 1).unwrap();

        assert!(registry.remove_route("A"));
        assert_eq!(registry.group("g").unwrap().ranges(), &[0.0, 1.0]);
        assert!(registry.remove_route("B"));
        assert!(registry.group("g").is_none());
        assert!(!registry.remove_route("B"));
    }

    #[test]
    fn test_route_moves_between_groups() {
        let registry = WeightRegistry::new();
        registry.add_weight("g1", "A", 1).unwrap();
        registry.add_weight("g2", "A", 5).unwrap();

        assert!(registry.group("g1").is_none());
        assert_eq!(registry.group("g2").unwrap().weights(), &[("A".to_string(), 5)]);
    }

    #[test]
    fn test_concurrent_add_weight() {
        let registry = Arc::new(WeightRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    registry.add_weight("g", &format!("route-{}", i), i + 1).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let group = registry.group("g").unwrap();
        assert_eq!(group.len(), 16);
        let sum: f64 = group.normalized_weights().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(*group.ranges().last().unwrap(), 1.0);
    }
}
