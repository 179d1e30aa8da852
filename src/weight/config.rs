use std::fmt;

/// Immutable weight configuration of one group.
///
/// `ranges` has one more element than `weights`: `ranges[0] == 0.0`,
/// `ranges[last] == 1.0`, and route `i` owns `[ranges[i], ranges[i+1])`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightGroupConfig {
    group: String,
    weights: Vec<(String, u32)>,
    normalized: Vec<f64>,
    ranges: Vec<f64>,
}

impl WeightGroupConfig {
    /// Build from `(route_id, weight)` pairs in bucket order.
    /// Weights must be non-zero.
    pub fn from_weights(group: impl Into<String>, weights: Vec<(String, u32)>) -> Self {
        let total: u64 = weights.iter().map(|(_, w)| *w as u64).sum();
        let normalized: Vec<f64> = weights
            .iter()
            .map(|(_, w)| if total == 0 { 0.0 } else { *w as f64 / total as f64 })
            .collect();

        let mut ranges = Vec::with_capacity(weights.len() + 1);
        ranges.push(0.0);
        let mut acc = 0.0;
        for n in &normalized {
            acc += n;
            ranges.push(acc);
        }
        // Absorb float drift so the last bucket is closed at 1.0
        if let Some(last) = ranges.last_mut() {
            if !weights.is_empty() {
                *last = 1.0;
            }
        }

        Self {
            group: group.into(),
            weights,
            normalized,
            ranges,
        }
    }

    /// Copy with `route_id` set to `weight`, keeping its bucket position if
    /// already present.
    pub fn with_weight(&self, route_id: &str, weight: u32) -> Self {
        let mut weights = self.weights.clone();
        match weights.iter_mut().find(|(id, _)| id == route_id) {
            Some(entry) => entry.1 = weight,
            None => weights.push((route_id.to_string(), weight)),
        }
        Self::from_weights(self.group.clone(), weights)
    }

    /// Copy without `route_id`; `None` when the group becomes empty.
    pub fn without(&self, route_id: &str) -> Option<Self> {
        let weights: Vec<_> = self
            .weights
            .iter()
            .filter(|(id, _)| id != route_id)
            .cloned()
            .collect();
        if weights.is_empty() {
            None
        } else {
            Some(Self::from_weights(self.group.clone(), weights))
        }
    }

    /// Route owning the bucket that contains `r` (expected in `[0, 1)`).
    pub fn select(&self, r: f64) -> Option<&str> {
        let r = r.clamp(0.0, 1.0);
        self.ranges
            .windows(2)
            .position(|w| r >= w[0] && r < w[1])
            .or_else(|| (r >= 1.0 && !self.weights.is_empty()).then(|| self.weights.len() - 1))
            .map(|i| self.weights[i].0.as_str())
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn contains(&self, route_id: &str) -> bool {
        self.weights.iter().any(|(id, _)| id == route_id)
    }

    pub fn weights(&self) -> &[(String, u32)] {
        &self.weights
    }

    pub fn normalized_weights(&self) -> &[f64] {
        &self.normalized
    }

    pub fn ranges(&self) -> &[f64] {
        &self.ranges
    }

    /// Route id owning bucket `index`.
    pub fn route_at(&self, index: usize) -> Option<&str> {
        self.weights.get(index).map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl fmt::Display for WeightGroupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.group)?;
        for ((id, w), n) in self.weights.iter().zip(&self.normalized) {
            write!(f, " {}={}({:.3})", id, w, n)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, u32)]) -> WeightGroupConfig {
        WeightGroupConfig::from_weights(
            "g",
            pairs.iter().map(|(id, w)| (id.to_string(), *w)).collect(),
        )
    }

    #[test]
    fn test_normalize_and_ranges() {
        let c = config(&[("A", 1), ("B", 3)]);
        assert_eq!(c.normalized_weights(), &[0.25, 0.75]);
        assert_eq!(c.ranges(), &[0.0, 0.25, 1.0]);
        assert_eq!(c.select(0.1), Some("A"));
        assert_eq!(c.select(0.25), Some("B"));
        assert_eq!(c.select(0.5), Some("B"));
        assert_eq!(c.route_at(1), Some("B"));
    }

    #[test]
    fn test_ranges_invariants_with_drift() {
        let c = config(&[("a", 1), ("b", 1), ("c", 1), ("d", 7), ("e", 3)]);
        let ranges = c.ranges();
        assert_eq!(ranges.len(), c.len() + 1);
        assert_eq!(ranges[0], 0.0);
        assert_eq!(*ranges.last().unwrap(), 1.0);
        let sum: f64 = c.normalized_weights().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(ranges.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_with_weight_keeps_position() {
        let c = config(&[("A", 1), ("B", 1)]).with_weight("A", 3);
        assert_eq!(c.weights()[0], ("A".to_string(), 3));
        assert_eq!(c.ranges(), &[0.0, 0.75, 1.0]);

        let c = c.with_weight("C", 4);
        assert_eq!(c.route_at(2), Some("C"));
    }

    #[test]
    fn test_without() {
        let c = config(&[("A", 1), ("B", 1)]);
        let only_b = c.without("A").unwrap();
        assert_eq!(only_b.ranges(), &[0.0, 1.0]);
        assert_eq!(only_b.select(0.0), Some("B"));
        assert!(only_b.without("B").is_none());
    }
}
