//! Fault injection configuration

use std::collections::HashMap;

/// Per-thread fault configuration
///
/// Call sites carry their own probability (usually from a
/// `SimulatedStoreConfig` or `SimulatedConsensusConfig`). An override pins a
/// fault id to a fixed probability for the whole thread, which is how tests
/// force or silence one fault without rebuilding the simulated collaborators.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Master switch; when false no fault ever triggers
    pub enabled: bool,
    /// Per-fault probabilities that replace the call-site value
    pub overrides: HashMap<String, f64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        FaultConfig {
            enabled: true,
            overrides: HashMap::new(),
        }
    }
}

impl FaultConfig {
    /// No faults at all
    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, fault_id: &str, probability: f64) -> Self {
        self.overrides
            .insert(fault_id.to_string(), probability.clamp(0.0, 1.0));
        self
    }

    /// Effective probability given the call-site default
    pub fn resolve(&self, fault_id: &str, site_probability: f64) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        match self.overrides.get(fault_id) {
            Some(p) => *p,
            None => site_probability.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buggify::faults;

    #[test]
    fn test_disabled_is_zero() {
        let config = FaultConfig::disabled().with_override(faults::object_store::PUT_FAIL, 1.0);
        assert_eq!(config.resolve(faults::object_store::PUT_FAIL, 1.0), 0.0);
    }

    #[test]
    fn test_override_wins() {
        let config = FaultConfig::default().with_override(faults::object_store::PUT_FAIL, 0.5);
        assert_eq!(config.resolve(faults::object_store::PUT_FAIL, 0.01), 0.5);
        assert_eq!(config.resolve(faults::object_store::GET_FAIL, 0.01), 0.01);
    }

    #[test]
    fn test_site_probability_clamped() {
        let config = FaultConfig::default();
        assert_eq!(config.resolve("unknown.fault", 7.0), 1.0);
        assert_eq!(config.resolve("unknown.fault", -1.0), 0.0);
    }
}
