//! Evaluator configuration, the `[evaluation]` table of the plan config.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::evaluator::{MarkovRewardEvaluator, PrismEvaluator, RewardEvaluator};
use crate::topology::{OrderingFlowTopology, TopologyConfig};

/// Which reward evaluator scores candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorBackend {
    #[default]
    Markov,
    Prism,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub backend: EvaluatorBackend,
    /// Per-candidate evaluation timeout.
    pub timeout_secs: u64,
    pub prism_binary: PathBuf,
    /// Normalisation bound for average response times, in milliseconds.
    pub response_time_max_ms: f64,
    /// Normalisation bound for vulnerability scores.
    pub vulnerability_max: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            backend: EvaluatorBackend::Markov,
            timeout_secs: 10,
            prism_binary: PathBuf::from("./prism/bin/prism"),
            response_time_max_ms: 1000.0,
            vulnerability_max: 100.0,
        }
    }
}

impl EvaluationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the configured evaluator over the given request-flow roles.
    pub fn build(&self, roles: TopologyConfig) -> Arc<dyn RewardEvaluator> {
        let topology =
            OrderingFlowTopology::new(roles, self.response_time_max_ms, self.vulnerability_max);
        match self.backend {
            EvaluatorBackend::Markov => Arc::new(MarkovRewardEvaluator::new(topology)),
            EvaluatorBackend::Prism => Arc::new(PrismEvaluator::new(topology, self.prism_binary.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_the_markov_backend() {
        let config = EvaluationConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.build(TopologyConfig::default()).name(), "markov");
    }

    #[test]
    fn prism_backend_is_selectable() {
        let config = EvaluationConfig {
            backend: EvaluatorBackend::Prism,
            ..EvaluationConfig::default()
        };
        assert_eq!(config.build(TopologyConfig::default()).name(), "prism");
    }
}
