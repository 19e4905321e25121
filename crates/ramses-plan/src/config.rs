//! Plan stage configuration, loaded from TOML.
//!
//! ```toml
//! adaptation_authorized = true
//!
//! [evaluation]
//! backend = "markov"        # or "prism"
//! timeout_secs = 10
//! prism_binary = "./prism/bin/prism"
//!
//! [topology]
//! entry = "ORDERING-SERVICE"
//!
//! [optimizer]
//! max_nodes = 10000
//! ```

use std::path::Path;

use ramses_evaluator::{EvaluationConfig, TopologyConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// When false the planner chooses nothing but still hands over to
    /// Execute.
    pub adaptation_authorized: bool,
    pub evaluation: EvaluationConfig,
    pub topology: TopologyConfig,
    pub optimizer: OptimizerConfig,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            adaptation_authorized: true,
            evaluation: EvaluationConfig::default(),
            topology: TopologyConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Branch-and-bound node budget.
    pub max_nodes: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_nodes: 10_000 }
    }
}

impl PlanConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PlanConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ramses_evaluator::EvaluatorBackend;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config: PlanConfig = toml::from_str("").unwrap();
        assert_eq!(config, PlanConfig::default());
        assert!(config.adaptation_authorized);
        assert_eq!(config.optimizer.max_nodes, 10_000);
        assert_eq!(config.topology.entry, "ORDERING-SERVICE");
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let toml_str = r#"
adaptation_authorized = false

[evaluation]
backend = "prism"
timeout_secs = 3

[topology]
restaurant = "KITCHEN"
"#;
        let config: PlanConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.adaptation_authorized);
        assert_eq!(config.evaluation.backend, EvaluatorBackend::Prism);
        assert_eq!(config.evaluation.timeout_secs, 3);
        assert_eq!(config.evaluation.vulnerability_max, 100.0);
        assert_eq!(config.topology.restaurant, "KITCHEN");
        assert_eq!(config.topology.payment, "PAYMENT-PROXY-SERVICE");
    }

    #[test]
    fn round_trips_through_a_file() {
        let config = PlanConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();
        assert_eq!(PlanConfig::from_file(file.path()).unwrap(), config);
    }
}
