//! Reward evaluators: compute the expected cumulative reward of the
//! request-flow model for a candidate system state.
//!
//! [`MarkovRewardEvaluator`] solves the chain in-process.
//! [`PrismEvaluator`] writes the model to a scratch directory and runs
//! an external PRISM binary on it.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::error::{EvalError, EvalResult};
use crate::snapshot::SystemSnapshot;
use crate::topology::{OrderingFlowTopology, START};

/// Boxed future returned by [`RewardEvaluator::expected_reward`].
pub type EvalFuture = Pin<Box<dyn Future<Output = EvalResult<f64>> + Send>>;

/// Property asking for the minimum expected cumulative reward until the
/// model reaches an absorbing state.
pub const PRISM_PROPERTY: &str = "Rmin=? [ C ]";

const PRISM_RESULT_MARKER: &str = "Value in the initial state";

/// Scores a candidate system state against the baseline.
pub trait RewardEvaluator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Expected reward of `candidate` relative to `baseline`. Lower is
    /// better.
    fn expected_reward(
        &self,
        baseline: Arc<SystemSnapshot>,
        candidate: Arc<SystemSnapshot>,
    ) -> EvalFuture;
}

/// Candidate reward divided by the baseline's own reward, so the current
/// system scores exactly 1.0.
pub fn relative_cost(candidate_reward: f64, baseline_reward: f64) -> Option<f64> {
    if baseline_reward > 0.0 && baseline_reward.is_finite() && candidate_reward.is_finite() {
        Some(candidate_reward / baseline_reward)
    } else {
        None
    }
}

// ── In-process solver ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MarkovRewardEvaluator {
    topology: OrderingFlowTopology,
}

impl MarkovRewardEvaluator {
    pub fn new(topology: OrderingFlowTopology) -> Self {
        Self { topology }
    }
}

impl RewardEvaluator for MarkovRewardEvaluator {
    fn name(&self) -> &'static str {
        "markov"
    }

    fn expected_reward(
        &self,
        baseline: Arc<SystemSnapshot>,
        candidate: Arc<SystemSnapshot>,
    ) -> EvalFuture {
        let topology = self.topology.clone();
        Box::pin(async move {
            let chain = topology.chain(&baseline, &candidate)?;
            chain.expected_reward(START)
        })
    }
}

// ── External model checker ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PrismEvaluator {
    topology: OrderingFlowTopology,
    binary: PathBuf,
}

impl PrismEvaluator {
    pub fn new(topology: OrderingFlowTopology, binary: impl Into<PathBuf>) -> Self {
        Self {
            topology,
            binary: binary.into(),
        }
    }
}

impl RewardEvaluator for PrismEvaluator {
    fn name(&self) -> &'static str {
        "prism"
    }

    fn expected_reward(
        &self,
        baseline: Arc<SystemSnapshot>,
        candidate: Arc<SystemSnapshot>,
    ) -> EvalFuture {
        let topology = self.topology.clone();
        let binary = self.binary.clone();
        Box::pin(async move {
            let model = topology.prism_model(&baseline, &candidate)?;

            // Each evaluation gets its own directory so concurrent runs
            // never share model files.
            let dir = tempfile::tempdir()?;
            let model_path = dir.path().join("model.prism");
            let props_path = dir.path().join("model.props");
            tokio::fs::write(&model_path, model).await?;
            tokio::fs::write(&props_path, PRISM_PROPERTY).await?;

            debug!(binary = %binary.display(), dir = %dir.path().display(), "running model checker");
            let output = tokio::process::Command::new(&binary)
                .arg(&model_path)
                .arg(&props_path)
                .kill_on_drop(true)
                .output()
                .await?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(EvalError::Process(format!(
                    "{} exited with {}: {}",
                    binary.display(),
                    output.status,
                    stderr.trim()
                )));
            }
            parse_prism_output(&stdout)
        })
    }
}

/// Extract the numeric result from PRISM's standard output.
pub fn parse_prism_output(stdout: &str) -> EvalResult<f64> {
    let line = stdout
        .lines()
        .find(|l| l.contains(PRISM_RESULT_MARKER))
        .ok_or_else(|| EvalError::Unparsable(format!("no line containing {PRISM_RESULT_MARKER:?}")))?;
    let token = line
        .split_once(':')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .ok_or_else(|| EvalError::Unparsable(line.to_string()))?;
    let value: f64 = token
        .parse()
        .map_err(|_| EvalError::Unparsable(line.to_string()))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::Unparsable(line.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::{snapshot, topology};

    #[test]
    fn relative_cost_needs_a_positive_baseline() {
        assert_eq!(relative_cost(1.5, 3.0), Some(0.5));
        assert_eq!(relative_cost(1.0, 0.0), None);
        assert_eq!(relative_cost(f64::NAN, 1.0), None);
    }

    #[test]
    fn parses_value_line() {
        let out = "PRISM\n=====\n\nModel checking: R=? [ C ]\n\nValue in the initial state: 4.250000000000001\n\nTime for model checking: 0.01 seconds.\n\nResult: 4.25 (exact)\n";
        assert!((parse_prism_output(out).unwrap() - 4.25).abs() < 1e-9);
    }

    #[test]
    fn value_with_trailing_annotation() {
        let out = "Value in the initial state: 3.0 (+/- 1e-6 estimated)\n";
        assert_eq!(parse_prism_output(out).unwrap(), 3.0);
    }

    #[test]
    fn garbage_output_is_unparsable() {
        assert!(matches!(
            parse_prism_output("Error: syntax error\n"),
            Err(EvalError::Unparsable(_))
        ));
        assert!(matches!(
            parse_prism_output("Value in the initial state: Infinity\n"),
            Err(EvalError::Unparsable(_))
        ));
    }

    #[tokio::test]
    async fn better_delivery_lowers_relative_cost() {
        let evaluator = MarkovRewardEvaluator::new(topology());
        let base = Arc::new(snapshot([
            (0.95, 200.0, 10.0),
            (0.9, 150.0, 5.0),
            (0.8, 300.0, 5.0),
            (0.99, 100.0, 2.0),
        ]));
        let baseline_reward = evaluator.expected_reward(base.clone(), base.clone()).await.unwrap();
        assert!(baseline_reward > 0.0);

        let mut better = (*base).clone();
        better
            .services
            .get_mut("DELIVERY-PROXY-SERVICE")
            .unwrap()
            .insert(ramses_knowledge::QosKind::Availability, 0.99);
        let candidate_reward = evaluator.expected_reward(base.clone(), Arc::new(better)).await.unwrap();
        let cost = relative_cost(candidate_reward, baseline_reward).unwrap();
        assert!(cost < 1.0, "better delivery availability should cost less, got {cost}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prism_binary_is_run_on_model_files() {
        use std::os::unix::fs::PermissionsExt;

        // Both scripts are written before either is spawned.
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("prism-ok");
        let failing = dir.path().join("prism-failing");
        std::fs::write(
            &ok,
            "#!/bin/sh\ngrep -q '^dtmc' \"$1\" || exit 2\ngrep -q 'Rmin' \"$2\" || exit 3\necho 'Value in the initial state: 2.5'\n",
        )
        .unwrap();
        std::fs::write(&failing, "#!/bin/sh\necho 'out of memory' >&2\nexit 1\n").unwrap();
        for script in [&ok, &failing] {
            std::fs::set_permissions(script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let base = Arc::new(snapshot([(0.9, 200.0, 10.0); 4]));
        let reward = PrismEvaluator::new(topology(), &ok)
            .expected_reward(base.clone(), base.clone())
            .await
            .unwrap();
        assert_eq!(reward, 2.5);

        let err = PrismEvaluator::new(topology(), &failing)
            .expected_reward(base.clone(), base)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Process(ref msg) if msg.contains("out of memory")));
    }
}
