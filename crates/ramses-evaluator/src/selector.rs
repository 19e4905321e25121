//! System-wide selection of the single best adaptation option.
//!
//! Every candidate is projected onto a snapshot and scored concurrently,
//! each under its own timeout. Ranking is by `(relative cost, service id,
//! position in the service's option list)`, so the winner does not depend
//! on which evaluation finishes first.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ramses_knowledge::{AdaptationOption, OptionsByService, Service, ServiceId};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{EvalError, EvalResult};
use crate::evaluator::{relative_cost, RewardEvaluator};
use crate::snapshot::SystemSnapshot;

/// Relative cost of the unmodified system.
pub const BASELINE_COST: f64 = 1.0;

/// A scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub service_id: ServiceId,
    /// Index of the option within its service's candidate list.
    pub position: usize,
    pub option: AdaptationOption,
    pub relative_cost: f64,
}

/// Result of one selection round.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// The cheapest candidate, when it beats the baseline.
    pub best: Option<RankedCandidate>,
    /// Every successfully scored candidate, best first.
    pub ranked: Vec<RankedCandidate>,
    /// Candidates that could not be projected or scored.
    pub failed: usize,
}

fn rank(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    a.relative_cost
        .total_cmp(&b.relative_cost)
        .then_with(|| a.service_id.cmp(&b.service_id))
        .then_with(|| a.position.cmp(&b.position))
}

async fn timed(
    evaluator: &dyn RewardEvaluator,
    baseline: Arc<SystemSnapshot>,
    candidate: Arc<SystemSnapshot>,
    timeout: Duration,
) -> EvalResult<f64> {
    tokio::time::timeout(timeout, evaluator.expected_reward(baseline, candidate))
        .await
        .map_err(|_| EvalError::Timeout(timeout))?
}

/// Pick at most one option across all services whose relative cost is
/// strictly below the baseline's.
pub async fn select_best_option(
    evaluator: Arc<dyn RewardEvaluator>,
    services: &BTreeMap<ServiceId, Service>,
    candidates: &OptionsByService,
    timeout: Duration,
) -> Selection {
    let total: usize = candidates.values().map(Vec::len).sum();
    if total == 0 {
        return Selection::default();
    }

    let baseline = Arc::new(SystemSnapshot::baseline(services));
    let baseline_reward = match timed(evaluator.as_ref(), baseline.clone(), baseline.clone(), timeout).await {
        Ok(reward) if reward > 0.0 && reward.is_finite() => reward,
        Ok(reward) => {
            warn!(evaluator = evaluator.name(), reward, "baseline reward is not positive, skipping evaluation");
            return Selection {
                failed: total,
                ..Selection::default()
            };
        }
        Err(e) => {
            warn!(evaluator = evaluator.name(), error = %e, "baseline evaluation failed, skipping evaluation");
            return Selection {
                failed: total,
                ..Selection::default()
            };
        }
    };
    debug!(evaluator = evaluator.name(), baseline_reward, candidates = total, "evaluating candidates");

    let mut failed = 0;
    let mut tasks = JoinSet::new();
    for (service_id, options) in candidates {
        for (position, option) in options.iter().enumerate() {
            let candidate = match SystemSnapshot::project(services, option) {
                Ok(snapshot) => Arc::new(snapshot),
                Err(e) => {
                    warn!(service = %service_id, option = option.kind.name(), error = %e, "candidate skipped");
                    failed += 1;
                    continue;
                }
            };
            let evaluator = evaluator.clone();
            let baseline = baseline.clone();
            let service_id = service_id.clone();
            let option = option.clone();
            tasks.spawn(async move {
                let reward = timed(evaluator.as_ref(), baseline, candidate, timeout).await;
                (service_id, position, option, reward)
            });
        }
    }

    let mut ranked = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (service_id, position, option, reward) = match joined {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "candidate evaluation task failed");
                failed += 1;
                continue;
            }
        };
        let scored = reward.and_then(|r| {
            relative_cost(r, baseline_reward).ok_or(EvalError::Unparsable(format!("reward {r}")))
        });
        match scored {
            Ok(cost) => {
                debug!(service = %service_id, option = option.kind.name(), position, relative_cost = cost, "candidate scored");
                ranked.push(RankedCandidate {
                    service_id,
                    position,
                    option,
                    relative_cost: cost,
                });
            }
            Err(e) => {
                warn!(service = %service_id, option = option.kind.name(), position, error = %e, "candidate evaluation failed");
                failed += 1;
            }
        }
    }

    ranked.sort_by(rank);
    let best = ranked.first().filter(|c| c.relative_cost < BASELINE_COST).cloned();
    match &best {
        Some(c) => info!(
            service = %c.service_id,
            option = c.option.kind.name(),
            relative_cost = c.relative_cost,
            "best adaptation option selected"
        ),
        None => info!(scored = ranked.len(), failed, "no candidate improves on the baseline"),
    }
    Selection { best, ranked, failed }
}
