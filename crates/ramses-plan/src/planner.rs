//! The planning iteration.
//!
//! ```text
//! Idle ──► Evaluating ──► Committing ──► Idle
//!              │               │
//!              └───── error ───┴──► Failed
//! ```
//!
//! Per service, forced options pre-empt proposed ones: forced shutdowns
//! are applied to the working snapshot first, then at most one forced
//! add-instance is resolved against the result. Services without forced
//! options contribute resolved candidates to a single system-wide
//! evaluation that adopts at most one of them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ramses_evaluator::{select_best_option, EvaluationConfig, RewardEvaluator};
use ramses_knowledge::{
    AdaptationOption, ChosenOptions, Knowledge, Module, OptionKind, OptionsByService, Service,
    ServiceId,
};
use ramses_optimizer::{BranchAndBound, MipSolver, WeightOptimizer};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::PlanConfig;
use crate::error::{PlanError, PlanResult};
use crate::execute::ExecuteClient;
use crate::invalidation::invalidate_cascade;
use crate::options::{
    resolve_add_instance, resolve_change_implementation, resolve_shutdown, resolve_weight_change,
};

/// Where the planner is within an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanPhase {
    Idle,
    Evaluating,
    Committing,
    Failed,
}

impl fmt::Display for PlanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanPhase::Idle => "IDLE",
            PlanPhase::Evaluating => "EVALUATING",
            PlanPhase::Committing => "COMMITTING",
            PlanPhase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What one iteration decided.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanOutcome {
    pub iteration: u64,
    pub authorized: bool,
    /// Options committed to Knowledge, per service.
    pub chosen: OptionsByService,
    /// Services whose QoS history was invalidated, in visit order.
    pub invalidated: Vec<ServiceId>,
    /// Services whose weight optimization had no result.
    pub skipped: Vec<ServiceId>,
}

pub struct Planner {
    knowledge: Arc<dyn Knowledge>,
    execute: Arc<dyn ExecuteClient>,
    evaluator: Arc<dyn RewardEvaluator>,
    optimizer: WeightOptimizer,
    evaluation_timeout: Duration,
    adaptation_authorized: bool,
    phase: PlanPhase,
    iterations: u64,
}

impl Planner {
    pub fn new(
        knowledge: Arc<dyn Knowledge>,
        execute: Arc<dyn ExecuteClient>,
        evaluator: Arc<dyn RewardEvaluator>,
        solver: Arc<dyn MipSolver>,
    ) -> Self {
        Self {
            knowledge,
            execute,
            evaluator,
            optimizer: WeightOptimizer::new(solver),
            evaluation_timeout: EvaluationConfig::default().timeout(),
            adaptation_authorized: true,
            phase: PlanPhase::Idle,
            iterations: 0,
        }
    }

    /// Build a planner with the evaluator and solver described by `config`.
    pub fn from_config(
        config: &PlanConfig,
        knowledge: Arc<dyn Knowledge>,
        execute: Arc<dyn ExecuteClient>,
    ) -> Self {
        let evaluator = config.evaluation.build(config.topology.clone());
        let solver = Arc::new(BranchAndBound::new(config.optimizer.max_nodes));
        Self::new(knowledge, execute, evaluator, solver)
            .with_evaluation_timeout(config.evaluation.timeout())
            .with_adaptation_authorized(config.adaptation_authorized)
    }

    pub fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    pub fn with_adaptation_authorized(mut self, authorized: bool) -> Self {
        self.adaptation_authorized = authorized;
        self
    }

    pub fn phase(&self) -> PlanPhase {
        self.phase
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn evaluation_timeout(&self) -> Duration {
        self.evaluation_timeout
    }

    /// Run one planning iteration. On error the Plan module is marked
    /// failed in Knowledge and Execute is not signalled.
    pub async fn run_iteration(&mut self) -> PlanResult<PlanOutcome> {
        self.iterations += 1;
        let iteration = self.iterations;
        info!(iteration, "starting plan");

        match self.plan(iteration).await {
            Ok(outcome) => {
                self.phase = PlanPhase::Idle;
                info!(
                    iteration,
                    services = outcome.chosen.len(),
                    invalidated = outcome.invalidated.len(),
                    "ending plan, execute notified"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.phase = PlanPhase::Failed;
                error!(iteration, error = %e, "plan failed");
                if let Err(k) = self.knowledge.set_failed_module(Module::Plan) {
                    error!(error = %k, "could not record the failed module");
                }
                Err(e)
            }
        }
    }

    async fn plan(&mut self, iteration: u64) -> PlanResult<PlanOutcome> {
        self.knowledge.notify_module_start(Module::Plan)?;
        self.phase = PlanPhase::Evaluating;

        let snapshot = self.knowledge.services()?;
        let proposed = self.knowledge.proposed_adaptation_options()?;
        let mut outcome = PlanOutcome {
            iteration,
            authorized: self.adaptation_authorized,
            ..PlanOutcome::default()
        };

        if self.adaptation_authorized {
            check_services(&snapshot, &proposed)?;
            let chosen = self.decide(&snapshot, &proposed, &mut outcome.skipped).await?;

            self.phase = PlanPhase::Committing;
            let touched: BTreeSet<&str> = snapshot
                .iter()
                .filter(|(id, service)| chosen.contains_key(*id) || service.is_in_transition_state())
                .map(|(id, _)| id.as_str())
                .collect();
            outcome.invalidated = invalidate_cascade(self.knowledge.as_ref(), &snapshot, touched)?;

            let base_revisions = chosen
                .keys()
                .filter_map(|id| snapshot.get(id).map(|s| (id.clone(), s.revision())))
                .collect();
            let commit = ChosenOptions {
                options: chosen,
                base_revisions,
            };
            self.knowledge.choose_adaptation_options(&commit)?;
            outcome.chosen = commit.options;
        } else {
            info!(iteration, "adaptation not authorized, choosing nothing");
        }

        self.execute.start().map_err(PlanError::Execute)?;
        Ok(outcome)
    }

    /// Decide the options to commit. Forced services are resolved against
    /// a working copy of the snapshot that their shutdowns mutate.
    async fn decide(
        &self,
        snapshot: &BTreeMap<ServiceId, Service>,
        proposed: &OptionsByService,
        skipped: &mut Vec<ServiceId>,
    ) -> PlanResult<OptionsByService> {
        let mut working = snapshot.clone();
        let mut chosen = OptionsByService::new();
        let mut candidates = OptionsByService::new();

        for (service_id, options) in proposed {
            let service = working
                .get_mut(service_id)
                .ok_or_else(|| PlanError::UnknownService(service_id.clone()))?;
            let (forced, proposals): (Vec<&AdaptationOption>, Vec<&AdaptationOption>) =
                options.iter().partition(|o| o.forced);

            if forced.is_empty() {
                debug!(service = %service_id, options = proposals.len(), "analysing proposed options");
                let resolved = self.resolve_proposals(service, &proposals, skipped)?;
                if !resolved.is_empty() {
                    candidates.insert(service_id.clone(), resolved);
                }
            } else {
                debug!(
                    service = %service_id,
                    forced = forced.len(),
                    ignored = proposals.len(),
                    "applying forced options"
                );
                let applied = apply_forced(service, &forced)?;
                if !applied.is_empty() {
                    chosen.insert(service_id.clone(), applied);
                }
            }
        }

        if !candidates.is_empty() {
            let selection = select_best_option(
                self.evaluator.clone(),
                &working,
                &candidates,
                self.evaluation_timeout,
            )
            .await;
            if let Some(best) = selection.best {
                chosen.entry(best.service_id).or_default().push(best.option);
            }
        }
        Ok(chosen)
    }

    fn resolve_proposals(
        &self,
        service: &Service,
        proposals: &[&AdaptationOption],
        skipped: &mut Vec<ServiceId>,
    ) -> PlanResult<Vec<AdaptationOption>> {
        let mut resolved = Vec::with_capacity(proposals.len());
        for option in proposals {
            debug!(service = %service.service_id, option = %option.description(), "proposed option");
            let parameters = match &option.kind {
                OptionKind::ChangeLoadBalancerWeights { .. } => {
                    let r = resolve_weight_change(&self.optimizer, service, option)?;
                    if r.is_none() && !skipped.contains(&service.service_id) {
                        skipped.push(service.service_id.clone());
                    }
                    r
                }
                OptionKind::AddInstance { .. } => Some(resolve_add_instance(service, option)?),
                OptionKind::ShutdownInstance { .. } => Some(resolve_shutdown(service, option)?),
                OptionKind::ChangeImplementation { .. } => resolve_change_implementation(service, option),
            };
            resolved.extend(parameters);
        }
        Ok(resolved)
    }
}

/// Every proposed option must name a service of the snapshot.
fn check_services(
    snapshot: &BTreeMap<ServiceId, Service>,
    proposed: &OptionsByService,
) -> PlanResult<()> {
    let unknown = proposed
        .iter()
        .flat_map(|(id, options)| std::iter::once(id).chain(options.iter().map(|o| &o.service_id)))
        .find(|id| !snapshot.contains_key(*id));
    match unknown {
        Some(id) => Err(PlanError::UnknownService(id.clone())),
        None => Ok(()),
    }
}

/// Apply forced shutdowns to `service`, then resolve the forced
/// add-instance, if any, against what remains.
fn apply_forced(
    service: &mut Service,
    forced: &[&AdaptationOption],
) -> PlanResult<Vec<AdaptationOption>> {
    let adds: Vec<&AdaptationOption> = forced
        .iter()
        .copied()
        .filter(|o| matches!(o.kind, OptionKind::AddInstance { .. }))
        .collect();
    if adds.len() > 1 {
        error!(service = %service.service_id, count = adds.len(), "more than one forced add-instance option");
        return Err(PlanError::MultipleForcedAddInstance {
            service_id: service.service_id.clone(),
        });
    }

    let mut applied = Vec::new();
    for option in forced {
        match &option.kind {
            OptionKind::ShutdownInstance { .. } => {
                let resolved = resolve_shutdown(service, option)?;
                if let OptionKind::ShutdownInstance {
                    instance_to_shutdown,
                    new_weights: Some(weights),
                } = &resolved.kind
                {
                    if service.load_balancer_kind().requires_weights() {
                        service.set_load_balancer_weights(weights.clone())?;
                    }
                    service.remove_instance(instance_to_shutdown)?;
                    debug!(service = %service.service_id, instance = %instance_to_shutdown, "forced shutdown applied");
                }
                applied.push(resolved);
            }
            OptionKind::AddInstance { .. } => {}
            _ => warn!(
                service = %service.service_id,
                option = option.kind.name(),
                "forced option kind is not supported, ignoring it"
            ),
        }
    }

    if let Some(add) = adds.first() {
        applied.push(resolve_add_instance(service, add)?);
    }
    Ok(applied)
}
