//! Parameter computation for proposed adaptation options.
//!
//! Each resolver fills in the computed fields of one option kind from a
//! service snapshot. Weight maps are only maintained for services behind
//! a weighted load balancer; other services get empty maps.

use ramses_knowledge::{
    AdaptationOption, Direction, ImplementationId, OptionKind, QosKind, Service,
};
use ramses_optimizer::{
    add_instance_weights, current_weights, new_instance_seed, redistribute_weight, WeightOptimizer,
};
use tracing::{debug, warn};

use crate::error::PlanResult;

/// Resolve a shutdown: the target's weight is spread over the survivors.
pub fn resolve_shutdown(service: &Service, option: &AdaptationOption) -> PlanResult<AdaptationOption> {
    let mut resolved = option.clone();
    if let OptionKind::ShutdownInstance {
        instance_to_shutdown,
        new_weights,
    } = &mut resolved.kind
    {
        let weights = if service.load_balancer_kind().requires_weights() {
            redistribute_weight(&current_weights(service)?, std::slice::from_ref(instance_to_shutdown))
        } else {
            Default::default()
        };
        *new_weights = Some(weights);
    }
    Ok(resolved)
}

/// Resolve an add-instance: existing weights are scaled down to make room
/// for the new instance, then instances pushed below the shutdown
/// threshold are shed.
pub fn resolve_add_instance(
    service: &Service,
    option: &AdaptationOption,
) -> PlanResult<AdaptationOption> {
    let mut resolved = option.clone();
    if let OptionKind::AddInstance {
        new_instance_weight,
        old_instances_new_weights,
        instances_to_shutdown,
    } = &mut resolved.kind
    {
        if !service.load_balancer_kind().requires_weights() {
            *new_instance_weight = Some(new_instance_seed(service.instance_count()));
            *old_instances_new_weights = Some(Default::default());
            return Ok(resolved);
        }

        let threshold = service.current_implementation().instance_load_shutdown_threshold
            / (service.instance_count() + 1) as f64;
        let result = add_instance_weights(&current_weights(service)?, threshold);
        if !result.instances_to_shutdown.is_empty() {
            warn!(
                service = %service.service_id,
                new_instance_weight = result.new_instance_weight,
                old_instances_new_weights = ?result.old_instances_new_weights,
                instances_to_shutdown = ?result.instances_to_shutdown,
                "adding an instance also shuts instances down"
            );
        }
        *new_instance_weight = Some(result.new_instance_weight);
        *old_instances_new_weights = Some(result.old_instances_new_weights);
        *instances_to_shutdown = result.instances_to_shutdown;
    }
    Ok(resolved)
}

/// Resolve a weight change with the optimizer. `Ok(None)` means the
/// problem had no usable solution or the service lacks the metrics for
/// it; only invariant violations are errors.
pub fn resolve_weight_change(
    optimizer: &WeightOptimizer,
    service: &Service,
    option: &AdaptationOption,
) -> PlanResult<Option<AdaptationOption>> {
    let change = match optimizer.optimize(service) {
        Ok(Some(change)) => change,
        Ok(None) => return Ok(None),
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            warn!(service = %service.service_id, error = %e, "weight optimization skipped");
            return Ok(None);
        }
    };

    let mut resolved = option.clone();
    if let OptionKind::ChangeLoadBalancerWeights {
        new_weights,
        instances_to_shutdown,
    } = &mut resolved.kind
    {
        *new_weights = Some(change.weights);
        *instances_to_shutdown = change.instances_to_shutdown;
    }
    Ok(Some(resolved))
}

/// Resolve a change of implementation to the candidate that best serves
/// the option's goal. `None` when no candidate can be scored.
pub fn resolve_change_implementation(
    service: &Service,
    option: &AdaptationOption,
) -> Option<AdaptationOption> {
    let OptionKind::ChangeImplementation {
        possible_implementations,
        ..
    } = &option.kind
    else {
        return None;
    };
    let Some(goal) = option.goal else {
        warn!(service = %service.service_id, "change of implementation without a goal");
        return None;
    };

    let best = best_implementation(service, possible_implementations, goal)?;
    debug!(service = %service.service_id, %goal, implementation = %best, "implementation resolved");

    let mut resolved = option.clone();
    if let OptionKind::ChangeImplementation {
        new_implementation_id,
        ..
    } = &mut resolved.kind
    {
        *new_implementation_id = Some(best);
    }
    Some(resolved)
}

/// Benefit of an implementation for `goal`, oriented so that lower is
/// always better.
fn implementation_cost(service: &Service, implementation_id: &str, goal: QosKind) -> Option<f64> {
    let implementation = service.implementation(implementation_id)?;
    if goal == QosKind::Vulnerability {
        return Some(implementation.vulnerability_score);
    }
    let benchmark = implementation.benchmark(goal)?;
    Some(match goal.direction() {
        Direction::HigherIsBetter => -(benchmark * implementation.preference),
        Direction::LowerIsBetter => benchmark / implementation.preference,
    })
}

/// The first candidate with the lowest cost wins; later candidates must
/// be strictly better to replace it.
fn best_implementation(
    service: &Service,
    candidates: &[ImplementationId],
    goal: QosKind,
) -> Option<ImplementationId> {
    let mut best: Option<(&ImplementationId, f64)> = None;
    for candidate in candidates {
        let Some(cost) = implementation_cost(service, candidate, goal).filter(|c| c.is_finite())
        else {
            warn!(service = %service.service_id, implementation = %candidate, %goal, "implementation cannot be scored");
            continue;
        };
        if best.is_none_or(|(_, b)| cost < b) {
            best = Some((candidate, cost));
        }
    }
    best.map(|(id, _)| id.clone())
}
