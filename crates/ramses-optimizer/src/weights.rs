//! Load balancer weight computation.
//!
//! [`WeightOptimizer`] solves the per-service weight problem:
//!
//! ```text
//! k_i = availability_i / avg_response_time_i      (instance indicator)
//! k_s = availability_s / avg_response_time_s      (service indicator)
//! z_i = k_i / k_s
//!
//! minimise   Σ w_i / z_i − Σ a_i · z_i             (terms with k_i = 0 omitted)
//! subject to Σ w_i = 1
//!            w_i ≥ a_i · threshold
//!            w_i ≤ a_i
//!            a_i = 0                                 if k_i = 0
//!            w_i ≤ (k_i / k_j) · w_j + (1 − a_j)     for i ≠ j, k_i ≥ k_j > 0
//!            w_i ≤ z_i · (ΣP − Σ_{j≠i} P_j · a_j)    if k_i > 0
//!            w_i ∈ [0, 1], a_i ∈ {0, 1}
//! ```
//!
//! The remaining functions are the solver-free weight-mass operations used
//! when instances are added or removed.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use ramses_knowledge::{InstanceId, QosKind, Service};
use tracing::{debug, error};

use crate::error::{OptimizerError, OptimizerResult};
use crate::lp::{LinearProgram, VariableId};
use crate::solver::{MipSolver, ZERO_TOLERANCE};

/// New weights for the surviving instances plus the instances whose
/// optimal weight was zero.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightChange {
    pub weights: BTreeMap<InstanceId, f64>,
    pub instances_to_shutdown: Vec<InstanceId>,
}

struct InstanceTerm {
    instance_id: InstanceId,
    previous: f64,
    availability: f64,
    response_time: f64,
    k: f64,
    z: f64,
    weight: VariableId,
    activation: VariableId,
}

/// Computes load balancer weights for one service with a [`MipSolver`].
#[derive(Clone)]
pub struct WeightOptimizer {
    solver: Arc<dyn MipSolver>,
}

impl WeightOptimizer {
    pub fn new(solver: Arc<dyn MipSolver>) -> Self {
        Self { solver }
    }

    /// Optimize the weights of `service`'s current instances.
    ///
    /// Returns `Ok(None)` when the solver reports no usable solution; the
    /// caller should skip the weight change for this service.
    pub fn optimize(&self, service: &Service) -> OptimizerResult<Option<WeightChange>> {
        let instance_count = service.instance_count();
        if instance_count == 0 {
            return Err(OptimizerError::NoInstances(service.service_id.clone()));
        }

        let previous = current_weights(service)?;
        let threshold =
            service.current_implementation().instance_load_shutdown_threshold / instance_count as f64;

        let service_availability = metric(
            &service.service_id,
            service.current_value(QosKind::Availability),
            QosKind::Availability,
        )?;
        let service_response_time = metric(
            &service.service_id,
            service.current_value(QosKind::AverageResponseTime),
            QosKind::AverageResponseTime,
        )?;
        let k_s = service_availability / service_response_time;
        if k_s <= 0.0 || !k_s.is_finite() {
            return Err(OptimizerError::InvalidMetric {
                subject: service.service_id.clone(),
                kind: QosKind::Availability,
                value: service_availability,
            });
        }

        let mut lp = LinearProgram::new();
        let sum = lp.add_constraint("sum_of_weights", 1.0, 1.0);
        let mut terms = Vec::with_capacity(instance_count);

        for instance in service.instances() {
            let id = &instance.instance_id;
            let availability =
                metric(id, instance.current_value(QosKind::Availability), QosKind::Availability)?;
            let response_time = metric(
                id,
                instance.current_value(QosKind::AverageResponseTime),
                QosKind::AverageResponseTime,
            )?;
            let k = availability / response_time;
            let z = k / k_s;

            let weight = lp.add_continuous(format!("{id}_weight"), 0.0, 1.0);
            let activation = lp.add_binary(format!("{id}_activation"));
            lp.set_coefficient(sum, weight, 1.0);

            let lower = lp.add_constraint(format!("{id}_activation_lower"), 0.0, f64::INFINITY);
            lp.set_coefficient(lower, weight, 1.0);
            lp.set_coefficient(lower, activation, -threshold);

            let upper = lp.add_constraint(format!("{id}_activation_upper"), f64::NEG_INFINITY, 0.0);
            lp.set_coefficient(upper, weight, 1.0);
            lp.set_coefficient(upper, activation, -1.0);

            if k == 0.0 {
                let off = lp.add_constraint(format!("{id}_force_inactive"), 0.0, 0.0);
                lp.set_coefficient(off, activation, 1.0);
            } else {
                lp.set_objective_coefficient(weight, 1.0 / z);
                lp.set_objective_coefficient(activation, -z);
            }

            terms.push(InstanceTerm {
                instance_id: id.clone(),
                previous: previous[id],
                availability,
                response_time,
                k,
                z,
                weight,
                activation,
            });
        }

        let previous_total: f64 = terms.iter().map(|t| t.previous).sum();
        for i in &terms {
            if i.k == 0.0 {
                continue;
            }
            let growth = lp.add_constraint(
                format!("{}_growth", i.instance_id),
                f64::NEG_INFINITY,
                i.z * previous_total,
            );
            lp.set_coefficient(growth, i.weight, 1.0);

            for j in &terms {
                if j.instance_id == i.instance_id {
                    continue;
                }
                lp.set_coefficient(growth, j.activation, i.z * j.previous);

                if j.k > 0.0 && i.k >= j.k {
                    let fairness = lp.add_constraint(
                        format!("{}_{}_fairness", i.instance_id, j.instance_id),
                        f64::NEG_INFINITY,
                        1.0,
                    );
                    lp.set_coefficient(fairness, i.weight, 1.0);
                    lp.set_coefficient(fairness, j.weight, -(i.k / j.k));
                    lp.set_coefficient(fairness, j.activation, 1.0);
                }
            }
        }

        let solution = self.solver.solve(&lp);

        let mut report = format!(
            "weight problem for service {} solved with status {}\nshutdown threshold: {threshold:.3}\nservice: avail={service_availability:.3} ART={service_response_time:.2}ms k_s={k_s:.3e}\n",
            service.service_id, solution.status
        );
        for t in &terms {
            let _ = writeln!(
                report,
                "{} {{ P_i={:.2}, k_i={:.3e}, z_i={:.3e}, ART_i={:.2}ms, avail_i={:.3} }}",
                t.instance_id, t.previous, t.k, t.z, t.response_time, t.availability
            );
        }

        if !solution.status.is_solved() || solution.values.is_empty() {
            error!(
                service = %service.service_id,
                status = %solution.status,
                "weight problem has no usable solution"
            );
            debug!("{report}");
            debug!("{}", lp.to_lp_format());
            return Ok(None);
        }

        let mut weights = BTreeMap::new();
        let mut instances_to_shutdown = Vec::new();
        for t in &terms {
            let w = solution.value(t.weight).unwrap_or(0.0);
            let _ = writeln!(report, "{} {{ W_i={w:.3} }}", t.instance_id);
            // Same tolerance the solver snaps near-zero values with.
            if w.abs() < ZERO_TOLERANCE {
                instances_to_shutdown.push(t.instance_id.clone());
            } else {
                weights.insert(t.instance_id.clone(), w);
            }
        }
        debug!("{report}");

        Ok(Some(WeightChange {
            weights,
            instances_to_shutdown,
        }))
    }
}

fn metric(subject: &str, value: Option<f64>, kind: QosKind) -> OptimizerResult<f64> {
    let value = value.ok_or_else(|| OptimizerError::MissingMetric {
        subject: subject.to_string(),
        kind,
    })?;
    let valid = match kind {
        QosKind::AverageResponseTime => value.is_finite() && value > 0.0,
        _ => value.is_finite() && value >= 0.0,
    };
    if !valid {
        return Err(OptimizerError::InvalidMetric {
            subject: subject.to_string(),
            kind,
            value,
        });
    }
    Ok(value)
}

/// The service's weights, seeded uniformly when none are configured.
/// Configured weights must cover exactly the current instances.
pub fn current_weights(service: &Service) -> OptimizerResult<BTreeMap<InstanceId, f64>> {
    let configured = service.load_balancer_weights();
    let ids: Vec<InstanceId> = service.instances().map(|i| i.instance_id.clone()).collect();
    if configured.is_empty() {
        return Ok(uniform_weights(&ids));
    }
    if configured.len() != ids.len() || ids.iter().any(|id| !configured.contains_key(id)) {
        return Err(OptimizerError::WeightsMismatch {
            service_id: service.service_id.clone(),
            weights: configured.len(),
            instances: ids.len(),
        });
    }
    Ok(configured.clone())
}

// ── Weight-mass operations ────────────────────────────────────────

/// Equal weights `1/N` for every id.
pub fn uniform_weights(ids: &[InstanceId]) -> BTreeMap<InstanceId, f64> {
    let weight = 1.0 / ids.len() as f64;
    ids.iter().map(|id| (id.clone(), weight)).collect()
}

/// Drop `remove` from `weights` and spread their total evenly over the
/// survivors.
pub fn redistribute_weight(
    weights: &BTreeMap<InstanceId, f64>,
    remove: &[InstanceId],
) -> BTreeMap<InstanceId, f64> {
    let freed: f64 = weights
        .iter()
        .filter(|(id, _)| remove.contains(id))
        .map(|(_, w)| w)
        .sum();
    let survivors = weights.keys().filter(|id| !remove.contains(id)).count();
    if survivors == 0 {
        return BTreeMap::new();
    }
    let share = freed / survivors as f64;
    weights
        .iter()
        .filter(|(id, _)| !remove.contains(id))
        .map(|(id, w)| (id.clone(), w + share))
        .collect()
}

/// Scale every weight by `N / (N + added)` to free mass for new instances.
pub fn reduce_weights_for_new_instances(
    weights: &BTreeMap<InstanceId, f64>,
    added: usize,
) -> BTreeMap<InstanceId, f64> {
    let n = weights.len() as f64;
    let factor = n / (n + added as f64);
    weights.iter().map(|(id, w)| (id.clone(), w * factor)).collect()
}

/// Seed weight of one instance joining `existing` instances.
pub fn new_instance_seed(existing: usize) -> f64 {
    1.0 / (existing as f64 + 1.0)
}

/// Repeatedly remove instances below `threshold`, redistributing their
/// weight. After each round the threshold grows by `N / (N − removed)`.
/// Returns the surviving weights and the final threshold. When every
/// instance is below the threshold the weights are returned unchanged.
pub fn remove_instances_under_threshold(
    weights: &BTreeMap<InstanceId, f64>,
    threshold: f64,
) -> (BTreeMap<InstanceId, f64>, f64) {
    let mut weights = weights.clone();
    let mut threshold = threshold;
    loop {
        let below: Vec<InstanceId> = weights
            .iter()
            .filter(|(_, w)| **w < threshold)
            .map(|(id, _)| id.clone())
            .collect();
        if below.is_empty() || below.len() == weights.len() {
            return (weights, threshold);
        }
        threshold *= weights.len() as f64 / (weights.len() - below.len()) as f64;
        weights = redistribute_weight(&weights, &below);
    }
}

/// Weights after adding one instance to a service.
#[derive(Debug, Clone, PartialEq)]
pub struct AddInstanceWeights {
    pub new_instance_weight: f64,
    pub old_instances_new_weights: BTreeMap<InstanceId, f64>,
    pub instances_to_shutdown: Vec<InstanceId>,
    /// Dynamic threshold reached when the fixpoint stopped.
    pub final_threshold: f64,
}

/// Make room for one new instance: scale existing weights down, seed the
/// newcomer at `1/(N+1)`, then shed existing instances that fell below
/// the (growing) threshold until none remain below it.
///
/// The newcomer takes part in the threshold check but is never shed: the
/// threshold is capped at its weight, so no instance, the new one
/// included, ends below `final_threshold`.
pub fn add_instance_weights(
    weights: &BTreeMap<InstanceId, f64>,
    threshold: f64,
) -> AddInstanceWeights {
    let mut old = reduce_weights_for_new_instances(weights, 1);
    let mut new_weight = new_instance_seed(weights.len());
    let mut threshold = cap_at_newcomer(threshold, new_weight);

    loop {
        let below: Vec<InstanceId> = old
            .iter()
            .filter(|(_, w)| **w < threshold)
            .map(|(id, _)| id.clone())
            .collect();
        if below.is_empty() {
            break;
        }
        let size = old.len() + 1;
        let survivors = size - below.len();
        let freed: f64 = below.iter().filter_map(|id| old.get(id)).sum();
        let share = freed / survivors as f64;
        old = old
            .into_iter()
            .filter(|(id, _)| !below.contains(id))
            .map(|(id, w)| (id, w + share))
            .collect();
        new_weight += share;
        threshold = cap_at_newcomer(threshold * size as f64 / survivors as f64, new_weight);
    }

    let instances_to_shutdown = weights
        .keys()
        .filter(|id| !old.contains_key(*id))
        .cloned()
        .collect();

    AddInstanceWeights {
        new_instance_weight: new_weight,
        old_instances_new_weights: old,
        instances_to_shutdown,
        final_threshold: threshold,
    }
}

fn cap_at_newcomer(threshold: f64, new_weight: f64) -> f64 {
    if threshold > new_weight {
        debug!(threshold, new_weight, "shutdown threshold capped at the new instance weight");
        new_weight
    } else {
        threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BranchAndBound, Solution, SolveStatus};
    use ramses_knowledge::{Instance, InstanceStatus, LoadBalancerKind, ServiceImplementation};

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<InstanceId, f64> {
        pairs.iter().map(|(id, w)| (id.to_string(), *w)).collect()
    }

    fn total(weights: &BTreeMap<InstanceId, f64>) -> f64 {
        weights.values().sum()
    }

    /// Service with one instance per `(id, availability, response time)`.
    fn service(
        instances: &[(&str, f64, f64)],
        service_metrics: (f64, f64),
        threshold: f64,
        lb_weights: Option<BTreeMap<InstanceId, f64>>,
    ) -> Service {
        let mut implementation = ServiceImplementation::new("impl", 1.0).with_shutdown_threshold(threshold);
        for (id, availability, response_time) in instances {
            let mut instance = Instance::new(*id, InstanceStatus::Active);
            instance.qos.set_current_value(QosKind::Availability, *availability, 0);
            instance.qos.set_current_value(QosKind::AverageResponseTime, *response_time, 0);
            implementation = implementation.with_instance(instance);
        }
        let mut service = Service::new("svc", "impl", vec![implementation], vec![])
            .unwrap()
            .with_load_balancer(LoadBalancerKind::WeightedRandom);
        service.qos.set_current_value(QosKind::Availability, service_metrics.0, 0);
        service.qos.set_current_value(QosKind::AverageResponseTime, service_metrics.1, 0);
        if let Some(w) = lb_weights {
            service.set_load_balancer_weights(w).unwrap();
        }
        service
    }

    fn optimizer() -> WeightOptimizer {
        WeightOptimizer::new(Arc::new(BranchAndBound::default()))
    }

    #[test]
    fn better_instance_gains_weight() {
        let svc = service(
            &[("A", 0.99, 100.0), ("B", 0.50, 400.0)],
            (0.745, 250.0),
            0.2,
            Some(weights(&[("A", 0.5), ("B", 0.5)])),
        );
        let change = optimizer().optimize(&svc).unwrap().unwrap();

        let sum: f64 = change.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(change.weights["A"] > 0.5);
        match change.weights.get("B") {
            // B stays active with reduced weight, still above threshold.
            Some(b) => assert!(*b < 0.5 && *b >= 0.1 - 1e-9),
            None => assert_eq!(change.instances_to_shutdown, vec!["B".to_string()]),
        }
        // Fairness binds: w_A ≤ (k_A/k_B)·w_B.
        assert!((change.weights["A"] - 0.888).abs() < 1e-3);
    }

    #[test]
    fn zero_throughput_instance_is_shut_down() {
        let svc = service(
            &[("A", 0.99, 100.0), ("B", 0.9, 120.0), ("C", 0.0, 300.0)],
            (0.63, 170.0),
            0.1,
            None,
        );
        let change = optimizer().optimize(&svc).unwrap().unwrap();
        assert!(!change.weights.contains_key("C"));
        assert_eq!(change.instances_to_shutdown, vec!["C".to_string()]);
        assert!((total(&change.weights) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_metric_is_reported() {
        let mut svc = service(&[("A", 0.99, 100.0)], (0.99, 100.0), 0.1, None);
        svc.qos = ramses_knowledge::QosHistory::new();
        let err = optimizer().optimize(&svc).unwrap_err();
        assert!(matches!(err, OptimizerError::MissingMetric { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn weights_not_matching_instances_is_fatal() {
        let mut svc = service(
            &[("A", 0.99, 100.0), ("B", 0.9, 100.0)],
            (0.95, 100.0),
            0.1,
            Some(weights(&[("A", 0.5), ("B", 0.5)])),
        );
        svc.add_instance(Instance::new("C", InstanceStatus::Active));
        let err = optimizer().optimize(&svc).unwrap_err();
        assert!(matches!(err, OptimizerError::WeightsMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn unsolved_problem_yields_no_result() {
        struct Refuse;
        impl MipSolver for Refuse {
            fn solve(&self, _lp: &LinearProgram) -> Solution {
                Solution {
                    status: SolveStatus::Infeasible,
                    objective: f64::NAN,
                    values: Vec::new(),
                }
            }
        }

        let svc = service(&[("A", 0.99, 100.0)], (0.99, 100.0), 0.1, None);
        let result = WeightOptimizer::new(Arc::new(Refuse)).optimize(&svc).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn near_zero_weight_counts_as_shutdown() {
        // Unsnapped solver output: B keeps a residue far below any real weight.
        struct Residue;
        impl MipSolver for Residue {
            fn solve(&self, lp: &LinearProgram) -> Solution {
                let values = lp
                    .variables()
                    .iter()
                    .map(|v| match v.name.as_str() {
                        "A_weight" => 1.0 - 1e-12,
                        "B_weight" => 1e-12,
                        "A_activation" => 1.0,
                        _ => 0.0,
                    })
                    .collect();
                Solution {
                    status: SolveStatus::Optimal,
                    objective: 0.0,
                    values,
                }
            }
        }

        let svc = service(&[("A", 0.99, 100.0), ("B", 0.9, 120.0)], (0.95, 110.0), 0.1, None);
        let change = WeightOptimizer::new(Arc::new(Residue)).optimize(&svc).unwrap().unwrap();
        assert_eq!(change.instances_to_shutdown, vec!["B".to_string()]);
        assert_eq!(change.weights.len(), 1);
        assert!(change.weights.contains_key("A"));
    }

    #[test]
    fn redistribution_conserves_mass() {
        let before = weights(&[("a", 0.2), ("b", 0.3), ("c", 0.5)]);
        let after = redistribute_weight(&before, &["a".to_string()]);
        assert_eq!(after.len(), 2);
        assert!((after["b"] - 0.4).abs() < 1e-12);
        assert!((after["c"] - 0.6).abs() < 1e-12);
        assert!((total(&after) - total(&before)).abs() < 1e-12);
    }

    #[test]
    fn reduction_frees_mass_for_newcomers() {
        let before = weights(&[("a", 0.25), ("b", 0.75)]);
        let after = reduce_weights_for_new_instances(&before, 2);
        assert!((after["a"] - 0.125).abs() < 1e-12);
        // Half of the mass is left for the two newcomers.
        assert!((total(&after) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn adding_to_single_instance_splits_evenly() {
        assert_eq!(new_instance_seed(1), 0.5);
        let result = add_instance_weights(&weights(&[("i1", 1.0)]), 0.4 / 2.0);
        assert_eq!(result.new_instance_weight, 0.5);
        assert_eq!(result.old_instances_new_weights, weights(&[("i1", 0.5)]));
        assert!(result.instances_to_shutdown.is_empty());
    }

    #[test]
    fn add_instance_fixpoint_sheds_weak_instances() {
        let before = weights(&[("a", 0.7), ("b", 0.2), ("c", 0.1)]);
        let result = add_instance_weights(&before, 0.6 / 4.0);

        assert!(result.instances_to_shutdown.contains(&"c".to_string()));
        let sum = result.new_instance_weight + total(&result.old_instances_new_weights);
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(result.new_instance_weight >= result.final_threshold);
        for w in result.old_instances_new_weights.values() {
            assert!(*w >= result.final_threshold);
        }
    }

    #[test]
    fn add_instance_threshold_never_outgrows_the_newcomer() {
        // Shedding b would push the threshold to 0.45, above the newcomer.
        let before = weights(&[("a", 0.9), ("b", 0.1)]);
        let result = add_instance_weights(&before, 0.9 / 3.0);

        assert_eq!(result.instances_to_shutdown, vec!["b".to_string()]);
        assert!((result.new_instance_weight - 1.1 / 3.0).abs() < 1e-9);
        assert!((result.old_instances_new_weights["a"] - (0.6 + 0.1 / 3.0)).abs() < 1e-9);
        assert!((result.final_threshold - result.new_instance_weight).abs() < 1e-12);
        assert!(result.new_instance_weight >= result.final_threshold);
        assert!(result.old_instances_new_weights.values().all(|w| *w >= result.final_threshold));
        let sum = result.new_instance_weight + total(&result.old_instances_new_weights);
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn threshold_fixpoint_terminates_when_everything_is_below() {
        let before = weights(&[("a", 0.5), ("b", 0.5)]);
        let (after, _) = remove_instances_under_threshold(&before, 0.9);
        assert_eq!(after, before);

        let skewed = weights(&[("a", 0.05), ("b", 0.15), ("c", 0.8)]);
        let (after, threshold) = remove_instances_under_threshold(&skewed, 0.1);
        assert!((total(&after) - 1.0).abs() < 1e-12);
        assert!(after.values().all(|w| *w >= threshold));
    }
}
