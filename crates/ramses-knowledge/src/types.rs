//! Architecture types: services, implementations and instances.
//!
//! A [`Service`] always has exactly one active implementation. The
//! implementation owns the running [`Instance`]s and the per-QoS benchmark
//! figures used when comparing implementations. Every configuration
//! mutation bumps the service revision so that stale read-modify-write
//! cycles can be detected when options are committed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::qos::{QosHistory, QosKind, QosSpecification};

/// Unique identifier for a managed service.
pub type ServiceId = String;

/// Unique identifier for a service implementation.
pub type ImplementationId = String;

/// Unique identifier for an instance of an implementation.
pub type InstanceId = String;

/// Allowed deviation of the implementation score sum from 1.0.
pub const SCORE_SUM_TOLERANCE: f64 = 1e-9;

/// Allowed deviation of a load balancer weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// ── Instance ──────────────────────────────────────────────────────

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Booting,
    Failed,
    Unreachable,
    Shutdown,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Booting => "BOOTING",
            InstanceStatus::Failed => "FAILED",
            InstanceStatus::Unreachable => "UNREACHABLE",
            InstanceStatus::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

/// A running (or starting, or failing) copy of an implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    status: InstanceStatus,
    pub qos: QosHistory,
}

impl Instance {
    pub fn new(instance_id: impl Into<InstanceId>, status: InstanceStatus) -> Self {
        Self {
            instance_id: instance_id.into(),
            status,
            qos: QosHistory::new(),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// Move to a new status. `Shutdown` is terminal and nothing goes
    /// back to `Booting`.
    pub fn set_status(&mut self, to: InstanceStatus) -> KnowledgeResult<()> {
        let allowed = match (self.status, to) {
            (from, to) if from == to => true,
            (InstanceStatus::Shutdown, _) => false,
            (_, InstanceStatus::Booting) => false,
            _ => true,
        };
        if !allowed {
            return Err(KnowledgeError::InvalidTransition {
                instance_id: self.instance_id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn current_value(&self, kind: QosKind) -> Option<f64> {
        self.qos.current_value(kind)
    }
}

// ── Implementation ────────────────────────────────────────────────

/// One possible implementation of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceImplementation {
    pub implementation_id: ImplementationId,
    /// A priori selection probability. Scores of one service sum to 1.0.
    pub score: f64,
    pub trust: u32,
    /// Fraction of the fair-share weight below which an instance becomes
    /// a shutdown candidate.
    pub instance_load_shutdown_threshold: f64,
    pub benchmarks: BTreeMap<QosKind, f64>,
    pub vulnerability_score: f64,
    /// Scaling factor used when comparing implementations.
    pub preference: f64,
    pub instances: BTreeMap<InstanceId, Instance>,
}

impl ServiceImplementation {
    pub fn new(implementation_id: impl Into<ImplementationId>, score: f64) -> Self {
        Self {
            implementation_id: implementation_id.into(),
            score,
            trust: 1,
            instance_load_shutdown_threshold: 0.0,
            benchmarks: BTreeMap::new(),
            vulnerability_score: 0.0,
            preference: 1.0,
            instances: BTreeMap::new(),
        }
    }

    pub fn with_benchmark(mut self, kind: QosKind, value: f64) -> Self {
        self.benchmarks.insert(kind, value);
        self
    }

    pub fn with_preference(mut self, preference: f64) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_trust(mut self, trust: u32) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_shutdown_threshold(mut self, threshold: f64) -> Self {
        self.instance_load_shutdown_threshold = threshold;
        self
    }

    pub fn with_vulnerability_score(mut self, score: f64) -> Self {
        self.vulnerability_score = score;
        self
    }

    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.instances.insert(instance.instance_id.clone(), instance);
        self
    }

    /// Benchmark figure for `kind`. Vulnerability is answered from the
    /// implementation's vulnerability score.
    pub fn benchmark(&self, kind: QosKind) -> Option<f64> {
        match kind {
            QosKind::Vulnerability => Some(self.vulnerability_score),
            _ => self.benchmarks.get(&kind).copied(),
        }
    }
}

// ── Load balancer ─────────────────────────────────────────────────

/// Load balancing policy configured in front of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerKind {
    #[default]
    None,
    WeightedRandom,
}

impl LoadBalancerKind {
    pub fn requires_weights(self) -> bool {
        matches!(self, LoadBalancerKind::WeightedRandom)
    }
}

/// Load balancer policy plus the per-instance weights it uses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub kind: LoadBalancerKind,
    pub weights: BTreeMap<InstanceId, f64>,
}

// ── Service ───────────────────────────────────────────────────────

/// A managed service and its adaptation-relevant configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub service_id: ServiceId,
    current_implementation_id: ImplementationId,
    /// Services this service calls.
    pub dependencies: BTreeSet<ServiceId>,
    possible_implementations: BTreeMap<ImplementationId, ServiceImplementation>,
    pub qos_specifications: BTreeMap<QosKind, QosSpecification>,
    load_balancer: LoadBalancerConfig,
    /// Service-level QoS history.
    pub qos: QosHistory,
    revision: u64,
}

impl Service {
    /// Build a service, enforcing that implementation scores sum to 1.0
    /// and that the current implementation exists.
    pub fn new(
        service_id: impl Into<ServiceId>,
        current_implementation_id: impl Into<ImplementationId>,
        implementations: Vec<ServiceImplementation>,
        dependencies: impl IntoIterator<Item = ServiceId>,
    ) -> KnowledgeResult<Self> {
        let service_id = service_id.into();
        let current_implementation_id = current_implementation_id.into();

        let total: f64 = implementations.iter().map(|i| i.score).sum();
        if implementations.is_empty() || (total - 1.0).abs() > SCORE_SUM_TOLERANCE {
            return Err(KnowledgeError::ScoreSum { service_id, total });
        }

        let possible_implementations: BTreeMap<_, _> = implementations
            .into_iter()
            .map(|i| (i.implementation_id.clone(), i))
            .collect();

        if !possible_implementations.contains_key(&current_implementation_id) {
            return Err(KnowledgeError::UnknownImplementation {
                service_id,
                implementation_id: current_implementation_id,
            });
        }

        Ok(Self {
            service_id,
            current_implementation_id,
            dependencies: dependencies.into_iter().collect(),
            possible_implementations,
            qos_specifications: BTreeMap::new(),
            load_balancer: LoadBalancerConfig::default(),
            qos: QosHistory::new(),
            revision: 0,
        })
    }

    pub fn with_qos_specification(mut self, kind: QosKind, spec: QosSpecification) -> Self {
        self.qos_specifications.insert(kind, spec);
        self
    }

    pub fn with_load_balancer(mut self, kind: LoadBalancerKind) -> Self {
        self.load_balancer.kind = kind;
        self
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    pub fn current_implementation_id(&self) -> &str {
        &self.current_implementation_id
    }

    pub fn current_implementation(&self) -> &ServiceImplementation {
        // The constructor and `set_current_implementation` keep the id valid.
        &self.possible_implementations[&self.current_implementation_id]
    }

    fn current_implementation_mut(&mut self) -> &mut ServiceImplementation {
        let id = self.current_implementation_id.clone();
        self.possible_implementations
            .entry(id.clone())
            .or_insert_with(|| ServiceImplementation::new(id, 0.0))
    }

    pub fn possible_implementations(&self) -> &BTreeMap<ImplementationId, ServiceImplementation> {
        &self.possible_implementations
    }

    pub fn implementation(&self, implementation_id: &str) -> Option<&ServiceImplementation> {
        self.possible_implementations.get(implementation_id)
    }

    /// Switch the active implementation.
    pub fn set_current_implementation(&mut self, implementation_id: &str) -> KnowledgeResult<()> {
        if !self.possible_implementations.contains_key(implementation_id) {
            return Err(KnowledgeError::UnknownImplementation {
                service_id: self.service_id.clone(),
                implementation_id: implementation_id.to_string(),
            });
        }
        self.current_implementation_id = implementation_id.to_string();
        self.bump_revision();
        Ok(())
    }

    /// Instances of the current implementation, ordered by id.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.current_implementation().instances.values()
    }

    pub fn instance_count(&self) -> usize {
        self.current_implementation().instances.len()
    }

    pub fn instance(&self, instance_id: &str) -> Option<&Instance> {
        self.current_implementation().instances.get(instance_id)
    }

    pub fn instance_mut(&mut self, instance_id: &str) -> Option<&mut Instance> {
        self.current_implementation_mut().instances.get_mut(instance_id)
    }

    /// Register a new instance with the current implementation.
    pub fn add_instance(&mut self, instance: Instance) {
        self.current_implementation_mut()
            .instances
            .insert(instance.instance_id.clone(), instance);
        self.bump_revision();
    }

    /// Remove an instance from the current implementation and drop its
    /// load balancer weight. Weights of the survivors must already have
    /// been redistributed with [`Service::set_load_balancer_weights`].
    pub fn remove_instance(&mut self, instance_id: &str) -> KnowledgeResult<Instance> {
        let service_id = self.service_id.clone();
        let mut instance = self
            .current_implementation_mut()
            .instances
            .remove(instance_id)
            .ok_or_else(|| KnowledgeError::UnknownInstance {
                service_id,
                instance_id: instance_id.to_string(),
            })?;
        instance.status = InstanceStatus::Shutdown;
        self.load_balancer.weights.remove(instance_id);
        self.bump_revision();
        Ok(instance)
    }

    pub fn load_balancer(&self) -> &LoadBalancerConfig {
        &self.load_balancer
    }

    pub fn load_balancer_kind(&self) -> LoadBalancerKind {
        self.load_balancer.kind
    }

    pub fn load_balancer_weights(&self) -> &BTreeMap<InstanceId, f64> {
        &self.load_balancer.weights
    }

    /// Replace the load balancer weights. The map must sum to 1.0 and
    /// name only instances of the current implementation.
    pub fn set_load_balancer_weights(
        &mut self,
        weights: BTreeMap<InstanceId, f64>,
    ) -> KnowledgeResult<()> {
        if let Some(unknown) = weights.keys().find(|id| self.instance(id).is_none()) {
            return Err(KnowledgeError::InvalidWeights {
                service_id: self.service_id.clone(),
                reason: format!("unknown instance {unknown}"),
            });
        }
        if let Some((id, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(KnowledgeError::InvalidWeights {
                service_id: self.service_id.clone(),
                reason: format!("instance {id} has weight {w}"),
            });
        }
        let total: f64 = weights.values().sum();
        if !weights.is_empty() && (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(KnowledgeError::InvalidWeights {
                service_id: self.service_id.clone(),
                reason: format!("weights sum to {total}"),
            });
        }
        self.load_balancer.weights = weights;
        self.bump_revision();
        Ok(())
    }

    /// Current service-level value for `kind`. Vulnerability comes from
    /// the active implementation's score.
    pub fn current_value(&self, kind: QosKind) -> Option<f64> {
        match kind {
            QosKind::Vulnerability => Some(self.current_vulnerability_score()),
            _ => self.qos.current_value(kind),
        }
    }

    pub fn current_vulnerability_score(&self) -> f64 {
        self.current_implementation().vulnerability_score
    }

    /// True while an instance is booting or waiting to be torn down.
    pub fn is_in_transition_state(&self) -> bool {
        self.instances().any(|i| {
            matches!(
                i.status(),
                InstanceStatus::Booting | InstanceStatus::Shutdown
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_impls(a: f64, b: f64) -> Vec<ServiceImplementation> {
        vec![
            ServiceImplementation::new("impl-a", a),
            ServiceImplementation::new("impl-b", b),
        ]
    }

    #[test]
    fn scores_summing_to_one_are_accepted() {
        let service = Service::new("svc", "impl-a", two_impls(0.3, 0.7), vec![]).unwrap();
        assert_eq!(service.current_implementation_id(), "impl-a");
        assert_eq!(service.revision(), 0);
    }

    #[test]
    fn scores_not_summing_to_one_are_rejected() {
        let err = Service::new("svc", "impl-a", two_impls(0.3, 0.6), vec![]).unwrap_err();
        assert!(matches!(err, KnowledgeError::ScoreSum { ref service_id, .. } if service_id == "svc"));

        let err = Service::new("svc", "impl-a", two_impls(0.6, 0.6), vec![]).unwrap_err();
        assert!(matches!(err, KnowledgeError::ScoreSum { .. }));

        let err = Service::new("svc", "impl-a", vec![], vec![]).unwrap_err();
        assert!(matches!(err, KnowledgeError::ScoreSum { .. }));
    }

    #[test]
    fn unknown_current_implementation_is_rejected() {
        let err = Service::new("svc", "impl-z", two_impls(0.5, 0.5), vec![]).unwrap_err();
        assert!(matches!(err, KnowledgeError::UnknownImplementation { .. }));
    }

    #[test]
    fn instance_lifecycle_and_weights() {
        let mut service = Service::new("svc", "impl-a", two_impls(0.5, 0.5), vec![])
            .unwrap()
            .with_load_balancer(LoadBalancerKind::WeightedRandom);
        service.add_instance(Instance::new("i1", InstanceStatus::Active));
        service.add_instance(Instance::new("i2", InstanceStatus::Booting));
        assert!(service.is_in_transition_state());

        let weights = BTreeMap::from([("i1".to_string(), 0.5), ("i2".to_string(), 0.5)]);
        service.set_load_balancer_weights(weights).unwrap();

        service.set_load_balancer_weights(BTreeMap::from([("i1".to_string(), 1.0)])).unwrap();
        let removed = service.remove_instance("i2").unwrap();
        assert_eq!(removed.status(), InstanceStatus::Shutdown);
        assert_eq!(service.instance_count(), 1);
        assert!(!service.is_in_transition_state());
        assert_eq!(service.revision(), 5);
    }

    #[test]
    fn invalid_weights_fail_loudly() {
        let mut service = Service::new("svc", "impl-a", two_impls(0.5, 0.5), vec![]).unwrap();
        service.add_instance(Instance::new("i1", InstanceStatus::Active));

        let err = service
            .set_load_balancer_weights(BTreeMap::from([("i1".to_string(), 0.7)]))
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::InvalidWeights { .. }));

        let err = service
            .set_load_balancer_weights(BTreeMap::from([("ghost".to_string(), 1.0)]))
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::InvalidWeights { .. }));
    }

    #[test]
    fn shutdown_is_terminal() {
        let mut instance = Instance::new("i1", InstanceStatus::Booting);
        instance.set_status(InstanceStatus::Active).unwrap();
        instance.set_status(InstanceStatus::Unreachable).unwrap();
        instance.set_status(InstanceStatus::Shutdown).unwrap();
        assert!(instance.set_status(InstanceStatus::Active).is_err());
        assert!(Instance::new("i2", InstanceStatus::Active)
            .set_status(InstanceStatus::Booting)
            .is_err());
    }

    #[test]
    fn vulnerability_comes_from_current_implementation() {
        let impls = vec![
            ServiceImplementation::new("impl-a", 0.5).with_vulnerability_score(12.0),
            ServiceImplementation::new("impl-b", 0.5).with_vulnerability_score(3.0),
        ];
        let mut service = Service::new("svc", "impl-a", impls, vec![]).unwrap();
        assert_eq!(service.current_value(QosKind::Vulnerability), Some(12.0));
        service.set_current_implementation("impl-b").unwrap();
        assert_eq!(service.current_value(QosKind::Vulnerability), Some(3.0));
        assert!(service.set_current_implementation("impl-c").is_err());
    }
}
