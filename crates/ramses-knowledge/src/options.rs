//! Adaptation options proposed by Analyse and resolved by Plan.
//!
//! An [`AdaptationOption`] carries the fields shared by every option and
//! an [`OptionKind`] payload. The payload's computed fields start empty
//! (`None`) and are filled in by the Plan stage before an option can be
//! chosen.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::qos::{epoch_secs, QosKind};
use crate::types::{ImplementationId, InstanceId, ServiceId};

/// The structural change an option proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptionKind {
    ChangeLoadBalancerWeights {
        #[serde(default)]
        new_weights: Option<BTreeMap<InstanceId, f64>>,
        #[serde(default)]
        instances_to_shutdown: Vec<InstanceId>,
    },
    AddInstance {
        #[serde(default)]
        new_instance_weight: Option<f64>,
        #[serde(default)]
        old_instances_new_weights: Option<BTreeMap<InstanceId, f64>>,
        #[serde(default)]
        instances_to_shutdown: Vec<InstanceId>,
    },
    ShutdownInstance {
        instance_to_shutdown: InstanceId,
        #[serde(default)]
        new_weights: Option<BTreeMap<InstanceId, f64>>,
    },
    ChangeImplementation {
        possible_implementations: Vec<ImplementationId>,
        #[serde(default)]
        new_implementation_id: Option<ImplementationId>,
    },
}

impl OptionKind {
    pub fn name(&self) -> &'static str {
        match self {
            OptionKind::ChangeLoadBalancerWeights { .. } => "ChangeLoadBalancerWeights",
            OptionKind::AddInstance { .. } => "AddInstance",
            OptionKind::ShutdownInstance { .. } => "ShutdownInstance",
            OptionKind::ChangeImplementation { .. } => "ChangeImplementation",
        }
    }
}

/// A proposed or chosen adaptation of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationOption {
    pub service_id: ServiceId,
    pub implementation_id: ImplementationId,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub comment: String,
    /// Unix timestamp (seconds) when the option was proposed.
    #[serde(default)]
    pub timestamp: u64,
    /// QoS kind whose violation motivated the option.
    #[serde(default)]
    pub goal: Option<QosKind>,
    pub kind: OptionKind,
}

impl AdaptationOption {
    fn new(
        service_id: impl Into<ServiceId>,
        implementation_id: impl Into<ImplementationId>,
        kind: OptionKind,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            implementation_id: implementation_id.into(),
            forced: false,
            comment: String::new(),
            timestamp: epoch_secs(),
            goal: None,
            kind,
        }
    }

    pub fn change_load_balancer_weights(
        service_id: impl Into<ServiceId>,
        implementation_id: impl Into<ImplementationId>,
    ) -> Self {
        Self::new(
            service_id,
            implementation_id,
            OptionKind::ChangeLoadBalancerWeights {
                new_weights: None,
                instances_to_shutdown: Vec::new(),
            },
        )
    }

    pub fn add_instance(
        service_id: impl Into<ServiceId>,
        implementation_id: impl Into<ImplementationId>,
    ) -> Self {
        Self::new(
            service_id,
            implementation_id,
            OptionKind::AddInstance {
                new_instance_weight: None,
                old_instances_new_weights: None,
                instances_to_shutdown: Vec::new(),
            },
        )
    }

    pub fn shutdown_instance(
        service_id: impl Into<ServiceId>,
        implementation_id: impl Into<ImplementationId>,
        instance_id: impl Into<InstanceId>,
    ) -> Self {
        Self::new(
            service_id,
            implementation_id,
            OptionKind::ShutdownInstance {
                instance_to_shutdown: instance_id.into(),
                new_weights: None,
            },
        )
    }

    pub fn change_implementation(
        service_id: impl Into<ServiceId>,
        implementation_id: impl Into<ImplementationId>,
        possible_implementations: Vec<ImplementationId>,
        goal: QosKind,
    ) -> Self {
        let mut option = Self::new(
            service_id,
            implementation_id,
            OptionKind::ChangeImplementation {
                possible_implementations,
                new_implementation_id: None,
            },
        );
        option.goal = Some(goal);
        option
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    pub fn with_goal(mut self, goal: QosKind) -> Self {
        self.goal = Some(goal);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// True once the Plan stage has computed the option's parameters.
    pub fn is_resolved(&self) -> bool {
        match &self.kind {
            OptionKind::ChangeLoadBalancerWeights { new_weights, .. } => new_weights.is_some(),
            OptionKind::AddInstance {
                new_instance_weight,
                old_instances_new_weights,
                ..
            } => new_instance_weight.is_some() && old_instances_new_weights.is_some(),
            OptionKind::ShutdownInstance { new_weights, .. } => new_weights.is_some(),
            OptionKind::ChangeImplementation {
                new_implementation_id,
                ..
            } => new_implementation_id.is_some(),
        }
    }

    /// Full weight map after an add-instance option, keyed with the id
    /// the new instance received. `None` until the weights are computed
    /// or when this is not an add-instance option.
    pub fn final_weights(&self, new_instance_id: &str) -> Option<BTreeMap<InstanceId, f64>> {
        match &self.kind {
            OptionKind::AddInstance {
                new_instance_weight: Some(weight),
                old_instances_new_weights: Some(old),
                ..
            } => {
                let mut weights = old.clone();
                weights.insert(new_instance_id.to_string(), *weight);
                Some(weights)
            }
            _ => None,
        }
    }

    pub fn description(&self) -> String {
        let prefix = if self.forced {
            "FORCED -".to_string()
        } else {
            match self.goal {
                Some(goal) => format!("Goal: {goal} -"),
                None => "-".to_string(),
            }
        };
        let body = match &self.kind {
            OptionKind::ChangeLoadBalancerWeights { .. } => {
                format!("Change the load balancer weights of service {}.", self.service_id)
            }
            OptionKind::AddInstance { .. } => {
                format!("Add a new instance of service {}.", self.service_id)
            }
            OptionKind::ShutdownInstance {
                instance_to_shutdown,
                ..
            } => format!(
                "Shutdown instance {instance_to_shutdown} of service {}.",
                self.service_id
            ),
            OptionKind::ChangeImplementation {
                possible_implementations,
                ..
            } => format!(
                "Change the implementation of service {} to one of [{}].",
                self.service_id,
                possible_implementations.join(", ")
            ),
        };
        if self.comment.is_empty() {
            format!("{prefix} {body}")
        } else {
            format!("{prefix} {body} {}", self.comment)
        }
    }
}
