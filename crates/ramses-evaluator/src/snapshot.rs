//! System snapshots: per-service QoS values of a real or hypothetical
//! system state.
//!
//! The baseline snapshot reads every service's current values. A
//! projected snapshot is the baseline with one adaptation option applied
//! to its service:
//!
//! | option                      | availability / response time             | vulnerability        |
//! |-----------------------------|------------------------------------------|----------------------|
//! | ChangeImplementation        | benchmark of the new implementation      | its vulnerability    |
//! | AddInstance                 | mean over instances + one at benchmark   | unchanged            |
//! | ShutdownInstance            | mean over instances except the target    | unchanged            |
//! | ChangeLoadBalancerWeights   | weight-averaged instance values          | unchanged            |

use std::collections::BTreeMap;

use ramses_knowledge::{AdaptationOption, OptionKind, QosKind, Service, ServiceId};
use serde::Serialize;

use crate::error::{EvalError, EvalResult};

/// Importance of each QoS kind in the visit cost.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct QosWeights {
    pub availability: f64,
    pub average_response_time: f64,
    pub vulnerability: f64,
}

impl QosWeights {
    /// Weights configured on the services. The weights are shared across
    /// services, so each kind takes the first configured value in service
    /// id order; unconfigured kinds weigh nothing.
    pub fn from_services(services: &BTreeMap<ServiceId, Service>) -> Self {
        let weight = |kind: QosKind| {
            services
                .values()
                .find_map(|s| s.qos_specifications.get(&kind))
                .map(|spec| spec.weight)
                .unwrap_or(0.0)
        };
        Self {
            availability: weight(QosKind::Availability),
            average_response_time: weight(QosKind::AverageResponseTime),
            vulnerability: weight(QosKind::Vulnerability),
        }
    }
}

/// QoS values of every service in one system state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub services: BTreeMap<ServiceId, BTreeMap<QosKind, f64>>,
    pub weights: QosWeights,
}

impl SystemSnapshot {
    /// The system as it currently is.
    pub fn baseline(services: &BTreeMap<ServiceId, Service>) -> Self {
        let values = services
            .iter()
            .map(|(id, service)| {
                let values = QosKind::ALL
                    .iter()
                    .filter_map(|kind| service.current_value(*kind).map(|v| (*kind, v)))
                    .collect();
                (id.clone(), values)
            })
            .collect();
        Self {
            services: values,
            weights: QosWeights::from_services(services),
        }
    }

    /// The system after applying `option`.
    pub fn project(
        services: &BTreeMap<ServiceId, Service>,
        option: &AdaptationOption,
    ) -> EvalResult<Self> {
        let service = services
            .get(&option.service_id)
            .ok_or_else(|| EvalError::UnknownService(option.service_id.clone()))?;
        if !option.is_resolved() {
            return Err(EvalError::UnresolvedOption {
                service_id: option.service_id.clone(),
                option: option.kind.name(),
            });
        }

        // Only the kinds the baseline knows for this service are projected,
        // so both snapshots describe the same QoS kinds.
        let mut snapshot = Self::baseline(services);
        let kinds: Vec<QosKind> = snapshot
            .services
            .get(&option.service_id)
            .map(|values| values.keys().copied().collect())
            .unwrap_or_default();
        let projected = kinds
            .into_iter()
            .map(|kind| project_value(service, option, kind).map(|v| (kind, v)))
            .collect::<EvalResult<BTreeMap<_, _>>>()?;
        snapshot.services.insert(option.service_id.clone(), projected);
        Ok(snapshot)
    }

    pub fn value(&self, service_id: &str, kind: QosKind) -> EvalResult<f64> {
        self.services
            .get(service_id)
            .ok_or_else(|| EvalError::UnknownService(service_id.to_string()))?
            .get(&kind)
            .copied()
            .ok_or_else(|| EvalError::MissingValue {
                service_id: service_id.to_string(),
                kind,
            })
    }
}

fn project_value(service: &Service, option: &AdaptationOption, kind: QosKind) -> EvalResult<f64> {
    let service_id = &service.service_id;
    let missing = || EvalError::MissingValue {
        service_id: service_id.clone(),
        kind,
    };

    if let OptionKind::ChangeImplementation {
        new_implementation_id: Some(new_id),
        ..
    } = &option.kind
    {
        let implementation = service.implementation(new_id).ok_or_else(|| EvalError::Projection {
            service_id: service_id.clone(),
            reason: format!("unknown implementation {new_id}"),
        })?;
        return implementation.benchmark(kind).ok_or_else(missing);
    }

    if kind == QosKind::Vulnerability {
        return Ok(service.current_vulnerability_score());
    }

    let instance_value = |instance_id: &str| -> EvalResult<f64> {
        service
            .instance(instance_id)
            .and_then(|i| i.current_value(kind))
            .ok_or_else(|| EvalError::Projection {
                service_id: service_id.clone(),
                reason: format!("instance {instance_id} has no {kind} value"),
            })
    };

    match &option.kind {
        OptionKind::AddInstance { .. } => {
            let benchmark = service.current_implementation().benchmark(kind).ok_or_else(missing)?;
            let mut total = benchmark;
            for instance in service.instances() {
                total += instance_value(&instance.instance_id)?;
            }
            Ok(total / (service.instance_count() + 1) as f64)
        }
        OptionKind::ShutdownInstance {
            instance_to_shutdown,
            ..
        } => {
            if service.instance(instance_to_shutdown).is_none() {
                return Err(EvalError::Projection {
                    service_id: service_id.clone(),
                    reason: format!("unknown instance {instance_to_shutdown}"),
                });
            }
            let remaining: Vec<&str> = service
                .instances()
                .map(|i| i.instance_id.as_str())
                .filter(|id| *id != instance_to_shutdown.as_str())
                .collect();
            if remaining.is_empty() {
                return Err(EvalError::Projection {
                    service_id: service_id.clone(),
                    reason: "shutting down the last instance".to_string(),
                });
            }
            let mut total = 0.0;
            for id in &remaining {
                total += instance_value(id)?;
            }
            Ok(total / remaining.len() as f64)
        }
        OptionKind::ChangeLoadBalancerWeights {
            new_weights: Some(weights),
            ..
        } => {
            let mass: f64 = weights.values().sum();
            if mass <= 0.0 {
                return Err(EvalError::Projection {
                    service_id: service_id.clone(),
                    reason: "no weight left on any instance".to_string(),
                });
            }
            let mut total = 0.0;
            for (id, w) in weights {
                total += w * instance_value(id)?;
            }
            Ok(total / mass)
        }
        // Unresolved options were rejected in `project`; a resolved
        // ChangeImplementation returned above.
        _ => Err(EvalError::UnresolvedOption {
            service_id: service_id.clone(),
            option: option.kind.name(),
        }),
    }
}
