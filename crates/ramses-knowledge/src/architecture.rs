//! System architecture loader.
//!
//! Parses the JSON description of the managed system (services, their
//! possible implementations, dependencies, QoS specifications and load
//! balancer policy) into validated [`Service`] values. A file may also
//! carry the running instances, their last measured QoS values and the
//! load balancer weights, which seeds Knowledge with a monitored state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::qos::{epoch_secs, QosKind, QosSpecification, QosThreshold};
use crate::types::{Instance, InstanceStatus, LoadBalancerKind, Service, ServiceImplementation};

#[derive(Debug, Deserialize)]
struct ArchitectureFile {
    services: Vec<ServiceRecord>,
}

#[derive(Debug, Deserialize)]
struct ServiceRecord {
    service_id: String,
    /// Defaults to the first listed implementation.
    current_implementation: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    load_balancer: LoadBalancerRecord,
    #[serde(default)]
    qos: BTreeMap<QosKind, QosRecord>,
    /// Last measured service-level values.
    #[serde(default)]
    current_values: BTreeMap<QosKind, f64>,
    implementations: Vec<ImplementationRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadBalancerRecord {
    #[serde(rename = "type", default)]
    kind: LoadBalancerKind,
    #[serde(default)]
    weights: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct QosRecord {
    weight: f64,
    min_threshold: Option<f64>,
    max_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ImplementationRecord {
    implementation_id: String,
    score: f64,
    #[serde(default = "default_trust")]
    implementation_trust: u32,
    #[serde(default = "default_preference")]
    preference: f64,
    #[serde(default)]
    instance_load_shutdown_threshold: f64,
    #[serde(default)]
    vulnerability_score: f64,
    #[serde(default)]
    benchmarks: BTreeMap<QosKind, f64>,
    #[serde(default)]
    instances: Vec<InstanceRecord>,
}

#[derive(Debug, Deserialize)]
struct InstanceRecord {
    instance_id: String,
    #[serde(default = "default_status")]
    status: InstanceStatus,
    #[serde(default)]
    current_values: BTreeMap<QosKind, f64>,
}

fn default_status() -> InstanceStatus {
    InstanceStatus::Active
}

fn default_trust() -> u32 {
    1
}

fn default_preference() -> f64 {
    1.0
}

/// The managed system as described by an architecture file.
#[derive(Debug, Clone)]
pub struct SystemArchitecture {
    pub services: Vec<Service>,
}

impl SystemArchitecture {
    pub fn from_file(path: &Path) -> KnowledgeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        debug!(?path, "architecture file read");
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> KnowledgeResult<Self> {
        let file: ArchitectureFile =
            serde_json::from_str(json).map_err(|e| KnowledgeError::Parse(e.to_string()))?;

        let mut seen = BTreeSet::new();
        for record in &file.services {
            if !seen.insert(record.service_id.clone()) {
                return Err(KnowledgeError::Parse(format!(
                    "duplicate service {}",
                    record.service_id
                )));
            }
        }
        for record in &file.services {
            if let Some(dep) = record.dependencies.iter().find(|d| !seen.contains(*d)) {
                return Err(KnowledgeError::Parse(format!(
                    "service {} depends on unknown service {dep}",
                    record.service_id
                )));
            }
        }

        let services = file
            .services
            .into_iter()
            .map(build_service)
            .collect::<KnowledgeResult<Vec<_>>>()?;
        Ok(Self { services })
    }
}

fn build_service(record: ServiceRecord) -> KnowledgeResult<Service> {
    let current = match record.current_implementation {
        Some(id) => id,
        None => record
            .implementations
            .first()
            .map(|i| i.implementation_id.clone())
            .ok_or_else(|| {
                KnowledgeError::Parse(format!("service {} has no implementations", record.service_id))
            })?,
    };

    let now = epoch_secs();
    let implementations = record
        .implementations
        .into_iter()
        .map(|r| {
            let mut implementation = ServiceImplementation::new(r.implementation_id, r.score)
                .with_trust(r.implementation_trust)
                .with_preference(r.preference)
                .with_shutdown_threshold(r.instance_load_shutdown_threshold)
                .with_vulnerability_score(r.vulnerability_score);
            implementation.benchmarks = r.benchmarks;
            for i in r.instances {
                let mut instance = Instance::new(i.instance_id, i.status);
                for (kind, value) in i.current_values {
                    instance.qos.push(kind, value, now);
                    instance.qos.set_current_value(kind, value, now);
                }
                implementation = implementation.with_instance(instance);
            }
            implementation
        })
        .collect();

    let mut service = Service::new(
        record.service_id.clone(),
        current,
        implementations,
        record.dependencies,
    )?
    .with_load_balancer(record.load_balancer.kind);

    for (kind, qos) in record.qos {
        let threshold = match (qos.min_threshold, qos.max_threshold) {
            (Some(min), None) => QosThreshold::Min(min),
            (None, Some(max)) => QosThreshold::Max(max),
            _ => {
                return Err(KnowledgeError::Parse(format!(
                    "{kind} of service {} needs exactly one of min_threshold/max_threshold",
                    record.service_id
                )));
            }
        };
        service = service.with_qos_specification(kind, QosSpecification::new(qos.weight, threshold));
    }

    for (kind, value) in record.current_values {
        service.qos.push(kind, value, now);
        service.qos.set_current_value(kind, value, now);
    }
    if !record.load_balancer.weights.is_empty() {
        service.set_load_balancer_weights(record.load_balancer.weights)?;
    }

    Ok(service)
}
