//! Process-local implementation of [`Knowledge`].
//!
//! Holds the architecture, proposed and chosen options, the archive of
//! executed options and the module status flags. Cloning yields another
//! handle to the same store, so Monitor/Analyse/Plan/Execute stand-ins
//! can share it across tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::knowledge::{ChosenOptions, Knowledge, Module, OptionsByService};
use crate::options::AdaptationOption;
use crate::qos::{epoch_secs, QosKind};
use crate::types::{Instance, InstanceStatus, Service, ServiceId};

#[derive(Default)]
struct KnowledgeState {
    services: BTreeMap<ServiceId, Service>,
    proposed: OptionsByService,
    chosen: OptionsByService,
    history: Vec<AdaptationOption>,
    active_module: Option<Module>,
    failed_module: Option<Module>,
}

/// Thread-safe in-memory knowledge store.
#[derive(Clone, Default)]
pub struct InMemoryKnowledge {
    inner: Arc<RwLock<KnowledgeState>>,
}

impl InMemoryKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding `services`. Duplicate ids are rejected.
    pub fn with_services(services: impl IntoIterator<Item = Service>) -> KnowledgeResult<Self> {
        let store = Self::new();
        for service in services {
            store.add_service(service)?;
        }
        Ok(store)
    }

    pub fn add_service(&self, service: Service) -> KnowledgeResult<()> {
        let mut state = self.inner.write();
        if state.services.contains_key(&service.service_id) {
            return Err(KnowledgeError::Parse(format!(
                "duplicate service {}",
                service.service_id
            )));
        }
        debug!(service = %service.service_id, "service registered");
        state.services.insert(service.service_id.clone(), service);
        Ok(())
    }

    pub fn service(&self, service_id: &str) -> Option<Service> {
        self.inner.read().services.get(service_id).cloned()
    }

    /// Queue an option for the next planning iteration.
    pub fn propose_option(&self, option: AdaptationOption) -> KnowledgeResult<()> {
        let mut state = self.inner.write();
        if !state.services.contains_key(&option.service_id) {
            return Err(KnowledgeError::UnknownService(option.service_id));
        }
        state
            .proposed
            .entry(option.service_id.clone())
            .or_default()
            .push(option);
        Ok(())
    }

    /// Append a QoS value to an instance and make it the current value.
    pub fn record_instance_value(
        &self,
        service_id: &str,
        instance_id: &str,
        kind: QosKind,
        value: f64,
    ) -> KnowledgeResult<()> {
        let now = epoch_secs();
        self.update_service(service_id, |service| {
            let instance = service.instance_mut(instance_id).ok_or_else(|| {
                KnowledgeError::UnknownInstance {
                    service_id: service_id.to_string(),
                    instance_id: instance_id.to_string(),
                }
            })?;
            instance.qos.push(kind, value, now);
            instance.qos.set_current_value(kind, value, now);
            Ok(())
        })
    }

    /// Append a service-level QoS value and make it the current value.
    pub fn record_service_value(
        &self,
        service_id: &str,
        kind: QosKind,
        value: f64,
    ) -> KnowledgeResult<()> {
        let now = epoch_secs();
        self.update_service(service_id, |service| {
            service.qos.push(kind, value, now);
            service.qos.set_current_value(kind, value, now);
            Ok(())
        })
    }

    pub fn set_instance_status(
        &self,
        service_id: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> KnowledgeResult<()> {
        self.update_service(service_id, |service| {
            service
                .instance_mut(instance_id)
                .ok_or_else(|| KnowledgeError::UnknownInstance {
                    service_id: service_id.to_string(),
                    instance_id: instance_id.to_string(),
                })?
                .set_status(status)
        })
    }

    pub fn add_instance(&self, service_id: &str, instance: Instance) -> KnowledgeResult<()> {
        self.update_service(service_id, |service| {
            service.add_instance(instance);
            Ok(())
        })
    }

    /// Run `f` against a stored service under the write lock.
    pub fn update_service<T>(
        &self,
        service_id: &str,
        f: impl FnOnce(&mut Service) -> KnowledgeResult<T>,
    ) -> KnowledgeResult<T> {
        let mut state = self.inner.write();
        let service = state
            .services
            .get_mut(service_id)
            .ok_or_else(|| KnowledgeError::UnknownService(service_id.to_string()))?;
        f(service)
    }

    pub fn proposed_options(&self) -> OptionsByService {
        self.inner.read().proposed.clone()
    }

    pub fn chosen_adaptation_options(&self) -> OptionsByService {
        self.inner.read().chosen.clone()
    }

    /// Move the chosen options into the history archive, as Execute does
    /// once it has applied them.
    pub fn archive_chosen_options(&self) -> Vec<AdaptationOption> {
        let mut state = self.inner.write();
        let chosen = std::mem::take(&mut state.chosen);
        let applied: Vec<AdaptationOption> = chosen.into_values().flatten().collect();
        state.history.extend(applied.iter().cloned());
        applied
    }

    pub fn history(&self) -> Vec<AdaptationOption> {
        self.inner.read().history.clone()
    }

    pub fn active_module(&self) -> Option<Module> {
        self.inner.read().active_module
    }

    pub fn failed_module(&self) -> Option<Module> {
        self.inner.read().failed_module
    }

    pub fn clear_failed_module(&self) {
        self.inner.write().failed_module = None;
    }
}

impl Knowledge for InMemoryKnowledge {
    fn services(&self) -> KnowledgeResult<BTreeMap<ServiceId, Service>> {
        Ok(self.inner.read().services.clone())
    }

    fn proposed_adaptation_options(&self) -> KnowledgeResult<OptionsByService> {
        Ok(self.proposed_options())
    }

    fn choose_adaptation_options(&self, chosen: &ChosenOptions) -> KnowledgeResult<()> {
        let mut state = self.inner.write();

        for service_id in chosen.options.keys() {
            let stored = state
                .services
                .get(service_id)
                .ok_or_else(|| KnowledgeError::UnknownService(service_id.clone()))?;
            let expected = chosen.base_revisions.get(service_id).copied().unwrap_or(0);
            if stored.revision() != expected {
                warn!(
                    service = %service_id,
                    expected,
                    found = stored.revision(),
                    "rejecting plan built on a stale snapshot"
                );
                return Err(KnowledgeError::ConcurrentModification {
                    service_id: service_id.clone(),
                    expected,
                    found: stored.revision(),
                });
            }
        }

        state.chosen = chosen.options.clone();
        state.proposed.clear();
        info!(
            services = chosen.options.len(),
            options = chosen.options.values().map(Vec::len).sum::<usize>(),
            "adaptation options chosen"
        );
        Ok(())
    }

    fn invalidate_qos_history(&self, service_id: &str) -> KnowledgeResult<()> {
        let invalidated = self.update_service(service_id, |service| {
            let mut count = service.qos.invalidate_all();
            let ids: Vec<String> = service.instances().map(|i| i.instance_id.clone()).collect();
            for id in ids {
                if let Some(instance) = service.instance_mut(&id) {
                    count += instance.qos.invalidate_all();
                }
            }
            Ok(count)
        })?;
        debug!(service = %service_id, invalidated, "QoS history invalidated");
        Ok(())
    }

    fn notify_module_start(&self, module: Module) -> KnowledgeResult<()> {
        self.inner.write().active_module = Some(module);
        debug!(%module, "module started");
        Ok(())
    }

    fn set_failed_module(&self, module: Module) -> KnowledgeResult<()> {
        self.inner.write().failed_module = Some(module);
        warn!(%module, "module marked as failed");
        Ok(())
    }
}
