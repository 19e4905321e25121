//! The Knowledge collaborator interface consumed by the Plan stage.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KnowledgeResult;
use crate::options::AdaptationOption;
use crate::types::{Service, ServiceId};

/// Stages of the managing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Monitor,
    Analyse,
    Plan,
    Execute,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Module::Monitor => "MONITOR",
            Module::Analyse => "ANALYSE",
            Module::Plan => "PLAN",
            Module::Execute => "EXECUTE",
        };
        f.write_str(s)
    }
}

/// Options grouped by the service they adapt.
pub type OptionsByService = BTreeMap<ServiceId, Vec<AdaptationOption>>;

/// The outcome of one planning iteration, ready to be committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChosenOptions {
    pub options: OptionsByService,
    /// Revision of every adapted service in the snapshot the plan read.
    pub base_revisions: BTreeMap<ServiceId, u64>,
}

impl ChosenOptions {
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// Shared system knowledge as seen by the Plan stage.
///
/// `services` returns an owned snapshot: later mutations made by other
/// stages only become visible through the next call.
pub trait Knowledge: Send + Sync {
    /// Snapshot of every managed service.
    fn services(&self) -> KnowledgeResult<BTreeMap<ServiceId, Service>>;

    /// Options proposed by Analyse for the current iteration.
    fn proposed_adaptation_options(&self) -> KnowledgeResult<OptionsByService>;

    /// Commit the options chosen this iteration. Fails without committing
    /// anything if an adapted service changed since it was read.
    fn choose_adaptation_options(&self, chosen: &ChosenOptions) -> KnowledgeResult<()>;

    /// Invalidate the QoS history of a service and of its instances.
    fn invalidate_qos_history(&self, service_id: &str) -> KnowledgeResult<()>;

    fn notify_module_start(&self, module: Module) -> KnowledgeResult<()>;

    fn set_failed_module(&self, module: Module) -> KnowledgeResult<()>;
}
