//! QoS history invalidation cascade.
//!
//! A change to one service makes the measurements of every service that
//! calls it, directly or transitively, untrustworthy. The cascade walks
//! reverse dependency edges breadth-first with a visited set, so cyclic
//! dependency graphs terminate and each service is invalidated once.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ramses_knowledge::{Knowledge, Service, ServiceId};
use tracing::debug;

use crate::error::PlanResult;

/// Services that depend on each service.
fn dependants(services: &BTreeMap<ServiceId, Service>) -> BTreeMap<&str, Vec<&str>> {
    let mut reverse: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, service) in services {
        for dependency in &service.dependencies {
            reverse.entry(dependency.as_str()).or_default().push(id.as_str());
        }
    }
    reverse
}

/// Every service reachable from `roots` over reverse dependency edges,
/// roots included, in visit order.
pub fn cascade<'a>(
    services: &'a BTreeMap<ServiceId, Service>,
    roots: impl IntoIterator<Item = &'a str>,
) -> Vec<ServiceId> {
    let reverse = dependants(services);
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    for root in roots {
        if !visited.insert(root) {
            continue;
        }
        queue.push_back(root);
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for &dependant in reverse.get(id).into_iter().flatten() {
                if visited.insert(dependant) {
                    queue.push_back(dependant);
                }
            }
        }
    }
    order
}

/// Invalidate the QoS history of `roots` and of all their dependants.
pub fn invalidate_cascade<'a>(
    knowledge: &dyn Knowledge,
    services: &'a BTreeMap<ServiceId, Service>,
    roots: impl IntoIterator<Item = &'a str>,
) -> PlanResult<Vec<ServiceId>> {
    let invalidated = cascade(services, roots);
    for service_id in &invalidated {
        debug!(service = %service_id, "invalidating QoS history");
        knowledge.invalidate_qos_history(service_id)?;
    }
    Ok(invalidated)
}
