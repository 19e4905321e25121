//! Request-flow topology of the managed application.
//!
//! An order enters through the entry service, which fans out to payment
//! and delivery (or delivery alone, or straight to the restaurant), and
//! converges on the restaurant service. Failures restart the request.
//!
//! ```text
//!            ┌──────────────────── a_e/denom ──────────────► 2 (payment+delivery) ─┐
//! 0 start ─► 1 entry ── a_e(1−a_p·a_d)/denom ──────────────► 3 (delivery) ─────────┤
//!   ▲        │  └──── a_e(1−a_p·a_d)(1−a_d)/denom ─────────► 4 (restaurant) ◄──────┘
//!   │        └─ 1−a_e ─► 6 failure                           │  a_r      1−a_r
//!   └──────────────────────┘  ◄───────────────────────────────┴─────► 5 success
//!
//! denom = a_p·a_d² − 2·a_p·a_d − a_d + 3
//! 2 → 4 with a_p·a_d, else back to 1;  3 → 4 with a_d, else back to 1
//! ```
//!
//! Each of states 1 to 4 earns, per visit, the candidate's visit cost of
//! the services it traverses divided by the baseline's visit cost of the
//! same services. The visit cost of a service is
//! `w_a·(1 − a) + w_rt·rt/RT_MAX + w_v·v/V_MAX`.

use std::fmt::Write as _;

use ramses_knowledge::QosKind;
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};
use crate::markov::AbsorbingChain;
use crate::snapshot::SystemSnapshot;

pub const START: usize = 0;
pub const ENTRY: usize = 1;
pub const PAYMENT_AND_DELIVERY: usize = 2;
pub const DELIVERY: usize = 3;
pub const RESTAURANT: usize = 4;
pub const SUCCESS: usize = 5;
pub const FAILURE: usize = 6;

/// Service ids playing each role of the request flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub entry: String,
    pub payment: String,
    pub delivery: String,
    pub restaurant: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            entry: "ORDERING-SERVICE".to_string(),
            payment: "PAYMENT-PROXY-SERVICE".to_string(),
            delivery: "DELIVERY-PROXY-SERVICE".to_string(),
            restaurant: "RESTAURANT-SERVICE".to_string(),
        }
    }
}

/// Values of one service in a snapshot, normalised for the cost formula.
#[derive(Debug, Clone, Copy)]
struct RoleValues {
    availability: f64,
    response_time: f64,
    vulnerability: f64,
}

#[derive(Debug, Clone)]
pub struct OrderingFlowTopology {
    roles: TopologyConfig,
    response_time_max: f64,
    vulnerability_max: f64,
}

impl OrderingFlowTopology {
    pub fn new(roles: TopologyConfig, response_time_max: f64, vulnerability_max: f64) -> Self {
        Self {
            roles,
            response_time_max,
            vulnerability_max,
        }
    }

    pub fn roles(&self) -> &TopologyConfig {
        &self.roles
    }

    fn values(&self, snapshot: &SystemSnapshot, service_id: &str) -> EvalResult<RoleValues> {
        Ok(RoleValues {
            availability: snapshot.value(service_id, QosKind::Availability)?,
            response_time: snapshot.value(service_id, QosKind::AverageResponseTime)?
                / self.response_time_max,
            vulnerability: snapshot.value(service_id, QosKind::Vulnerability)? / self.vulnerability_max,
        })
    }

    /// Candidate visit cost of `service_id` relative to the baseline.
    fn cost_ratio(
        &self,
        baseline: &SystemSnapshot,
        candidate: &SystemSnapshot,
        service_id: &str,
    ) -> EvalResult<f64> {
        let w = &baseline.weights;
        let cost = |v: RoleValues| {
            w.availability * (1.0 - v.availability)
                + w.average_response_time * v.response_time
                + w.vulnerability * v.vulnerability
        };
        let base = cost(self.values(baseline, service_id)?);
        if base == 0.0 || !base.is_finite() {
            return Err(EvalError::DegenerateBaseline {
                service_id: service_id.to_string(),
            });
        }
        Ok(cost(self.values(candidate, service_id)?) / base)
    }

    /// Build the chain whose transitions follow `candidate` and whose
    /// rewards compare `candidate` against `baseline`.
    pub fn chain(
        &self,
        baseline: &SystemSnapshot,
        candidate: &SystemSnapshot,
    ) -> EvalResult<AbsorbingChain> {
        let r = &self.roles;
        let a_e = candidate.value(&r.entry, QosKind::Availability)?;
        let a_p = candidate.value(&r.payment, QosKind::Availability)?;
        let a_d = candidate.value(&r.delivery, QosKind::Availability)?;
        let a_r = candidate.value(&r.restaurant, QosKind::Availability)?;
        let denom = a_p * a_d * a_d - 2.0 * a_p * a_d - a_d + 3.0;

        let mut chain = AbsorbingChain::new(7);
        chain.add_transition(START, ENTRY, 1.0);
        chain.add_transition(ENTRY, PAYMENT_AND_DELIVERY, a_e / denom);
        chain.add_transition(ENTRY, DELIVERY, a_e * (1.0 - a_p * a_d) / denom);
        chain.add_transition(ENTRY, RESTAURANT, a_e * (1.0 - a_p * a_d) * (1.0 - a_d) / denom);
        chain.add_transition(ENTRY, FAILURE, 1.0 - a_e);
        chain.add_transition(PAYMENT_AND_DELIVERY, RESTAURANT, a_p * a_d);
        chain.add_transition(PAYMENT_AND_DELIVERY, ENTRY, 1.0 - a_p * a_d);
        chain.add_transition(DELIVERY, RESTAURANT, a_d);
        chain.add_transition(DELIVERY, ENTRY, 1.0 - a_d);
        chain.add_transition(RESTAURANT, SUCCESS, a_r);
        chain.add_transition(RESTAURANT, FAILURE, 1.0 - a_r);
        chain.add_transition(SUCCESS, SUCCESS, 1.0);
        chain.add_transition(FAILURE, START, 1.0);

        let entry = self.cost_ratio(baseline, candidate, &r.entry)?;
        let payment = self.cost_ratio(baseline, candidate, &r.payment)?;
        let delivery = self.cost_ratio(baseline, candidate, &r.delivery)?;
        let restaurant = self.cost_ratio(baseline, candidate, &r.restaurant)?;
        chain.set_reward(ENTRY, entry);
        chain.set_reward(PAYMENT_AND_DELIVERY, delivery * payment);
        chain.set_reward(DELIVERY, delivery);
        chain.set_reward(RESTAURANT, restaurant);
        Ok(chain)
    }

    /// Render the same model as a PRISM `dtmc`.
    pub fn prism_model(
        &self,
        baseline: &SystemSnapshot,
        candidate: &SystemSnapshot,
    ) -> EvalResult<String> {
        let r = &self.roles;
        let roles = [
            ("ordering", &r.entry),
            ("payment", &r.payment),
            ("delivery", &r.delivery),
            ("restaurant", &r.restaurant),
        ];
        let mut old = Vec::with_capacity(roles.len());
        let mut new = Vec::with_capacity(roles.len());
        for (name, id) in roles {
            old.push((name, self.values(baseline, id)?));
            new.push((name, self.values(candidate, id)?));
        }

        let w = &baseline.weights;
        let mut m = String::from("dtmc\n\n");
        let _ = writeln!(m, "// availabilities");
        let _ = writeln!(m, "const double w_a = {};", w.availability);
        write_constants(&mut m, "a", &old, &new, |v| v.availability);
        m.push_str(
            "const double denom = (a_payment * a_delivery * a_delivery) - (2 * a_payment * a_delivery) - a_delivery + 3;\n\n",
        );
        let _ = writeln!(m, "// response times");
        let _ = writeln!(m, "const double w_rt = {};", w.average_response_time);
        write_constants(&mut m, "rt", &old, &new, |v| v.response_time);
        m.push('\n');
        let _ = writeln!(m, "// vulnerabilities");
        let _ = writeln!(m, "const double w_v = {};", w.vulnerability);
        write_constants(&mut m, "v", &old, &new, |v| v.vulnerability);
        m.push('\n');

        let ratio = |s: &str| {
            format!(
                "(w_a * (1 - a_{s}) + w_rt * rt_{s} + w_v * v_{s}) / (w_a * (1 - old_a_{s}) + w_rt * old_rt_{s} + w_v * old_v_{s})"
            )
        };
        m.push_str("rewards\n");
        let _ = writeln!(m, "s=1 : {};", ratio("ordering"));
        let _ = writeln!(m, "s=2 : {} * {};", ratio("delivery"), ratio("payment"));
        let _ = writeln!(m, "s=3 : {};", ratio("delivery"));
        let _ = writeln!(m, "s=4 : {};", ratio("restaurant"));
        m.push_str("endrewards\n\n");

        m.push_str("module flow\n");
        m.push_str("\ts : [0..6] init 0;\n\n");
        m.push_str("\t[] s=0 -> 1 : (s'=1);\n");
        m.push_str("\t[] s=1 -> (a_ordering / denom) : (s'=2) + (a_ordering * (1 - a_payment * a_delivery) / denom) : (s'=3) + (a_ordering * (1 - a_payment * a_delivery) * (1 - a_delivery) / denom) : (s'=4) + (1 - a_ordering) : (s'=6);\n");
        m.push_str("\t[] s=2 -> a_payment * a_delivery : (s'=4) + (1 - a_payment * a_delivery) : (s'=1);\n");
        m.push_str("\t[] s=3 -> a_delivery : (s'=4) + (1 - a_delivery) : (s'=1);\n");
        m.push_str("\t[] s=4 -> a_restaurant : (s'=5) + (1 - a_restaurant) : (s'=6);\n");
        m.push_str("\t[] s=5 -> 1 : (s'=5);\n");
        m.push_str("\t[] s=6 -> 1 : (s'=0);\n");
        m.push_str("endmodule\n");
        Ok(m)
    }
}

fn write_constants(
    m: &mut String,
    prefix: &str,
    old: &[(&str, RoleValues)],
    new: &[(&str, RoleValues)],
    pick: fn(&RoleValues) -> f64,
) {
    for (name, v) in old {
        let _ = writeln!(m, "const double old_{prefix}_{name} = {};", pick(v));
    }
    for (name, v) in new {
        let _ = writeln!(m, "const double {prefix}_{name} = {};", pick(v));
    }
}
