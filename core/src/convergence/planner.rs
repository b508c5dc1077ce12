//! Step planner — diffs the desired topology against observed units and emits
//! a minimal, ordered step list.
//!
//! The planner is stateless: it takes the topology and one observed snapshot
//! and returns the steps needed to converge them. It never executes anything
//! itself.
//!
//! # Ordering
//!
//! 1. Teardown of every observed unit that is not desired: workers from the
//!    highest index down, then the poller, then the broker.
//! 2. Bring-up in topology order: broker before poller, workers ascending.
//!
//! Teardown always completes before bring-up, so scaling down removes the
//! highest worker indices first and a role flip fully removes the old role
//! set before the new one starts.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::observed::{ObservedState, ObservedUnit, UnitState};
use crate::types::result::{Operation, Step};
use crate::types::role::{DesiredState, RoleKind, ServiceRole, Topology};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub teardown: Vec<Step>,
    pub bring_up: Vec<Step>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.teardown.is_empty() && self.bring_up.is_empty()
    }

    pub fn len(&self) -> usize {
        self.teardown.len() + self.bring_up.len()
    }

    /// All steps in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.teardown.iter().chain(self.bring_up.iter())
    }

    /// `(op, role)` pairs in execution order.
    pub fn summary(&self) -> Vec<(Operation, RoleKind)> {
        self.steps().map(|s| (s.op, s.kind())).collect()
    }
}

/// Compute the steps that move `observed` to `topology`.
pub fn plan(topology: &Topology, observed: &ObservedState) -> Plan {
    let mut result = Plan::default();

    // --- Teardown ---

    let mut surplus: Vec<&ObservedUnit> = observed
        .units
        .iter()
        .filter(|u| {
            topology
                .get(u.kind)
                .map_or(true, |r| r.desired == DesiredState::Absent)
        })
        .collect();
    surplus.sort_by(|a, b| teardown_order(a.kind, b.kind));

    for unit in surplus {
        let role = ServiceRole::for_teardown(
            unit.kind,
            &unit.unit,
            unit.spec.clone().unwrap_or_default(),
        );
        if unit.state == UnitState::Running {
            result.teardown.push(Step::new(Operation::Stop, &role));
        }
        result.teardown.push(Step::new(Operation::Remove, &role));
    }

    // --- Bring-up ---

    for role in &topology.roles {
        if role.desired == DesiredState::Absent {
            continue;
        }
        let want_running = role.desired == DesiredState::Running;
        match observed.get(role.kind) {
            None => {
                result.bring_up.push(Step::new(Operation::Install, role));
                if want_running {
                    result.bring_up.push(Step::new(Operation::Start, role));
                }
            }
            Some(unit) if unit.spec.as_ref() != Some(&role.spec) => {
                // Stale: never rewrite a running unit in place.
                if unit.state == UnitState::Running {
                    result.bring_up.push(Step::new(Operation::Stop, role));
                }
                result.bring_up.push(Step::new(Operation::Install, role));
                if want_running {
                    result.bring_up.push(Step::new(Operation::Start, role));
                }
            }
            Some(unit) => match (unit.state, want_running) {
                (UnitState::Running, true) => {}
                (UnitState::Stopped | UnitState::Failed, true) => {
                    result.bring_up.push(Step::new(Operation::Start, role));
                }
                (UnitState::Running, false) => {
                    result.bring_up.push(Step::new(Operation::Stop, role));
                }
                (UnitState::Stopped | UnitState::Failed, false) => {}
            },
        }
    }

    result
}

/// Workers (highest index first), then poller, then broker.
fn teardown_order(a: RoleKind, b: RoleKind) -> Ordering {
    fn rank(kind: RoleKind) -> (u8, i64) {
        match kind {
            RoleKind::Worker(i) => (0, -(i as i64)),
            RoleKind::Poller => (1, 0),
            RoleKind::Broker => (2, 0),
        }
    }
    rank(a).cmp(&rank(b))
}
