use serde::{Deserialize, Serialize};

use super::role::{RoleKind, UnitSpec};

/// Runtime state of an installed unit as reported by the adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Running,
    Stopped,
    /// Installed but crashed or exited with an error.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedUnit {
    pub kind: RoleKind,
    pub unit: String,
    pub state: UnitState,
    /// Spec the unit was installed with, if the adapter could recover it.
    pub spec: Option<UnitSpec>,
}

/// A point-in-time snapshot of the managed units on this node.
///
/// Taken once at the start of a pass and never updated during it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedState {
    pub units: Vec<ObservedUnit>,
}

impl ObservedState {
    pub fn new(units: Vec<ObservedUnit>) -> Self {
        ObservedState { units }
    }

    pub fn get(&self, kind: RoleKind) -> Option<&ObservedUnit> {
        self.units.iter().find(|u| u.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
