use std::fmt;

use serde::{Deserialize, Serialize};

use super::role::{RoleKind, ServiceRole};
use crate::error::AdapterError;

/// An adapter operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Observe,
    Install,
    Start,
    Stop,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Observe => "observe",
            Operation::Install => "install",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// Lifecycle phase of a managed unit during a pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitPhase {
    Absent,
    Installing,
    Stopped,
    Running,
    Removing,
    Failed,
}

impl UnitPhase {
    /// Phase a unit is in while `op` is in flight.
    pub fn during(op: Operation, current: UnitPhase) -> UnitPhase {
        match op {
            Operation::Install => UnitPhase::Installing,
            Operation::Remove => UnitPhase::Removing,
            Operation::Start | Operation::Stop | Operation::Observe => current,
        }
    }

    /// Phase a unit lands in once `op` completes.
    pub fn after(op: Operation, current: UnitPhase) -> UnitPhase {
        match op {
            Operation::Install | Operation::Stop => UnitPhase::Stopped,
            Operation::Start => UnitPhase::Running,
            Operation::Remove => UnitPhase::Absent,
            Operation::Observe => current,
        }
    }
}

/// One planned adapter call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    pub op: Operation,
    pub role: ServiceRole,
}

impl Step {
    pub fn new(op: Operation, role: &ServiceRole) -> Self {
        Step {
            op,
            role: role.clone(),
        }
    }

    pub fn kind(&self) -> RoleKind {
        self.role.kind
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.role.kind)
    }
}

/// An adapter call that was actually made during a pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionRecord {
    pub role: RoleKind,
    pub unit: String,
    pub op: Operation,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AdapterError>,
}

impl ActionRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoleOutcome {
    Converged,
    Failed,
    /// Not attempted because an earlier failure blocked it.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleReport {
    pub role: RoleKind,
    pub unit: String,
    pub outcome: RoleOutcome,
    pub phase: UnitPhase,
}

/// A failed operation, with enough context to find the role and call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleKind>,
    pub op: Operation,
    pub error: AdapterError,
}

impl fmt::Display for PassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Some(role) => write!(f, "{} {} failed: {}", self.op, role, self.error),
            None => write!(f, "{} failed: {}", self.op, self.error),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    Converged,
    Partial,
    Failed,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub actions: Vec<ActionRecord>,
    pub roles: Vec<RoleReport>,
    pub status: ConvergenceStatus,
    pub errors: Vec<PassError>,
    /// Secondary node configured with zero workers.
    pub drained: bool,
}

impl ReconciliationResult {
    pub fn is_converged(&self) -> bool {
        self.status == ConvergenceStatus::Converged
    }

    pub fn outcome_of(&self, role: RoleKind) -> Option<RoleOutcome> {
        self.roles.iter().find(|r| r.role == role).map(|r| r.outcome)
    }

    pub fn phase_of(&self, role: RoleKind) -> Option<UnitPhase> {
        self.roles.iter().find(|r| r.role == role).map(|r| r.phase)
    }

    /// `(op, role)` pairs of the calls made, in order.
    pub fn action_summary(&self) -> Vec<(Operation, RoleKind)> {
        self.actions.iter().map(|a| (a.op, a.role)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_transitions() {
        assert_eq!(
            UnitPhase::during(Operation::Install, UnitPhase::Absent),
            UnitPhase::Installing
        );
        assert_eq!(
            UnitPhase::after(Operation::Install, UnitPhase::Installing),
            UnitPhase::Stopped
        );
        assert_eq!(
            UnitPhase::after(Operation::Start, UnitPhase::Stopped),
            UnitPhase::Running
        );
        assert_eq!(
            UnitPhase::during(Operation::Remove, UnitPhase::Stopped),
            UnitPhase::Removing
        );
        assert_eq!(
            UnitPhase::after(Operation::Remove, UnitPhase::Removing),
            UnitPhase::Absent
        );
    }

    #[test]
    fn status_serde() {
        let json = serde_json::to_string(&ConvergenceStatus::Partial).unwrap();
        assert_eq!(json, "\"partial\"");
    }

    #[test]
    fn pass_error_display() {
        let e = PassError {
            role: Some(RoleKind::Worker(1)),
            op: Operation::Start,
            error: AdapterError::failed("exit status 1"),
        };
        assert_eq!(e.to_string(), "start worker[1] failed: Failed: exit status 1");
        let e = PassError {
            role: None,
            op: Operation::Observe,
            error: AdapterError::timeout("slow"),
        };
        assert_eq!(e.to_string(), "observe failed: Timeout: slow");
    }
}
