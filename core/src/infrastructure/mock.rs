//! Mock service adapter for testing.
//!
//! Keeps an in-memory table of installed units, records every call, and can be
//! scripted to fail specific operations, making it easy to write deterministic
//! tests for the reconciler.

use std::collections::BTreeMap;

use crate::error::{AdapterError, AdapterErrorKind};
use crate::types::observed::{ObservedState, ObservedUnit, UnitState};
use crate::types::result::Operation;
use crate::types::role::{RoleKind, ServiceRole, UnitSpec};

use super::ServiceAdapter;

#[derive(Debug, Clone)]
struct MockUnit {
    unit: String,
    state: UnitState,
    spec: UnitSpec,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    op: Operation,
    role: Option<RoleKind>,
    error: AdapterError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

/// A test double that behaves like a well-mannered service manager.
#[derive(Debug, Default)]
pub struct MockAdapter {
    units: BTreeMap<RoleKind, MockUnit>,
    /// Every call made, in order, including observes (with no role).
    log: Vec<(Operation, Option<RoleKind>)>,
    failures: Vec<ScriptedFailure>,
}

impl MockAdapter {
    pub fn new() -> Self {
        MockAdapter::default()
    }

    /// Pre-install a unit for `role` in the given state.
    pub fn with_unit(mut self, role: &ServiceRole, state: UnitState) -> Self {
        self.put_unit(role.kind, &role.unit, role.spec.clone(), state);
        self
    }

    /// Pre-install every role in `roles` as running.
    pub fn with_running(mut self, roles: &[ServiceRole]) -> Self {
        for role in roles {
            self.put_unit(role.kind, &role.unit, role.spec.clone(), UnitState::Running);
        }
        self
    }

    /// Make `op` on `role` fail every time. `role: None` matches any role.
    pub fn fail(&mut self, op: Operation, role: Option<RoleKind>, error: AdapterError) {
        self.failures.push(ScriptedFailure {
            op,
            role,
            error,
            remaining: None,
        });
    }

    /// Make `op` on `role` fail the next `times` calls, then succeed.
    pub fn fail_times(
        &mut self,
        op: Operation,
        role: Option<RoleKind>,
        error: AdapterError,
        times: u32,
    ) {
        self.failures.push(ScriptedFailure {
            op,
            role,
            error,
            remaining: Some(times),
        });
    }

    /// Simulate drift: change a unit's state behind the controller's back.
    pub fn set_state(&mut self, role: RoleKind, state: UnitState) {
        if let Some(unit) = self.units.get_mut(&role) {
            unit.state = state;
        }
    }

    pub fn state_of(&self, role: RoleKind) -> Option<UnitState> {
        self.units.get(&role).map(|u| u.state)
    }

    pub fn spec_of(&self, role: RoleKind) -> Option<&UnitSpec> {
        self.units.get(&role).map(|u| &u.spec)
    }

    pub fn installed(&self) -> Vec<RoleKind> {
        self.units.keys().copied().collect()
    }

    /// Mutating calls, in order.
    pub fn calls(&self) -> Vec<(Operation, RoleKind)> {
        self.log
            .iter()
            .filter_map(|(op, role)| role.map(|r| (*op, r)))
            .collect()
    }

    /// Number of calls of any kind, observes included.
    pub fn total_calls(&self) -> usize {
        self.log.len()
    }

    pub fn observe_count(&self) -> usize {
        self.log
            .iter()
            .filter(|(op, _)| *op == Operation::Observe)
            .count()
    }

    /// Clear the call log, keeping units and scripted failures.
    pub fn clear_calls(&mut self) {
        self.log.clear();
    }

    fn put_unit(&mut self, kind: RoleKind, unit: &str, spec: UnitSpec, state: UnitState) {
        self.units.insert(
            kind,
            MockUnit {
                unit: unit.to_string(),
                state,
                spec,
            },
        );
    }

    fn record(&mut self, op: Operation, role: Option<RoleKind>) -> Result<(), AdapterError> {
        self.log.push((op, role));
        let hit = self.failures.iter_mut().find(|f| {
            f.op == op
                && (f.role.is_none() || f.role == role)
                && f.remaining.map_or(true, |n| n > 0)
        });
        match hit {
            Some(failure) => {
                if let Some(ref mut n) = failure.remaining {
                    *n -= 1;
                }
                Err(failure.error.clone())
            }
            None => Ok(()),
        }
    }

    fn require(&mut self, role: RoleKind) -> Result<&mut MockUnit, AdapterError> {
        self.units.get_mut(&role).ok_or_else(|| {
            AdapterError::new(
                AdapterErrorKind::NotFound,
                format!("mock: {} is not installed", role),
            )
        })
    }
}

impl ServiceAdapter for MockAdapter {
    fn observe(&mut self) -> Result<ObservedState, AdapterError> {
        self.record(Operation::Observe, None)?;
        let units = self
            .units
            .iter()
            .map(|(kind, u)| ObservedUnit {
                kind: *kind,
                unit: u.unit.clone(),
                state: u.state,
                spec: Some(u.spec.clone()),
            })
            .collect();
        Ok(ObservedState::new(units))
    }

    fn install(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.record(Operation::Install, Some(role.kind))?;
        // A rewrite leaves a running process alone, like a unit file edit would.
        let state = self
            .units
            .get(&role.kind)
            .map(|u| u.state)
            .unwrap_or(UnitState::Stopped);
        self.put_unit(role.kind, &role.unit, role.spec.clone(), state);
        Ok(())
    }

    fn start(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.record(Operation::Start, Some(role.kind))?;
        self.require(role.kind)?.state = UnitState::Running;
        Ok(())
    }

    fn stop(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.record(Operation::Stop, Some(role.kind))?;
        self.require(role.kind)?.state = UnitState::Stopped;
        Ok(())
    }

    fn remove(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.record(Operation::Remove, Some(role.kind))?;
        if self.require(role.kind)?.state == UnitState::Running {
            return Err(AdapterError::failed(format!(
                "mock: refusing to remove running {}",
                role.kind
            )));
        }
        self.units.remove(&role.kind);
        Ok(())
    }
}
