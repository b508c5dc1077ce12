//! Convergence executor — applies a plan through a service adapter with retry.
//!
//! Steps run one at a time, in plan order. A failed step marks its role
//! failed and skips the role's remaining steps. A failed teardown skips the
//! whole bring-up phase, and a failed broker skips the poller.

use std::time::Duration;

use crate::convergence::planner::Plan;
use crate::convergence::retry::{run_with_retry, RetryPolicy};
use crate::infrastructure::{self, ServiceAdapter};
use crate::types::observed::{ObservedState, UnitState};
use crate::types::result::{ActionRecord, PassError, RoleOutcome, RoleReport, Step, UnitPhase};
use crate::types::role::{RoleKind, Topology};

/// What a plan execution did.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub actions: Vec<ActionRecord>,
    pub roles: Vec<RoleReport>,
    pub errors: Vec<PassError>,
}

/// Executes plans through a `ServiceAdapter`, retrying transient failures
/// according to the configured policy.
pub struct ConvergenceExecutor {
    policy: RetryPolicy,
    sleep: fn(Duration),
}

impl ConvergenceExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        ConvergenceExecutor {
            policy,
            sleep: std::thread::sleep,
        }
    }

    /// Replace the backoff sleep (tests use a no-op).
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sleeper(&self) -> fn(Duration) {
        self.sleep
    }

    pub fn execute(
        &self,
        topology: &Topology,
        observed: &ObservedState,
        plan: &Plan,
        adapter: &mut dyn ServiceAdapter,
    ) -> Execution {
        let mut ledger = RoleLedger::new(topology, observed, plan);
        let mut actions = Vec::new();
        let mut errors = Vec::new();
        let mut teardown_failed = false;

        for step in &plan.teardown {
            if ledger.is_blocked(step.kind()) {
                continue;
            }
            if !self.run_step(step, adapter, &mut ledger, &mut actions, &mut errors) {
                teardown_failed = true;
            }
        }

        for step in &plan.bring_up {
            let kind = step.kind();
            if ledger.is_blocked(kind) {
                continue;
            }
            if teardown_failed {
                tracing::warn!(role = %kind, "teardown incomplete, skipping bring-up");
                ledger.set_outcome(kind, RoleOutcome::Skipped);
                continue;
            }
            if kind == RoleKind::Poller && ledger.is_blocked(RoleKind::Broker) {
                tracing::warn!("broker did not converge, skipping poller");
                ledger.set_outcome(kind, RoleOutcome::Skipped);
                continue;
            }
            self.run_step(step, adapter, &mut ledger, &mut actions, &mut errors);
        }

        Execution {
            actions,
            roles: ledger.into_reports(),
            errors,
        }
    }

    /// Run one step. Returns false if it failed.
    fn run_step(
        &self,
        step: &Step,
        adapter: &mut dyn ServiceAdapter,
        ledger: &mut RoleLedger,
        actions: &mut Vec<ActionRecord>,
        errors: &mut Vec<PassError>,
    ) -> bool {
        let kind = step.kind();
        ledger.set_phase(kind, UnitPhase::during(step.op, ledger.phase(kind)));
        tracing::info!(unit = %step.role.unit, step = %step.op, "applying");

        let attempted = run_with_retry(
            &self.policy,
            || infrastructure::apply(&mut *adapter, step.op, &step.role),
            self.sleep,
        );

        let record = ActionRecord {
            role: kind,
            unit: step.role.unit.clone(),
            op: step.op,
            attempts: attempted.attempts,
            error: attempted.result.as_ref().err().cloned(),
        };
        actions.push(record);

        match attempted.result {
            Ok(()) => {
                ledger.set_phase(kind, UnitPhase::after(step.op, ledger.phase(kind)));
                true
            }
            Err(error) => {
                tracing::warn!(
                    unit = %step.role.unit,
                    step = %step.op,
                    attempts = attempted.attempts,
                    error = %error,
                    "step failed"
                );
                ledger.set_phase(kind, UnitPhase::Failed);
                ledger.set_outcome(kind, RoleOutcome::Failed);
                errors.push(PassError {
                    role: Some(kind),
                    op: step.op,
                    error,
                });
                false
            }
        }
    }
}

impl Default for ConvergenceExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

// ---------------------------------------------------------------------------
// RoleLedger
// ---------------------------------------------------------------------------

/// Per-role phase and outcome, in report order: torn-down roles first, then
/// the topology.
struct RoleLedger {
    entries: Vec<RoleReport>,
}

impl RoleLedger {
    fn new(topology: &Topology, observed: &ObservedState, plan: &Plan) -> Self {
        let mut entries: Vec<RoleReport> = Vec::new();
        let initial = |kind: RoleKind| match observed.get(kind).map(|u| u.state) {
            None => UnitPhase::Absent,
            Some(UnitState::Running) => UnitPhase::Running,
            Some(UnitState::Stopped | UnitState::Failed) => UnitPhase::Stopped,
        };

        let roles = plan
            .teardown
            .iter()
            .map(|s| (s.kind(), s.role.unit.clone()))
            .chain(topology.roles.iter().map(|r| (r.kind, r.unit.clone())));
        for (kind, unit) in roles {
            if entries.iter().any(|e| e.role == kind) {
                continue;
            }
            entries.push(RoleReport {
                role: kind,
                unit,
                outcome: RoleOutcome::Converged,
                phase: initial(kind),
            });
        }
        RoleLedger { entries }
    }

    fn entry(&mut self, kind: RoleKind) -> Option<&mut RoleReport> {
        self.entries.iter_mut().find(|e| e.role == kind)
    }

    fn phase(&self, kind: RoleKind) -> UnitPhase {
        self.entries
            .iter()
            .find(|e| e.role == kind)
            .map(|e| e.phase)
            .unwrap_or(UnitPhase::Absent)
    }

    fn set_phase(&mut self, kind: RoleKind, phase: UnitPhase) {
        if let Some(e) = self.entry(kind) {
            e.phase = phase;
        }
    }

    fn set_outcome(&mut self, kind: RoleKind, outcome: RoleOutcome) {
        if let Some(e) = self.entry(kind) {
            e.outcome = outcome;
        }
    }

    /// A role that already failed or was skipped takes no further steps.
    fn is_blocked(&self, kind: RoleKind) -> bool {
        self.entries
            .iter()
            .any(|e| e.role == kind && e.outcome != RoleOutcome::Converged)
    }

    fn into_reports(self) -> Vec<RoleReport> {
        self.entries
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::planner::plan;
    use crate::error::AdapterError;
    use crate::infrastructure::mock::MockAdapter;
    use crate::resolver::resolve;
    use crate::types::config::{BackoffStrategy, NodeConfig};
    use crate::types::result::Operation;

    fn no_sleep(_: Duration) {}

    fn executor(retries: u32) -> ConvergenceExecutor {
        ConvergenceExecutor::new(RetryPolicy::new(retries, BackoffStrategy::Fixed, 0))
            .with_sleep(no_sleep)
    }

    fn secondary(workers: u32) -> NodeConfig {
        NodeConfig {
            node_id: Some(2),
            is_primary: false,
            worker_count: workers,
            ..NodeConfig::default()
        }
    }

    fn run(
        exec: &ConvergenceExecutor,
        topo: &Topology,
        adapter: &mut MockAdapter,
    ) -> Execution {
        let observed = adapter.observe().unwrap();
        let p = plan(topo, &observed);
        exec.execute(topo, &observed, &p, adapter)
    }

    #[test]
    fn all_steps_succeed() {
        let topo = resolve(&NodeConfig::default());
        let mut adapter = MockAdapter::new();
        let out = run(&executor(3), &topo, &mut adapter);
        assert_eq!(out.actions.len(), 4);
        assert!(out.errors.is_empty());
        assert!(out.roles.iter().all(|r| r.outcome == RoleOutcome::Converged));
        assert!(out.roles.iter().all(|r| r.phase == UnitPhase::Running));
    }

    #[test]
    fn transient_failure_retried() {
        let topo = resolve(&secondary(1));
        let mut adapter = MockAdapter::new();
        adapter.fail_times(
            Operation::Install,
            Some(RoleKind::Worker(0)),
            AdapterError::timeout("install timed out"),
            2,
        );
        let out = run(&executor(3), &topo, &mut adapter);
        assert!(out.errors.is_empty());
        assert_eq!(out.actions[0].attempts, 3);
        assert!(out.actions[0].succeeded());
    }

    #[test]
    fn permanent_failure_not_retried_and_skips_role() {
        let topo = resolve(&secondary(2));
        let mut adapter = MockAdapter::new();
        adapter.fail(
            Operation::Install,
            Some(RoleKind::Worker(0)),
            AdapterError::permission_denied("Access denied"),
        );
        let out = run(&executor(3), &topo, &mut adapter);
        assert_eq!(out.actions[0].attempts, 1);
        // worker[0] start never attempted; worker[1] proceeds.
        assert_eq!(
            adapter.calls(),
            vec![
                (Operation::Install, RoleKind::Worker(0)),
                (Operation::Install, RoleKind::Worker(1)),
                (Operation::Start, RoleKind::Worker(1)),
            ]
        );
        assert_eq!(out.roles[0].outcome, RoleOutcome::Failed);
        assert_eq!(out.roles[0].phase, UnitPhase::Failed);
        assert_eq!(out.roles[1].outcome, RoleOutcome::Converged);
    }

    #[test]
    fn broker_failure_skips_poller() {
        let topo = resolve(&NodeConfig::default());
        let mut adapter = MockAdapter::new();
        adapter.fail(
            Operation::Start,
            Some(RoleKind::Broker),
            AdapterError::failed("exit 1"),
        );
        let out = run(&executor(0), &topo, &mut adapter);
        assert_eq!(
            adapter.calls(),
            vec![
                (Operation::Install, RoleKind::Broker),
                (Operation::Start, RoleKind::Broker),
            ]
        );
        let poller = out.roles.iter().find(|r| r.role == RoleKind::Poller).unwrap();
        assert_eq!(poller.outcome, RoleOutcome::Skipped);
        assert_eq!(poller.phase, UnitPhase::Absent);
    }

    #[test]
    fn teardown_failure_blocks_bring_up() {
        let workers = resolve(&secondary(1));
        let mut adapter = MockAdapter::new().with_running(&workers.roles);
        adapter.fail(
            Operation::Stop,
            Some(RoleKind::Worker(0)),
            AdapterError::failed("stuck"),
        );
        let topo = resolve(&NodeConfig::default());
        let out = run(&executor(0), &topo, &mut adapter);
        assert_eq!(adapter.calls(), vec![(Operation::Stop, RoleKind::Worker(0))]);
        assert_eq!(out.errors.len(), 1);
        let outcomes: Vec<_> = out.roles.iter().map(|r| (r.role, r.outcome)).collect();
        assert_eq!(
            outcomes,
            vec![
                (RoleKind::Worker(0), RoleOutcome::Failed),
                (RoleKind::Broker, RoleOutcome::Skipped),
                (RoleKind::Poller, RoleOutcome::Skipped),
            ]
        );
    }

    #[test]
    fn torn_down_roles_end_absent() {
        let before = resolve(&secondary(3));
        let mut adapter = MockAdapter::new().with_running(&before.roles);
        let out = run(&executor(0), &resolve(&secondary(1)), &mut adapter);
        let w2 = out.roles.iter().find(|r| r.role == RoleKind::Worker(2)).unwrap();
        assert_eq!(w2.phase, UnitPhase::Absent);
        assert_eq!(w2.outcome, RoleOutcome::Converged);
        assert_eq!(adapter.installed(), vec![RoleKind::Worker(0)]);
    }
}
