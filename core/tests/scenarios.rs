//! End-to-end reconciliation scenarios against the mock adapter.

use std::time::Duration;

use importer_node_core::agent::{NodeAgent, NodeAgentHandle};
use importer_node_core::convergence::reconciler::Reconciler;
use importer_node_core::convergence::retry::RetryPolicy;
use importer_node_core::error::{AdapterError, ReconcileError, ValidationError};
use importer_node_core::infrastructure::mock::MockAdapter;
use importer_node_core::infrastructure::ServiceAdapter;
use importer_node_core::resolver;
use importer_node_core::types::config::{BackoffStrategy, NodeConfig};
use importer_node_core::types::observed::{ObservedState, UnitState};
use importer_node_core::types::result::{ConvergenceStatus, Operation, RoleOutcome, UnitPhase};
use importer_node_core::types::role::{RoleKind, ServiceRole};

fn no_sleep(_: Duration) {}

fn reconciler() -> Reconciler {
    Reconciler::new(RetryPolicy::new(2, BackoffStrategy::Fixed, 0)).with_sleep(no_sleep)
}

fn primary() -> NodeConfig {
    NodeConfig {
        node_id: Some(0),
        is_primary: true,
        ..NodeConfig::default()
    }
}

fn secondary(workers: u32) -> NodeConfig {
    NodeConfig {
        node_id: Some(7),
        is_primary: false,
        worker_count: workers,
        ..NodeConfig::default()
    }
}

#[test]
fn second_pass_is_a_no_op() {
    let mut adapter = MockAdapter::new();
    let cfg = secondary(3);
    let first = reconciler().reconcile(&cfg, &mut adapter).unwrap();
    assert!(first.is_converged());
    assert_eq!(first.actions.len(), 6);

    adapter.clear_calls();
    let second = reconciler().reconcile(&cfg, &mut adapter).unwrap();
    assert!(second.is_converged());
    assert!(second.actions.is_empty());
    assert!(adapter.calls().is_empty());
    assert_eq!(adapter.observe_count(), 1);
}

#[test]
fn primary_to_secondary_flip_never_mixes_roles() {
    let mut adapter = MockAdapter::new();
    reconciler().reconcile(&primary(), &mut adapter).unwrap();
    assert_eq!(adapter.installed(), vec![RoleKind::Broker, RoleKind::Poller]);

    adapter.clear_calls();
    let result = reconciler().reconcile(&secondary(2), &mut adapter).unwrap();
    assert!(result.is_converged());
    assert_eq!(
        adapter.calls(),
        vec![
            (Operation::Stop, RoleKind::Poller),
            (Operation::Remove, RoleKind::Poller),
            (Operation::Stop, RoleKind::Broker),
            (Operation::Remove, RoleKind::Broker),
            (Operation::Install, RoleKind::Worker(0)),
            (Operation::Start, RoleKind::Worker(0)),
            (Operation::Install, RoleKind::Worker(1)),
            (Operation::Start, RoleKind::Worker(1)),
        ]
    );
    assert_eq!(adapter.installed(), vec![RoleKind::Worker(0), RoleKind::Worker(1)]);
}

#[test]
fn secondary_to_primary_flip_removes_all_workers_first() {
    let mut adapter = MockAdapter::new();
    reconciler().reconcile(&secondary(2), &mut adapter).unwrap();
    adapter.clear_calls();

    reconciler().reconcile(&primary(), &mut adapter).unwrap();
    let calls = adapter.calls();
    let first_install = calls
        .iter()
        .position(|(op, _)| *op == Operation::Install)
        .unwrap();
    assert!(calls[..first_install]
        .iter()
        .all(|(_, kind)| matches!(kind, RoleKind::Worker(_))));
    assert_eq!(adapter.installed(), vec![RoleKind::Broker, RoleKind::Poller]);
}

#[test]
fn scale_down_removes_highest_workers_in_order() {
    let mut adapter = MockAdapter::new();
    reconciler().reconcile(&secondary(5), &mut adapter).unwrap();
    adapter.clear_calls();

    let result = reconciler().reconcile(&secondary(2), &mut adapter).unwrap();
    assert!(result.is_converged());
    assert_eq!(
        adapter.calls(),
        vec![
            (Operation::Stop, RoleKind::Worker(4)),
            (Operation::Remove, RoleKind::Worker(4)),
            (Operation::Stop, RoleKind::Worker(3)),
            (Operation::Remove, RoleKind::Worker(3)),
            (Operation::Stop, RoleKind::Worker(2)),
            (Operation::Remove, RoleKind::Worker(2)),
        ]
    );
    assert_eq!(adapter.installed(), vec![RoleKind::Worker(0), RoleKind::Worker(1)]);
}

#[test]
fn out_of_range_ports_make_no_adapter_calls() {
    for port in [0u32, 70000] {
        let mut adapter = MockAdapter::new();
        let cfg = NodeConfig {
            controller_port: port,
            ..secondary(2)
        };
        let err = reconciler().reconcile(&cfg, &mut adapter).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Validation(ValidationError::PortOutOfRange(p)) if p == port
        ));
        assert_eq!(adapter.total_calls(), 0);
    }
}

#[test]
fn out_of_range_port_in_document_is_a_config_error() {
    let mut adapter = MockAdapter::new();
    let err = reconciler()
        .reconcile_raw("primary: false\ncontroller_port: 70000\n", &mut adapter)
        .unwrap_err();
    match err {
        ReconcileError::Config(e) => assert_eq!(e.field(), Some("controller_port")),
        other => panic!("expected config error, got {:?}", other),
    }
    assert_eq!(adapter.total_calls(), 0);
}

/// Asserts the broker is running whenever the poller is started.
struct OrderCheckingAdapter {
    inner: MockAdapter,
    poller_started_after_broker: Option<bool>,
}

impl ServiceAdapter for OrderCheckingAdapter {
    fn observe(&mut self) -> Result<ObservedState, AdapterError> {
        self.inner.observe()
    }
    fn install(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.inner.install(role)
    }
    fn start(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        if role.kind == RoleKind::Poller {
            self.poller_started_after_broker =
                Some(self.inner.state_of(RoleKind::Broker) == Some(UnitState::Running));
        }
        self.inner.start(role)
    }
    fn stop(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.inner.stop(role)
    }
    fn remove(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.inner.remove(role)
    }
}

#[test]
fn broker_runs_before_poller_starts() {
    let mut adapter = OrderCheckingAdapter {
        inner: MockAdapter::new(),
        poller_started_after_broker: None,
    };
    let result = reconciler().reconcile(&primary(), &mut adapter).unwrap();
    assert!(result.is_converged());
    assert_eq!(adapter.poller_started_after_broker, Some(true));
}

#[test]
fn failed_broker_start_skips_poller() {
    let mut adapter = MockAdapter::new();
    adapter.fail(
        Operation::Start,
        Some(RoleKind::Broker),
        AdapterError::failed("exit 1"),
    );
    let result = reconciler().reconcile(&primary(), &mut adapter).unwrap();
    assert_eq!(result.status, ConvergenceStatus::Failed);
    assert_eq!(result.outcome_of(RoleKind::Poller), Some(RoleOutcome::Skipped));
    assert!(!adapter
        .calls()
        .iter()
        .any(|(_, kind)| *kind == RoleKind::Poller));
}

#[test]
fn one_failing_worker_leaves_a_partial_result() {
    let mut adapter = MockAdapter::new();
    adapter.fail(
        Operation::Start,
        Some(RoleKind::Worker(1)),
        AdapterError::failed("exit 1"),
    );
    let result = reconciler().reconcile(&secondary(3), &mut adapter).unwrap();
    assert_eq!(result.status, ConvergenceStatus::Partial);
    assert_eq!(result.outcome_of(RoleKind::Worker(0)), Some(RoleOutcome::Converged));
    assert_eq!(result.outcome_of(RoleKind::Worker(1)), Some(RoleOutcome::Failed));
    assert_eq!(result.outcome_of(RoleKind::Worker(2)), Some(RoleOutcome::Converged));
    assert_eq!(result.phase_of(RoleKind::Worker(1)), Some(UnitPhase::Failed));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].role, Some(RoleKind::Worker(1)));
}

#[test]
fn transient_start_failure_is_retried_to_success() {
    let mut adapter = MockAdapter::new();
    adapter.fail_times(
        Operation::Start,
        Some(RoleKind::Worker(0)),
        AdapterError::timeout("slow"),
        2,
    );
    let result = reconciler().reconcile(&secondary(1), &mut adapter).unwrap();
    assert!(result.is_converged());
    let start = result
        .actions
        .iter()
        .find(|a| a.op == Operation::Start)
        .unwrap();
    assert_eq!(start.attempts, 3);
}

#[test]
fn changed_options_restart_stale_workers() {
    let mut adapter = MockAdapter::new();
    reconciler().reconcile(&secondary(1), &mut adapter).unwrap();
    adapter.clear_calls();

    let cfg = NodeConfig {
        publish_enabled: false,
        ..secondary(1)
    };
    reconciler().reconcile(&cfg, &mut adapter).unwrap();
    assert_eq!(
        adapter.calls(),
        vec![
            (Operation::Stop, RoleKind::Worker(0)),
            (Operation::Install, RoleKind::Worker(0)),
            (Operation::Start, RoleKind::Worker(0)),
        ]
    );
    let spec = adapter.spec_of(RoleKind::Worker(0)).unwrap();
    assert!(spec.exec.iter().any(|a| a == "--no-push"));
}

#[test]
fn crashed_unit_is_restarted() {
    let cfg = secondary(2);
    let roles = resolver::resolve(&cfg).roles;
    let mut adapter = MockAdapter::new().with_running(&roles);
    adapter.set_state(RoleKind::Worker(1), UnitState::Failed);

    reconciler().reconcile(&cfg, &mut adapter).unwrap();
    assert_eq!(adapter.calls(), vec![(Operation::Start, RoleKind::Worker(1))]);
}

/// Sends further configuration while the first pass is observing.
struct ChattyAdapter {
    inner: MockAdapter,
    handle: Option<NodeAgentHandle>,
    pending: Vec<String>,
}

impl ServiceAdapter for ChattyAdapter {
    fn observe(&mut self) -> Result<ObservedState, AdapterError> {
        if let Some(handle) = self.handle.as_ref() {
            for raw in self.pending.drain(..) {
                handle.config_changed(raw).unwrap();
            }
        }
        self.inner.observe()
    }
    fn install(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.inner.install(role)
    }
    fn start(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.inner.start(role)
    }
    fn stop(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.inner.stop(role)
    }
    fn remove(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.inner.remove(role)
    }
}

#[test]
fn triggers_during_a_pass_coalesce_into_one_follow_up() {
    let adapter = ChattyAdapter {
        inner: MockAdapter::new(),
        handle: None,
        pending: vec![
            "primary: false\nnode_id: 3\nworkers: 4\n".to_string(),
            "primary: false\nnode_id: 3\nworkers: 1\n".to_string(),
        ],
    };
    let mut agent = NodeAgent::new(adapter, reconciler());
    let handle = agent.handle();
    agent.adapter_mut().handle = Some(handle.clone());

    handle
        .config_changed("primary: false\nnode_id: 3\nworkers: 2\n")
        .unwrap();
    agent.tick();
    assert_eq!(agent.passes(), 1);
    assert_eq!(
        agent.adapter().inner.installed(),
        vec![RoleKind::Worker(0), RoleKind::Worker(1)]
    );

    agent.tick();
    assert_eq!(agent.passes(), 2);
    assert_eq!(agent.adapter().inner.installed(), vec![RoleKind::Worker(0)]);

    agent.tick();
    assert_eq!(agent.passes(), 2);
    assert_eq!(agent.adapter().inner.observe_count(), 2);
}
