//! The reconciliation controller.
//!
//! One pass: validate the configuration, resolve the topology, take a single
//! observed snapshot, plan, execute, and classify the outcome. Configuration
//! and validation errors abort the pass before the adapter is called at all.

use std::time::Duration;

use crate::config;
use crate::convergence::executor::ConvergenceExecutor;
use crate::convergence::planner::{self, Plan};
use crate::convergence::retry::{run_with_retry, RetryPolicy};
use crate::error::{AdapterError, ReconcileError};
use crate::guard;
use crate::infrastructure::ServiceAdapter;
use crate::resolver;
use crate::types::config::NodeConfig;
use crate::types::observed::ObservedState;
use crate::types::result::{
    ConvergenceStatus, Operation, PassError, ReconciliationResult, RoleOutcome, RoleReport,
};
use crate::types::role::Topology;

/// A plan computed without applying it.
#[derive(Debug, Clone)]
pub struct DryRun {
    pub topology: Topology,
    pub observed: ObservedState,
    pub plan: Plan,
}

pub struct Reconciler {
    executor: ConvergenceExecutor,
}

impl Reconciler {
    pub fn new(policy: RetryPolicy) -> Self {
        Reconciler {
            executor: ConvergenceExecutor::new(policy),
        }
    }

    /// Replace the backoff sleep (tests use a no-op).
    pub fn with_sleep(self, sleep: fn(Duration)) -> Self {
        Reconciler {
            executor: self.executor.with_sleep(sleep),
        }
    }

    /// Load `raw`, then reconcile it.
    pub fn reconcile_raw(
        &self,
        raw: &str,
        adapter: &mut dyn ServiceAdapter,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let config = config::load(raw)?;
        self.reconcile(&config, adapter)
    }

    /// Run one reconciliation pass.
    pub fn reconcile(
        &self,
        config: &NodeConfig,
        adapter: &mut dyn ServiceAdapter,
    ) -> Result<ReconciliationResult, ReconcileError> {
        guard::check(config)?;
        let topology = resolver::resolve(config);
        let drained = resolver::is_drained(config);
        if drained {
            tracing::info!("no workers configured, node is drained");
        }

        let observed = match self.observe(adapter) {
            Ok(observed) => observed,
            Err(error) => {
                tracing::error!(error = %error, "cannot observe service state");
                return Ok(ReconciliationResult {
                    actions: Vec::new(),
                    roles: Vec::new(),
                    status: ConvergenceStatus::Failed,
                    errors: vec![PassError {
                        role: None,
                        op: Operation::Observe,
                        error,
                    }],
                    drained,
                });
            }
        };

        let plan = planner::plan(&topology, &observed);
        tracing::debug!(steps = plan.len(), "planned");

        let execution = self.executor.execute(&topology, &observed, &plan, adapter);
        let status = classify(&execution.roles, execution.errors.is_empty());
        tracing::info!(
            status = ?status,
            actions = execution.actions.len(),
            errors = execution.errors.len(),
            "reconciliation pass complete"
        );

        Ok(ReconciliationResult {
            actions: execution.actions,
            roles: execution.roles,
            status,
            errors: execution.errors,
            drained,
        })
    }

    /// Validate, observe and plan without mutating anything.
    pub fn dry_run(
        &self,
        config: &NodeConfig,
        adapter: &mut dyn ServiceAdapter,
    ) -> Result<DryRun, ReconcileError> {
        guard::check(config)?;
        let topology = resolver::resolve(config);
        let observed = self.observe(adapter)?;
        let plan = planner::plan(&topology, &observed);
        Ok(DryRun {
            topology,
            observed,
            plan,
        })
    }

    fn observe(&self, adapter: &mut dyn ServiceAdapter) -> Result<ObservedState, AdapterError> {
        run_with_retry(
            self.executor.policy(),
            || adapter.observe(),
            self.executor.sleeper(),
        )
        .result
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

fn classify(roles: &[RoleReport], clean: bool) -> ConvergenceStatus {
    if clean {
        return ConvergenceStatus::Converged;
    }
    if roles.iter().any(|r| r.outcome == RoleOutcome::Converged) {
        ConvergenceStatus::Partial
    } else {
        ConvergenceStatus::Failed
    }
}
