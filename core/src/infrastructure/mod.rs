//! Service adapters — the boundary between the controller and the host's
//! service manager.
//!
//! Provides the `ServiceAdapter` trait and implementations for systemd
//! (production) and an in-memory mock (testing). The controller treats every
//! call as slow and fallible and never assumes a call is atomic with the
//! `observe()` that preceded it.

pub mod mock;
pub mod runner;
pub mod systemd;

use crate::error::AdapterError;
use crate::types::observed::ObservedState;
use crate::types::result::Operation;
use crate::types::role::ServiceRole;

/// Installs, starts, stops and removes named service units.
pub trait ServiceAdapter {
    /// Report every managed unit currently installed on the node.
    fn observe(&mut self) -> Result<ObservedState, AdapterError>;

    /// Install (or rewrite) the unit for `role`, leaving it stopped.
    fn install(&mut self, role: &ServiceRole) -> Result<(), AdapterError>;

    fn start(&mut self, role: &ServiceRole) -> Result<(), AdapterError>;

    fn stop(&mut self, role: &ServiceRole) -> Result<(), AdapterError>;

    /// Uninstall the unit for `role`. The unit must already be stopped.
    fn remove(&mut self, role: &ServiceRole) -> Result<(), AdapterError>;
}

/// Dispatch a unit operation to the matching adapter method.
pub fn apply(
    adapter: &mut dyn ServiceAdapter,
    op: Operation,
    role: &ServiceRole,
) -> Result<(), AdapterError> {
    match op {
        Operation::Install => adapter.install(role),
        Operation::Start => adapter.start(role),
        Operation::Stop => adapter.stop(role),
        Operation::Remove => adapter.remove(role),
        Operation::Observe => adapter.observe().map(|_| ()),
    }
}
