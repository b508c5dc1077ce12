//! Node agent — the trigger loop that runs reconciliation passes.
//!
//! The agent is single-threaded: exactly one pass runs at a time, and a pass
//! always runs to completion. Producers (a config watcher, a restart or
//! upgrade hook) send `Trigger`s through a cloneable `NodeAgentHandle`. The
//! agent is the single consumer.
//!
//! # Tick
//!
//! 1. Drain the channel into the `Coalescer`; later triggers supersede earlier
//!    ones and only the newest configuration is kept.
//! 2. Run at most one pass for whatever is pending.
//!
//! Triggers that arrive while a pass runs stay in the channel and are
//! coalesced on the next tick.

use std::path::PathBuf;
use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::convergence::reconciler::Reconciler;
use crate::error::ReconcileError;
use crate::infrastructure::ServiceAdapter;
use crate::lock::NodeLock;
use crate::status::NodeStatus;
use crate::types::config::ProxySettings;
use crate::types::result::ReconciliationResult;

/// Events that can be sent to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A new configuration document.
    ConfigChanged { raw: String },
    /// The node or controller restarted; reconcile the last known configuration.
    Restart,
    /// The import tool was upgraded; reconcile the last known configuration.
    Upgrade,
    Shutdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    ConfigChanged,
    Restart,
    Upgrade,
}

// ---------------------------------------------------------------------------
// Coalescer
// ---------------------------------------------------------------------------

/// A pass that is due to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRequest {
    pub raw: String,
    pub reason: TriggerReason,
    /// Triggers folded into this request beyond the first.
    pub superseded: u32,
}

/// Holds at most one pending pass.
#[derive(Debug, Default)]
pub struct Coalescer {
    latest_raw: Option<String>,
    pending: Option<(TriggerReason, u32)>,
}

impl Coalescer {
    pub fn new() -> Self {
        Coalescer::default()
    }

    /// Seed the configuration used by restart and upgrade triggers.
    pub fn with_config(raw: impl Into<String>) -> Self {
        Coalescer {
            latest_raw: Some(raw.into()),
            pending: None,
        }
    }

    /// Fold a trigger into the pending pass. `Shutdown` is ignored here.
    pub fn submit(&mut self, trigger: Trigger) {
        let reason = match trigger {
            Trigger::ConfigChanged { raw } => {
                self.latest_raw = Some(raw);
                TriggerReason::ConfigChanged
            }
            Trigger::Restart => TriggerReason::Restart,
            Trigger::Upgrade => TriggerReason::Upgrade,
            Trigger::Shutdown => return,
        };
        self.pending = Some(match self.pending {
            None => (reason, 0),
            Some((_, superseded)) => (reason, superseded + 1),
        });
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending pass, if any, with the newest configuration.
    ///
    /// A pending trigger with no configuration ever seen is dropped.
    pub fn take(&mut self) -> Option<PassRequest> {
        let (reason, superseded) = self.pending.take()?;
        match self.latest_raw {
            Some(ref raw) => Some(PassRequest {
                raw: raw.clone(),
                reason,
                superseded,
            }),
            None => {
                tracing::warn!(reason = ?reason, "trigger before any configuration, ignoring");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle allowing producers to send triggers to the agent.
#[derive(Clone)]
pub struct NodeAgentHandle {
    sender: mpsc::Sender<Trigger>,
}

impl NodeAgentHandle {
    pub fn send(&self, trigger: Trigger) -> Result<(), String> {
        self.sender
            .send(trigger)
            .map_err(|e| format!("Channel send failed: {}", e))
    }

    pub fn config_changed(&self, raw: impl Into<String>) -> Result<(), String> {
        self.send(Trigger::ConfigChanged { raw: raw.into() })
    }

    pub fn shutdown(&self) -> Result<(), String> {
        self.send(Trigger::Shutdown)
    }
}

// ---------------------------------------------------------------------------
// NodeAgent
// ---------------------------------------------------------------------------

/// What the last pass produced.
#[derive(Debug)]
pub enum PassOutcome {
    Reconciled(ReconciliationResult),
    /// The configuration was rejected before any unit was touched.
    Rejected(ReconcileError),
    /// Another controller process held the node lock.
    LockUnavailable(String),
}

/// Configuration for the agent loop.
pub struct AgentConfig {
    /// Lock file guarding passes across processes. `None` disables locking.
    pub lock_path: Option<PathBuf>,
    pub lock_timeout_ms: u64,
    /// Proxies attached to every loaded configuration.
    pub proxy: ProxySettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            lock_path: None,
            lock_timeout_ms: 30_000,
            proxy: ProxySettings::default(),
        }
    }
}

pub struct NodeAgent<A: ServiceAdapter> {
    adapter: A,
    reconciler: Reconciler,
    config: AgentConfig,
    receiver: mpsc::Receiver<Trigger>,
    handle: NodeAgentHandle,
    coalescer: Coalescer,
    status: NodeStatus,
    passes: u32,
    last_outcome: Option<PassOutcome>,
}

impl<A: ServiceAdapter> NodeAgent<A> {
    pub fn new(adapter: A, reconciler: Reconciler) -> Self {
        Self::with_config(adapter, reconciler, AgentConfig::default())
    }

    pub fn with_config(adapter: A, reconciler: Reconciler, config: AgentConfig) -> Self {
        let (sender, receiver) = mpsc::channel();
        NodeAgent {
            adapter,
            reconciler,
            config,
            receiver,
            handle: NodeAgentHandle { sender },
            coalescer: Coalescer::new(),
            status: NodeStatus::Maintenance("waiting for configuration".into()),
            passes: 0,
            last_outcome: None,
        }
    }

    /// Get a handle for sending triggers to this agent.
    pub fn handle(&self) -> NodeAgentHandle {
        self.handle.clone()
    }

    /// Run until `Shutdown` is received or every handle is dropped.
    pub fn run(&mut self) {
        loop {
            match self.receiver.recv() {
                Ok(Trigger::Shutdown) | Err(_) => break,
                Ok(trigger) => self.coalescer.submit(trigger),
            }
            if self.tick() {
                break;
            }
        }
        tracing::info!(passes = self.passes, "node agent stopped");
    }

    /// Drain pending triggers and run at most one pass.
    /// Returns true if shutdown was requested.
    pub fn tick(&mut self) -> bool {
        let shutdown = self.drain_channel();
        if let Some(request) = self.coalescer.take() {
            self.run_pass(request);
        }
        shutdown
    }

    /// Returns true if a Shutdown trigger was received.
    fn drain_channel(&mut self) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(Trigger::Shutdown) => return true,
                Ok(trigger) => self.coalescer.submit(trigger),
                Err(mpsc::TryRecvError::Empty) => return false,
                Err(mpsc::TryRecvError::Disconnected) => return true,
            }
        }
    }

    fn run_pass(&mut self, request: PassRequest) {
        self.passes += 1;
        tracing::info!(
            pass = self.passes,
            reason = ?request.reason,
            superseded = request.superseded,
            "starting reconciliation pass"
        );
        self.status = NodeStatus::Maintenance("reconciling".into());

        let _lock = match self.config.lock_path {
            Some(ref path) => match NodeLock::acquire(path, self.config.lock_timeout_ms) {
                Ok(lock) => Some(lock),
                Err(e) => {
                    tracing::error!(error = %e, "cannot take node lock, skipping pass");
                    self.status = NodeStatus::Blocked(e.to_string());
                    self.last_outcome = Some(PassOutcome::LockUnavailable(e.to_string()));
                    return;
                }
            },
            None => None,
        };

        let outcome = match config::load(&request.raw) {
            Ok(mut node_config) => {
                node_config.proxy = self.config.proxy.clone();
                self.reconciler.reconcile(&node_config, &mut self.adapter)
            }
            Err(e) => Err(ReconcileError::from(e)),
        };

        match outcome {
            Ok(result) => {
                self.status = NodeStatus::from_result(&result);
                self.last_outcome = Some(PassOutcome::Reconciled(result));
            }
            Err(e) => {
                tracing::error!(error = %e, "configuration rejected, no units touched");
                self.status = NodeStatus::from_error(&e);
                self.last_outcome = Some(PassOutcome::Rejected(e));
            }
        }
        tracing::info!(status = %self.status, "pass finished");
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    /// Number of passes started.
    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn last_outcome(&self) -> Option<&PassOutcome> {
        self.last_outcome.as_ref()
    }

    /// Borrow the adapter for inspection (testing).
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
