//! Operator-facing node status, derived after every pass.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::types::result::{ConvergenceStatus, ReconciliationResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum NodeStatus {
    /// A pass is in progress.
    Maintenance(String),
    Active(String),
    /// Operator action needed.
    Blocked(String),
}

impl NodeStatus {
    pub fn from_result(result: &ReconciliationResult) -> NodeStatus {
        match result.status {
            ConvergenceStatus::Converged if result.drained => {
                NodeStatus::Active("Drained: no workers configured".into())
            }
            ConvergenceStatus::Converged => NodeStatus::Active("Ready".into()),
            ConvergenceStatus::Partial | ConvergenceStatus::Failed => {
                let first = result
                    .errors
                    .first()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".into());
                let extra = result.errors.len().saturating_sub(1);
                if extra > 0 {
                    NodeStatus::Blocked(format!("{} (+{} more)", first, extra))
                } else {
                    NodeStatus::Blocked(first)
                }
            }
        }
    }

    pub fn from_error(error: &ReconcileError) -> NodeStatus {
        NodeStatus::Blocked(error.to_string())
    }

    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Active(_))
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Maintenance(m) => write!(f, "maintenance: {}", m),
            NodeStatus::Active(m) => write!(f, "active: {}", m),
            NodeStatus::Blocked(m) => write!(f, "blocked: {}", m),
        }
    }
}
