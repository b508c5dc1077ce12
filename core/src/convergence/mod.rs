//! Convergence engine — diffs desired vs observed state and drives the node
//! toward the desired topology.
//!
//! The `planner` module computes the minimal ordered step list. The `executor`
//! applies it through a service adapter, with the retry policies in `retry`.
//! The `reconciler` ties one full pass together.

pub mod executor;
pub mod planner;
pub mod reconciler;
pub mod retry;
