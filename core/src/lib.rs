//! Importer node core — converges a git-ubuntu importer node onto the service
//! topology its configuration declares.
//!
//! The pipeline for one pass is `config` → `guard` → `resolver` →
//! `convergence` (plan, then execute through an `infrastructure` adapter).
//! `agent` serializes passes and coalesces the triggers that request them.

pub mod agent;
pub mod config;
pub mod convergence;
pub mod error;
pub mod guard;
pub mod infrastructure;
pub mod lock;
pub mod resolver;
pub mod status;
pub mod types;
