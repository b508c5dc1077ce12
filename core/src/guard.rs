//! Local checks of fleet invariants, run before any unit is touched.
//!
//! Fleet-wide properties (node id uniqueness, a shared controller port) cannot
//! be verified from one node. The guard checks that they are well-formed and
//! exposes them as `FleetFacts` for an operator or orchestrator to compare.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::MAX_WORKERS;
use crate::error::ValidationError;
use crate::types::config::NodeConfig;

/// Configuration facts that must agree (port, address) or differ (node id)
/// across the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetFacts {
    pub node_id: u32,
    pub primary: bool,
    pub controller_address: String,
    pub controller_port: u16,
}

/// Validate `config`, returning the first violation found.
pub fn check(config: &NodeConfig) -> Result<(), ValidationError> {
    if config.node_id.is_none() {
        return Err(ValidationError::NodeIdUnset);
    }
    valid_port(config.controller_port)?;
    if config.worker_count > MAX_WORKERS {
        return Err(ValidationError::TooManyWorkers(config.worker_count));
    }

    if !is_valid_host(&config.controller_address) {
        return Err(ValidationError::BadControllerAddress(
            config.controller_address.clone(),
        ));
    }
    if config.service_user.trim().is_empty() {
        return Err(ValidationError::EmptyIdentity("system_user"));
    }
    if config.import_user.trim().is_empty() {
        return Err(ValidationError::EmptyIdentity("lpuser"));
    }

    if config.is_primary {
        require_absolute("data_directory", &config.data_dir)?;
        require_absolute("source_directory", &config.source_dir)?;
    }
    Ok(())
}

/// Validate and extract the facts to compare across nodes.
pub fn fleet_facts(config: &NodeConfig) -> Result<FleetFacts, ValidationError> {
    check(config)?;
    Ok(FleetFacts {
        node_id: config.node_id.ok_or(ValidationError::NodeIdUnset)?,
        primary: config.is_primary,
        controller_address: config.controller_address.clone(),
        controller_port: valid_port(config.controller_port)?,
    })
}

fn valid_port(port: u32) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(ValidationError::PortOutOfRange(port)),
    }
}

fn require_absolute(field: &'static str, path: &str) -> Result<(), ValidationError> {
    if Path::new(path).is_absolute() {
        Ok(())
    } else {
        Err(ValidationError::RelativePath {
            field,
            path: path.to_string(),
        })
    }
}

/// An IP address or an RFC 1123 host name.
fn is_valid_host(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
