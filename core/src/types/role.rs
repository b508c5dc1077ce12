use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix shared by every unit this controller owns.
pub const UNIT_PREFIX: &str = "git-ubuntu-importer-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Broker,
    Poller,
    Worker(u32),
}

impl RoleKind {
    /// Systemd unit name for this role.
    pub fn unit_name(&self) -> String {
        match self {
            RoleKind::Broker => format!("{}broker.service", UNIT_PREFIX),
            RoleKind::Poller => format!("{}poller.service", UNIT_PREFIX),
            RoleKind::Worker(i) => format!("{}worker-{}.service", UNIT_PREFIX, i),
        }
    }

    /// Inverse of `unit_name`. Returns `None` for units we do not own.
    pub fn from_unit_name(unit: &str) -> Option<RoleKind> {
        let stem = unit.strip_prefix(UNIT_PREFIX)?.strip_suffix(".service")?;
        match stem {
            "broker" => Some(RoleKind::Broker),
            "poller" => Some(RoleKind::Poller),
            _ => stem
                .strip_prefix("worker-")
                .and_then(|i| i.parse::<u32>().ok())
                .map(RoleKind::Worker),
        }
    }

    pub fn is_primary_role(&self) -> bool {
        matches!(self, RoleKind::Broker | RoleKind::Poller)
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Broker => f.write_str("broker"),
            RoleKind::Poller => f.write_str("poller"),
            RoleKind::Worker(i) => write!(f, "worker[{}]", i),
        }
    }
}

/// Everything that defines how a unit runs. Two units with equal specs are
/// interchangeable; any difference means the running unit is stale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitSpec {
    pub exec: Vec<String>,
    pub user: String,
    pub working_dir: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Absent,
    Stopped,
    Running,
}

/// One service the node should (or should no longer) run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRole {
    pub kind: RoleKind,
    pub unit: String,
    pub spec: UnitSpec,
    pub desired: DesiredState,
}

impl ServiceRole {
    pub fn new(kind: RoleKind, spec: UnitSpec) -> Self {
        ServiceRole {
            kind,
            unit: kind.unit_name(),
            spec,
            desired: DesiredState::Running,
        }
    }

    /// A role that is being torn down, described by what is installed.
    pub fn for_teardown(kind: RoleKind, unit: &str, spec: UnitSpec) -> Self {
        ServiceRole {
            kind,
            unit: unit.to_string(),
            spec,
            desired: DesiredState::Absent,
        }
    }
}

/// The ordered set of roles a node requires.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    pub roles: Vec<ServiceRole>,
}

impl Topology {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn get(&self, kind: RoleKind) -> Option<&ServiceRole> {
        self.roles.iter().find(|r| r.kind == kind)
    }

    pub fn kinds(&self) -> Vec<RoleKind> {
        self.roles.iter().map(|r| r.kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_names_round_trip_through_parser() {
        let kinds = [
            RoleKind::Broker,
            RoleKind::Poller,
            RoleKind::Worker(0),
            RoleKind::Worker(17),
        ];
        for kind in kinds {
            assert_eq!(RoleKind::from_unit_name(&kind.unit_name()), Some(kind));
        }
    }

    #[test]
    fn foreign_units_are_not_ours() {
        assert_eq!(RoleKind::from_unit_name("ssh.service"), None);
        assert_eq!(RoleKind::from_unit_name("git-ubuntu-importer-worker-x.service"), None);
        assert_eq!(RoleKind::from_unit_name("git-ubuntu-importer-broker.timer"), None);
    }

    #[test]
    fn role_display() {
        assert_eq!(RoleKind::Worker(3).to_string(), "worker[3]");
        assert_eq!(RoleKind::Broker.to_string(), "broker");
    }

    #[test]
    fn role_kind_serde() {
        let json = serde_json::to_string(&RoleKind::Worker(2)).unwrap();
        assert_eq!(json, "{\"worker\":2}");
        let json = serde_json::to_string(&RoleKind::Poller).unwrap();
        assert_eq!(json, "\"poller\"");
    }
}
