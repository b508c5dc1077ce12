use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

/// Release channel of the externally installed import tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Stable,
    Beta,
    Edge,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Edge => "edge",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(Channel::Stable),
            "beta" => Ok(Channel::Beta),
            "edge" => Ok(Channel::Edge),
            other => Err(format!(
                "unknown channel {:?} (expected stable, beta or edge)",
                other
            )),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP(S) proxies handed to every managed unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<String>,
}

/// A validated, immutable configuration snapshot for one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Fleet-unique node id. `None` means the operator explicitly unset it.
    pub node_id: Option<u32>,
    pub is_primary: bool,
    pub controller_address: String,
    /// Kept wider than `u16` so an out-of-range port survives to the guard.
    pub controller_port: u32,
    pub worker_count: u32,
    pub publish_enabled: bool,
    /// Launchpad identity used for publishing.
    pub import_user: String,
    pub data_dir: String,
    pub source_dir: String,
    pub service_user: String,
    pub release_channel: Channel,
    #[serde(default)]
    pub proxy: ProxySettings,
}

impl Default for NodeConfig {
    /// The documented defaults of every configuration option.
    fn default() -> Self {
        NodeConfig {
            node_id: Some(0),
            is_primary: true,
            controller_address: "127.0.0.1".into(),
            controller_port: 1692,
            worker_count: 2,
            publish_enabled: true,
            import_user: "git-ubuntu-bot".into(),
            data_dir: "/var/local/git-ubuntu".into(),
            source_dir: "/home/ubuntu".into(),
            service_user: "ubuntu".into(),
            release_channel: Channel::Beta,
            proxy: ProxySettings::default(),
        }
    }
}

impl NodeConfig {
    /// Home directory of the account services run as.
    pub fn service_home(&self) -> String {
        format!("/home/{}", self.service_user)
    }
}
