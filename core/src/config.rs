//! Configuration model: turns a YAML option document into a `NodeConfig`.
//!
//! Every option is optional and falls back to its documented default. Unknown
//! keys are rejected. Integer options are read as `i64` so that negative values
//! are reported against the field that carried them.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::config::{Channel, NodeConfig, ProxySettings};

/// Environment variables carrying the model-level proxy settings.
pub const HTTP_PROXY_ENV: &str = "JUJU_CHARM_HTTP_PROXY";
pub const HTTPS_PROXY_ENV: &str = "JUJU_CHARM_HTTPS_PROXY";

/// Most workers one secondary node may run.
pub const MAX_WORKERS: u32 = 256;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_controller_ip")]
    controller_ip: String,
    #[serde(default = "default_controller_port")]
    controller_port: i64,
    #[serde(default = "default_channel")]
    channel: String,
    #[serde(default = "default_data_directory")]
    data_directory: String,
    #[serde(default = "default_lpuser")]
    lpuser: String,
    #[serde(default = "default_node_id")]
    node_id: Option<i64>,
    #[serde(default = "default_true")]
    primary: bool,
    #[serde(default = "default_true")]
    publish: bool,
    #[serde(default = "default_source_directory")]
    source_directory: String,
    #[serde(default = "default_system_user")]
    system_user: String,
    #[serde(default = "default_workers")]
    workers: i64,
}

fn default_controller_ip() -> String {
    "127.0.0.1".into()
}

fn default_controller_port() -> i64 {
    1692
}

fn default_channel() -> String {
    "beta".into()
}

fn default_data_directory() -> String {
    "/var/local/git-ubuntu".into()
}

fn default_lpuser() -> String {
    "git-ubuntu-bot".into()
}

fn default_node_id() -> Option<i64> {
    Some(0)
}

fn default_true() -> bool {
    true
}

fn default_source_directory() -> String {
    "/home/ubuntu".into()
}

fn default_system_user() -> String {
    "ubuntu".into()
}

fn default_workers() -> i64 {
    2
}


/// Parse and validate a configuration document. Proxies are left empty.
pub fn load(raw: &str) -> Result<NodeConfig, ConfigError> {
    // An empty document means "all defaults".
    let raw_config: RawConfig = if raw.trim().is_empty() {
        serde_yaml::from_str("{}")
    } else {
        serde_yaml::from_str(raw)
    }
    .map_err(parse_error)?;

    let controller_port = int_in_range(
        "controller_port",
        raw_config.controller_port,
        1,
        65535,
        "must be 1-65535",
    )?;
    let worker_count = int_in_range(
        "workers",
        raw_config.workers,
        0,
        MAX_WORKERS as i64,
        "must be 0-256",
    )?;
    let node_id = raw_config
        .node_id
        .map(|id| int_in_range("node_id", id, 0, u32::MAX as i64, "must be 0-4294967295"))
        .transpose()?;

    let release_channel = raw_config
        .channel
        .parse::<Channel>()
        .map_err(|reason| ConfigError::Invalid {
            field: "channel",
            reason,
        })?;

    if !is_valid_lp_username(&raw_config.lpuser) {
        return Err(ConfigError::Invalid {
            field: "lpuser",
            reason: format!(
                "{:?} is not a Launchpad user name (lowercase letters, digits and .-+ only)",
                raw_config.lpuser
            ),
        });
    }

    Ok(NodeConfig {
        node_id,
        is_primary: raw_config.primary,
        controller_address: raw_config.controller_ip.trim().to_string(),
        controller_port,
        worker_count,
        publish_enabled: raw_config.publish,
        import_user: raw_config.lpuser,
        data_dir: raw_config.data_directory,
        source_dir: raw_config.source_directory,
        service_user: raw_config.system_user,
        release_channel,
        proxy: ProxySettings::default(),
    })
}


/// Read a configuration file and load it, attaching proxies from the process
/// environment.
pub fn load_file(path: &Path) -> Result<NodeConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = load(&content)?;
    config.proxy = proxy_from_env();
    Ok(config)
}


/// Capture proxy settings from the process environment.
pub fn proxy_from_env() -> ProxySettings {
    proxy_from_lookup(|key| std::env::var(key).ok())
}


/// Capture proxy settings through an arbitrary lookup. Empty values count as unset.
pub fn proxy_from_lookup<F>(lookup: F) -> ProxySettings
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    ProxySettings {
        http: get(HTTP_PROXY_ENV),
        https: get(HTTPS_PROXY_ENV),
    }
}


/// Wrap a serde_yaml error, keeping the key it names. Type errors read
/// `"workers: invalid type: ..."`; unknown keys read ``"unknown field `x`, ..."``.
fn parse_error(e: serde_yaml::Error) -> ConfigError {
    let message = e.to_string();
    let field = if let Some(rest) = message.strip_prefix("unknown field `") {
        rest.split('`').next().map(str::to_string)
    } else {
        message.split_once(": ").and_then(|(key, _)| {
            let key_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_';
            (!key.is_empty() && key.chars().all(key_char)).then(|| key.to_string())
        })
    };
    ConfigError::Parse { field, message }
}

/// Launchpad user names: lowercase ASCII letters, digits and `.`, `-`, `+`.
pub fn is_valid_lp_username(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
}


fn int_in_range(
    field: &'static str,
    value: i64,
    min: i64,
    max: i64,
    reason: &'static str,
) -> Result<u32, ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            reason,
        });
    }
    u32::try_from(value).map_err(|_| ConfigError::OutOfRange {
        field,
        value,
        reason,
    })
}
