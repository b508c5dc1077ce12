//! Role resolution — which services a node must run under a configuration.
//!
//! Primary nodes run the broker and poller; secondary nodes run
//! `worker_count` workers. The two role sets are never mixed. Startup
//! arguments are derived only from `NodeConfig`, so resolving the same
//! configuration twice yields identical unit specs.

use std::collections::BTreeMap;

use crate::types::config::NodeConfig;
use crate::types::role::{RoleKind, ServiceRole, Topology, UnitSpec};

/// Executable of the externally installed import tool.
pub const IMPORTER_BIN: &str = "/snap/bin/git-ubuntu";

/// Location of the import denylist inside the primary's source checkout.
const DENYLIST_PATH: &str = "live-allowlist-denylist-source/gitubuntu/source-package-denylist.txt";

pub fn resolve(config: &NodeConfig) -> Topology {
    let roles = if config.is_primary {
        vec![broker(config), poller(config)]
    } else {
        (0..config.worker_count).map(|i| worker(i, config)).collect()
    };
    Topology { roles }
}

/// True when the configuration leaves the node intentionally idle.
pub fn is_drained(config: &NodeConfig) -> bool {
    !config.is_primary && config.worker_count == 0
}

fn broker(config: &NodeConfig) -> ServiceRole {
    let exec = vec![
        IMPORTER_BIN.to_string(),
        "importer-service-broker".to_string(),
        "--port".to_string(),
        config.controller_port.to_string(),
        "--data-directory".to_string(),
        config.data_dir.clone(),
    ];
    ServiceRole::new(
        RoleKind::Broker,
        spec(config, exec, config.data_dir.clone()),
    )
}

fn poller(config: &NodeConfig) -> ServiceRole {
    let denylist = format!("{}/{}", config.source_dir.trim_end_matches('/'), DENYLIST_PATH);
    let exec = vec![
        IMPORTER_BIN.to_string(),
        "importer-service-poller".to_string(),
        "--port".to_string(),
        config.controller_port.to_string(),
        "--data-directory".to_string(),
        config.data_dir.clone(),
        "--denylist".to_string(),
        denylist,
    ];
    ServiceRole::new(
        RoleKind::Poller,
        spec(config, exec, config.data_dir.clone()),
    )
}

fn worker(index: u32, config: &NodeConfig) -> ServiceRole {
    let node_id = config.node_id.unwrap_or_default();
    let mut exec = vec![
        IMPORTER_BIN.to_string(),
        "importer-service-worker".to_string(),
        "--broker-ip".to_string(),
        config.controller_address.clone(),
        "--broker-port".to_string(),
        config.controller_port.to_string(),
        "--worker-name".to_string(),
        format!("{}-{}", node_id, index),
        "--lp-user".to_string(),
        config.import_user.clone(),
    ];
    if !config.publish_enabled {
        exec.push("--no-push".to_string());
    }
    ServiceRole::new(
        RoleKind::Worker(index),
        spec(config, exec, config.service_home()),
    )
}

fn spec(config: &NodeConfig, exec: Vec<String>, working_dir: String) -> UnitSpec {
    let mut environment = BTreeMap::new();
    if let Some(ref http) = config.proxy.http {
        environment.insert("HTTP_PROXY".to_string(), http.clone());
        environment.insert("http_proxy".to_string(), http.clone());
    }
    if let Some(ref https) = config.proxy.https {
        environment.insert("HTTPS_PROXY".to_string(), https.clone());
        environment.insert("https_proxy".to_string(), https.clone());
    }
    UnitSpec {
        exec,
        user: config.service_user.clone(),
        working_dir,
        environment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::config::ProxySettings;

    fn secondary(workers: u32) -> NodeConfig {
        NodeConfig {
            node_id: Some(7),
            is_primary: false,
            controller_address: "10.0.0.1".into(),
            worker_count: workers,
            ..NodeConfig::default()
        }
    }

    #[test]
    fn primary_resolves_broker_then_poller() {
        let topo = resolve(&NodeConfig::default());
        assert_eq!(topo.kinds(), vec![RoleKind::Broker, RoleKind::Poller]);
    }

    #[test]
    fn primary_ignores_worker_count() {
        let cfg = NodeConfig {
            worker_count: 9,
            ..NodeConfig::default()
        };
        assert_eq!(resolve(&cfg).len(), 2);
    }

    #[test]
    fn secondary_resolves_workers_in_order() {
        let topo = resolve(&secondary(3));
        assert_eq!(
            topo.kinds(),
            vec![RoleKind::Worker(0), RoleKind::Worker(1), RoleKind::Worker(2)]
        );
    }

    #[test]
    fn zero_workers_is_drained_not_error() {
        let cfg = secondary(0);
        assert!(resolve(&cfg).is_empty());
        assert!(is_drained(&cfg));
        assert!(!is_drained(&NodeConfig::default()));
    }

    #[test]
    fn roles_never_mix() {
        for primary in [true, false] {
            for workers in 0..6 {
                let cfg = NodeConfig {
                    is_primary: primary,
                    worker_count: workers,
                    ..secondary(0)
                };
                let kinds = resolve(&cfg).kinds();
                let has_primary = kinds.iter().any(|k| k.is_primary_role());
                let has_worker = kinds.iter().any(|k| !k.is_primary_role());
                assert!(!(has_primary && has_worker));
            }
        }
    }

    #[test]
    fn broker_and_poller_share_controller_port() {
        let cfg = NodeConfig {
            controller_port: 4000,
            ..NodeConfig::default()
        };
        let topo = resolve(&cfg);
        for role in &topo.roles {
            let pos = role.spec.exec.iter().position(|a| a == "--port").unwrap();
            assert_eq!(role.spec.exec[pos + 1], "4000");
        }
    }

    #[test]
    fn poller_reads_denylist_from_source_dir() {
        let cfg = NodeConfig {
            source_dir: "/home/ubuntu/".into(),
            ..NodeConfig::default()
        };
        let poller = resolve(&cfg).get(RoleKind::Poller).cloned().unwrap();
        assert!(poller.spec.exec.contains(&format!("/home/ubuntu/{}", DENYLIST_PATH)));
    }

    #[test]
    fn worker_connects_to_controller() {
        let topo = resolve(&secondary(2));
        let w1 = topo.get(RoleKind::Worker(1)).unwrap();
        let exec = w1.spec.exec.join(" ");
        assert!(exec.contains("--broker-ip 10.0.0.1"));
        assert!(exec.contains("--broker-port 1692"));
        assert!(exec.contains("--worker-name 7-1"));
        assert!(exec.contains("--lp-user git-ubuntu-bot"));
        assert!(!exec.contains("--no-push"));
        assert_eq!(w1.unit, "git-ubuntu-importer-worker-1.service");
        assert_eq!(w1.spec.working_dir, "/home/ubuntu");
    }

    #[test]
    fn publish_disabled_adds_no_push() {
        let cfg = NodeConfig {
            publish_enabled: false,
            ..secondary(1)
        };
        let w0 = resolve(&cfg).roles.remove(0);
        assert_eq!(w0.spec.exec.last().map(String::as_str), Some("--no-push"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let cfg = secondary(4);
        assert_eq!(resolve(&cfg), resolve(&cfg));
    }

    #[test]
    fn proxies_land_in_environment() {
        let cfg = NodeConfig {
            proxy: ProxySettings {
                http: Some("http://proxy:3128".into()),
                https: None,
            },
            ..secondary(1)
        };
        let env = &resolve(&cfg).roles[0].spec.environment;
        assert_eq!(env.get("HTTP_PROXY").map(String::as_str), Some("http://proxy:3128"));
        assert!(!env.contains_key("HTTPS_PROXY"));
    }
}
