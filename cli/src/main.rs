//! importer-node — converges this host onto its declared importer role.
//!
//! # Usage
//!
//! ```text
//! importer-node check
//! importer-node plan --unit-dir /etc/systemd/system
//! importer-node reconcile --config /etc/importer-node/config.yaml
//! importer-node run
//! ```

mod args;

use std::path::Path;
use std::process;
use std::time::{Duration, SystemTime};

use importer_node_core::agent::{AgentConfig, NodeAgent, NodeAgentHandle};
use importer_node_core::config;
use importer_node_core::convergence::reconciler::Reconciler;
use importer_node_core::guard;
use importer_node_core::infrastructure::runner::ShellRunner;
use importer_node_core::infrastructure::systemd::SystemdAdapter;
use importer_node_core::lock::NodeLock;
use importer_node_core::status::NodeStatus;
use importer_node_core::types::result::ConvergenceStatus;
use tracing::{error, info};

use args::{parse_args, Args, Command, USAGE};

const LOG_ENV: &str = "IMPORTER_NODE_LOG";
const LOCK_TIMEOUT_MS: u64 = 30_000;
const WATCH_INTERVAL: Duration = Duration::from_secs(2);

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = argv[1..].iter().map(|s| s.as_str()).collect();

    let args = match parse_args(&arg_refs) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("importer-node: {}", e);
            process::exit(1);
        }
    };

    if args.command == Command::Help {
        println!("{}", USAGE);
        return;
    }

    setup_tracing(args.verbose);

    let code = match args.command {
        Command::Check => check(&args),
        Command::Plan => plan(&args),
        Command::Reconcile => reconcile(&args),
        Command::Run => run(&args),
        Command::Help => 0,
    };
    process::exit(code);
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn adapter(args: &Args) -> SystemdAdapter<ShellRunner> {
    SystemdAdapter::new(&args.unit_dir, ShellRunner)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("importer-node: cannot serialize output: {}", e),
    }
}

/// `importer-node check`
fn check(args: &Args) -> i32 {
    let facts = config::load_file(&args.config)
        .map_err(|e| e.to_string())
        .and_then(|cfg| guard::fleet_facts(&cfg).map_err(|e| e.to_string()));
    match facts {
        Ok(facts) => {
            print_json(&facts);
            0
        }
        Err(e) => {
            error!(config = %args.config.display(), "{}", e);
            1
        }
    }
}

/// `importer-node plan`
fn plan(args: &Args) -> i32 {
    let cfg = match config::load_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };
    match Reconciler::default().dry_run(&cfg, &mut adapter(args)) {
        Ok(dry) => {
            print_json(&dry.plan);
            0
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}

/// `importer-node reconcile`
fn reconcile(args: &Args) -> i32 {
    let cfg = match config::load_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };
    let _lock = match NodeLock::acquire(&args.lock, LOCK_TIMEOUT_MS) {
        Ok(l) => l,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    match Reconciler::default().reconcile(&cfg, &mut adapter(args)) {
        Ok(result) => {
            info!(status = %NodeStatus::from_result(&result), "node status");
            print_json(&result);
            match result.status {
                ConvergenceStatus::Converged => 0,
                ConvergenceStatus::Partial => 2,
                ConvergenceStatus::Failed => 1,
            }
        }
        Err(e) => {
            error!(status = %NodeStatus::from_error(&e), "pass aborted");
            1
        }
    }
}

/// `importer-node run`: reconcile whenever the config file changes.
fn run(args: &Args) -> i32 {
    let agent_config = AgentConfig {
        lock_path: Some(args.lock.clone()),
        lock_timeout_ms: LOCK_TIMEOUT_MS,
        proxy: config::proxy_from_env(),
    };
    let mut agent = NodeAgent::with_config(adapter(args), Reconciler::default(), agent_config);
    let handle = agent.handle();

    let path = args.config.clone();
    let spawned = std::thread::Builder::new()
        .name("config-watch".into())
        .spawn(move || watch_config(&path, &handle));
    if let Err(e) = spawned {
        error!("cannot start config watcher: {}", e);
        return 1;
    }

    info!(config = %args.config.display(), "watching configuration");
    agent.run();
    0
}

/// Poll `path` and send its contents whenever the modification time moves.
fn watch_config(path: &Path, handle: &NodeAgentHandle) {
    let mut last_seen: Option<SystemTime> = None;
    loop {
        match modified(path) {
            Some(mtime) if last_seen != Some(mtime) => match std::fs::read_to_string(path) {
                Ok(raw) => {
                    last_seen = Some(mtime);
                    if handle.config_changed(raw).is_err() {
                        return;
                    }
                }
                Err(e) => error!(config = %path.display(), "cannot read configuration: {}", e),
            },
            Some(_) => {}
            // Missing: the agent keeps the last document it saw.
            None => last_seen = None,
        }
        std::thread::sleep(WATCH_INTERVAL);
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
