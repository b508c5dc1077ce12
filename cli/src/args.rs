use std::path::PathBuf;

use importer_node_core::infrastructure::systemd::DEFAULT_UNIT_DIR;
use importer_node_core::lock::DEFAULT_LOCK_PATH;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/importer-node/config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Check,
    Plan,
    Reconcile,
    Run,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub command: Command,
    pub config: PathBuf,
    pub unit_dir: PathBuf,
    pub lock: PathBuf,
    pub verbose: bool,
}

pub const USAGE: &str = "\
Usage: importer-node <check|plan|reconcile|run> [options]

Options:
  --config PATH     configuration file (default /etc/importer-node/config.yaml)
  --unit-dir DIR    systemd unit directory (default /etc/systemd/system)
  --lock PATH       node lock file (default /run/importer-node/reconcile.lock)
  --verbose, -v     debug logging";

/// Parse CLI arguments, without the program name.
pub fn parse_args(args: &[&str]) -> Result<Args, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'importer-node help' for usage.".into());
    }

    let command = match args[0] {
        "check" => Command::Check,
        "plan" => Command::Plan,
        "reconcile" => Command::Reconcile,
        "run" => Command::Run,
        "help" | "--help" | "-h" => Command::Help,
        other => return Err(format!("Unknown command: '{}'", other)),
    };

    let mut parsed = Args {
        command,
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        unit_dir: PathBuf::from(DEFAULT_UNIT_DIR),
        lock: PathBuf::from(DEFAULT_LOCK_PATH),
        verbose: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i] {
            "--config" => parsed.config = PathBuf::from(flag_value(args, i)?),
            "--unit-dir" => parsed.unit_dir = PathBuf::from(flag_value(args, i)?),
            "--lock" => parsed.lock = PathBuf::from(flag_value(args, i)?),
            "--verbose" | "-v" => {
                parsed.verbose = true;
                i += 1;
                continue;
            }
            other => return Err(format!("Unknown option: '{}'", other)),
        }
        i += 2;
    }
    Ok(parsed)
}

fn flag_value<'a>(args: &[&'a str], i: usize) -> Result<&'a str, String> {
    args.get(i + 1)
        .copied()
        .ok_or_else(|| format!("{} requires a value", args[i]))
}
