//! Systemd service adapter.
//!
//! Unit files are written to a unit directory (normally `/etc/systemd/system`)
//! and driven with `systemctl` through a `CommandRunner`. Each unit file
//! starts with a marker line carrying the JSON-serialized `UnitSpec` it was
//! rendered from, which is how `observe()` recovers the active argument set.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{AdapterError, AdapterErrorKind};
use crate::types::observed::{ObservedState, ObservedUnit, UnitState};
use crate::types::role::{RoleKind, ServiceRole, UnitSpec};

use super::runner::CommandRunner;
use super::ServiceAdapter;

pub const SYSTEMCTL: &str = "systemctl";
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Marker prefix of the first line of every unit file we render.
const SPEC_MARKER: &str = "# importer-node-spec: ";

// ---------------------------------------------------------------------------
// Command builder
// ---------------------------------------------------------------------------

/// Builds `systemctl` argument vectors without executing them.
pub struct SystemctlCommands;

impl SystemctlCommands {
    pub fn new() -> Self {
        SystemctlCommands
    }

    /// `systemctl daemon-reload`
    pub fn daemon_reload(&self) -> Vec<String> {
        vec!["daemon-reload".to_string()]
    }

    /// `systemctl enable <unit>`
    pub fn enable(&self, unit: &str) -> Vec<String> {
        vec!["enable".to_string(), unit.to_string()]
    }

    /// `systemctl disable <unit>`
    pub fn disable(&self, unit: &str) -> Vec<String> {
        vec!["disable".to_string(), unit.to_string()]
    }

    /// `systemctl start <unit>`
    pub fn start(&self, unit: &str) -> Vec<String> {
        vec!["start".to_string(), unit.to_string()]
    }

    /// `systemctl stop <unit>`
    pub fn stop(&self, unit: &str) -> Vec<String> {
        vec!["stop".to_string(), unit.to_string()]
    }

    /// `systemctl is-active <unit>`
    pub fn is_active(&self, unit: &str) -> Vec<String> {
        vec!["is-active".to_string(), unit.to_string()]
    }
}

impl Default for SystemctlCommands {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit file rendering and parsing
// ---------------------------------------------------------------------------

/// Render the unit file for `role`.
pub fn render_unit(role: &ServiceRole) -> Result<String, AdapterError> {
    let marker = serde_json::to_string(&role.spec)
        .map_err(|e| AdapterError::failed(format!("cannot serialize unit spec: {}", e)))?;

    let mut out = String::new();
    out.push_str(SPEC_MARKER);
    out.push_str(&marker);
    out.push('\n');

    out.push_str("[Unit]\n");
    out.push_str(&format!("Description=git-ubuntu importer {}\n", role.kind));
    out.push_str("Wants=network-online.target\n");
    if role.kind == RoleKind::Poller {
        out.push_str(&format!(
            "After=network-online.target {}\n",
            RoleKind::Broker.unit_name()
        ));
    } else {
        out.push_str("After=network-online.target\n");
    }

    out.push_str("\n[Service]\n");
    out.push_str("Type=simple\n");
    out.push_str(&format!("User={}\n", role.spec.user));
    out.push_str(&format!("WorkingDirectory={}\n", role.spec.working_dir));
    for (key, value) in &role.spec.environment {
        out.push_str(&format!(
            "Environment={}\n",
            quote_arg(&format!("{}={}", key, value))
        ));
    }
    let exec: Vec<String> = role.spec.exec.iter().map(|a| quote_arg(a)).collect();
    out.push_str(&format!("ExecStart={}\n", exec.join(" ")));
    out.push_str("Restart=on-failure\n");
    out.push_str("RestartSec=10\n");

    out.push_str("\n[Install]\n");
    out.push_str("WantedBy=multi-user.target\n");
    Ok(out)
}

/// Recover the `UnitSpec` from a rendered unit file. Returns `None` for files
/// without a readable marker (hand-edited or foreign units).
pub fn parse_spec_marker(content: &str) -> Option<UnitSpec> {
    let first = content.lines().next()?;
    let json = first.strip_prefix(SPEC_MARKER)?;
    serde_json::from_str(json).ok()
}

/// Quote a value for a systemd command line.
///
/// Plain words are returned bare; anything else is double-quoted with
/// backslashes and quotes escaped. `%` specifiers and `$` variable references
/// are doubled, since systemd expands both inside quotes.
pub fn quote_arg(s: &str) -> String {
    let plain = |c: char| {
        c.is_ascii_alphanumeric()
            || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '+' | ',' | '@')
    };
    if !s.is_empty() && s.chars().all(plain) {
        return s.to_string();
    }
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('%', "%%")
        .replace('$', "$$");
    format!("\"{}\"", escaped)
}

// ---------------------------------------------------------------------------
// Output parsers and error classification
// ---------------------------------------------------------------------------

/// Map `systemctl is-active` output to a unit state.
pub fn parse_is_active(stdout: &str) -> UnitState {
    match stdout.trim() {
        "active" | "activating" | "reloading" => UnitState::Running,
        "failed" => UnitState::Failed,
        _ => UnitState::Stopped,
    }
}

/// Classify a failed `systemctl` call from its stderr.
pub fn classify_failure(stderr: &str) -> AdapterError {
    let lower = stderr.to_lowercase();
    let kind = if lower.contains("access denied")
        || lower.contains("permission denied")
        || lower.contains("interactive authentication required")
    {
        AdapterErrorKind::PermissionDenied
    } else if lower.contains("timed out") || lower.contains("timeout") {
        AdapterErrorKind::Timeout
    } else if lower.contains("failed to connect to bus")
        || lower.contains("transport endpoint is not connected")
        || lower.contains("connection refused")
    {
        AdapterErrorKind::Unavailable
    } else if lower.contains("not loaded") || lower.contains("not found") {
        AdapterErrorKind::NotFound
    } else {
        AdapterErrorKind::Failed
    };
    let message = stderr.trim();
    let message = if message.is_empty() {
        "systemctl exited with an error"
    } else {
        message
    };
    AdapterError::new(kind, message)
}

fn io_kind(kind: io::ErrorKind) -> AdapterErrorKind {
    match kind {
        io::ErrorKind::PermissionDenied => AdapterErrorKind::PermissionDenied,
        io::ErrorKind::TimedOut => AdapterErrorKind::Timeout,
        io::ErrorKind::NotFound => AdapterErrorKind::NotFound,
        _ => AdapterErrorKind::Failed,
    }
}

fn io_error(context: &str, path: &Path, e: io::Error) -> AdapterError {
    AdapterError::new(
        io_kind(e.kind()),
        format!("{} {}: {}", context, path.display(), e),
    )
}

/// `systemctl` could not be spawned. A missing or non-executable binary will
/// not fix itself, so none of these kinds is transient.
fn spawn_error(e: io::Error) -> AdapterError {
    AdapterError::new(io_kind(e.kind()), e.to_string())
}

// ---------------------------------------------------------------------------
// SystemdAdapter
// ---------------------------------------------------------------------------

/// A `ServiceAdapter` that manages systemd units.
pub struct SystemdAdapter<R: CommandRunner> {
    unit_dir: PathBuf,
    runner: R,
    commands: SystemctlCommands,
}

impl<R: CommandRunner> SystemdAdapter<R> {
    pub fn new(unit_dir: impl Into<PathBuf>, runner: R) -> Self {
        SystemdAdapter {
            unit_dir: unit_dir.into(),
            runner,
            commands: SystemctlCommands::new(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn unit_path(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(unit)
    }

    fn systemctl(&self, args: Vec<String>) -> Result<String, AdapterError> {
        tracing::debug!(command = %args.join(" "), "systemctl");
        let output = self
            .runner
            .run(SYSTEMCTL, &args)
            .map_err(spawn_error)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(classify_failure(&output.stderr))
        }
    }

    fn unit_state(&self, unit: &str) -> Result<UnitState, AdapterError> {
        // is-active exits non-zero for inactive units; only stdout matters.
        let output = self
            .runner
            .run(SYSTEMCTL, &self.commands.is_active(unit))
            .map_err(spawn_error)?;
        if output.stdout.trim().is_empty() && !output.success {
            return Err(classify_failure(&output.stderr));
        }
        Ok(parse_is_active(&output.stdout))
    }

    fn write_unit_file(&self, unit: &str, content: &str) -> Result<(), AdapterError> {
        let path = self.unit_path(unit);
        let tmp = self.unit_dir.join(format!(".{}.tmp", unit));
        fs::write(&tmp, content).map_err(|e| io_error("cannot write", &tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error("cannot install", &path, e))
    }

    /// Put back the unit file that was on disk before a failed install, so
    /// its spec marker never claims a definition systemd has not loaded and
    /// enabled. A unit that did not exist before is deleted.
    fn roll_back(&self, unit: &str, previous: Option<&str>) {
        let path = self.unit_path(unit);
        let restored = match previous {
            Some(old) => self.write_unit_file(unit, old),
            None => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error("cannot remove", &path, e)),
            },
        };
        match restored {
            Ok(()) => tracing::warn!(unit, "install failed, unit file rolled back"),
            Err(e) => tracing::error!(unit, error = %e, "install failed and rollback failed"),
        }
        if let Err(e) = self.systemctl(self.commands.daemon_reload()) {
            tracing::warn!(unit, error = %e, "daemon-reload after rollback failed");
        }
    }

    fn owned_units(&self) -> Result<Vec<(RoleKind, String)>, AdapterError> {
        let entries = match fs::read_dir(&self.unit_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("cannot list", &self.unit_dir, e)),
        };
        let mut units = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("cannot list", &self.unit_dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(kind) = RoleKind::from_unit_name(&name) {
                units.push((kind, name));
            }
        }
        units.sort();
        Ok(units)
    }
}

impl<R: CommandRunner> ServiceAdapter for SystemdAdapter<R> {
    fn observe(&mut self) -> Result<ObservedState, AdapterError> {
        let mut observed = Vec::new();
        for (kind, unit) in self.owned_units()? {
            let path = self.unit_path(&unit);
            let content =
                fs::read_to_string(&path).map_err(|e| io_error("cannot read", &path, e))?;
            let state = self.unit_state(&unit)?;
            observed.push(ObservedUnit {
                kind,
                unit,
                state,
                spec: parse_spec_marker(&content),
            });
        }
        Ok(ObservedState::new(observed))
    }

    fn install(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        let content = render_unit(role)?;
        fs::create_dir_all(&self.unit_dir)
            .map_err(|e| io_error("cannot create", &self.unit_dir, e))?;

        let path = self.unit_path(&role.unit);
        let previous = match fs::read_to_string(&path) {
            Ok(old) => Some(old),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_error("cannot read", &path, e)),
        };
        self.write_unit_file(&role.unit, &content)?;

        let activated = self
            .systemctl(self.commands.daemon_reload())
            .and_then(|_| self.systemctl(self.commands.enable(&role.unit)));
        if let Err(e) = activated {
            self.roll_back(&role.unit, previous.as_deref());
            return Err(e);
        }
        Ok(())
    }

    fn start(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.systemctl(self.commands.start(&role.unit)).map(|_| ())
    }

    fn stop(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.systemctl(self.commands.stop(&role.unit)).map(|_| ())
    }

    fn remove(&mut self, role: &ServiceRole) -> Result<(), AdapterError> {
        self.systemctl(self.commands.disable(&role.unit))?;
        let path = self.unit_path(&role.unit);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("cannot remove", &path, e)),
        }
        self.systemctl(self.commands.daemon_reload())?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
