//! Command runner abstraction for executing host commands.
//!
//! `CommandRunner` is the trait the systemd adapter uses to run `systemctl`.
//! `ShellRunner` is the production implementation that spawns the program
//! directly (no shell). `MockRunner` is the test double that records calls and
//! returns preset responses.

use std::cell::RefCell;
use std::io;
use std::process::Command;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        CommandOutput {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(stdout: &str, stderr: &str) -> Self {
        CommandOutput {
            success: false,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// Trait for executing a program with arguments.
///
/// `Err` means the program could not be spawned at all, and carries the
/// spawn failure's `io::ErrorKind`. A program that ran and exited non-zero is
/// an `Ok` with `success == false`.
pub trait CommandRunner: Send {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// Production runner that spawns the program directly.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output().map_err(|e| {
            io::Error::new(e.kind(), format!("Failed to execute {}: {}", program, e))
        })?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Test-double runner that records command lines and returns pre-configured
/// responses in order. Once responses run out every command succeeds with
/// empty output.
pub struct MockRunner {
    responses: RefCell<Vec<io::Result<CommandOutput>>>,
    commands: RefCell<Vec<String>>,
}

impl MockRunner {
    pub fn with_responses(responses: Vec<io::Result<CommandOutput>>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            responses: RefCell::new(reversed),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    /// Queue another response behind the existing ones.
    pub fn push_response(&self, response: io::Result<CommandOutput>) {
        self.responses.borrow_mut().insert(0, response);
    }

    /// Executed command lines, `program arg arg ...`.
    pub fn executed_commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.commands.borrow_mut().push(line);
        self.responses
            .borrow_mut()
            .pop()
            .unwrap_or_else(|| Ok(CommandOutput::ok("")))
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        (**self).run(program, args)
    }
}
