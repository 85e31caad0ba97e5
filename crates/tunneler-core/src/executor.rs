//! Running shell command strings.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Exit status and captured stdout of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `-1` when the process was killed by a signal.
    pub status: i32,
    pub stdout: String,
}

impl CommandOutput {
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a shell command string to completion.
pub trait CommandExecutor {
    /// `Err` only when the command could not be started; a non-zero exit is `Ok`.
    fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Run and reduce to "exited 0". Start failures count as `false`.
    fn succeeds(&self, command: &str) -> bool {
        match self.run(command) {
            Ok(output) => output.success(),
            Err(e) => {
                tracing::debug!(error = %e, "command could not be started");
                false
            }
        }
    }
}

/// Executes through `sh -c`, so redirections and `&` behave as written.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: PathBuf,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::with_shell("/bin/sh")
    }

    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for ShellExecutor {
    fn run(&self, command: &str) -> Result<CommandOutput> {
        tracing::debug!("exec: {command}");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::Exec {
                command: command.to_string(),
                source,
            })?;

        let status = output.status.code().unwrap_or(-1);
        if status != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(status, "command exited non-zero: {command}\nstderr: {stderr}");
        }
        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Check whether a program exists on PATH.
pub fn command_exists(program: &str) -> bool {
    Command::new("/bin/sh")
        .arg("-c")
        .arg(r#"command -v "$1""#)
        .arg("sh")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}
