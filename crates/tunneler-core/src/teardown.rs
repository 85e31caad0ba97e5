//! Finding and stopping the tunnel's ssh process.
//!
//! No handle survives launch, so the process is rediscovered by its
//! [`CommandSignature`]. Only the first match is acted upon: two tunnels
//! with an identical command line are indistinguishable here.

use crate::commands::CommandSignature;
use crate::error::Result;
use crate::executor::{CommandExecutor, ShellExecutor};
use crate::tunnel_spec::{DestroyStrategy, TunnelSpec};

/// Command used to enumerate processes with their untruncated argument lists.
pub const PS_COMMAND: &str = "ps -ww -eo pid,args";

/// POSIX extended-regex metacharacters, as read by `pkill -f`.
const ERE_META: &[char] = &['\\', '.', '[', ']', '(', ')', '*', '+', '?', '{', '}', '|', '^', '$'];

/// Characters that stay special inside a double-quoted `sh` word.
const DQUOTE_SPECIAL: &[char] = &['\\', '"', '$', '`'];

fn escape_chars(input: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Quote `literal` as a `pkill -f` pattern that matches it verbatim, ready to
/// sit inside double quotes on a `sh` command line.
pub fn pkill_pattern(literal: &str) -> String {
    escape_chars(&escape_chars(literal, ERE_META), DQUOTE_SPECIAL)
}

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: i32,
    pub command_line: String,
}

/// Read access to the process table plus the ability to signal a pid.
pub trait ProcessDirectory {
    fn list(&self) -> Result<Vec<ProcessEntry>>;

    /// Send the termination signal. `false` if it could not be delivered.
    fn terminate(&self, pid: i32) -> bool;
}

/// Parse `ps -eo pid,args` output. The header and malformed rows are skipped.
pub fn parse_ps_output(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (pid, args) = line.trim().split_once(char::is_whitespace)?;
            let pid = pid.parse().ok()?;
            Some(ProcessEntry {
                pid,
                command_line: args.trim().to_string(),
            })
        })
        .collect()
}

/// The live process table, read through `ps` and signalled with `kill(2)`.
#[derive(Debug, Clone, Default)]
pub struct SystemProcessDirectory<E = ShellExecutor> {
    executor: E,
}

impl<E: CommandExecutor> SystemProcessDirectory<E> {
    pub const fn new(executor: E) -> Self {
        Self { executor }
    }
}

impl<E: CommandExecutor> ProcessDirectory for SystemProcessDirectory<E> {
    fn list(&self) -> Result<Vec<ProcessEntry>> {
        let output = self.executor.run(PS_COMMAND)?;
        Ok(parse_ps_output(&output.stdout))
    }

    #[cfg(unix)]
    fn terminate(&self, pid: i32) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(pid, error = %e, "failed to signal tunnel process");
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: i32) -> bool {
        tracing::warn!(pid, "signalling processes is only supported on unix");
        false
    }
}

/// Stops the tunnel using the configured [`DestroyStrategy`].
#[derive(Debug, Clone)]
pub struct Teardown<D = SystemProcessDirectory, E = ShellExecutor> {
    strategy: DestroyStrategy,
    signature: CommandSignature,
    directory: D,
    executor: E,
}

impl Teardown<SystemProcessDirectory, ShellExecutor> {
    pub fn new(spec: &TunnelSpec) -> Self {
        Self::with_parts(
            spec,
            SystemProcessDirectory::new(ShellExecutor::new()),
            ShellExecutor::new(),
        )
    }
}

impl<D: ProcessDirectory, E: CommandExecutor> Teardown<D, E> {
    pub fn with_parts(spec: &TunnelSpec, directory: D, executor: E) -> Self {
        Self {
            strategy: spec.destroy,
            signature: CommandSignature::for_spec(spec),
            directory,
            executor,
        }
    }

    pub const fn signature(&self) -> &CommandSignature {
        &self.signature
    }

    /// The `pkill` invocation used by [`DestroyStrategy::KillUtility`].
    ///
    /// The signature is matched literally, so both strategies select the same
    /// processes.
    pub fn kill_utility_command(&self) -> String {
        format!(
            "exec pkill -f -- \"{}\"",
            pkill_pattern(self.signature.as_str())
        )
    }

    /// Stop the tunnel. `Ok(false)` means nothing was stopped.
    pub fn destroy(&self) -> Result<bool> {
        tracing::info!(strategy = %self.strategy, signature = %self.signature, "destroying tunnel");
        match self.strategy {
            DestroyStrategy::SignalMatch => self.destroy_by_signal(),
            DestroyStrategy::KillUtility => Ok(self.executor.succeeds(&self.kill_utility_command())),
        }
    }

    fn destroy_by_signal(&self) -> Result<bool> {
        let own_pid = i32::try_from(std::process::id()).unwrap_or(i32::MAX);
        let found = self
            .directory
            .list()?
            .into_iter()
            .find(|p| p.pid != own_pid && self.signature.matches(&p.command_line));

        let Some(process) = found else {
            tracing::info!("no tunnel process found");
            return Ok(false);
        };

        if self.directory.terminate(process.pid) {
            tracing::info!(pid = process.pid, "tunnel process terminated");
            Ok(true)
        } else {
            tracing::warn!(pid = process.pid, "could not terminate tunnel process");
            Ok(false)
        }
    }
}
