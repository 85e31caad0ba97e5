//! Starting the ssh process in the background.
//!
//! The process must outlive us. Neither mode supervises it: once it is
//! running, the only way back to it is the command signature in `ps`.
//! A direct child is still waited on from a detached thread, so a
//! long-lived embedding process does not collect zombies.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::commands::tunnel_command;
use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, ShellExecutor};
use crate::tunnel_spec::{CreationMode, TunnelSpec};

/// Starts the tunnel process.
pub trait Launch {
    /// Returns the pid when the mode knows it.
    fn launch(&self) -> Result<Option<u32>>;
}

/// Launches the tunnel command in the configured [`CreationMode`].
#[derive(Debug, Clone)]
pub struct ProcessLauncher<E = ShellExecutor> {
    mode: CreationMode,
    command: String,
    nohup_path: Option<String>,
    log_path: PathBuf,
    settle: Duration,
    executor: E,
}

impl ProcessLauncher<ShellExecutor> {
    pub fn new(spec: &TunnelSpec) -> Self {
        Self::with_executor(spec, ShellExecutor::new())
    }
}

impl<E: CommandExecutor> ProcessLauncher<E> {
    pub fn with_executor(spec: &TunnelSpec, executor: E) -> Self {
        Self {
            mode: spec.creation,
            command: tunnel_command(spec),
            nohup_path: spec.nohup_path.clone(),
            log_path: spec.log_path.clone(),
            settle: spec.settle,
            executor,
        }
    }

    /// The shell job submitted in delegated mode.
    pub fn delegated_command(&self) -> String {
        let log = self.log_path.display();
        match &self.nohup_path {
            Some(nohup) => format!("{nohup} {} >> {log} 2>&1 &", self.command),
            None => format!("{} >> {log} 2>&1 &", self.command),
        }
    }

    fn launch_delegated(&self) -> Result<()> {
        let job = self.delegated_command();
        let output = self
            .executor
            .run(&job)
            .map_err(|e| Error::Launch(e.to_string()))?;
        if !output.success() {
            tracing::warn!(status = output.status, "background job submission exited non-zero");
        }
        Ok(())
    }

    fn spawn_direct(&self) -> Result<Child> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| {
                Error::Launch(format!("cannot open log {}: {e}", self.log_path.display()))
            })?;
        let log_err = log
            .try_clone()
            .map_err(|e| Error::Launch(format!("cannot duplicate log handle: {e}")))?;

        // `exec` replaces the shell so the pid and the cmdline are ssh's own.
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("exec {}", self.command))
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .spawn()
            .map_err(|e| Error::Launch(e.to_string()))?;

        tracing::debug!(pid = child.id(), "tunnel process spawned");
        Ok(child)
    }
}

/// Wait on a detached child from a background thread so it never lingers as a
/// zombie once it exits, however long the calling process lives.
fn reap_in_background(mut child: Child) {
    let pid = child.id();
    let reaper = std::thread::Builder::new()
        .name(format!("tunnel-reaper-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) => tracing::debug!(pid, %status, "tunnel process exited"),
            Err(e) => tracing::debug!(pid, error = %e, "cannot wait on tunnel process"),
        });
    if let Err(e) = reaper {
        tracing::warn!(pid, error = %e, "cannot start reaper; process will be left unreaped");
    }
}

impl<E: CommandExecutor> Launch for ProcessLauncher<E> {
    fn launch(&self) -> Result<Option<u32>> {
        tracing::info!(mode = %self.mode, "launching tunnel: {}", self.command);
        match self.mode {
            CreationMode::Delegated => {
                self.launch_delegated()?;
                std::thread::sleep(self.settle);
                Ok(None)
            }
            CreationMode::DirectSpawn => {
                let mut child = self.spawn_direct()?;
                let pid = child.id();
                std::thread::sleep(self.settle);
                match child.try_wait() {
                    Ok(Some(status)) => tracing::warn!(
                        %status,
                        log = %self.log_path.display(),
                        "tunnel process exited during settle"
                    ),
                    _ => reap_in_background(child),
                }
                Ok(Some(pid))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::executor::CommandOutput;
    use crate::tunnel_spec::make_test_spec;

    struct RecordingExecutor {
        seen: RefCell<Vec<String>>,
    }

    impl CommandExecutor for RecordingExecutor {
        fn run(&self, command: &str) -> Result<CommandOutput> {
            self.seen.borrow_mut().push(command.to_string());
            Ok(CommandOutput {
                status: 0,
                stdout: String::new(),
            })
        }
    }

    fn recording() -> RecordingExecutor {
        RecordingExecutor {
            seen: RefCell::new(Vec::new()),
        }
    }

    fn quick_spec(mode: CreationMode) -> TunnelSpec {
        let mut spec = make_test_spec();
        spec.creation = mode;
        spec.settle = Duration::from_millis(1);
        spec
    }

    #[test]
    fn delegated_command_wraps_with_nohup() {
        let mut spec = quick_spec(CreationMode::Delegated);
        spec.log_path = PathBuf::from("/tmp/tunnel.log");
        let launcher = ProcessLauncher::with_executor(&spec, recording());
        assert_eq!(
            launcher.delegated_command(),
            format!("nohup {} >> /tmp/tunnel.log 2>&1 &", tunnel_command(&spec))
        );
    }

    #[test]
    fn delegated_command_without_wrapper() {
        let mut spec = quick_spec(CreationMode::Delegated);
        spec.nohup_path = None;
        let launcher = ProcessLauncher::with_executor(&spec, recording());
        assert_eq!(
            launcher.delegated_command(),
            format!("{} >> /dev/null 2>&1 &", tunnel_command(&spec))
        );
    }

    #[test]
    fn delegated_launch_submits_job_and_keeps_no_pid() {
        let spec = quick_spec(CreationMode::Delegated);
        let launcher = ProcessLauncher::with_executor(&spec, recording());
        assert_eq!(launcher.launch().unwrap(), None);
        assert_eq!(
            launcher.executor.seen.borrow().as_slice(),
            [launcher.delegated_command()]
        );
    }

    #[test]
    fn direct_spawn_appends_output_to_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("tunnel.log");
        std::fs::write(&log, "previous run\n").unwrap();

        let mut spec = quick_spec(CreationMode::DirectSpawn);
        spec.ssh_path = "echo".into();
        spec.log_path = log.clone();
        spec.settle = Duration::from_millis(200);

        let launcher = ProcessLauncher::with_executor(&spec, recording());
        let pid = launcher.launch().unwrap();
        assert!(pid.is_some());
        assert!(launcher.executor.seen.borrow().is_empty());

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.starts_with("previous run\n"), "{contents}");
        assert!(contents.contains("-N -i"), "{contents}");
    }

    #[test]
    fn direct_spawn_with_unwritable_log_is_launch_error() {
        let mut spec = quick_spec(CreationMode::DirectSpawn);
        spec.log_path = PathBuf::from("/nonexistent-dir/tunnel.log");
        let launcher = ProcessLauncher::with_executor(&spec, recording());
        assert!(matches!(launcher.launch(), Err(Error::Launch(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn direct_child_is_reaped_after_it_exits() {
        let mut spec = quick_spec(CreationMode::DirectSpawn);
        spec.ssh_path = "sh -c 'sleep 0.3' tunnel".into();

        let pid = ProcessLauncher::with_executor(&spec, recording())
            .launch()
            .unwrap()
            .unwrap();
        let proc_entry = PathBuf::from(format!("/proc/{pid}"));
        assert!(proc_entry.exists(), "child should still be running");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while proc_entry.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(!proc_entry.exists(), "pid {pid} left behind as a zombie");
    }
}
