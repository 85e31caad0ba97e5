#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end tests against real sockets and real processes.
//!
//! The "ssh" binary is replaced by a small shell script so nothing here needs
//! network access or credentials; the command line it runs under still has
//! the exact shape teardown matches on.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tunneler_core::executor::command_exists;
use tunneler_core::{
    CreationMode, DestroyStrategy, Error, Launch, ProcessLauncher, Result, Teardown,
    TunnelLifecycle, TunnelSpec, TunnelStatus, TunnelerConfig, Verifier, VerifyStrategy,
    system_lifecycle,
};

fn closed_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn tunnel_spec(dir: &Path, local_port: u16) -> TunnelSpec {
    let config = TunnelerConfig {
        local_port,
        bind_port: 5432,
        hostname: "db.internal".into(),
        user: "tunnel".into(),
        identity_file: dir.join("id_test").display().to_string(),
        nohup_log: dir.join("tunnel.log"),
        verify_process: "native".into(),
        tries: 2,
        wait: 20_000,
        settle: Some(20_000),
        ..TunnelerConfig::default()
    };
    TunnelSpec::try_from(&config).unwrap()
}

/// A stand-in for ssh that idles until it is terminated.
#[cfg(unix)]
fn fake_ssh(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ssh");
    std::fs::write(
        &path,
        "#!/bin/sh\ntrap 'kill $child 2>/dev/null; exit 0' TERM\nsleep 30 &\nchild=$!\nwait $child\n",
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Opens the tunnel's local port from a background thread, as ssh would.
struct ListenerLauncher {
    port: u16,
    delay: Duration,
}

impl Launch for ListenerLauncher {
    fn launch(&self) -> Result<Option<u32>> {
        let (port, delay) = (self.port, self.delay);
        thread::spawn(move || {
            thread::sleep(delay);
            let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
            thread::sleep(Duration::from_secs(2));
            drop(listener);
        });
        Ok(None)
    }
}

#[test]
fn listening_port_is_already_active_and_nothing_is_launched() {
    let dir = tempfile::TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let spec = tunnel_spec(dir.path(), listener.local_addr().unwrap().port());

    let status = system_lifecycle(&spec).ensure().unwrap();
    assert_eq!(status, TunnelStatus::AlreadyActive);
    assert_eq!(status.code(), 1);
    assert!(!spec.log_path.exists(), "launcher must not have run");
}

#[test]
fn port_opened_after_launch_is_created() {
    let dir = tempfile::TempDir::new().unwrap();
    let port = closed_port();
    let mut spec = tunnel_spec(dir.path(), port);
    spec.tries = 10;
    spec.wait = Duration::from_millis(50);

    let launcher = ListenerLauncher {
        port,
        delay: Duration::from_millis(60),
    };
    let lifecycle = TunnelLifecycle::new(&spec, Verifier::new(&spec), launcher);
    let status = lifecycle.ensure().unwrap();
    assert_eq!(status, TunnelStatus::Created);
    assert_eq!(status.code(), 2);
}

#[test]
fn exhausted_retries_name_the_attempted_command() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut spec = tunnel_spec(dir.path(), closed_port());
    spec.ssh_path = "true".into();

    let err = system_lifecycle(&spec).ensure().unwrap_err();
    assert!(matches!(err, Error::Unreachable { .. }));
    let message = err.to_string();
    assert!(message.contains("\ttrue   -N -i "), "{message}");
    assert!(message.ends_with("Check your configuration."));
    assert!(spec.log_path.exists(), "direct spawn creates the log");
}

#[test]
fn every_verify_strategy_agrees() {
    let dir = tempfile::TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let open = listener.local_addr().unwrap().port();
    let closed = closed_port();

    let mut strategies = vec![VerifyStrategy::Native];
    if command_exists("nc") {
        strategies.push(VerifyStrategy::Netcat);
    }
    if command_exists("bash") && command_exists("timeout") {
        strategies.push(VerifyStrategy::Bash);
    }

    for strategy in strategies {
        let mut spec = tunnel_spec(dir.path(), open);
        spec.verify = strategy;
        assert_eq!(
            system_lifecycle(&spec).ensure().unwrap(),
            TunnelStatus::AlreadyActive,
            "{strategy}"
        );

        let mut spec = tunnel_spec(dir.path(), closed);
        spec.verify = strategy;
        spec.ssh_path = "true".into();
        spec.tries = 1;
        assert!(
            matches!(system_lifecycle(&spec).ensure(), Err(Error::Unreachable { .. })),
            "{strategy}"
        );
    }
}

#[cfg(unix)]
#[test]
fn signal_teardown_finds_and_stops_spawned_tunnel() {
    if !command_exists("ps") {
        return;
    }
    let dir = tempfile::TempDir::new().unwrap();
    let mut spec = tunnel_spec(dir.path(), closed_port());
    spec.ssh_path = fake_ssh(dir.path()).display().to_string();
    spec.creation = CreationMode::DirectSpawn;
    spec.destroy = DestroyStrategy::SignalMatch;
    spec.settle = Duration::from_millis(200);

    let pid = ProcessLauncher::new(&spec).launch().unwrap();
    assert!(pid.is_some());

    let teardown = Teardown::new(&spec);
    assert!(teardown.destroy().unwrap(), "live tunnel should be found");

    thread::sleep(Duration::from_millis(300));
    assert!(!teardown.destroy().unwrap(), "nothing left to stop");
}

#[cfg(unix)]
#[test]
fn pkill_teardown_stops_delegated_tunnel() {
    if !command_exists("pkill") {
        return;
    }
    let dir = tempfile::TempDir::new().unwrap();
    let mut spec = tunnel_spec(dir.path(), closed_port());
    spec.ssh_path = fake_ssh(dir.path()).display().to_string();
    spec.creation = CreationMode::Delegated;
    spec.nohup_path = None;
    spec.destroy = DestroyStrategy::KillUtility;
    spec.settle = Duration::from_millis(200);

    assert_eq!(ProcessLauncher::new(&spec).launch().unwrap(), None);

    let teardown = Teardown::new(&spec);
    assert!(teardown.destroy().unwrap(), "pkill should match the job");

    thread::sleep(Duration::from_millis(300));
    assert!(!teardown.destroy().unwrap(), "nothing left to stop");
}

#[cfg(unix)]
#[test]
fn both_teardown_strategies_match_identity_with_regex_characters() {
    if !command_exists("pkill") || !command_exists("ps") {
        return;
    }
    let dir = tempfile::TempDir::new().unwrap();
    let mut spec = tunnel_spec(dir.path(), closed_port());
    spec.ssh_path = fake_ssh(dir.path()).display().to_string();
    spec.identity_file = dir.path().join("id+work").display().to_string();
    spec.creation = CreationMode::Delegated;
    spec.nohup_path = None;
    spec.settle = Duration::from_millis(200);

    let mut by_pkill = spec.clone();
    by_pkill.destroy = DestroyStrategy::KillUtility;
    let mut by_signal = spec.clone();
    by_signal.destroy = DestroyStrategy::SignalMatch;

    ProcessLauncher::new(&spec).launch().unwrap();
    assert!(Teardown::new(&by_pkill).destroy().unwrap(), "pkill should stop it");
    thread::sleep(Duration::from_millis(300));
    assert!(!Teardown::new(&by_signal).destroy().unwrap(), "pkill left it running");

    ProcessLauncher::new(&spec).launch().unwrap();
    assert!(Teardown::new(&by_signal).destroy().unwrap(), "signal should stop it");
    thread::sleep(Duration::from_millis(300));
    assert!(!Teardown::new(&by_pkill).destroy().unwrap(), "signal left it running");
}
