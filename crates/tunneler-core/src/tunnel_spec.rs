//! The immutable tunnel description every component works from.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::TunnelerConfig;
use crate::error::Error;

/// How "is the tunnel up?" is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStrategy {
    /// In-process TCP connect with a one second timeout.
    Native,
    /// `nc -vz` through the shell.
    Netcat,
    /// `bash` redirect to `/dev/tcp/host/port` under `timeout 1`.
    Bash,
}

impl VerifyStrategy {
    /// Interpret a `verify_process` setting. Unknown values fall back to netcat.
    pub fn from_setting(value: &str) -> Self {
        match value.trim() {
            "php" | "native" => Self::Native,
            "bash" => Self::Bash,
            _ => Self::Netcat,
        }
    }
}

impl fmt::Display for VerifyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Netcat => write!(f, "nc"),
            Self::Bash => write!(f, "bash"),
        }
    }
}

/// How the running tunnel process is found and stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyStrategy {
    /// Scan the process table and signal the first matching pid.
    SignalMatch,
    /// Hand the signature to `pkill -f`.
    KillUtility,
}

impl DestroyStrategy {
    /// Interpret a `destroy_process` setting. Unknown values fall back to pkill.
    pub fn from_setting(value: &str) -> Self {
        match value.trim() {
            "php" | "signal" => Self::SignalMatch,
            _ => Self::KillUtility,
        }
    }
}

impl fmt::Display for DestroyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignalMatch => write!(f, "signal"),
            Self::KillUtility => write!(f, "pkill"),
        }
    }
}

/// How the ssh process is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationMode {
    /// `ssh ... >> log 2>&1 &` handed to the shell; no handle kept.
    Delegated,
    /// Spawned by us with stdio redirected; handle only checked for early death.
    DirectSpawn,
}

impl CreationMode {
    /// Interpret a `create` setting. Only `"exec"` selects the shell job.
    pub fn from_setting(value: &str) -> Self {
        if value.trim() == "exec" {
            Self::Delegated
        } else {
            Self::DirectSpawn
        }
    }
}

impl fmt::Display for CreationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delegated => write!(f, "exec"),
            Self::DirectSpawn => write!(f, "spawn"),
        }
    }
}

/// Everything needed to build, launch, probe and tear down one tunnel.
///
/// Built once from [`TunnelerConfig`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub ssh_path: String,
    pub nc_path: String,
    pub bash_path: String,
    pub nohup_path: Option<String>,
    pub log_path: PathBuf,

    pub local_address: String,
    pub local_port: u16,
    pub bind_address: String,
    pub bind_port: u16,
    pub hostname: String,
    pub port: u16,
    pub user: String,
    pub identity_file: String,
    pub ssh_options: String,
    pub ssh_verbosity: String,

    pub tries: u32,
    pub wait: Duration,
    pub settle: Duration,

    pub verify: VerifyStrategy,
    pub destroy: DestroyStrategy,
    pub creation: CreationMode,
}

impl TryFrom<&TunnelerConfig> for TunnelSpec {
    type Error = Error;

    fn try_from(config: &TunnelerConfig) -> Result<Self, Self::Error> {
        let required = [
            ("hostname", &config.hostname),
            ("user", &config.user),
            ("identity_file", &config.identity_file),
            ("ssh_path", &config.ssh_path),
            ("local_address", &config.local_address),
            ("bind_address", &config.bind_address),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{name} must not be empty")));
            }
        }
        for (name, value) in [
            ("local_port", config.local_port),
            ("bind_port", config.bind_port),
            ("port", config.port),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be a non-zero port")));
            }
        }
        if config.tries == 0 {
            return Err(Error::Config("tries must be at least 1".to_string()));
        }

        let nohup_path = Some(config.nohup_path.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(Self {
            ssh_path: config.ssh_path.clone(),
            nc_path: config.nc_path.clone(),
            bash_path: config.bash_path.clone(),
            nohup_path,
            log_path: config.nohup_log.clone(),
            local_address: config.local_address.clone(),
            local_port: config.local_port,
            bind_address: config.bind_address.clone(),
            bind_port: config.bind_port,
            hostname: config.hostname.clone(),
            port: config.port,
            user: config.user.clone(),
            identity_file: config.identity_file.clone(),
            ssh_options: config.ssh_options.clone(),
            ssh_verbosity: config.ssh_verbosity.clone(),
            tries: config.tries,
            wait: Duration::from_micros(config.wait),
            settle: Duration::from_micros(config.settle.unwrap_or(config.wait)),
            verify: VerifyStrategy::from_setting(&config.verify_process),
            destroy: DestroyStrategy::from_setting(&config.destroy_process),
            creation: CreationMode::from_setting(&config.create),
        })
    }
}

#[cfg(test)]
pub(crate) fn make_test_config() -> TunnelerConfig {
    TunnelerConfig {
        local_port: 13306,
        bind_port: 3306,
        hostname: "db.example.com".into(),
        user: "deploy".into(),
        identity_file: "/home/deploy/.ssh/id_ed25519".into(),
        ..TunnelerConfig::default()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
pub(crate) fn make_test_spec() -> TunnelSpec {
    TunnelSpec::try_from(&make_test_config()).expect("valid test config")
}
