//! Configuration resolution for tunneler.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/tunneler/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`TUNNELER_*`)
//!
//! Files may be partial; they are deep-merged as JSON before deserializing,
//! so a later layer only overrides the keys it actually sets.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Raw tunnel settings, as read from files and the environment.
///
/// Strategy selectors stay plain strings here; they are interpreted once
/// when a [`crate::TunnelSpec`] is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelerConfig {
    pub ssh_path: String,
    pub nc_path: String,
    pub bash_path: String,
    /// Persistence wrapper for the delegated launch. Empty disables it.
    pub nohup_path: String,
    pub nohup_log: PathBuf,

    pub local_address: String,
    pub local_port: u16,
    pub bind_address: String,
    pub bind_port: u16,
    pub hostname: String,
    /// Remote sshd port.
    pub port: u16,
    pub user: String,
    pub identity_file: String,
    pub ssh_options: String,
    pub ssh_verbosity: String,

    /// `"exec"` for a shell background job, anything else for a direct spawn.
    pub create: String,
    /// `"php"`/`"native"`, `"bash"`, anything else means `nc`.
    pub verify_process: String,
    /// `"php"`/`"signal"`, anything else means `pkill`.
    pub destroy_process: String,

    pub tries: u32,
    /// Wait between verification attempts, in microseconds.
    pub wait: u64,
    /// Pause after launch, in microseconds. Falls back to `wait`.
    pub settle: Option<u64>,
}

impl Default for TunnelerConfig {
    fn default() -> Self {
        Self {
            ssh_path: "ssh".to_string(),
            nc_path: "nc".to_string(),
            bash_path: "bash".to_string(),
            nohup_path: "nohup".to_string(),
            nohup_log: PathBuf::from("/dev/null"),
            local_address: "127.0.0.1".to_string(),
            local_port: 0,
            bind_address: "127.0.0.1".to_string(),
            bind_port: 0,
            hostname: String::new(),
            port: 22,
            user: String::new(),
            identity_file: String::new(),
            ssh_options: String::new(),
            ssh_verbosity: String::new(),
            create: "proc".to_string(),
            verify_process: "nc".to_string(),
            destroy_process: "pkill".to_string(),
            tries: 1,
            wait: 500_000,
            settle: None,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` must exist when given; the global file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<TunnelerConfig> {
    load_layers(global_config_path().as_deref(), explicit, |key| std::env::var(key).ok())
}

/// [`load_config`] with the global file location and the environment supplied
/// by the caller.
pub fn load_layers<F>(
    global: Option<&Path>,
    explicit: Option<&Path>,
    lookup: F,
) -> Result<TunnelerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = serde_json::to_value(TunnelerConfig::default())?;

    if let Some(global_path) = global
        && global_path.exists()
    {
        tracing::debug!(path = %global_path.display(), "loading global config");
        merge_json(&mut merged, read_config_file(&global_path)?);
    }

    if let Some(path) = explicit {
        tracing::debug!(path = %path.display(), "loading config file");
        merge_json(&mut merged, read_config_file(path)?);
    }

    let mut config: TunnelerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, lookup)?;
    Ok(config)
}

/// Path of the per-user settings file.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tunneler").join("settings.json"))
}

fn read_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {e}", path.display()))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}

/// Apply `TUNNELER_*` overrides. `lookup` is `std::env::var` outside tests.
pub fn apply_env_overrides<F>(config: &mut TunnelerConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let strings: [(&str, &mut String); 14] = [
        ("TUNNELER_SSH_PATH", &mut config.ssh_path),
        ("TUNNELER_NC_PATH", &mut config.nc_path),
        ("TUNNELER_BASH_PATH", &mut config.bash_path),
        ("TUNNELER_NOHUP_PATH", &mut config.nohup_path),
        ("TUNNELER_LOCAL_ADDRESS", &mut config.local_address),
        ("TUNNELER_BIND_ADDRESS", &mut config.bind_address),
        ("TUNNELER_HOSTNAME", &mut config.hostname),
        ("TUNNELER_USER", &mut config.user),
        ("TUNNELER_IDENTITY_FILE", &mut config.identity_file),
        ("TUNNELER_SSH_OPTIONS", &mut config.ssh_options),
        ("TUNNELER_SSH_VERBOSITY", &mut config.ssh_verbosity),
        ("TUNNELER_CREATE", &mut config.create),
        ("TUNNELER_VERIFY_PROCESS", &mut config.verify_process),
        ("TUNNELER_DESTROY_PROCESS", &mut config.destroy_process),
    ];
    for (key, slot) in strings {
        if let Some(val) = lookup(key) {
            *slot = val;
        }
    }

    let ports: [(&str, &mut u16); 3] = [
        ("TUNNELER_LOCAL_PORT", &mut config.local_port),
        ("TUNNELER_BIND_PORT", &mut config.bind_port),
        ("TUNNELER_PORT", &mut config.port),
    ];
    for (key, slot) in ports {
        if let Some(val) = lookup(key) {
            *slot = parse_env(key, &val)?;
        }
    }

    if let Some(val) = lookup("TUNNELER_NOHUP_LOG") {
        config.nohup_log = PathBuf::from(val);
    }
    if let Some(val) = lookup("TUNNELER_CONN_TRIES") {
        config.tries = parse_env("TUNNELER_CONN_TRIES", &val)?;
    }
    if let Some(val) = lookup("TUNNELER_CONN_WAIT") {
        config.wait = parse_env("TUNNELER_CONN_WAIT", &val)?;
    }
    if let Some(val) = lookup("TUNNELER_SETTLE") {
        config.settle = Some(parse_env("TUNNELER_SETTLE", &val)?);
    }
    Ok(())
}
