//! Shell command strings derived from a [`TunnelSpec`].
//!
//! All builders are pure: the same spec always yields byte-identical output.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::tunnel_spec::TunnelSpec;

#[allow(clippy::unwrap_used)]
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// `nc -vz` probe of the local end of the tunnel.
pub fn netcat_probe_command(spec: &TunnelSpec) -> String {
    format!(
        "{} -vz {} {}  > /dev/null 2>&1",
        spec.nc_path, spec.local_address, spec.local_port
    )
}

/// bash `/dev/tcp` probe of the local end of the tunnel, capped at one second.
pub fn bash_probe_command(spec: &TunnelSpec) -> String {
    format!(
        "timeout 1 {} -c 'cat < /dev/null > /dev/tcp/{}/{}' > /dev/null 2>&1",
        spec.bash_path, spec.local_address, spec.local_port
    )
}

/// The ssh invocation that holds the port-forward open.
///
/// The argument order is what teardown matches against the live process
/// table. Changing it orphans tunnels started by older builds.
pub fn tunnel_command(spec: &TunnelSpec) -> String {
    format!(
        "{} {} {} -N -i {} -L {}:{}:{} -p {} {}@{}",
        spec.ssh_path,
        spec.ssh_options,
        spec.ssh_verbosity,
        spec.identity_file,
        spec.local_port,
        spec.bind_address,
        spec.bind_port,
        spec.port,
        spec.user,
        spec.hostname
    )
}

/// Whitespace-normalized tunnel command, as it appears in `ps` output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandSignature(String);

impl CommandSignature {
    /// Collapse every whitespace run to one space and trim the ends.
    pub fn normalize(command: &str) -> Self {
        Self(WHITESPACE_RUN.replace_all(command.trim(), " ").into_owned())
    }

    /// Signature of the tunnel command for `spec`.
    pub fn for_spec(spec: &TunnelSpec) -> Self {
        Self::normalize(&tunnel_command(spec))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a process command line belongs to this tunnel.
    pub fn matches(&self, command_line: &str) -> bool {
        !self.0.is_empty() && command_line.contains(&self.0)
    }
}

impl fmt::Display for CommandSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
