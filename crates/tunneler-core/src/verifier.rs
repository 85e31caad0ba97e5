//! "Is the tunnel up?" probes.
//!
//! Every strategy reduces to one boolean: the local end of the forward
//! accepted a TCP connection or it did not. Refusals, timeouts, resolution
//! failures and non-zero exits are all just `false`.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::commands::{bash_probe_command, netcat_probe_command};
use crate::executor::{CommandExecutor, ShellExecutor};
use crate::tunnel_spec::{TunnelSpec, VerifyStrategy};

/// Time budget for one native probe, shared by every resolved address.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A single reachability check.
pub trait Probe {
    fn is_up(&self) -> bool;
}

/// Probe of the tunnel's local port using the configured strategy.
#[derive(Debug, Clone)]
pub struct Verifier<E = ShellExecutor> {
    strategy: VerifyStrategy,
    local_address: String,
    local_port: u16,
    netcat_command: String,
    bash_command: String,
    executor: E,
}

impl Verifier<ShellExecutor> {
    pub fn new(spec: &TunnelSpec) -> Self {
        Self::with_executor(spec, ShellExecutor::new())
    }
}

impl<E: CommandExecutor> Verifier<E> {
    pub fn with_executor(spec: &TunnelSpec, executor: E) -> Self {
        Self {
            strategy: spec.verify,
            local_address: spec.local_address.clone(),
            local_port: spec.local_port,
            netcat_command: netcat_probe_command(spec),
            bash_command: bash_probe_command(spec),
            executor,
        }
    }

    pub const fn strategy(&self) -> VerifyStrategy {
        self.strategy
    }

    fn native_probe(&self) -> bool {
        match (self.local_address.as_str(), self.local_port).to_socket_addrs() {
            Ok(addrs) => connect_within(addrs, PROBE_TIMEOUT),
            Err(e) => {
                tracing::debug!(address = %self.local_address, error = %e, "cannot resolve");
                false
            }
        }
    }
}

/// Try each address in turn until one accepts or `budget` has elapsed.
fn connect_within(addrs: impl IntoIterator<Item = SocketAddr>, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::trace!(%addr, "probe budget spent");
            return false;
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => {
                drop(stream);
                return true;
            }
            Err(e) => tracing::trace!(%addr, error = %e, "connect failed"),
        }
    }
    false
}

impl<E: CommandExecutor> Probe for Verifier<E> {
    fn is_up(&self) -> bool {
        let up = match self.strategy {
            VerifyStrategy::Native => self.native_probe(),
            VerifyStrategy::Netcat => self.executor.succeeds(&self.netcat_command),
            VerifyStrategy::Bash => self.executor.succeeds(&self.bash_command),
        };
        tracing::debug!(
            strategy = %self.strategy,
            port = self.local_port,
            up,
            "tunnel probe"
        );
        up
    }
}
