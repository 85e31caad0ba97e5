//! tunneler core library
//!
//! Keeps one local ssh port-forward alive on demand:
//! - Command construction for the ssh tunnel and its probes
//! - Background launch of the ssh process
//! - Reachability probes (native connect, `nc`, bash `/dev/tcp`)
//! - Create-or-confirm lifecycle with bounded retries
//! - Teardown by process signature
//! - Configuration resolution and logging setup

pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod lifecycle;
pub mod teardown;
pub mod tracing_init;
pub mod tunnel_spec;
pub mod verifier;

pub use commands::CommandSignature;
pub use config::{TunnelerConfig, load_config};
pub use error::{Error, Result};
pub use launcher::{Launch, ProcessLauncher};
pub use lifecycle::{TunnelLifecycle, TunnelStatus};
pub use teardown::{ProcessDirectory, SystemProcessDirectory, Teardown};
pub use tunnel_spec::{CreationMode, DestroyStrategy, TunnelSpec, VerifyStrategy};
pub use verifier::{Probe, Verifier};

/// Lifecycle wired to the real shell, launcher and probe.
pub fn system_lifecycle(spec: &TunnelSpec) -> TunnelLifecycle<Verifier, ProcessLauncher> {
    TunnelLifecycle::new(spec, Verifier::new(spec), ProcessLauncher::new(spec))
}
