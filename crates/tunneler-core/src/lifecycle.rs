//! Create-or-confirm flow for the tunnel.
//!
//! ```text
//! Idle -> CheckingExisting -> Verified (already active)
//!                          -> Launching -> Polling -> Verified (created)
//!                                                  -> Failed
//! ```

use std::fmt;
use std::time::Duration;

use crate::commands::tunnel_command;
use crate::error::{Error, Result};
use crate::launcher::Launch;
use crate::tunnel_spec::TunnelSpec;
use crate::verifier::Probe;

/// Successful outcome of [`TunnelLifecycle::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    /// The port was already reachable; nothing was launched.
    AlreadyActive,
    /// A new ssh process was launched and the port became reachable.
    Created,
}

impl TunnelStatus {
    /// Numeric result code. `0` is reserved and never returned.
    pub const fn code(self) -> u8 {
        match self {
            Self::AlreadyActive => 1,
            Self::Created => 2,
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyActive => write!(f, "already active"),
            Self::Created => write!(f, "created"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CheckingExisting,
    Launching,
    Polling { attempt: u32 },
    Verified,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckingExisting => write!(f, "checking-existing"),
            Self::Launching => write!(f, "launching"),
            Self::Polling { attempt } => write!(f, "polling({attempt})"),
            Self::Verified => write!(f, "verified"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Drives a probe and a launcher through one create-or-confirm run.
pub struct TunnelLifecycle<P, L> {
    probe: P,
    launcher: L,
    command: String,
    tries: u32,
    wait: Duration,
}

impl<P: Probe, L: Launch> TunnelLifecycle<P, L> {
    pub fn new(spec: &TunnelSpec, probe: P, launcher: L) -> Self {
        Self {
            probe,
            launcher,
            command: tunnel_command(spec),
            tries: spec.tries,
            wait: spec.wait,
        }
    }

    fn enter(phase: Phase) {
        tracing::debug!(%phase, "tunnel lifecycle");
    }

    /// Make sure the tunnel is usable, launching it if needed.
    ///
    /// Retries are bounded by `tries`; once exhausted the run fails with
    /// [`Error::Unreachable`] carrying the exact ssh command so it can be run
    /// by hand. A fresh call starts over.
    pub fn ensure(&self) -> Result<TunnelStatus> {
        Self::enter(Phase::CheckingExisting);
        if self.probe.is_up() {
            Self::enter(Phase::Verified);
            tracing::info!("tunnel already active");
            return Ok(TunnelStatus::AlreadyActive);
        }

        Self::enter(Phase::Launching);
        self.launcher.launch()?;

        for attempt in 1..=self.tries {
            Self::enter(Phase::Polling { attempt });
            if self.probe.is_up() {
                Self::enter(Phase::Verified);
                tracing::info!(attempt, "tunnel created");
                return Ok(TunnelStatus::Created);
            }
            std::thread::sleep(self.wait);
        }

        Self::enter(Phase::Failed);
        tracing::warn!(tries = self.tries, "tunnel never became reachable");
        Err(Error::Unreachable {
            command: self.command.clone(),
        })
    }

    pub const fn probe(&self) -> &P {
        &self.probe
    }

    pub const fn launcher(&self) -> &L {
        &self.launcher
    }
}
