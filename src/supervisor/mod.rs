//! Session supervision
//!
//! A long-running watchdog for one browser automation session: probes the
//! control channel on a fixed period, classifies failures, and performs a
//! full teardown-and-relaunch when the session is judged unrecoverable.

mod monitor;
mod probe;
mod restart;
#[cfg(test)]
pub(crate) mod testkit;

pub use monitor::{HealthMonitor, HealthState, Phase, RestartReason, WatchVerdict};
pub use probe::{classify_failure, FailureKind, ProbeExecutor, ProbeResult};
pub use restart::{RestartCoordinator, RestartError, RestartPolicy};

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::browser::{AcquisitionError, ControlError};

/// A live automation session the supervisor can probe and tear down.
///
/// The supervisor owns its session exclusively. Nothing else may hold one
/// across a restart boundary: a handle cached before a relaunch points at
/// a browser that no longer exists.
#[async_trait]
pub trait ControlledSession: Send + Sync {
    /// Invoke a named tool over the control channel, bounded by `timeout`.
    async fn invoke(&self, tool: &str, args: Value, timeout: Duration)
        -> Result<Value, ControlError>;

    /// Whether the underlying browser connection is still up.
    fn is_alive(&self) -> bool;

    /// Best-effort ordered teardown. Idempotent and infallible so the
    /// failure path can always complete.
    async fn teardown(&self);
}

/// Produces sessions, for the initial launch and every relaunch after.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    type Session: ControlledSession;

    async fn acquire(&self) -> Result<Self::Session, AcquisitionError>;
}

/// Terminal supervisor failures. Everything probe-level is absorbed
/// internally; only these end the process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The first launch never produced a session.
    #[error("initial session launch failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// A relaunch failed. One attempt per restart, no retry loop.
    #[error(transparent)]
    Restart(#[from] RestartError),
}

/// Composition root: owns the session, the health monitor and the restart
/// coordinator, and drives the phase loop
/// `Launching -> Ready -> Restarting -> Launching ...` until shutdown.
pub struct Supervisor<L: SessionLauncher> {
    launcher: L,
    monitor: HealthMonitor,
    coordinator: RestartCoordinator,
    health: watch::Sender<HealthState>,
    shutdown: watch::Receiver<bool>,
}

impl<L: SessionLauncher> Supervisor<L> {
    /// `shutdown` flipping to true (or closing) stops the supervisor: timers
    /// and any in-flight probe are cancelled, the session is torn down, and
    /// [`Supervisor::run`] returns cleanly.
    pub fn new(launcher: L, policy: RestartPolicy, shutdown: watch::Receiver<bool>) -> Self {
        let (health, _) = watch::channel(HealthState::new());
        Self {
            launcher,
            monitor: HealthMonitor::new(&policy),
            coordinator: RestartCoordinator::new(&policy),
            health,
            shutdown,
        }
    }

    /// Subscribe to health snapshots of the supervised session.
    pub fn health(&self) -> watch::Receiver<HealthState> {
        self.health.subscribe()
    }

    /// Run until shutdown (Ok) or a fatal launch failure (Err).
    ///
    /// The state loop is explicit: a relaunch never re-enters `run`, so
    /// restart depth is bounded no matter how often the session dies.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        self.set_phase(Phase::Launching);
        info!("[Supervisor] Launching session");

        let mut session = match self.launcher.acquire().await {
            Ok(session) => session,
            Err(e) => {
                error!("[Supervisor] Initial launch failed: {}", e);
                self.set_phase(Phase::ShuttingDown);
                return Err(SupervisorError::Acquisition(e));
            }
        };

        loop {
            let verdict = self
                .monitor
                .watch(&session, &self.health, &mut self.shutdown)
                .await;

            match verdict {
                WatchVerdict::Shutdown => {
                    info!("[Supervisor] Shutdown requested, closing session");
                    self.set_phase(Phase::ShuttingDown);
                    session.teardown().await;
                    info!("[Supervisor] Shutdown complete");
                    return Ok(());
                }
                WatchVerdict::Restart(reason) => {
                    warn!("[Supervisor] Restarting session ({})", reason);
                    self.set_phase(Phase::Restarting);

                    session = match self.coordinator.restart(&self.launcher, session).await {
                        Ok(fresh) => fresh,
                        Err(e) => {
                            error!("[Supervisor] {}; giving up", e);
                            self.set_phase(Phase::ShuttingDown);
                            return Err(SupervisorError::Restart(e));
                        }
                    };

                    self.health.send_modify(|h| {
                        h.phase = Phase::Launching;
                        h.restarts += 1;
                    });
                }
            }
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.health.send_modify(|h| h.phase = phase);
    }
}
