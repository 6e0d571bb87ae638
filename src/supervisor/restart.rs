//! Teardown-and-relaunch of a failed session.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use super::{ControlledSession, SessionLauncher};
use crate::browser::AcquisitionError;

/// Timing knobs for the supervision loop. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Pause between liveness probes.
    pub probe_interval: Duration,
    /// Bound on a single probe round-trip.
    pub probe_timeout: Duration,
    /// Max tolerated time since the last successful probe. Strictly
    /// exceeding it forces a relaunch.
    pub stale_threshold: Duration,
    /// Pause between teardown and relaunch, so the old browser process can
    /// release its profile lock before a new one starts against it.
    pub cooldown: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(30_000),
            probe_timeout: Duration::from_millis(30_000),
            stale_threshold: Duration::from_millis(30_000),
            cooldown: Duration::from_millis(2_000),
        }
    }
}

/// A relaunch after teardown failed. Fatal: the supervisor gives up rather
/// than retrying into a restart storm.
#[derive(Debug, Error)]
#[error("session relaunch failed: {0}")]
pub struct RestartError(#[from] pub AcquisitionError);

/// Replaces a failed session with a fresh one.
pub struct RestartCoordinator {
    cooldown: Duration,
}

impl RestartCoordinator {
    pub fn new(policy: &RestartPolicy) -> Self {
        Self {
            cooldown: policy.cooldown,
        }
    }

    /// Tear down `stale`, wait out the cooldown, then acquire a replacement.
    ///
    /// Teardown is best effort and cannot fail; only the re-acquisition can,
    /// and that failure is terminal for the supervisor.
    pub async fn restart<L>(&self, launcher: &L, stale: L::Session) -> Result<L::Session, RestartError>
    where
        L: SessionLauncher,
    {
        info!("[Supervisor] Tearing down failed session");
        stale.teardown().await;

        debug!(
            "[Supervisor] Cooling down {}ms before relaunch",
            self.cooldown.as_millis()
        );
        tokio::time::sleep(self.cooldown).await;

        let session = launcher.acquire().await.map_err(RestartError)?;
        info!("[Supervisor] Replacement session acquired");
        Ok(session)
    }
}
