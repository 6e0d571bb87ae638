//! Health monitor for the supervised session.
//!
//! Runs one probe per tick against the live session and decides whether to
//! tolerate a failure, force a relaunch, or stand down for shutdown. The
//! loop is strictly serial: the next tick is not scheduled until the
//! current probe has finished or been cancelled, so probes never overlap.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::probe::{FailureKind, ProbeExecutor, ProbeResult};
use super::restart::RestartPolicy;
use super::ControlledSession;

/// Lifecycle phase of the supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Launching,
    Ready,
    /// Ready, but the last probe failed. Purely informational: the tick
    /// logic treats it exactly like `Ready`.
    Degraded,
    Restarting,
    ShuttingDown,
}

/// Point-in-time health snapshot, published through a watch channel.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub phase: Phase,
    /// Instant of the last successful probe (or of session readiness).
    pub last_success: Instant,
    /// Probe failures since the last success.
    pub consecutive_failures: u32,
    /// Relaunches performed so far.
    pub restarts: u32,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Launching,
            last_success: Instant::now(),
            consecutive_failures: 0,
            restarts: 0,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the monitor stopped watching a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchVerdict {
    /// The session is unrecoverable and must be replaced.
    Restart(RestartReason),
    /// An external shutdown request arrived.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// A probe classified as frame detachment. Bypasses the staleness
    /// grace period entirely.
    FrameDetached,
    /// No successful probe within the stale threshold.
    Stale { stale_for: Duration },
    /// The browser connection dropped out from under the session.
    Disconnected,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::FrameDetached => write!(f, "page frame detached"),
            RestartReason::Stale { stale_for } => {
                write!(f, "no successful probe for {}ms", stale_for.as_millis())
            }
            RestartReason::Disconnected => write!(f, "browser connection lost"),
        }
    }
}

/// Probes the session on a fixed period and escalates when it goes bad.
pub struct HealthMonitor {
    probe_interval: Duration,
    stale_threshold: Duration,
    executor: ProbeExecutor,
}

impl HealthMonitor {
    pub fn new(policy: &RestartPolicy) -> Self {
        Self {
            probe_interval: policy.probe_interval,
            stale_threshold: policy.stale_threshold,
            executor: ProbeExecutor::new(policy.probe_timeout),
        }
    }

    /// Watch `session` until it needs replacing or shutdown is requested.
    ///
    /// Entering this function marks the session `Ready` and starts the
    /// staleness clock; acquisition already verified responsiveness. Both
    /// the inter-tick sleep and the in-flight probe are raced against the
    /// shutdown channel, so a shutdown request never waits on either. A
    /// closed shutdown channel counts as a shutdown request.
    pub async fn watch<S>(
        &self,
        session: &S,
        health: &watch::Sender<HealthState>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> WatchVerdict
    where
        S: ControlledSession,
    {
        let mut last_success = Instant::now();
        health.send_modify(|h| {
            h.phase = Phase::Ready;
            h.last_success = last_success;
            h.consecutive_failures = 0;
        });
        info!(
            "[Supervisor] Watching session (probe every {}ms, stale threshold {}ms)",
            self.probe_interval.as_millis(),
            self.stale_threshold.as_millis()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return WatchVerdict::Shutdown,
                _ = time::sleep(self.probe_interval) => {}
            }

            // A dead handle needs no probe to be judged
            if !session.is_alive() {
                warn!("[Supervisor] Browser connection lost, forcing relaunch");
                return WatchVerdict::Restart(RestartReason::Disconnected);
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.changed() => return WatchVerdict::Shutdown,
                result = self.executor.probe(session) => result,
            };

            match result {
                ProbeResult::Success => {
                    last_success = Instant::now();
                    health.send_modify(|h| {
                        h.phase = Phase::Ready;
                        h.last_success = last_success;
                        h.consecutive_failures = 0;
                    });
                    debug!("[Supervisor] Probe ok");
                }
                ProbeResult::Failure(FailureKind::FrameDetached) => {
                    health.send_modify(|h| h.consecutive_failures += 1);
                    warn!("[Supervisor] Probe found the page frame detached");
                    return WatchVerdict::Restart(RestartReason::FrameDetached);
                }
                ProbeResult::Failure(FailureKind::Generic) | ProbeResult::Timeout => {
                    let stale_for = last_success.elapsed();
                    health.send_modify(|h| {
                        h.phase = Phase::Degraded;
                        h.consecutive_failures += 1;
                    });

                    if stale_for > self.stale_threshold {
                        warn!(
                            "[Supervisor] No successful probe for {}ms (threshold {}ms), forcing relaunch",
                            stale_for.as_millis(),
                            self.stale_threshold.as_millis()
                        );
                        return WatchVerdict::Restart(RestartReason::Stale { stale_for });
                    }

                    let label = match result {
                        ProbeResult::Timeout => "Probe timed out",
                        _ => "Probe failed",
                    };
                    warn!(
                        "[Supervisor] {}, tolerating ({}ms since last success)",
                        label,
                        stale_for.as_millis()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::testkit::{InvokeOutcome, ScriptedSession};
    use futures::poll;

    fn policy_ms(interval: u64, timeout: u64, threshold: u64) -> RestartPolicy {
        RestartPolicy {
            probe_interval: Duration::from_millis(interval),
            probe_timeout: Duration::from_millis(timeout),
            stale_threshold: Duration::from_millis(threshold),
            cooldown: Duration::from_millis(2_000),
        }
    }

    fn channels() -> (
        watch::Sender<HealthState>,
        watch::Receiver<HealthState>,
        watch::Sender<bool>,
        watch::Receiver<bool>,
    ) {
        let (health_tx, health_rx) = watch::channel(HealthState::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (health_tx, health_rx, shutdown_tx, shutdown_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successes_keep_session_ready() {
        let policy = policy_ms(30_000, 30_000, 30_000);
        let monitor = HealthMonitor::new(&policy);
        let session = ScriptedSession::with_outcomes(vec![
            InvokeOutcome::Succeed,
            InvokeOutcome::Succeed,
            InvokeOutcome::Succeed,
        ]);
        let (health_tx, health_rx, shutdown_tx, mut shutdown_rx) = channels();

        let fut = monitor.watch(&session, &health_tx, &mut shutdown_rx);
        tokio::pin!(fut);

        for _ in 0..3 {
            assert!(poll!(fut.as_mut()).is_pending());
            time::advance(policy.probe_interval).await;
        }
        assert!(poll!(fut.as_mut()).is_pending());

        assert_eq!(session.invocations(), 3);
        let snapshot = health_rx.borrow().clone();
        assert_eq!(snapshot.phase, Phase::Ready);
        assert_eq!(snapshot.consecutive_failures, 0);

        shutdown_tx.send(true).unwrap();
        assert_eq!(fut.await, WatchVerdict::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_detachment_restarts_on_the_same_tick() {
        // Threshold far above one interval: the restart cannot be blamed
        // on staleness
        let policy = policy_ms(30_000, 30_000, 600_000);
        let monitor = HealthMonitor::new(&policy);
        let session = ScriptedSession::with_outcomes(vec![InvokeOutcome::Fail(
            "Frame was detached from the navigator context",
        )]);
        let (health_tx, _health_rx, _shutdown_tx, mut shutdown_rx) = channels();

        let verdict = monitor.watch(&session, &health_tx, &mut shutdown_rx).await;

        assert_eq!(verdict, WatchVerdict::Restart(RestartReason::FrameDetached));
        assert_eq!(session.invocations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_session_restarts_once_threshold_exceeded() {
        // Five timed-out probes, one every 30s; the threshold is only
        // crossed (strictly) at the fifth, 150s after the last success.
        let policy = policy_ms(30_000, 30_000, 120_000);
        let monitor = HealthMonitor::new(&policy);
        let session =
            ScriptedSession::with_outcomes(vec![InvokeOutcome::FailTimeout; 5]);
        let (health_tx, health_rx, _shutdown_tx, mut shutdown_rx) = channels();

        let verdict = monitor.watch(&session, &health_tx, &mut shutdown_rx).await;

        match verdict {
            WatchVerdict::Restart(RestartReason::Stale { stale_for }) => {
                assert_eq!(stale_for.as_millis(), 150_000);
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
        assert_eq!(session.invocations(), 5);
        let snapshot = health_rx.borrow().clone();
        assert_eq!(snapshot.consecutive_failures, 5);
        assert_eq!(snapshot.phase, Phase::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_equal_to_threshold_is_tolerated() {
        let policy = policy_ms(30_000, 30_000, 30_000);
        let monitor = HealthMonitor::new(&policy);
        let session = ScriptedSession::with_outcomes(vec![
            InvokeOutcome::FailTimeout,
            InvokeOutcome::FailTimeout,
        ]);
        let (health_tx, _health_rx, _shutdown_tx, mut shutdown_rx) = channels();

        let verdict = monitor.watch(&session, &health_tx, &mut shutdown_rx).await;

        // First failure lands exactly at the threshold and is tolerated;
        // only the second strictly exceeds it.
        assert_eq!(session.invocations(), 2);
        assert!(matches!(
            verdict,
            WatchVerdict::Restart(RestartReason::Stale { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_clears_on_next_success() {
        let policy = policy_ms(30_000, 30_000, 600_000);
        let monitor = HealthMonitor::new(&policy);
        let session = ScriptedSession::with_outcomes(vec![
            InvokeOutcome::Fail("net::ERR_TIMED_OUT"),
            InvokeOutcome::Succeed,
        ]);
        let (health_tx, health_rx, shutdown_tx, mut shutdown_rx) = channels();

        let fut = monitor.watch(&session, &health_tx, &mut shutdown_rx);
        tokio::pin!(fut);

        assert!(poll!(fut.as_mut()).is_pending());
        time::advance(policy.probe_interval).await;
        assert!(poll!(fut.as_mut()).is_pending());
        {
            let snapshot = health_rx.borrow().clone();
            assert_eq!(snapshot.phase, Phase::Degraded);
            assert_eq!(snapshot.consecutive_failures, 1);
        }

        time::advance(policy.probe_interval).await;
        assert!(poll!(fut.as_mut()).is_pending());
        {
            let snapshot = health_rx.borrow().clone();
            assert_eq!(snapshot.phase, Phase::Ready);
            assert_eq!(snapshot.consecutive_failures, 0);
        }

        shutdown_tx.send(true).unwrap();
        assert_eq!(fut.await, WatchVerdict::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_handle_restarts_without_probing() {
        let policy = policy_ms(30_000, 30_000, 30_000);
        let monitor = HealthMonitor::new(&policy);
        let session = ScriptedSession::with_outcomes(vec![InvokeOutcome::Succeed]);
        session.kill();
        let (health_tx, _health_rx, _shutdown_tx, mut shutdown_rx) = channels();

        let verdict = monitor.watch(&session, &health_tx, &mut shutdown_rx).await;

        assert_eq!(verdict, WatchVerdict::Restart(RestartReason::Disconnected));
        assert_eq!(session.invocations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_probe_cancels_the_wait() {
        let policy = policy_ms(30_000, 30_000, 30_000);
        let monitor = HealthMonitor::new(&policy);
        let session = ScriptedSession::with_outcomes(vec![InvokeOutcome::Hang]);
        let (health_tx, _health_rx, shutdown_tx, mut shutdown_rx) = channels();

        let fut = monitor.watch(&session, &health_tx, &mut shutdown_rx);
        tokio::pin!(fut);

        assert!(poll!(fut.as_mut()).is_pending());
        time::advance(policy.probe_interval).await;
        assert!(poll!(fut.as_mut()).is_pending());
        assert_eq!(session.in_flight(), 1);

        shutdown_tx.send(true).unwrap();
        assert_eq!(fut.await, WatchVerdict::Shutdown);
        // The cancelled probe released its slot without triggering a restart
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_never_overlap() {
        // Each hung probe burns its full timeout; a naive periodic timer
        // would have fired the next tick mid-probe.
        let policy = policy_ms(30_000, 30_000, 100_000);
        let monitor = HealthMonitor::new(&policy);
        let session =
            ScriptedSession::with_outcomes(vec![InvokeOutcome::Hang, InvokeOutcome::Hang]);
        let (health_tx, _health_rx, _shutdown_tx, mut shutdown_rx) = channels();

        let verdict = monitor.watch(&session, &health_tx, &mut shutdown_rx).await;

        assert!(matches!(
            verdict,
            WatchVerdict::Restart(RestartReason::Stale { .. })
        ));
        assert_eq!(session.invocations(), 2);
        assert_eq!(session.max_in_flight(), 1);
    }
}
