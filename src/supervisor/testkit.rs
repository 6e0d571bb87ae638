//! Scripted session and launcher fixtures for supervisor tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ControlledSession, SessionLauncher};
use crate::browser::{AcquisitionError, ControlError};

/// What the next scripted invocation does.
#[derive(Debug, Clone, Copy)]
pub enum InvokeOutcome {
    Succeed,
    /// Fail with the given control-channel error message.
    Fail(&'static str),
    /// Fail with the session's own timeout error.
    FailTimeout,
    /// Never answer. Bounded only by the caller's timeout, or cancelled
    /// outright. Also the behavior once the script runs out.
    Hang,
}

#[derive(Debug, Default)]
struct SessionState {
    outcomes: Mutex<VecDeque<InvokeOutcome>>,
    alive: AtomicBool,
    invocations: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    teardowns: AtomicU32,
}

/// A session that answers probes from a fixed script and counts everything
/// done to it. Cloning shares the state, so tests can keep a handle on a
/// session after the supervisor has consumed it.
#[derive(Clone, Debug)]
pub struct ScriptedSession {
    inner: Arc<SessionState>,
}

impl ScriptedSession {
    pub fn with_outcomes(outcomes: Vec<InvokeOutcome>) -> Self {
        let state = SessionState {
            outcomes: Mutex::new(outcomes.into()),
            alive: AtomicBool::new(true),
            ..Default::default()
        };
        Self {
            inner: Arc::new(state),
        }
    }

    /// Simulate the browser dying out from under the session.
    pub fn kill(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
    }

    pub fn invocations(&self) -> u32 {
        self.inner.invocations.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> u32 {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> u32 {
        self.inner.teardowns.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight gauge even when the invocation is cancelled.
struct InFlightGuard<'a> {
    state: &'a SessionState,
}

impl<'a> InFlightGuard<'a> {
    fn enter(state: &'a SessionState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { state }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ControlledSession for ScriptedSession {
    async fn invoke(
        &self,
        _tool: &str,
        _args: Value,
        timeout: Duration,
    ) -> Result<Value, ControlError> {
        self.inner.invocations.fetch_add(1, Ordering::SeqCst);
        let _gauge = InFlightGuard::enter(&self.inner);

        let outcome = self.inner.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(InvokeOutcome::Succeed) => Ok(serde_json::json!(2)),
            Some(InvokeOutcome::Fail(message)) => Err(ControlError::Channel(message.to_string())),
            Some(InvokeOutcome::FailTimeout) => {
                Err(ControlError::Timeout(timeout.as_millis() as u64))
            }
            Some(InvokeOutcome::Hang) | None => std::future::pending().await,
        }
    }

    fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    async fn teardown(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        self.inner.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out scripted sessions (or acquisition failures) in order.
pub struct ScriptedLauncher {
    sessions: Mutex<VecDeque<Result<ScriptedSession, AcquisitionError>>>,
    acquisitions: AtomicU32,
}

impl ScriptedLauncher {
    pub fn with_sessions(sessions: Vec<Result<ScriptedSession, AcquisitionError>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            acquisitions: AtomicU32::new(0),
        }
    }

    pub fn acquisitions(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLauncher for ScriptedLauncher {
    type Session = ScriptedSession;

    async fn acquire(&self) -> Result<ScriptedSession, AcquisitionError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(AcquisitionError::LaunchFailed(
                    "launcher script exhausted".to_string(),
                ))
            })
    }
}
