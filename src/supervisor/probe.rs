//! Liveness probing and failure classification.
//!
//! A probe is one cheap round-trip over the control channel, issued to test
//! that the session still answers, never to do useful work.

use std::time::Duration;

use tracing::debug;

use super::ControlledSession;
use crate::browser::ControlError;

/// Tool invoked by every probe.
const PROBE_TOOL: &str = "evaluate";
/// Cheapest expression that still exercises the page attachment.
const PROBE_EXPRESSION: &str = "1 + 1";

/// Outcome of a single probe tick. Produced and consumed within one
/// monitor tick, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Success,
    Failure(FailureKind),
    Timeout,
}

/// What a failed probe says about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The control surface lost its page/frame attachment. Known to be
    /// unrecoverable without a full relaunch.
    FrameDetached,
    /// Anything else; possibly transient, tolerated until the session
    /// goes stale.
    Generic,
}

/// Classify a control-channel error message.
///
/// CDP surfaces failures as free text, so this is a substring contract:
/// a message naming a frame together with a detachment marker means the
/// page attachment is gone. Everything else is generic. The matching is
/// case-insensitive.
pub fn classify_failure(message: &str) -> FailureKind {
    let message = message.to_ascii_lowercase();
    let detached = message.contains("detached")
        || message.contains("context lost")
        || message.contains("context was destroyed");

    if message.contains("frame") && detached {
        FailureKind::FrameDetached
    } else {
        FailureKind::Generic
    }
}

/// Issues one probe invocation under a bounded timeout.
pub struct ProbeExecutor {
    timeout: Duration,
}

impl ProbeExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a single probe against the session.
    ///
    /// The invocation is raced against the timeout here as well as bounded
    /// inside the session, so even a control channel that never answers
    /// cannot stall the monitor for longer than `timeout`.
    pub async fn probe<S: ControlledSession>(&self, session: &S) -> ProbeResult {
        let args = serde_json::json!({ "expression": PROBE_EXPRESSION });

        match tokio::time::timeout(self.timeout, session.invoke(PROBE_TOOL, args, self.timeout)).await {
            Ok(Ok(_)) => ProbeResult::Success,
            Ok(Err(ControlError::Timeout(_))) => ProbeResult::Timeout,
            Ok(Err(err)) => {
                let kind = classify_failure(&err.to_string());
                debug!("[Supervisor] Probe error ({:?}): {}", kind, err);
                ProbeResult::Failure(kind)
            }
            Err(_) => ProbeResult::Timeout,
        }
    }
}
