//! Browser error types

use thiserror::Error;

/// Errors raised while establishing a session.
///
/// Acquisition is all-or-nothing: any of these means no usable session
/// exists and any partially started browser has already been torn down.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("failed to attach control channel: {0}")]
    ConnectFailed(String),

    #[error("browser unresponsive after {waited_ms} ms")]
    Unresponsive { waited_ms: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a tool invocation over the control channel.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    BadArguments { tool: &'static str, reason: String },

    #[error("tool call timed out after {0} ms")]
    Timeout(u64),

    #[error("no active page")]
    NoPage,

    #[error("control channel failure: {0}")]
    Channel(String),
}
