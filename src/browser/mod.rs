//! Browser session backend
//!
//! Launches and controls the Chromium instance the supervisor watches,
//! and exposes the named tools callable over its CDP control channel.

mod errors;
mod session;
pub mod tools;

pub use errors::{AcquisitionError, ControlError};
pub use session::{BrowserLauncher, BrowserSession, SessionConfig};
pub use tools::TOOL_NAMES;
