//! Named tools exposed over the control channel.
//!
//! The supervisor's probe and any caller-driven automation go through the
//! same `dispatch` surface, so a probe exercises exactly the path real
//! commands take.

use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use serde_json::Value;

use super::errors::ControlError;

/// Tools the session answers to, logged at startup.
pub const TOOL_NAMES: [&str; 4] = ["navigate", "evaluate", "page_url", "page_title"];

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Navigate { url: String },
    Evaluate { expression: String },
    PageUrl,
    PageTitle,
}

/// Parse a tool name and its JSON arguments into a [`ToolCall`].
pub fn parse(tool: &str, args: &Value) -> Result<ToolCall, ControlError> {
    match tool {
        "navigate" => Ok(ToolCall::Navigate {
            url: required_str(args, "url", "navigate")?.to_string(),
        }),
        "evaluate" => Ok(ToolCall::Evaluate {
            expression: required_str(args, "expression", "evaluate")?.to_string(),
        }),
        "page_url" => Ok(ToolCall::PageUrl),
        "page_title" => Ok(ToolCall::PageTitle),
        other => Err(ControlError::UnknownTool(other.to_string())),
    }
}

/// Execute a parsed call against the live page.
pub async fn run(page: &Page, call: ToolCall) -> Result<Value, ControlError> {
    match call {
        ToolCall::Navigate { url } => {
            page.goto(url.as_str()).await.map_err(channel)?;
            Ok(Value::Null)
        }
        ToolCall::Evaluate { expression } => {
            let result = page.evaluate(expression).await.map_err(channel)?;
            Ok(result.value().cloned().unwrap_or(Value::Null))
        }
        ToolCall::PageUrl => page
            .url()
            .await
            .map_err(channel)?
            .map(Value::String)
            .ok_or_else(|| ControlError::Channel("page reported no url".to_string())),
        ToolCall::PageTitle => Ok(page
            .get_title()
            .await
            .map_err(channel)?
            .map(Value::String)
            .unwrap_or(Value::Null)),
    }
}

/// Parse and execute in one step.
pub async fn dispatch(page: &Page, tool: &str, args: &Value) -> Result<Value, ControlError> {
    run(page, parse(tool, args)?).await
}

/// CDP transport and protocol failures all surface as channel errors; the
/// probe classifies them by message text.
fn channel(err: CdpError) -> ControlError {
    ControlError::Channel(err.to_string())
}

fn required_str<'a>(args: &'a Value, key: &str, tool: &'static str) -> Result<&'a str, ControlError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ControlError::BadArguments {
            tool,
            reason: format!("missing string field '{}'", key),
        })
}
