//! Hook subsystem: a uniform interface over local built-in tools and remote
//! OpenAPI-described services.
//!
//! A *hook* is a named capability with zero or more *tools*. The interpreter
//! and the task executor talk to one `HookRegistry`; concrete backings are
//! [`LocalHookRegistry`] (statically registered built-ins) and
//! [`RemoteHookRegistry`] (records in a persistent store, executed through
//! the OpenAPI tool protocol). [`AggregateHookRegistry`] routes between them
//! by hook name.

mod aggregate;
mod echo;
mod fs;
mod js;
mod local;
mod openapi;
mod remote;
mod shell;
mod ssh;
mod webhook;

pub use aggregate::AggregateHookRegistry;
pub use echo::{EchoHook, PrintHook};
pub use fs::LocalFsHook;
pub use js::JsExecutionHook;
pub use local::{LocalHook, LocalHookRegistry};
pub use openapi::{OpenApiProtocol, ParamArg, ParamIn};
pub use remote::{HookStore, InMemoryHookStore, RemoteHookRecord, RemoteHookRegistry};
pub use shell::{LocalShellHook, ShellPolicy};
pub use ssh::{SshConfig, SshHook};
pub use webhook::WebhookHook;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::chain::definition::HookCall;
use crate::context::ExecContext;
use crate::datatype::TaskValue;
use crate::error::EngineError;

/// Tool specification published to the LLM.
///
/// Shape aligns with an OpenAPI operation: name (operationId), description,
/// and a JSON-schema for the arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

impl ToolSpec {
    /// Prefixes the tool name with its hook: `"{hook}.{tool}"`.
    pub fn qualified(mut self, hook: &str) -> Self {
        self.name = format!("{hook}.{}", self.name);
        self
    }
}

/// Errors from listing, describing, or executing hooks.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("unknown hook: {0}")]
    UnknownHook(String),
    #[error("hook {hook} has no tool {tool}")]
    UnknownTool { hook: String, tool: String },
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("hook returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("hook call timed out")]
    Timeout,
    #[error("schema error: {0}")]
    Schema(String),
    #[error("denied by policy: {0}")]
    Denied(String),
}

impl From<HookError> for EngineError {
    /// All hook failures map to the execution kind so the interpreter's
    /// retry and `onFailure` routing apply, unknown hooks included — a chain
    /// can route around a hook that was never registered.
    fn from(e: HookError) -> Self {
        EngineError::Hook(e.to_string())
    }
}

/// Uniform hook interface consumed by the interpreter and executor.
#[async_trait]
pub trait HookRegistry: Send + Sync {
    /// Names of the hooks this registry can execute.
    async fn supports(&self, ctx: &ExecContext) -> Result<Vec<String>, HookError>;

    /// Tool list for one hook.
    async fn tools_for_hook(
        &self,
        ctx: &ExecContext,
        name: &str,
    ) -> Result<Vec<ToolSpec>, HookError>;

    /// OpenAPI-shaped schema per supported hook. A hook whose schema cannot
    /// be fetched is skipped, not fatal.
    async fn schemas_for_supported_hooks(
        &self,
        ctx: &ExecContext,
    ) -> Result<HashMap<String, Value>, HookError>;

    /// Executes one tool call against one hook.
    async fn exec(
        &self,
        ctx: &ExecContext,
        started: DateTime<Utc>,
        input: &TaskValue,
        debug: bool,
        call: &HookCall,
    ) -> Result<TaskValue, HookError>;
}

/// Merges a hook call's static `args` and the task input into one JSON
/// arguments object.
///
/// String inputs land under `"input"`; JSON objects are merged field-wise
/// (explicit args win); everything else is attached untagged under
/// `"input"`.
pub fn merge_args(call: &HookCall, input: &TaskValue) -> Result<Value, HookError> {
    let mut obj = serde_json::Map::new();
    match input {
        TaskValue::Nil => {}
        TaskValue::Json(Value::Object(fields)) => {
            for (k, v) in fields {
                obj.insert(k.clone(), v.clone());
            }
        }
        other => {
            let v = other
                .to_json()
                .map_err(|e| HookError::InvalidArgs(e.to_string()))?;
            obj.insert("input".into(), v);
        }
    }
    for (k, v) in &call.args {
        obj.insert(k.clone(), Value::String(v.clone()));
    }
    Ok(Value::Object(obj))
}

/// Splits a qualified tool name into `(hook, tool)` at the first dot.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: merge_args merges object inputs field-wise with args winning.
    #[test]
    fn merge_args_object_input() {
        let call = HookCall {
            name: "h".into(),
            tool_name: None,
            args: [("mode".to_string(), "fast".to_string())].into(),
        };
        let input = TaskValue::Json(serde_json::json!({"q": "rust", "mode": "slow"}));
        let merged = merge_args(&call, &input).unwrap();
        assert_eq!(merged["q"], "rust");
        assert_eq!(merged["mode"], "fast");
    }

    /// **Scenario**: String inputs land under the "input" key.
    #[test]
    fn merge_args_string_input() {
        let call = HookCall::default();
        let merged = merge_args(&call, &TaskValue::String("hello".into())).unwrap();
        assert_eq!(merged["input"], "hello");
    }

    /// **Scenario**: split_qualified splits at the first dot only.
    #[test]
    fn split_qualified_first_dot() {
        assert_eq!(
            split_qualified("search.web.query"),
            Some(("search", "web.query"))
        );
        assert_eq!(split_qualified("plain"), None);
    }

    /// **Scenario**: qualified() prefixes the tool name with its hook.
    #[test]
    fn tool_spec_qualification() {
        let spec = ToolSpec {
            name: "echo".into(),
            description: None,
            input_schema: serde_json::json!({}),
        };
        assert_eq!(spec.qualified("echo_hook").name, "echo_hook.echo");
    }
}
