//! Echo and print built-ins.

use async_trait::async_trait;
use serde_json::json;

use crate::chain::definition::HookCall;
use crate::context::ExecContext;
use crate::datatype::TaskValue;

use super::{HookError, LocalHook, ToolSpec};

/// Returns its input unchanged. The canonical smoke-test hook.
pub struct EchoHook;

#[async_trait]
impl LocalHook for EchoHook {
    fn name(&self) -> &str {
        "echo"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "echo".into(),
            description: Some("Returns the input unchanged.".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "input": {"description": "Value to echo back."}
                }
            }),
        }]
    }

    async fn exec(
        &self,
        _ctx: &ExecContext,
        input: &TaskValue,
        call: &HookCall,
    ) -> Result<TaskValue, HookError> {
        if let Some(text) = call.args.get("input") {
            return Ok(TaskValue::String(text.clone()));
        }
        Ok(input.clone())
    }
}

/// Logs its input on the engine's log stream and passes it through.
pub struct PrintHook;

#[async_trait]
impl LocalHook for PrintHook {
    fn name(&self) -> &str {
        "print"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "print".into(),
            description: Some("Logs the input and returns it unchanged.".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "input": {"description": "Value to log."}
                }
            }),
        }]
    }

    async fn exec(
        &self,
        ctx: &ExecContext,
        input: &TaskValue,
        call: &HookCall,
    ) -> Result<TaskValue, HookError> {
        let text = call
            .args
            .get("input")
            .cloned()
            .unwrap_or_else(|| input.eval_string());
        tracing::info!(request_id = %ctx.request_id, output = %text, "print hook");
        Ok(input.clone())
    }
}
