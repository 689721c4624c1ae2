//! `js_execution` hook: run a script in the QuickJS sandbox.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::chain::definition::HookCall;
use crate::context::ExecContext;
use crate::datatype::TaskValue;
use crate::sandbox::JsSandbox;

use super::{HookError, LocalHook, ToolSpec};

/// Executes the `code` argument against the sandbox, with the task input
/// bound as the script's `input` global.
pub struct JsExecutionHook {
    sandbox: Arc<JsSandbox>,
}

impl JsExecutionHook {
    pub fn new(sandbox: Arc<JsSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl LocalHook for JsExecutionHook {
    fn name(&self) -> &str {
        "js_execution"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "run".into(),
            description: Some(
                "Evaluates a JavaScript snippet with the task input bound as `input`. \
                 Builtins: console.log, sendEvent, executeTask, executeHook, httpFetch."
                    .into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Script to evaluate."}
                },
                "required": ["code"]
            }),
        }]
    }

    async fn exec(
        &self,
        ctx: &ExecContext,
        input: &TaskValue,
        call: &HookCall,
    ) -> Result<TaskValue, HookError> {
        let code = call
            .args
            .get("code")
            .cloned()
            .or_else(|| input.as_str().map(str::to_owned))
            .ok_or_else(|| HookError::InvalidArgs("js_execution requires code".into()))?;
        let input_json = input
            .to_json()
            .map_err(|e| HookError::InvalidArgs(e.to_string()))?;
        let result = self
            .sandbox
            .eval(ctx, code, input_json)
            .await
            .map_err(|e| HookError::Transport(e.to_string()))?;
        Ok(match result {
            serde_json::Value::String(s) => TaskValue::String(s),
            serde_json::Value::Bool(b) => TaskValue::Bool(b),
            serde_json::Value::Number(n) if n.is_i64() => {
                TaskValue::Int(n.as_i64().unwrap_or_default())
            }
            serde_json::Value::Number(n) => TaskValue::Float(n.as_f64().unwrap_or_default()),
            serde_json::Value::Null => TaskValue::Nil,
            other => TaskValue::Json(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::sandbox::DefaultBridge;

    fn hook() -> JsExecutionHook {
        JsExecutionHook::new(Arc::new(JsSandbox::new(Arc::new(DefaultBridge::new()))))
    }

    fn call(code: &str) -> HookCall {
        HookCall {
            name: "js_execution".into(),
            tool_name: Some("run".into()),
            args: HashMap::from([("code".to_string(), code.to_string())]),
        }
    }

    /// **Scenario**: The script output type maps onto the engine value types.
    #[tokio::test(flavor = "multi_thread")]
    async fn output_types_map() {
        let ctx = ExecContext::new();
        let h = hook();
        assert_eq!(
            h.exec(&ctx, &TaskValue::Nil, &call("1 + 1")).await.unwrap(),
            TaskValue::Int(2)
        );
        assert_eq!(
            h.exec(&ctx, &TaskValue::Nil, &call("\"a\" + \"b\""))
                .await
                .unwrap(),
            TaskValue::String("ab".into())
        );
        let json = h
            .exec(&ctx, &TaskValue::Nil, &call("({ok: true})"))
            .await
            .unwrap();
        assert_eq!(json, TaskValue::Json(serde_json::json!({"ok": true})));
    }

    /// **Scenario**: The task input is visible to the script.
    #[tokio::test(flavor = "multi_thread")]
    async fn input_visible_to_script() {
        let out = hook()
            .exec(
                &ExecContext::new(),
                &TaskValue::String("world".into()),
                &call("\"hello \" + input"),
            )
            .await
            .unwrap();
        assert_eq!(out, TaskValue::String("hello world".into()));
    }
}
