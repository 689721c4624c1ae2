//! Engine-wired sandbox bridge.
//!
//! Connects the script builtins to a hook registry and a task executor, so
//! `executeHook` and `executeTask` run real engine work. Constructed per
//! execution with the run's context, since bridge calls carry no context of
//! their own.

use std::sync::Arc;

use serde_json::Value;

use crate::chain::definition::{HookCall, TaskDefinition};
use crate::context::ExecContext;
use crate::datatype::TaskValue;
use crate::error::EngineError;
use crate::exec::{ChainContext, TaskExecutor};
use crate::hooks::HookRegistry;

use super::{DefaultBridge, SandboxBridge};

fn value_to_task_value(value: Value) -> TaskValue {
    match value {
        Value::Null => TaskValue::Nil,
        Value::Bool(b) => TaskValue::Bool(b),
        Value::Number(n) if n.is_i64() => TaskValue::Int(n.as_i64().unwrap_or_default()),
        Value::Number(n) => TaskValue::Float(n.as_f64().unwrap_or_default()),
        Value::String(s) => TaskValue::String(s),
        other => TaskValue::Json(other),
    }
}

/// Bridge backed by the engine: hooks and single-task execution.
pub struct EngineBridge {
    inner: DefaultBridge,
    ctx: ExecContext,
    hooks: Arc<dyn HookRegistry>,
    executor: Arc<dyn TaskExecutor>,
}

impl EngineBridge {
    /// Captures the current tokio runtime handle and the run's context.
    pub fn new(
        ctx: ExecContext,
        hooks: Arc<dyn HookRegistry>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            inner: DefaultBridge::new(),
            ctx,
            hooks,
            executor,
        }
    }
}

impl SandboxBridge for EngineBridge {
    fn send_event(&self, name: &str, payload: Value) -> Result<(), EngineError> {
        self.inner.send_event(name, payload)
    }

    fn execute_task(&self, task: Value, input: Value) -> Result<Value, EngineError> {
        let task: TaskDefinition = serde_json::from_value(task)
            .map_err(|e| EngineError::Execution(format!("executeTask: bad task: {e}")))?;
        let input = value_to_task_value(input);
        let ctx = self.ctx.clone();
        let executor = self.executor.clone();
        let handle = tokio::runtime::Handle::current();
        let outcome = handle.block_on(async move {
            let chain_ctx = ChainContext::new(false, None);
            executor
                .execute(&ctx, chrono::Utc::now(), &chain_ctx, &task, input)
                .await
        })?;
        outcome.output.to_json()
    }

    fn execute_hook(&self, call: Value, input: Value) -> Result<Value, EngineError> {
        let call: HookCall = serde_json::from_value(call)
            .map_err(|e| EngineError::Execution(format!("executeHook: bad call: {e}")))?;
        let input = value_to_task_value(input);
        let ctx = self.ctx.clone();
        let hooks = self.hooks.clone();
        let handle = tokio::runtime::Handle::current();
        let output = handle.block_on(async move {
            hooks
                .exec(&ctx, chrono::Utc::now(), &input, false, &call)
                .await
        })?;
        output.to_json()
    }

    fn http_fetch(&self, request: Value) -> Result<Value, EngineError> {
        self.inner.http_fetch(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EchoHook, LocalHookRegistry};
    use crate::sandbox::JsSandbox;

    struct NoopExecutor;

    #[async_trait::async_trait]
    impl TaskExecutor for NoopExecutor {
        async fn execute(
            &self,
            _ctx: &ExecContext,
            _started: chrono::DateTime<chrono::Utc>,
            _chain_ctx: &ChainContext,
            _task: &TaskDefinition,
            input: TaskValue,
        ) -> Result<crate::exec::ExecOutcome, EngineError> {
            Ok(crate::exec::ExecOutcome {
                eval: input.eval_string(),
                output: input,
            })
        }
    }

    fn sandbox(ctx: &ExecContext) -> JsSandbox {
        let hooks = Arc::new(LocalHookRegistry::new());
        hooks.register(Arc::new(EchoHook));
        JsSandbox::new(Arc::new(EngineBridge::new(
            ctx.clone(),
            hooks,
            Arc::new(NoopExecutor),
        )))
    }

    /// **Scenario**: A script drives a local hook through executeHook.
    #[tokio::test(flavor = "multi_thread")]
    async fn script_executes_local_hook() {
        let ctx = ExecContext::new();
        let out = sandbox(&ctx)
            .eval(
                &ctx,
                r#"executeHook({name: "echo"}, "ping")"#.into(),
                Value::Null,
            )
            .await
            .expect("eval");
        assert_eq!(out, serde_json::json!("ping"));
    }

    /// **Scenario**: A script runs a task definition through executeTask.
    #[tokio::test(flavor = "multi_thread")]
    async fn script_executes_task() {
        let ctx = ExecContext::new();
        let task = r#"{
            id: "inline",
            handler: "noop",
            transition: {branches: [{operator: "default", when: "", goto: "end"}]}
        }"#;
        let out = sandbox(&ctx)
            .eval(
                &ctx,
                format!(r#"executeTask({task}, "through")"#),
                Value::Null,
            )
            .await
            .expect("eval");
        assert_eq!(out, serde_json::json!("through"));
    }
}
