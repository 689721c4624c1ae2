//! Local hook registry: statically registered built-in hooks.
//!
//! The map is write-once at startup; execution only reads. Every local hook
//! publishes an OpenAPI-shaped schema derived from its tool list so the LLM
//! can be told what to call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};

use crate::chain::definition::HookCall;
use crate::context::ExecContext;
use crate::datatype::TaskValue;

use super::{split_qualified, HookError, HookRegistry, ToolSpec};

/// One locally implemented hook: a name plus its tools.
#[async_trait]
pub trait LocalHook: Send + Sync {
    fn name(&self) -> &str;

    fn tools(&self) -> Vec<ToolSpec>;

    /// Executes `call` against this hook. `call.tool_name` arrives with any
    /// `"{hook}."` prefix already stripped; an absent tool name selects the
    /// hook's single tool when it has exactly one.
    async fn exec(
        &self,
        ctx: &ExecContext,
        input: &TaskValue,
        call: &HookCall,
    ) -> Result<TaskValue, HookError>;
}

/// Registry over the local built-ins.
#[derive(Default)]
pub struct LocalHookRegistry {
    hooks: DashMap<String, Arc<dyn LocalHook>>,
}

impl LocalHookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook under its own name. Replaces on duplicate.
    pub fn register(&self, hook: Arc<dyn LocalHook>) {
        self.hooks.insert(hook.name().to_string(), hook);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LocalHook>> {
        self.hooks.get(name).map(|h| h.clone())
    }

    /// Builds the OpenAPI-shaped schema for one hook: every tool becomes a
    /// POST operation keyed by its name.
    fn schema_for(hook: &dyn LocalHook) -> Value {
        let mut paths = serde_json::Map::new();
        for tool in hook.tools() {
            paths.insert(
                format!("/{}", tool.name),
                json!({
                    "post": {
                        "operationId": tool.name,
                        "description": tool.description,
                        "requestBody": {
                            "content": {
                                "application/json": {"schema": tool.input_schema}
                            }
                        }
                    }
                }),
            );
        }
        json!({
            "openapi": "3.0.0",
            "info": {"title": hook.name(), "version": "1.0.0"},
            "paths": Value::Object(paths)
        })
    }
}

#[async_trait]
impl HookRegistry for LocalHookRegistry {
    async fn supports(&self, _ctx: &ExecContext) -> Result<Vec<String>, HookError> {
        let mut names: Vec<String> = self.hooks.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn tools_for_hook(
        &self,
        _ctx: &ExecContext,
        name: &str,
    ) -> Result<Vec<ToolSpec>, HookError> {
        let hook = self
            .get(name)
            .ok_or_else(|| HookError::UnknownHook(name.into()))?;
        Ok(hook.tools())
    }

    async fn schemas_for_supported_hooks(
        &self,
        _ctx: &ExecContext,
    ) -> Result<HashMap<String, Value>, HookError> {
        Ok(self
            .hooks
            .iter()
            .map(|e| (e.key().clone(), Self::schema_for(e.value().as_ref())))
            .collect())
    }

    async fn exec(
        &self,
        ctx: &ExecContext,
        _started: DateTime<Utc>,
        input: &TaskValue,
        debug: bool,
        call: &HookCall,
    ) -> Result<TaskValue, HookError> {
        let hook = self
            .get(&call.name)
            .ok_or_else(|| HookError::UnknownHook(call.name.clone()))?;
        let mut call = call.clone();
        if let Some(tool) = &call.tool_name {
            // Strip a leading "{hook}." so chain JSON may use qualified names.
            if let Some((prefix, rest)) = split_qualified(tool) {
                if prefix == call.name {
                    call.tool_name = Some(rest.to_string());
                }
            }
        }
        if debug {
            tracing::debug!(
                request_id = %ctx.request_id,
                hook = %call.name,
                tool = call.tool_name.as_deref().unwrap_or(""),
                input_type = %input.data_type(),
                "local hook exec"
            );
        }
        hook.exec(ctx, input, &call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::EchoHook;

    fn registry() -> LocalHookRegistry {
        let r = LocalHookRegistry::new();
        r.register(Arc::new(EchoHook));
        r
    }

    /// **Scenario**: supports lists registered hook names sorted.
    #[tokio::test]
    async fn supports_lists_registered() {
        let names = registry().supports(&ExecContext::new()).await.unwrap();
        assert_eq!(names, vec!["echo"]);
    }

    /// **Scenario**: exec strips the hook-name prefix from qualified tool names.
    #[tokio::test]
    async fn exec_strips_qualified_prefix() {
        let call = HookCall {
            name: "echo".into(),
            tool_name: Some("echo.echo".into()),
            args: HashMap::new(),
        };
        let out = registry()
            .exec(
                &ExecContext::new(),
                Utc::now(),
                &TaskValue::String("hi".into()),
                false,
                &call,
            )
            .await
            .unwrap();
        assert_eq!(out.as_str(), Some("hi"));
    }

    /// **Scenario**: An unregistered hook name is an unknown-hook error.
    #[tokio::test]
    async fn unknown_hook_errors() {
        let call = HookCall {
            name: "ghost".into(),
            ..Default::default()
        };
        let err = registry()
            .exec(
                &ExecContext::new(),
                Utc::now(),
                &TaskValue::Nil,
                false,
                &call,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::UnknownHook(_)));
    }

    /// **Scenario**: Hook schemas are OpenAPI-shaped with one path per tool.
    #[tokio::test]
    async fn schemas_are_openapi_shaped() {
        let schemas = registry()
            .schemas_for_supported_hooks(&ExecContext::new())
            .await
            .unwrap();
        let echo = &schemas["echo"];
        assert_eq!(echo["openapi"], "3.0.0");
        assert!(echo["paths"]["/echo"]["post"]["operationId"].is_string());
    }
}
