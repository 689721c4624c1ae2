//! Aggregate registry: one surface over local built-ins and remote hooks.
//!
//! Routing is by hook name; local registrations win on collision so a
//! remote record can never shadow a built-in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::chain::definition::HookCall;
use crate::context::ExecContext;
use crate::datatype::TaskValue;

use super::{HookError, HookRegistry, LocalHookRegistry, RemoteHookRegistry, ToolSpec};

/// Local + remote hooks behind the uniform interface.
pub struct AggregateHookRegistry {
    local: Arc<LocalHookRegistry>,
    remote: Option<Arc<RemoteHookRegistry>>,
}

impl AggregateHookRegistry {
    pub fn new(local: Arc<LocalHookRegistry>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<RemoteHookRegistry>) -> Self {
        self.remote = Some(remote);
        self
    }

    fn is_local(&self, name: &str) -> bool {
        self.local.get(name).is_some()
    }
}

#[async_trait]
impl HookRegistry for AggregateHookRegistry {
    async fn supports(&self, ctx: &ExecContext) -> Result<Vec<String>, HookError> {
        let mut names = self.local.supports(ctx).await?;
        if let Some(remote) = &self.remote {
            for name in remote.supports(ctx).await? {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn tools_for_hook(
        &self,
        ctx: &ExecContext,
        name: &str,
    ) -> Result<Vec<ToolSpec>, HookError> {
        if self.is_local(name) {
            return self.local.tools_for_hook(ctx, name).await;
        }
        match &self.remote {
            Some(remote) => remote.tools_for_hook(ctx, name).await,
            None => Err(HookError::UnknownHook(name.into())),
        }
    }

    async fn schemas_for_supported_hooks(
        &self,
        ctx: &ExecContext,
    ) -> Result<HashMap<String, Value>, HookError> {
        let mut schemas = match &self.remote {
            Some(remote) => remote.schemas_for_supported_hooks(ctx).await?,
            None => HashMap::new(),
        };
        // Local schemas override remote ones of the same name.
        schemas.extend(self.local.schemas_for_supported_hooks(ctx).await?);
        Ok(schemas)
    }

    async fn exec(
        &self,
        ctx: &ExecContext,
        started: DateTime<Utc>,
        input: &TaskValue,
        debug: bool,
        call: &HookCall,
    ) -> Result<TaskValue, HookError> {
        if self.is_local(&call.name) {
            return self.local.exec(ctx, started, input, debug, call).await;
        }
        match &self.remote {
            Some(remote) => remote.exec(ctx, started, input, debug, call).await,
            None => Err(HookError::UnknownHook(call.name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EchoHook, InMemoryHookStore, RemoteHookRecord};

    fn registry_with_remote() -> AggregateHookRegistry {
        let local = Arc::new(LocalHookRegistry::new());
        local.register(Arc::new(EchoHook));
        let store = Arc::new(InMemoryHookStore::new());
        store.insert(RemoteHookRecord {
            name: "search".into(),
            endpoint_url: "https://svc.example".into(),
            timeout_ms: 1000,
            headers: HashMap::new(),
            properties: HashMap::new(),
            created_at: Utc::now(),
        });
        AggregateHookRegistry::new(local)
            .with_remote(Arc::new(RemoteHookRegistry::new(store)))
    }

    /// **Scenario**: supports merges local and remote names without duplicates.
    #[tokio::test]
    async fn supports_merges_local_and_remote() {
        let names = registry_with_remote()
            .supports(&ExecContext::new())
            .await
            .unwrap();
        assert_eq!(names, vec!["echo", "search"]);
    }

    /// **Scenario**: exec routes to the local hook when the name is registered
    /// locally.
    #[tokio::test]
    async fn exec_prefers_local() {
        let call = HookCall {
            name: "echo".into(),
            ..Default::default()
        };
        let out = registry_with_remote()
            .exec(
                &ExecContext::new(),
                Utc::now(),
                &TaskValue::String("x".into()),
                false,
                &call,
            )
            .await
            .unwrap();
        assert_eq!(out.as_str(), Some("x"));
    }

    /// **Scenario**: A name in neither backing is unknown.
    #[tokio::test]
    async fn unknown_everywhere() {
        let local = Arc::new(LocalHookRegistry::new());
        let registry = AggregateHookRegistry::new(local);
        let err = registry
            .exec(
                &ExecContext::new(),
                Utc::now(),
                &TaskValue::Nil,
                false,
                &HookCall {
                    name: "nope".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::UnknownHook(_)));
    }
}
