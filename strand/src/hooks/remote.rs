//! Remote hooks: persisted records executed through the OpenAPI protocol.
//!
//! The metadata cache mirrors the store behind an atomic snapshot swap;
//! refreshes are single-flighted by a compare-and-swap flag plus a minimum
//! interval, so a burst of misses triggers at most one store scan.
//! Credentials live in the record's `headers` and `properties` and are bound
//! here — they never appear in chain JSON.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

use crate::chain::definition::HookCall;
use crate::context::ExecContext;
use crate::datatype::TaskValue;

use super::{merge_args, HookError, HookRegistry, OpenApiProtocol, ParamArg, ParamIn, ToolSpec};

/// A persisted remote hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteHookRecord {
    pub name: String,
    pub endpoint_url: String,
    pub timeout_ms: u64,
    /// Headers sent on every call (credential injection).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Fixed parameters, keyed `"location:name"` (`"query:api_key"`);
    /// a bare key defaults to the body.
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Creation time; the schema-listing cursor pages on this.
    pub created_at: DateTime<Utc>,
}

impl RemoteHookRecord {
    /// Builds the injection map from `properties` and `headers`.
    pub fn injections(&self) -> Vec<ParamArg> {
        let mut args: Vec<ParamArg> = self
            .headers
            .iter()
            .map(|(name, value)| ParamArg {
                name: name.clone(),
                value: value.clone(),
                location: ParamIn::Header,
            })
            .collect();
        for (key, value) in &self.properties {
            let (location, name) = match key.split_once(':') {
                Some((prefix, rest)) => match ParamIn::parse(prefix) {
                    Some(location) => (location, rest),
                    None => (ParamIn::Body, key.as_str()),
                },
                None => (ParamIn::Body, key.as_str()),
            };
            args.push(ParamArg {
                name: name.to_string(),
                value: value.clone(),
                location,
            });
        }
        args.sort_by(|a, b| a.name.cmp(&b.name));
        args
    }
}

/// Abstract store for remote hook records (persistence is a collaborator).
#[async_trait]
pub trait HookStore: Send + Sync {
    async fn get(
        &self,
        ctx: &ExecContext,
        name: &str,
    ) -> Result<Option<RemoteHookRecord>, HookError>;

    /// Records created strictly after `cursor`, oldest first, at most `limit`.
    async fn list(
        &self,
        ctx: &ExecContext,
        cursor: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RemoteHookRecord>, HookError>;
}

/// In-memory store for tests and embedded setups.
#[derive(Default)]
pub struct InMemoryHookStore {
    records: RwLock<Vec<RemoteHookRecord>>,
}

impl InMemoryHookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: RemoteHookRecord) {
        let mut records = self.records.write().expect("store lock");
        records.retain(|r| r.name != record.name);
        records.push(record);
        records.sort_by_key(|r| r.created_at);
    }
}

#[async_trait]
impl HookStore for InMemoryHookStore {
    async fn get(
        &self,
        _ctx: &ExecContext,
        name: &str,
    ) -> Result<Option<RemoteHookRecord>, HookError> {
        Ok(self
            .records
            .read()
            .expect("store lock")
            .iter()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn list(
        &self,
        _ctx: &ExecContext,
        cursor: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RemoteHookRecord>, HookError> {
        Ok(self
            .records
            .read()
            .expect("store lock")
            .iter()
            .filter(|r| cursor.map(|c| r.created_at > c).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Snapshot cache over the store with single-flight refresh.
struct MetadataCache {
    snapshot: RwLock<Arc<HashMap<String, RemoteHookRecord>>>,
    syncing: AtomicBool,
    refreshed_at: std::sync::Mutex<Option<Instant>>,
    interval: Duration,
}

impl MetadataCache {
    fn new(interval: Duration) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            syncing: AtomicBool::new(false),
            refreshed_at: std::sync::Mutex::new(None),
            interval,
        }
    }

    fn get(&self, name: &str) -> Option<RemoteHookRecord> {
        self.snapshot
            .read()
            .expect("cache lock")
            .get(name)
            .cloned()
    }

    fn due(&self) -> bool {
        self.refreshed_at
            .lock()
            .expect("cache clock lock")
            .map(|at| at.elapsed() >= self.interval)
            .unwrap_or(true)
    }

    async fn refresh(&self, ctx: &ExecContext, store: &dyn HookStore) -> Result<(), HookError> {
        if !self.due()
            || self
                .syncing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return Ok(());
        }
        let result = async {
            let mut all = HashMap::new();
            let mut cursor = None;
            loop {
                let page = store.list(ctx, cursor, SCHEMA_PAGE_SIZE).await?;
                let Some(last) = page.last() else { break };
                cursor = Some(last.created_at);
                let full = page.len() == SCHEMA_PAGE_SIZE;
                for record in page {
                    all.insert(record.name.clone(), record);
                }
                if !full {
                    break;
                }
            }
            *self.snapshot.write().expect("cache lock") = Arc::new(all);
            *self.refreshed_at.lock().expect("cache clock lock") = Some(Instant::now());
            Ok(())
        }
        .await;
        self.syncing.store(false, Ordering::Release);
        result
    }
}

/// Page size for schema aggregation and cache refresh.
pub(crate) const SCHEMA_PAGE_SIZE: usize = 100;

/// Registry over remote hook records.
pub struct RemoteHookRegistry {
    store: Arc<dyn HookStore>,
    protocol: Arc<OpenApiProtocol>,
    cache: MetadataCache,
}

impl RemoteHookRegistry {
    pub fn new(store: Arc<dyn HookStore>) -> Self {
        Self::with_protocol(store, Arc::new(OpenApiProtocol::new()))
    }

    pub fn with_protocol(store: Arc<dyn HookStore>, protocol: Arc<OpenApiProtocol>) -> Self {
        Self {
            store,
            protocol,
            cache: MetadataCache::new(Duration::from_secs(30)),
        }
    }

    async fn record(
        &self,
        ctx: &ExecContext,
        name: &str,
    ) -> Result<RemoteHookRecord, HookError> {
        if let Some(record) = self.cache.get(name) {
            return Ok(record);
        }
        self.cache.refresh(ctx, self.store.as_ref()).await?;
        if let Some(record) = self.cache.get(name) {
            return Ok(record);
        }
        self.store
            .get(ctx, name)
            .await?
            .ok_or_else(|| HookError::UnknownHook(name.to_string()))
    }
}

#[async_trait]
impl HookRegistry for RemoteHookRegistry {
    async fn supports(&self, ctx: &ExecContext) -> Result<Vec<String>, HookError> {
        let mut names = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.store.list(ctx, cursor, SCHEMA_PAGE_SIZE).await?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.created_at);
            let full = page.len() == SCHEMA_PAGE_SIZE;
            names.extend(page.into_iter().map(|r| r.name));
            if !full {
                break;
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
        let record = self.record(ctx, name).await?;
        let doc = self.protocol.document(ctx, &record.endpoint_url).await?;
        Ok(doc.tool_specs())
    }

    async fn schemas_for_supported_hooks(
        &self,
        ctx: &ExecContext,
    ) -> Result<HashMap<String, Value>, HookError> {
        let mut schemas = HashMap::new();
        let mut cursor = None;
        loop {
            let page = self.store.list(ctx, cursor, SCHEMA_PAGE_SIZE).await?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.created_at);
            let full = page.len() == SCHEMA_PAGE_SIZE;
            for record in page {
                match self.protocol.document(ctx, &record.endpoint_url).await {
                    Ok(doc) => {
                        schemas.insert(
                            record.name.clone(),
                            serde_json::json!({
                                "endpoint": record.endpoint_url,
                                "tools": doc.tool_specs(),
                            }),
                        );
                    }
                    Err(e) => {
                        warn!(hook = %record.name, error = %e, "skipping hook schema");
                    }
                }
            }
            if !full {
                break;
            }
        }
        Ok(schemas)
    }

    async fn exec(
        &self,
        ctx: &ExecContext,
        _started: DateTime<Utc>,
        input: &TaskValue,
        _debug: bool,
        call: &HookCall,
    ) -> Result<TaskValue, HookError> {
        let record = self.record(ctx, &call.name).await?;
        let injections = record.injections();

        let tool = call
            .tool_name
            .as_deref()
            .ok_or_else(|| HookError::InvalidArgs("remote hook call needs a tool name".into()))?;
        let operation_id = tool
            .strip_prefix(&format!("{}.", call.name))
            .unwrap_or(tool);

        let args = merge_args(call, input)?;
        let timeout = ctx
            .io_timeout(Some(Duration::from_millis(record.timeout_ms)))
            .unwrap_or_else(|| Duration::from_millis(record.timeout_ms));

        self.protocol
            .call(
                ctx,
                &record.endpoint_url,
                operation_id,
                args,
                &injections,
                timeout,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, seconds: i64) -> RemoteHookRecord {
        RemoteHookRecord {
            name: name.into(),
            endpoint_url: "https://svc.example".into(),
            timeout_ms: 5000,
            headers: HashMap::from([("authorization".into(), "Bearer t".into())]),
            properties: HashMap::from([
                ("query:api_key".into(), "k".into()),
                ("tenant".into(), "acme".into()),
            ]),
            created_at: DateTime::<Utc>::from_timestamp(seconds, 0).expect("timestamp"),
        }
    }

    /// **Scenario**: The injection map routes headers to header, prefixed
    /// properties to their location, and bare properties to the body.
    #[test]
    fn injection_map_locations() {
        let injections = record("h", 0).injections();
        let by_name: HashMap<&str, &ParamArg> =
            injections.iter().map(|p| (p.name.as_str(), p)).collect();
        assert_eq!(by_name["authorization"].location, ParamIn::Header);
        assert_eq!(by_name["api_key"].location, ParamIn::Query);
        assert_eq!(by_name["tenant"].location, ParamIn::Body);
    }

    /// **Scenario**: An unknown remote hook reports UnknownHook.
    #[tokio::test]
    async fn unknown_hook_reported() {
        let registry = RemoteHookRegistry::new(Arc::new(InMemoryHookStore::new()));
        let call = HookCall {
            name: "ghost".into(),
            tool_name: Some("x".into()),
            args: HashMap::new(),
        };
        let err = registry
            .exec(
                &ExecContext::new(),
                Utc::now(),
                &TaskValue::Nil,
                false,
                &call,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::UnknownHook(_)), "{err}");
    }

    /// **Scenario**: supports pages through the store with the creation cursor.
    #[tokio::test]
    async fn supports_lists_all_records() {
        let store = Arc::new(InMemoryHookStore::new());
        for i in 0..5 {
            store.insert(record(&format!("hook{i}"), i));
        }
        let registry = RemoteHookRegistry::new(store);
        let names = registry.supports(&ExecContext::new()).await.unwrap();
        assert_eq!(names.len(), 5);
        assert_eq!(names[0], "hook0");
    }
}
