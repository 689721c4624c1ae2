//! Embedded QuickJS scripting environment for the `js_execution` hook.
//!
//! Scripts run in a fresh interpreter per call with a memory limit, a stack
//! limit, and an interrupt handler wired to the execution's cancellation
//! token. The only host surface is the safe builtin set: `console.log`,
//! `sendEvent`, `executeTask`, `executeHook`, `httpFetch`, plus the `input`
//! global. Values cross the boundary as JSON.
//!
//! Evaluation happens on a blocking thread; bridge implementations that need
//! async I/O block on the tokio handle they captured at construction.

mod bridge;

pub use bridge::EngineBridge;

use std::sync::Arc;

use rquickjs::{Context, Function, Runtime};
use serde_json::Value;

use crate::context::ExecContext;
use crate::error::EngineError;

/// Host capabilities exposed to scripts.
///
/// All methods are synchronous from the interpreter's point of view; async
/// implementations capture a `tokio::runtime::Handle` and block on it.
pub trait SandboxBridge: Send + Sync {
    /// `sendEvent(name, payload)`.
    fn send_event(&self, name: &str, payload: Value) -> Result<(), EngineError>;

    /// `executeTask(task, input)` — run one task definition.
    fn execute_task(&self, task: Value, input: Value) -> Result<Value, EngineError>;

    /// `executeHook(call, input)` — run one hook call.
    fn execute_hook(&self, call: Value, input: Value) -> Result<Value, EngineError>;

    /// `httpFetch(request)` — perform one HTTP request.
    fn http_fetch(&self, request: Value) -> Result<Value, EngineError>;
}

/// Bridge with no engine wiring: events are logged, HTTP is live, task and
/// hook execution are rejected.
pub struct DefaultBridge {
    handle: tokio::runtime::Handle,
    client: reqwest::Client,
}

impl DefaultBridge {
    /// Captures the current tokio runtime handle.
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
            client: reqwest::Client::new(),
        }
    }
}

impl SandboxBridge for DefaultBridge {
    fn send_event(&self, name: &str, payload: Value) -> Result<(), EngineError> {
        tracing::info!(event = %name, payload = %payload, "sandbox event");
        Ok(())
    }

    fn execute_task(&self, _task: Value, _input: Value) -> Result<Value, EngineError> {
        Err(EngineError::Execution(
            "executeTask is not wired in this sandbox".into(),
        ))
    }

    fn execute_hook(&self, _call: Value, _input: Value) -> Result<Value, EngineError> {
        Err(EngineError::Execution(
            "executeHook is not wired in this sandbox".into(),
        ))
    }

    fn http_fetch(&self, request: Value) -> Result<Value, EngineError> {
        let url = request
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Execution("httpFetch requires a url".into()))?
            .to_string();
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let body = request.get("body").cloned();
        let client = self.client.clone();
        self.handle.block_on(async move {
            let mut req = match method.as_str() {
                "GET" => client.get(&url),
                "POST" => client.post(&url),
                "PUT" => client.put(&url),
                "DELETE" => client.delete(&url),
                other => {
                    return Err(EngineError::Execution(format!(
                        "httpFetch: unsupported method {other}"
                    )))
                }
            };
            if let Some(body) = body {
                req = req.json(&body);
            }
            let response = req
                .send()
                .await
                .map_err(|e| EngineError::Execution(format!("httpFetch: {e}")))?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| EngineError::Execution(format!("httpFetch: {e}")))?;
            let body = serde_json::from_str::<Value>(&text)
                .unwrap_or(Value::String(text));
            Ok(serde_json::json!({"status": status, "body": body}))
        })
    }
}

/// QuickJS sandbox. One interpreter per `eval` call; nothing persists
/// between scripts.
pub struct JsSandbox {
    bridge: Arc<dyn SandboxBridge>,
    memory_limit: usize,
    max_stack_size: usize,
}

/// JS prelude mapping the raw host functions onto the documented builtins.
const PRELUDE: &str = r#"
globalThis.console = { log: (...args) => __host_log(args.map(a => typeof a === "string" ? a : JSON.stringify(a)).join(" ")) };
globalThis.sendEvent = (name, payload) => { __host_call("send_event", JSON.stringify([name, payload === undefined ? null : payload])); };
globalThis.executeTask = (task, input) => JSON.parse(__host_call("execute_task", JSON.stringify([task, input === undefined ? null : input])));
globalThis.executeHook = (call, input) => JSON.parse(__host_call("execute_hook", JSON.stringify([call, input === undefined ? null : input])));
globalThis.httpFetch = (request) => JSON.parse(__host_call("http_fetch", JSON.stringify([request])));
globalThis.input = JSON.parse(__input_json);
"#;

impl JsSandbox {
    pub fn new(bridge: Arc<dyn SandboxBridge>) -> Self {
        Self {
            bridge,
            memory_limit: 32 * 1024 * 1024,
            max_stack_size: 512 * 1024,
        }
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn with_max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = bytes;
        self
    }

    /// Evaluates `code` with `input` bound as a global; returns the script's
    /// completion value as JSON.
    pub async fn eval(
        &self,
        ctx: &ExecContext,
        code: String,
        input: Value,
    ) -> Result<Value, EngineError> {
        let bridge = self.bridge.clone();
        let cancel = ctx.cancellation().clone();
        let memory_limit = self.memory_limit;
        let max_stack_size = self.max_stack_size;
        let request_id = ctx.request_id.clone();

        tokio::task::spawn_blocking(move || {
            run_script(
                bridge,
                cancel,
                memory_limit,
                max_stack_size,
                request_id,
                code,
                input,
            )
        })
        .await
        .map_err(|e| EngineError::Execution(format!("sandbox thread failed: {e}")))?
    }
}

fn run_script(
    bridge: Arc<dyn SandboxBridge>,
    cancel: tokio_util::sync::CancellationToken,
    memory_limit: usize,
    max_stack_size: usize,
    request_id: String,
    code: String,
    input: Value,
) -> Result<Value, EngineError> {
    let runtime =
        Runtime::new().map_err(|e| EngineError::Execution(format!("sandbox init: {e}")))?;
    runtime.set_memory_limit(memory_limit);
    runtime.set_max_stack_size(max_stack_size);
    runtime.set_interrupt_handler(Some(Box::new(move || cancel.is_cancelled())));
    let context = Context::full(&runtime)
        .map_err(|e| EngineError::Execution(format!("sandbox context: {e}")))?;

    context.with(|ctx| -> Result<Value, EngineError> {
        let globals = ctx.globals();

        let log_request_id = request_id.clone();
        let host_log = Function::new(ctx.clone(), move |message: String| {
            tracing::info!(request_id = %log_request_id, message = %message, "sandbox console");
        })
        .map_err(js_err)?;
        globals.set("__host_log", host_log).map_err(js_err)?;

        // One dispatcher for the bridge builtins; arguments travel as a JSON
        // array string, results come back as JSON.
        let host_call = Function::new(ctx.clone(), move |name: String, args_json: String| {
            dispatch_host_call(bridge.as_ref(), &name, &args_json)
        })
        .map_err(js_err)?;
        globals.set("__host_call", host_call).map_err(js_err)?;

        let input_json = serde_json::to_string(&input).unwrap_or_else(|_| "null".into());
        globals.set("__input_json", input_json).map_err(js_err)?;

        ctx.eval::<(), _>(PRELUDE).map_err(js_err)?;

        let result: rquickjs::Value = ctx
            .eval(code.into_bytes())
            .map_err(|e| EngineError::Execution(format!("script error: {e}")))?;
        if result.is_undefined() {
            return Ok(Value::Null);
        }
        let serialized = ctx
            .json_stringify(result)
            .map_err(js_err)?
            .map(|s| s.to_string().map_err(js_err))
            .transpose()?
            .unwrap_or_else(|| "null".into());
        serde_json::from_str(&serialized).map_err(EngineError::from)
    })
}

/// Routes one builtin call onto the bridge; errors come back as a JSON
/// object with an `error` field so scripts can inspect them.
fn dispatch_host_call(bridge: &dyn SandboxBridge, name: &str, args_json: &str) -> String {
    let result = (|| -> Result<Value, EngineError> {
        let args: Vec<Value> = serde_json::from_str(args_json)?;
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
        match name {
            "send_event" => {
                let event = arg(0).as_str().unwrap_or_default().to_string();
                bridge.send_event(&event, arg(1))?;
                Ok(Value::Null)
            }
            "execute_task" => bridge.execute_task(arg(0), arg(1)),
            "execute_hook" => bridge.execute_hook(arg(0), arg(1)),
            "http_fetch" => bridge.http_fetch(arg(0)),
            other => Err(EngineError::Execution(format!(
                "unknown builtin {other}"
            ))),
        }
    })();
    match result {
        Ok(v) => v.to_string(),
        Err(e) => serde_json::json!({"error": e.to_string()}).to_string(),
    }
}

fn js_err(e: rquickjs::Error) -> EngineError {
    EngineError::Execution(format!("sandbox error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingBridge {
        events: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingBridge {
        fn new() -> Self {
            Self {
                events: Mutex::new(vec![]),
            }
        }
    }

    impl SandboxBridge for RecordingBridge {
        fn send_event(&self, name: &str, payload: Value) -> Result<(), EngineError> {
            self.events
                .lock()
                .expect("events lock")
                .push((name.to_string(), payload));
            Ok(())
        }

        fn execute_task(&self, _task: Value, _input: Value) -> Result<Value, EngineError> {
            Ok(serde_json::json!({"output": "task ran"}))
        }

        fn execute_hook(&self, call: Value, _input: Value) -> Result<Value, EngineError> {
            Ok(serde_json::json!({"hook": call["name"]}))
        }

        fn http_fetch(&self, _request: Value) -> Result<Value, EngineError> {
            Ok(serde_json::json!({"status": 200, "body": "ok"}))
        }
    }

    fn sandbox() -> (JsSandbox, Arc<RecordingBridge>) {
        let bridge = Arc::new(RecordingBridge::new());
        (JsSandbox::new(bridge.clone()), bridge)
    }

    /// **Scenario**: A script reads the input global and returns a JSON value.
    #[tokio::test(flavor = "multi_thread")]
    async fn script_reads_input_and_returns() {
        let (sandbox, _) = sandbox();
        let out = sandbox
            .eval(
                &ExecContext::new(),
                "input.a + input.b".into(),
                serde_json::json!({"a": 2, "b": 3}),
            )
            .await
            .expect("eval");
        assert_eq!(out, serde_json::json!(5));
    }

    /// **Scenario**: sendEvent reaches the bridge with its payload.
    #[tokio::test(flavor = "multi_thread")]
    async fn send_event_reaches_bridge() {
        let (sandbox, bridge) = sandbox();
        sandbox
            .eval(
                &ExecContext::new(),
                r#"sendEvent("progress", {pct: 50}); "done""#.into(),
                Value::Null,
            )
            .await
            .expect("eval");
        let events = bridge.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "progress");
        assert_eq!(events[0].1, serde_json::json!({"pct": 50}));
    }

    /// **Scenario**: executeHook results round-trip back into the script.
    #[tokio::test(flavor = "multi_thread")]
    async fn execute_hook_roundtrip() {
        let (sandbox, _) = sandbox();
        let out = sandbox
            .eval(
                &ExecContext::new(),
                r#"executeHook({name: "echo"}, "hi").hook"#.into(),
                Value::Null,
            )
            .await
            .expect("eval");
        assert_eq!(out, serde_json::json!("echo"));
    }

    /// **Scenario**: A syntax error surfaces as an execution error.
    #[tokio::test(flavor = "multi_thread")]
    async fn syntax_error_surfaces() {
        let (sandbox, _) = sandbox();
        let err = sandbox
            .eval(&ExecContext::new(), "function {".into(), Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("script error"), "{err}");
    }
}
