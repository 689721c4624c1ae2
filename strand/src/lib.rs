//! Strand: a runtime for executing declarative LLM task chains.
//!
//! A chain is a JSON-defined state machine: each task invokes an LLM
//! handler, an external tool ("hook"), or a deterministic transform, and
//! its transitions are evaluated against the handler's output to choose the
//! next task. The runtime multiplexes many concurrent chain executions
//! across a pool of heterogeneous LLM backends chosen per task.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use strand::chain::{ChainRunner, TaskChainDefinition};
//! use strand::context::ExecContext;
//! use strand::datatype::TaskValue;
//! use strand::exec::HandlerExecutor;
//! use strand::hooks::{AggregateHookRegistry, EchoHook, LocalHookRegistry};
//! use strand::resolver::{ModelResolver, ProviderCatalogue};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let chain: TaskChainDefinition = serde_json::from_str(
//!     r#"{"id":"greet","tasks":[
//!         {"id":"t1","handler":"prompt_to_string",
//!          "promptTemplate":"Say hi to {{ input }}",
//!          "transition":{"branches":[{"operator":"default","when":"","goto":"end"}]}}]}"#,
//! )?;
//!
//! let local = Arc::new(LocalHookRegistry::new());
//! local.register(Arc::new(EchoHook));
//! let hooks = Arc::new(AggregateHookRegistry::new(local));
//! let catalogue = Arc::new(ProviderCatalogue::new());
//! let resolver = Arc::new(ModelResolver::new(catalogue));
//! let executor = Arc::new(HandlerExecutor::new(resolver, hooks.clone()));
//!
//! let runner = ChainRunner::new(executor, hooks);
//! let ctx = ExecContext::new();
//! let outcome = runner
//!     .exec_env(&ctx, &chain, TaskValue::String("world".into()))
//!     .await?;
//! println!("{:?}", outcome.output);
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod chat;
pub mod context;
pub mod datatype;
pub mod error;
pub mod exec;
pub mod hooks;
pub mod inspect;
pub mod llm;
pub mod openai;
pub mod parse;
pub mod resolver;
pub mod sandbox;

pub use chain::{
    ChainFailure, ChainOutcome, ChainRunner, HandlerKind, TaskChainDefinition, TaskDefinition,
    END,
};
pub use chain_trace::{CapturedStep, StepError, StepErrorKind, TraceEnvelope};
pub use chat::{ChatHistory, ChatMessage, Role, ToolCall};
pub use context::ExecContext;
pub use datatype::{DataType, TaskValue};
pub use error::EngineError;
pub use exec::{ChainContext, ExecOutcome, HandlerExecutor, TaskExecutor};
pub use hooks::{
    AggregateHookRegistry, HookError, HookRegistry, LocalHook, LocalHookRegistry,
    RemoteHookRegistry, ToolSpec,
};
pub use inspect::{InMemoryStepTracker, Inspector, StackTrace, StepInspector, StepTracker};
pub use llm::{ChatClient, EmbedClient, LlmUsage, PromptClient, StreamClient};
pub use resolver::{ModelResolver, Provider, ProviderCatalogue, ResolveRequest};
pub use sandbox::{DefaultBridge, EngineBridge, JsSandbox, SandboxBridge};
