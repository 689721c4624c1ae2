//! Task execution: the seam between the interpreter and the handlers.
//!
//! The interpreter owns retries, timeouts, and step recording; an executor
//! performs exactly one task attempt with at most one external I/O. The
//! `TaskExecutor` trait is the mock point for deterministic interpreter
//! tests.

mod executor;

pub use executor::HandlerExecutor;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::chain::definition::TaskDefinition;
use crate::context::ExecContext;
use crate::datatype::TaskValue;
use crate::error::EngineError;
use crate::hooks::ToolSpec;

/// Chain-wide execution context built once per run.
///
/// Carries the tool catalogue assembled from every task's `executeConfig`
/// (plus the client-supplied tools of an `openai_chat` input) so the LLM
/// sees a consistent tool set, and the shared token budget.
pub struct ChainContext {
    /// Hook tools under qualified names (`"{hook}.{tool}"`).
    pub tools: Vec<ToolSpec>,
    /// Tools the calling client supplied on an `openai_chat` request.
    pub client_tools: Vec<ToolSpec>,
    pub debug: bool,
    token_limit: Option<u64>,
    used_tokens: AtomicU64,
}

impl ChainContext {
    pub fn new(debug: bool, token_limit: Option<u64>) -> Self {
        Self {
            tools: Vec::new(),
            client_tools: Vec::new(),
            debug,
            token_limit,
            used_tokens: AtomicU64::new(0),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_client_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.client_tools = tools;
        self
    }

    /// Full catalogue offered to the model: hook tools then client tools.
    pub fn all_tools(&self) -> Vec<ToolSpec> {
        let mut tools = self.tools.clone();
        tools.extend(self.client_tools.iter().cloned());
        tools
    }

    /// Tokens consumed so far by LLM handlers.
    pub fn used_tokens(&self) -> u64 {
        self.used_tokens.load(Ordering::Relaxed)
    }

    /// Fails when the budget is already spent; called before an LLM call.
    pub fn ensure_budget(&self) -> Result<(), EngineError> {
        if let Some(limit) = self.token_limit {
            let used = self.used_tokens();
            if used >= limit {
                return Err(EngineError::Execution(format!(
                    "token budget exhausted: used {used} of {limit}"
                )));
            }
        }
        Ok(())
    }

    /// Adds an LLM call's usage to the running total.
    pub fn charge_tokens(&self, tokens: u64) {
        self.used_tokens.fetch_add(tokens, Ordering::Relaxed);
    }
}

/// Result of one successful task attempt.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub output: TaskValue,
    /// Canonical string fed to transition comparison.
    pub eval: String,
}

/// Executes exactly one task attempt.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecContext,
        started: DateTime<Utc>,
        chain_ctx: &ChainContext,
        task: &TaskDefinition,
        input: TaskValue,
    ) -> Result<ExecOutcome, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: The budget refuses further LLM work once spent.
    #[test]
    fn budget_enforced() {
        let ctx = ChainContext::new(false, Some(100));
        assert!(ctx.ensure_budget().is_ok());
        ctx.charge_tokens(60);
        assert!(ctx.ensure_budget().is_ok());
        ctx.charge_tokens(60);
        assert!(ctx.ensure_budget().is_err());
    }

    /// **Scenario**: Without a limit the budget never refuses.
    #[test]
    fn no_limit_never_refuses() {
        let ctx = ChainContext::new(false, None);
        ctx.charge_tokens(u64::MAX / 2);
        assert!(ctx.ensure_budget().is_ok());
    }

    /// **Scenario**: all_tools appends client tools after hook tools.
    #[test]
    fn all_tools_order() {
        let hook_tool = ToolSpec {
            name: "echo.echo".into(),
            description: None,
            input_schema: serde_json::json!({}),
        };
        let client_tool = ToolSpec {
            name: "client_fn".into(),
            description: None,
            input_schema: serde_json::json!({}),
        };
        let ctx = ChainContext::new(false, None)
            .with_tools(vec![hook_tool])
            .with_client_tools(vec![client_tool]);
        let all = ctx.all_tools();
        assert_eq!(all[0].name, "echo.echo");
        assert_eq!(all[1].name, "client_fn");
    }
}
