//! The chain interpreter: drives the task state machine.
//!
//! One `exec_env` call runs one chain to completion, strictly sequentially.
//! Per task: honour cancellation, choose the input, render the prompt
//! template, run the retry loop through the task executor (recording a step
//! per attempt), apply failure routing, render `print`/`outputTemplate`,
//! evaluate transitions, compose, update variables, advance.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chain_trace::CapturedStep;
use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chain::compose::{compose, composed_var_name};
use crate::chain::definition::{TaskChainDefinition, TaskDefinition, END};
use crate::chain::macros::expand_chain;
use crate::chain::template::render;
use crate::chain::transition::select_branch;
use crate::chain::validate::validate_chain;
use crate::context::ExecContext;
use crate::datatype::{DataType, TaskValue};
use crate::error::EngineError;
use crate::exec::{ChainContext, ExecOutcome, TaskExecutor};
use crate::hooks::HookRegistry;
use crate::inspect::{Inspector, StackTrace, StepInspector};
use crate::openai::OpenAiTool;

/// Sink for `print` template output. The engine emits; callers render.
pub trait PrintSink: Send + Sync {
    fn print(&self, task_id: &str, text: &str);
}

/// Default sink: the engine's log stream.
pub struct LogPrintSink;

impl PrintSink for LogPrintSink {
    fn print(&self, task_id: &str, text: &str) {
        tracing::info!(task = %task_id, output = %text, "chain print");
    }
}

/// Successful execution result.
#[derive(Debug)]
pub struct ChainOutcome {
    pub output: TaskValue,
    pub output_type: DataType,
    pub steps: Vec<CapturedStep>,
}

/// Failed execution result: the error plus the recorded trace, enough to
/// render a post-mortem.
#[derive(Debug, Error)]
#[error("chain execution failed: {source}")]
pub struct ChainFailure {
    #[source]
    pub source: EngineError,
    pub steps: Vec<CapturedStep>,
}

/// The interpreter. Holds the executor and hook registry; per-execution
/// state lives on the stack of `exec_env`.
pub struct ChainRunner {
    executor: Arc<dyn TaskExecutor>,
    hooks: Arc<dyn HookRegistry>,
    inspector: Arc<dyn Inspector>,
    print_sink: Arc<dyn PrintSink>,
}

impl ChainRunner {
    pub fn new(executor: Arc<dyn TaskExecutor>, hooks: Arc<dyn HookRegistry>) -> Self {
        Self {
            executor,
            hooks,
            inspector: Arc::new(StepInspector::new()),
            print_sink: Arc::new(LogPrintSink),
        }
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn Inspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_print_sink(mut self, sink: Arc<dyn PrintSink>) -> Self {
        self.print_sink = sink;
        self
    }

    /// Starts a trace without running; lets callers set breakpoints first.
    pub fn start_trace(&self, ctx: &ExecContext) -> Arc<StackTrace> {
        self.inspector.start(ctx)
    }

    /// Runs `chain` against `input` to completion.
    ///
    /// Applies the macro expansion pass, then interprets the expanded chain.
    pub async fn exec_env(
        &self,
        ctx: &ExecContext,
        chain: &TaskChainDefinition,
        input: TaskValue,
    ) -> Result<ChainOutcome, ChainFailure> {
        let stack = self.inspector.start(ctx);
        self.exec_env_with_trace(ctx, chain, input, stack).await
    }

    /// As [`exec_env`](Self::exec_env), recording onto a caller-provided
    /// trace (breakpoint harnesses).
    pub async fn exec_env_with_trace(
        &self,
        ctx: &ExecContext,
        chain: &TaskChainDefinition,
        input: TaskValue,
        stack: Arc<StackTrace>,
    ) -> Result<ChainOutcome, ChainFailure> {
        let fail = |source: EngineError, stack: &StackTrace| ChainFailure {
            source,
            steps: stack.get_execution_history(),
        };

        if let Err(e) = validate_chain(chain) {
            return Err(fail(e.into(), &stack));
        }
        let chain = match expand_chain(ctx, self.hooks.as_ref(), chain).await {
            Ok(chain) => chain,
            Err(e) => return Err(fail(e, &stack)),
        };

        let chain_ctx = match self.build_chain_context(ctx, &chain, &input).await {
            Ok(cc) => cc,
            Err(e) => return Err(fail(e, &stack)),
        };

        let mut vars: HashMap<String, TaskValue> = HashMap::new();
        vars.insert("input".to_string(), input.clone());

        let mut output = input;
        let mut current = &chain.tasks[0];

        loop {
            if let Err(e) = ctx.ensure_live() {
                return Err(fail(e, &stack));
            }

            // Input selection: previous output unless inputVar redirects.
            let task_input = if let Some(var) = &current.input_var {
                match vars.get(var) {
                    Some(v) => v.clone(),
                    None => return Err(fail(EngineError::UnknownVariable(var.clone()), &stack)),
                }
            } else {
                output.clone()
            };

            // Prompt template: the rendered string becomes the task input.
            let task_input = match &current.prompt_template {
                Some(template) if !template.is_empty() => match render(template, &vars) {
                    Ok(rendered) => TaskValue::String(rendered),
                    Err(e) => return Err(fail(e, &stack)),
                },
                _ => task_input,
            };

            let attempt_result = self
                .retry_loop(ctx, &chain_ctx, current, &task_input, &stack, chain.debug)
                .await;

            let outcome = match attempt_result {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Failure routing applies to task-level failures only;
                    // validation, rendering, cancellation, and breakpoints
                    // surface directly.
                    let routable = matches!(
                        e.kind(),
                        chain_trace::StepErrorKind::Execution
                            | chain_trace::StepErrorKind::Resolution
                    );
                    if let (true, Some(target)) =
                        (routable, current.transition.on_failure.clone())
                    {
                        warn!(
                            request_id = %ctx.request_id,
                            task = %current.id,
                            target = %target,
                            error = %e,
                            "routing task failure"
                        );
                        if target == END {
                            return Ok(ChainOutcome {
                                output: TaskValue::Nil,
                                output_type: DataType::Nil,
                                steps: stack.get_execution_history(),
                            });
                        }
                        current = match chain.task(&target) {
                            Some(task) => task,
                            None => {
                                return Err(fail(EngineError::UnknownTask(target), &stack))
                            }
                        };
                        continue;
                    }
                    if !routable {
                        return Err(fail(e, &stack));
                    }
                    let task_id = current.id.clone();
                    let attempts = current.retry_on_failure + 1;
                    return Err(fail(
                        EngineError::TaskFailed {
                            task_id,
                            attempts,
                            source: Box::new(e),
                        },
                        &stack,
                    ));
                }
            };

            let mut task_output = outcome.output;
            let eval = outcome.eval;

            // Output template rewrites the task's string output.
            if let Some(template) = &current.output_template {
                if !template.is_empty() {
                    let mut scoped = vars.clone();
                    scoped.insert("output".to_string(), task_output.clone());
                    match render(template, &scoped) {
                        Ok(rendered) => task_output = TaskValue::String(rendered),
                        Err(e) => return Err(fail(e, &stack)),
                    }
                }
            }

            // Print side effect.
            if let Some(template) = &current.print {
                if !template.is_empty() {
                    let mut scoped = vars.clone();
                    scoped.insert("output".to_string(), task_output.clone());
                    match render(template, &scoped) {
                        Ok(rendered) => self.print_sink.print(&current.id, &rendered),
                        Err(e) => return Err(fail(e, &stack)),
                    }
                }
            }

            // Transition selection, then compose on the chosen branch.
            let branch = match select_branch(&current.transition.branches, &eval) {
                Ok(branch) => branch,
                Err(e) => return Err(fail(e, &stack)),
            };

            // The raw output is the task's variable; compose rewrites only
            // the flowing output.
            vars.insert(current.id.clone(), task_output.clone());

            if let Some(directive) = &branch.compose {
                let with = match vars.get(&directive.with_var) {
                    Some(v) => v.clone(),
                    None => {
                        return Err(fail(
                            EngineError::UnknownVariable(directive.with_var.clone()),
                            &stack,
                        ))
                    }
                };
                task_output = match compose(directive, task_output, &with) {
                    Ok(composed) => composed,
                    Err(e) => return Err(fail(e, &stack)),
                };
                vars.insert(
                    composed_var_name(&current.id, &branch.when),
                    task_output.clone(),
                );
            }

            vars.insert("previous_output".to_string(), task_output.clone());
            output = task_output;

            debug!(
                request_id = %ctx.request_id,
                task = %current.id,
                eval = %eval,
                goto = %branch.goto,
                "transition"
            );

            if branch.goto.is_empty() || branch.goto == END {
                return Ok(ChainOutcome {
                    output_type: output.data_type(),
                    output,
                    steps: stack.get_execution_history(),
                });
            }
            current = match chain.task(&branch.goto) {
                Some(task) => task,
                None => {
                    return Err(fail(EngineError::UnknownTask(branch.goto.clone()), &stack))
                }
            };
        }
    }

    /// Builds the chain-wide tool catalogue once per execution.
    async fn build_chain_context(
        &self,
        ctx: &ExecContext,
        chain: &TaskChainDefinition,
        input: &TaskValue,
    ) -> Result<ChainContext, EngineError> {
        let mut tools = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for task in &chain.tasks {
            let Some(config) = &task.execute_config else {
                continue;
            };
            for hook in &config.hooks {
                if !seen.insert(hook.clone()) {
                    continue;
                }
                let hook_tools = self
                    .hooks
                    .tools_for_hook(ctx, hook)
                    .await
                    .map_err(EngineError::from)?;
                tools.extend(hook_tools.into_iter().map(|t| t.qualified(hook)));
            }
        }

        let client_tools = match input {
            TaskValue::OpenaiChat(request) => request
                .tools
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(openai_tool_to_spec)
                .collect(),
            _ => Vec::new(),
        };

        Ok(ChainContext::new(chain.debug, chain.token_limit)
            .with_tools(tools)
            .with_client_tools(client_tools))
    }

    /// Runs one task through its retry loop; exactly one step is recorded
    /// per attempt, success or failure.
    async fn retry_loop(
        &self,
        ctx: &ExecContext,
        chain_ctx: &ChainContext,
        task: &TaskDefinition,
        input: &TaskValue,
        stack: &StackTrace,
        debug_capture: bool,
    ) -> Result<ExecOutcome, EngineError> {
        let timeout = task.timeout_duration()?;
        let attempts = task.retry_on_failure + 1;
        let mut last_err = EngineError::Execution("task never attempted".into());

        for attempt in 0..attempts {
            if stack.has_breakpoint(&task.id) {
                let e = EngineError::Breakpoint(task.id.clone());
                self.record_attempt(stack, task, input, Err(&e), 0, debug_capture, false)
                    .await;
                return Err(e);
            }
            if let Err(e) = ctx.ensure_live() {
                return Err(e);
            }

            let started = Utc::now();
            let fut = self
                .executor
                .execute(ctx, started, chain_ctx, task, input.clone());
            let result = match timeout {
                Some(t) => match tokio::time::timeout(t, AssertUnwindSafe(fut).catch_unwind())
                    .await
                {
                    Ok(inner) => inner,
                    Err(_) => Ok(Err(EngineError::Execution(format!(
                        "task {} timed out after {t:?}",
                        task.id
                    )))),
                },
                None => AssertUnwindSafe(fut).catch_unwind().await,
            };
            let result: Result<ExecOutcome, EngineError> = match result {
                Ok(r) => r,
                Err(panic) => Err(EngineError::Execution(format!(
                    "handler panicked: {}",
                    panic_message(&panic)
                ))),
            };
            let duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;

            match result {
                Ok(outcome) => {
                    self.record_attempt(
                        stack,
                        task,
                        input,
                        Ok(&outcome),
                        duration_ms,
                        debug_capture,
                        false,
                    )
                    .await;
                    return Ok(outcome);
                }
                Err(e) => {
                    let final_attempt = !e.retryable() || attempt + 1 == attempts;
                    self.record_attempt(
                        stack,
                        task,
                        input,
                        Err(&e),
                        duration_ms,
                        debug_capture,
                        final_attempt,
                    )
                    .await;
                    if !e.retryable() {
                        return Err(e);
                    }
                    if attempt + 1 < attempts {
                        debug!(
                            request_id = %ctx.request_id,
                            task = %task.id,
                            attempt = attempt + 1,
                            error = %e,
                            "retrying task"
                        );
                    }
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_attempt(
        &self,
        stack: &StackTrace,
        task: &TaskDefinition,
        input: &TaskValue,
        result: Result<&ExecOutcome, &EngineError>,
        duration_ms: u64,
        debug_capture: bool,
        final_failure: bool,
    ) {
        let (output_type, transition, error, output_value) = match result {
            Ok(outcome) => (
                outcome.output.data_type().to_string(),
                outcome.eval.clone(),
                None,
                debug_capture
                    .then(|| outcome.output.to_json().ok())
                    .flatten(),
            ),
            Err(e) => (
                DataType::Nil.to_string(),
                if final_failure {
                    task.transition
                        .on_failure
                        .as_ref()
                        .map(|t| format!("on_failure:{t}"))
                        .unwrap_or_default()
                } else {
                    String::new()
                },
                Some(e.to_step_error()),
                None,
            ),
        };
        stack
            .record_step(CapturedStep {
                id: Uuid::new_v4().to_string(),
                task_id: task.id.clone(),
                task_handler: task.handler.to_string(),
                input_type: input.data_type().to_string(),
                output_type,
                transition,
                duration_ms,
                error,
                input_var: task.input_var.clone(),
                input: debug_capture.then(|| input.to_json().ok()).flatten(),
                output: output_value,
                started_at: Utc::now(),
            })
            .await;
    }
}

fn openai_tool_to_spec(tool: &OpenAiTool) -> crate::hooks::ToolSpec {
    crate::hooks::ToolSpec {
        name: tool.function.name.clone(),
        description: tool.function.description.clone(),
        input_schema: tool
            .function
            .parameters
            .clone()
            .unwrap_or_else(|| serde_json::json!({"type": "object"})),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
