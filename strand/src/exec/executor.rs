//! Handler dispatch: the real task executor.
//!
//! One match over the closed handler set. LLM handlers resolve a client
//! through the model resolver; hook handlers go through the hook registry;
//! transforms run in-process. The transition eval returned here is the
//! canonical string `compare(…)` sees — for LLM handlers the finish reason
//! or extracted value, not the full text.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::chain::definition::{HandlerKind, HookCall, TaskDefinition};
use crate::chat::ChatMessage;
use crate::context::ExecContext;
use crate::datatype::TaskValue;
use crate::error::EngineError;
use crate::hooks::{split_qualified, HookRegistry};
use crate::openai::ChatResponse;
use crate::parse::{parse_bool_relaxed, parse_float_relaxed, parse_int_relaxed};
use crate::resolver::{ModelResolver, ResolveRequest};

use super::{ChainContext, ExecOutcome, TaskExecutor};

/// Executor over the built-in handler catalogue.
pub struct HandlerExecutor {
    resolver: Arc<ModelResolver>,
    hooks: Arc<dyn HookRegistry>,
    resolve_request: ResolveRequest,
}

impl HandlerExecutor {
    pub fn new(resolver: Arc<ModelResolver>, hooks: Arc<dyn HookRegistry>) -> Self {
        Self {
            resolver,
            hooks,
            resolve_request: ResolveRequest::default(),
        }
    }

    /// Sets the provider/model preferences used for every LLM resolution.
    pub fn with_resolve_request(mut self, request: ResolveRequest) -> Self {
        self.resolve_request = request;
        self
    }

    async fn run_prompt(
        &self,
        ctx: &ExecContext,
        chain_ctx: &ChainContext,
        task: &TaskDefinition,
        input: &TaskValue,
    ) -> Result<String, EngineError> {
        chain_ctx.ensure_budget()?;
        let prompt = input.eval_string();
        let resolved = self.resolver.resolve_prompt(ctx, &self.resolve_request)?;
        let reply = resolved
            .client
            .prompt(ctx, task.system_instruction.as_deref(), &prompt)
            .await?;
        if let Some(usage) = reply.usage {
            chain_ctx.charge_tokens(u64::from(usage.total_tokens));
        }
        Ok(reply.text)
    }

    async fn chat_completion(
        &self,
        ctx: &ExecContext,
        chain_ctx: &ChainContext,
        task: &TaskDefinition,
        input: TaskValue,
    ) -> Result<ExecOutcome, EngineError> {
        chain_ctx.ensure_budget()?;
        let mut history = input.into_history()?;
        if let Some(system) = &task.system_instruction {
            if !history
                .messages
                .first()
                .map(|m| m.role == crate::chat::Role::System)
                .unwrap_or(false)
            {
                history.messages.insert(0, ChatMessage::system(system));
            }
        }
        let tools = chain_ctx.all_tools();
        let resolved = self.resolver.resolve_chat(ctx, &self.resolve_request)?;
        let turn = resolved.client.complete(ctx, &history, &tools).await?;
        if history.model.is_empty() {
            history.model = resolved.provider.name.clone();
        }
        history.push(ChatMessage::assistant(turn.content).with_tool_calls(turn.tool_calls));
        if let Some(usage) = turn.usage {
            history.input_tokens += usage.prompt_tokens;
            history.output_tokens += usage.completion_tokens;
            chain_ctx.charge_tokens(u64::from(usage.total_tokens));
        }
        Ok(ExecOutcome {
            output: TaskValue::ChatHistory(history),
            eval: turn.finish.as_eval().to_string(),
        })
    }

    async fn execute_tool_calls(
        &self,
        ctx: &ExecContext,
        started: DateTime<Utc>,
        chain_ctx: &ChainContext,
        input: TaskValue,
    ) -> Result<ExecOutcome, EngineError> {
        let mut history = input.into_history()?;
        let calls = history
            .last_assistant()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();
        let mut failed = false;
        for call in calls {
            let result = match split_qualified(&call.name) {
                Some((hook, _)) => {
                    let hook_call = HookCall {
                        name: hook.to_string(),
                        tool_name: Some(call.name.clone()),
                        args: Default::default(),
                    };
                    let args: serde_json::Value =
                        serde_json::from_str(&call.arguments).unwrap_or_else(|_| {
                            serde_json::json!({"input": call.arguments})
                        });
                    self.hooks
                        .exec(
                            ctx,
                            started,
                            &TaskValue::Json(args),
                            chain_ctx.debug,
                            &hook_call,
                        )
                        .await
                        .map_err(EngineError::from)
                }
                None => Err(EngineError::Hook(format!(
                    "tool call {:?} has no hook prefix",
                    call.name
                ))),
            };
            let content = match result {
                Ok(value) => serde_json::to_string(&value.to_json()?)?,
                Err(e) => {
                    failed = true;
                    serde_json::json!({"error": e.to_string()}).to_string()
                }
            };
            history.push(ChatMessage::tool(content, call.id.clone()));
        }
        Ok(ExecOutcome {
            output: TaskValue::ChatHistory(history),
            eval: if failed { "error" } else { "ok" }.to_string(),
        })
    }
}

#[async_trait]
impl TaskExecutor for HandlerExecutor {
    async fn execute(
        &self,
        ctx: &ExecContext,
        started: DateTime<Utc>,
        chain_ctx: &ChainContext,
        task: &TaskDefinition,
        input: TaskValue,
    ) -> Result<ExecOutcome, EngineError> {
        ctx.ensure_live()?;
        debug!(
            request_id = %ctx.request_id,
            task = %task.id,
            handler = %task.handler,
            input_type = %input.data_type(),
            "executing task"
        );
        match task.handler {
            HandlerKind::Noop => {
                let eval = match &task.valid_conditions {
                    Some(conditions) if conditions.len() == 1 => conditions
                        .iter()
                        .next()
                        .cloned()
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                Ok(ExecOutcome {
                    output: input,
                    eval,
                })
            }

            HandlerKind::RaiseError => {
                let message = match input.eval_string() {
                    m if m.is_empty() => format!("task {} raised an error", task.id),
                    m => m,
                };
                Err(EngineError::Execution(message))
            }

            HandlerKind::PromptToString => {
                let reply = self.run_prompt(ctx, chain_ctx, task, &input).await?;
                Ok(ExecOutcome {
                    eval: reply.clone(),
                    output: TaskValue::String(reply),
                })
            }

            HandlerKind::PromptToInt => {
                let reply = self.run_prompt(ctx, chain_ctx, task, &input).await?;
                let value = parse_int_relaxed(&reply)?;
                Ok(ExecOutcome {
                    output: TaskValue::Int(value),
                    eval: value.to_string(),
                })
            }

            HandlerKind::PromptToFloat | HandlerKind::PromptToRange => {
                let reply = self.run_prompt(ctx, chain_ctx, task, &input).await?;
                let value = parse_float_relaxed(&reply)?;
                Ok(ExecOutcome {
                    output: TaskValue::Float(value),
                    eval: value.to_string(),
                })
            }

            HandlerKind::PromptToBool => {
                let reply = self.run_prompt(ctx, chain_ctx, task, &input).await?;
                let value = parse_bool_relaxed(&reply)?;
                Ok(ExecOutcome {
                    output: TaskValue::Bool(value),
                    eval: value.to_string(),
                })
            }

            HandlerKind::PromptToCondition => {
                let reply = self.run_prompt(ctx, chain_ctx, task, &input).await?;
                // Trim-only normalisation; keys stay case-sensitive.
                let key = reply.trim();
                let conditions = task.valid_conditions.as_ref().ok_or_else(|| {
                    EngineError::InvalidChain(format!(
                        "task {} has no validConditions",
                        task.id
                    ))
                })?;
                if !conditions.contains(key) {
                    return Err(EngineError::Execution(format!(
                        "reply {key:?} is not one of the valid conditions {conditions:?}"
                    )));
                }
                Ok(ExecOutcome {
                    output: TaskValue::String(key.to_string()),
                    eval: key.to_string(),
                })
            }

            HandlerKind::ChatCompletion => {
                self.chat_completion(ctx, chain_ctx, task, input).await
            }

            HandlerKind::ExecuteToolCalls => {
                self.execute_tool_calls(ctx, started, chain_ctx, input).await
            }

            HandlerKind::Hook => {
                let call = task.hook.as_ref().ok_or_else(|| {
                    EngineError::InvalidChain(format!("task {} has no hook call", task.id))
                })?;
                let output = self
                    .hooks
                    .exec(ctx, started, &input, chain_ctx.debug, call)
                    .await?;
                Ok(ExecOutcome {
                    eval: output.eval_string(),
                    output,
                })
            }

            HandlerKind::ConvertToOpenaiChatResponse => {
                let history = input.into_history()?;
                let response = ChatResponse::from_history(&history)?;
                Ok(ExecOutcome {
                    output: TaskValue::OpenaiChatResponse(response),
                    eval: "ok".to_string(),
                })
            }

            HandlerKind::Embedding => {
                let text = input.as_str().ok_or_else(|| {
                    EngineError::Execution(format!(
                        "embedding requires string input, got {}",
                        input.data_type()
                    ))
                })?;
                let resolved = self.resolver.resolve_embed(ctx, &self.resolve_request)?;
                let vector = resolved.client.embed(ctx, text).await?;
                Ok(ExecOutcome {
                    output: TaskValue::Vector(vector),
                    eval: String::new(),
                })
            }
        }
    }
}
