//! OpenAI-compatible capability clients.
//!
//! One backend URL + one model name per client; the resolver constructs
//! these for providers that speak the OpenAI wire protocol (OpenAI itself,
//! vllm, ollama's compatibility endpoint). The prompt client is a
//! single-turn chat call with the system instruction as the leading
//! message.

use async_trait::async_trait;
use tracing::debug;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestToolMessage,
        ChatCompletionRequestUserMessage, ChatCompletionTool, ChatCompletionTools,
        CreateChatCompletionRequestArgs, FinishReason as WireFinishReason, FunctionObject,
    },
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};

use crate::chat::{ChatHistory, ChatMessage, Role, ToolCall};
use crate::context::ExecContext;
use crate::error::EngineError;
use crate::hooks::ToolSpec;

use super::{
    ChatClient, ChatTurn, EmbedClient, FinishReason, LlmUsage, PromptClient, PromptReply,
    StreamClient,
};

fn build_client(backend_url: &str, api_key: Option<&str>) -> Client<OpenAIConfig> {
    let mut config = OpenAIConfig::new().with_api_base(backend_url.trim_end_matches('/'));
    if let Some(key) = api_key {
        config = config.with_api_key(key);
    }
    Client::with_config(config)
}

fn history_to_request(history: &ChatHistory) -> Vec<ChatCompletionRequestMessage> {
    history
        .messages
        .iter()
        .map(|m: &ChatMessage| match m.role {
            Role::System => ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage::from(m.content.as_str()),
            ),
            Role::User => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage::from(m.content.as_str()),
            ),
            Role::Assistant => ChatCompletionRequestMessage::Assistant(m.content.as_str().into()),
            Role::Tool => ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                content: m.content.as_str().into(),
                tool_call_id: m.tool_call_id.clone().unwrap_or_default(),
            }),
        })
        .collect()
}

fn tools_to_request(tools: &[ToolSpec]) -> Vec<ChatCompletionTools> {
    tools
        .iter()
        .map(|t| {
            ChatCompletionTools::Function(ChatCompletionTool {
                function: FunctionObject {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: Some(t.input_schema.clone()),
                    ..Default::default()
                },
            })
        })
        .collect()
}

fn map_finish(reason: Option<WireFinishReason>, has_tool_calls: bool) -> FinishReason {
    match reason {
        Some(WireFinishReason::ToolCalls) => FinishReason::ToolCall,
        Some(WireFinishReason::Length) => FinishReason::Length,
        Some(_) => FinishReason::Stop,
        None if has_tool_calls => FinishReason::ToolCall,
        None => FinishReason::Stop,
    }
}

/// Chat client over an OpenAI-compatible backend.
pub struct OpenAiChatClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(backend_url: &str, model: impl Into<String>, api_key: Option<&str>) -> Self {
        Self {
            client: build_client(backend_url, api_key),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(
        &self,
        ctx: &ExecContext,
        history: &ChatHistory,
        tools: &[ToolSpec],
    ) -> Result<ChatTurn, EngineError> {
        ctx.ensure_live()?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(history_to_request(history));
        if !tools.is_empty() {
            args.tools(tools_to_request(tools));
        }
        let request = args
            .build()
            .map_err(|e| EngineError::Execution(format!("chat request build failed: {e}")))?;

        debug!(
            request_id = %ctx.request_id,
            model = %self.model,
            message_count = history.messages.len(),
            tools_count = tools.len(),
            "chat completion create"
        );

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| EngineError::Execution(format!("chat API error: {e}")))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Execution("backend returned no choices".into()))?;
        let msg = choice.message;
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                if let ChatCompletionMessageToolCalls::Function(f) = tc {
                    Some(ToolCall {
                        id: Some(f.id),
                        name: f.function.name,
                        arguments: f.function.arguments,
                    })
                } else {
                    None
                }
            })
            .collect();
        let finish = map_finish(choice.finish_reason, !tool_calls.is_empty());
        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        Ok(ChatTurn {
            content: msg.content.unwrap_or_default(),
            tool_calls,
            finish,
            usage,
        })
    }
}

#[async_trait]
impl StreamClient for OpenAiChatClient {}

/// Prompt client: system instruction + prompt as one chat turn.
pub struct OpenAiPromptClient {
    inner: OpenAiChatClient,
}

impl OpenAiPromptClient {
    pub fn new(backend_url: &str, model: impl Into<String>, api_key: Option<&str>) -> Self {
        Self {
            inner: OpenAiChatClient::new(backend_url, model, api_key),
        }
    }
}

#[async_trait]
impl PromptClient for OpenAiPromptClient {
    async fn prompt(
        &self,
        ctx: &ExecContext,
        system_instruction: Option<&str>,
        prompt: &str,
    ) -> Result<PromptReply, EngineError> {
        let mut history = ChatHistory::new().with_model(self.inner.model.clone());
        if let Some(system) = system_instruction {
            history.push(ChatMessage::system(system));
        }
        history.push(ChatMessage::user(prompt));
        let turn = self.inner.complete(ctx, &history, &[]).await?;
        Ok(PromptReply {
            text: turn.content,
            usage: turn.usage,
        })
    }
}

/// Embedding client over an OpenAI-compatible backend.
pub struct OpenAiEmbedClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedClient {
    pub fn new(backend_url: &str, model: impl Into<String>, api_key: Option<&str>) -> Self {
        Self {
            client: build_client(backend_url, api_key),
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbedClient for OpenAiEmbedClient {
    async fn embed(&self, ctx: &ExecContext, text: &str) -> Result<Vec<f32>, EngineError> {
        ctx.ensure_live()?;
        let request = CreateEmbeddingRequest {
            input: EmbeddingInput::String(text.to_string()),
            model: self.model.clone(),
            ..Default::default()
        };
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EngineError::Execution(format!("embeddings API error: {e}")))?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EngineError::Execution("backend returned no embedding".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Histories convert with roles intact and tool results carry call ids.
    #[test]
    fn history_conversion_keeps_roles() {
        let mut h = ChatHistory::new();
        h.push(ChatMessage::system("s"));
        h.push(ChatMessage::user("u"));
        h.push(ChatMessage::assistant("a"));
        h.push(ChatMessage::tool("{}", Some("call-1".into())));
        let msgs = history_to_request(&h);
        assert_eq!(msgs.len(), 4);
        assert!(matches!(msgs[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(msgs[3], ChatCompletionRequestMessage::Tool(_)));
    }

    /// **Scenario**: Finish reasons map to the engine enum, inferring tool-call
    /// when the wire omits a reason but calls are present.
    #[test]
    fn finish_reason_mapping() {
        assert_eq!(
            map_finish(Some(WireFinishReason::ToolCalls), true),
            FinishReason::ToolCall
        );
        assert_eq!(
            map_finish(Some(WireFinishReason::Length), false),
            FinishReason::Length
        );
        assert_eq!(map_finish(None, true), FinishReason::ToolCall);
        assert_eq!(map_finish(None, false), FinishReason::Stop);
    }
}
