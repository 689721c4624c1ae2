//! LLM capability client traits.
//!
//! The task executor depends on these instead of concrete providers; the
//! model resolver constructs one implementation per task execution.
//! Implementations: the mock family (tests) and the OpenAI-compatible
//! clients in [`openai`](self::openai).
//!
//! # Streaming
//!
//! `StreamClient::complete_stream` accepts a `Sender<MessageChunk>` and
//! sends tokens as they arrive; the method still returns the complete
//! `ChatTurn` at the end. The interpreter itself never sees the stream —
//! it is consumed inside one handler.

mod mock;
mod openai;

pub use mock::{MockChatClient, MockChatReply, MockEmbedClient, MockPromptClient};
pub use openai::{OpenAiChatClient, OpenAiEmbedClient, OpenAiPromptClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::chat::{ChatHistory, ToolCall};
use crate::context::ExecContext;
use crate::error::EngineError;
use crate::hooks::ToolSpec;

/// Token usage for one LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Why a chat turn ended. Doubles as the `chat_completion` transition eval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCall,
    Length,
}

impl FinishReason {
    /// Canonical eval string fed to transition comparison.
    pub fn as_eval(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCall => "tool-call",
            FinishReason::Length => "length",
        }
    }
}

/// One completed chat turn: assistant text, tool calls, finish reason, usage.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish: FinishReason,
    pub usage: Option<LlmUsage>,
}

/// Reply to a one-shot prompt.
#[derive(Debug, Clone)]
pub struct PromptReply {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

/// A token chunk emitted while streaming.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    pub content: String,
}

/// Chat capability: one turn over a history, optionally with tools.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        ctx: &ExecContext,
        history: &ChatHistory,
        tools: &[ToolSpec],
    ) -> Result<ChatTurn, EngineError>;
}

/// Prompt capability: system instruction + single prompt in, text out.
#[async_trait]
pub trait PromptClient: Send + Sync {
    async fn prompt(
        &self,
        ctx: &ExecContext,
        system_instruction: Option<&str>,
        prompt: &str,
    ) -> Result<PromptReply, EngineError>;
}

/// Embedding capability.
#[async_trait]
pub trait EmbedClient: Send + Sync {
    async fn embed(&self, ctx: &ExecContext, text: &str) -> Result<Vec<f32>, EngineError>;
}

/// Streaming chat capability.
///
/// Default implementation completes non-streaming and forwards the full
/// content as one chunk, so providers without streaming still satisfy the
/// trait.
#[async_trait]
pub trait StreamClient: ChatClient {
    async fn complete_stream(
        &self,
        ctx: &ExecContext,
        history: &ChatHistory,
        tools: &[ToolSpec],
        chunk_tx: mpsc::Sender<MessageChunk>,
    ) -> Result<ChatTurn, EngineError> {
        let turn = self.complete(ctx, history, tools).await?;
        if !turn.content.is_empty() {
            let _ = chunk_tx
                .send(MessageChunk {
                    content: turn.content.clone(),
                })
                .await;
        }
        Ok(turn)
    }
}

/// Spawns a streaming completion and returns the channel-backed chunk
/// stream plus a handle resolving to the final [`ChatTurn`].
///
/// The stream ends when the turn completes; callers that only want the
/// final result can ignore the stream and await the handle.
pub fn stream_chunks(
    client: std::sync::Arc<dyn StreamClient>,
    ctx: ExecContext,
    history: ChatHistory,
    tools: Vec<ToolSpec>,
) -> (
    tokio_stream::wrappers::ReceiverStream<MessageChunk>,
    tokio::task::JoinHandle<Result<ChatTurn, EngineError>>,
) {
    let (tx, rx) = mpsc::channel(128);
    let handle = tokio::spawn(async move {
        client.complete_stream(&ctx, &history, &tools, tx).await
    });
    (tokio_stream::wrappers::ReceiverStream::new(rx), handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    struct StubChat;

    #[async_trait]
    impl ChatClient for StubChat {
        async fn complete(
            &self,
            _ctx: &ExecContext,
            _history: &ChatHistory,
            _tools: &[ToolSpec],
        ) -> Result<ChatTurn, EngineError> {
            Ok(ChatTurn {
                content: "hello".into(),
                tool_calls: vec![],
                finish: FinishReason::Stop,
                usage: None,
            })
        }
    }

    #[async_trait]
    impl StreamClient for StubChat {}

    /// **Scenario**: The default stream implementation sends the full reply as one chunk.
    #[tokio::test]
    async fn default_stream_sends_single_chunk() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut history = ChatHistory::new();
        history.push(ChatMessage::user("q"));
        let turn = StubChat
            .complete_stream(&ExecContext::new(), &history, &[], tx)
            .await
            .unwrap();
        assert_eq!(turn.content, "hello");
        assert_eq!(rx.recv().await.unwrap().content, "hello");
    }

    /// **Scenario**: stream_chunks yields the chunks and the final turn.
    #[tokio::test]
    async fn stream_chunks_yields_and_completes() {
        use tokio_stream::StreamExt;

        let (stream, handle) = stream_chunks(
            std::sync::Arc::new(StubChat),
            ExecContext::new(),
            ChatHistory::new(),
            vec![],
        );
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello");
        let turn = handle.await.expect("join").expect("turn");
        assert_eq!(turn.content, "hello");
    }

    /// **Scenario**: Finish reasons map to the documented eval strings.
    #[test]
    fn finish_reason_evals() {
        assert_eq!(FinishReason::Stop.as_eval(), "stop");
        assert_eq!(FinishReason::ToolCall.as_eval(), "tool-call");
        assert_eq!(FinishReason::Length.as_eval(), "length");
    }
}
