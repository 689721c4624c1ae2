//! Scripted mock clients for tests and offline runs.
//!
//! Each mock pops the next entry from a fixed script; when the script runs
//! dry the last entry repeats. An `Err` entry models a transient failure so
//! retry behaviour can be exercised deterministically.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chat::{ChatHistory, ToolCall};
use crate::context::ExecContext;
use crate::error::EngineError;
use crate::hooks::ToolSpec;

use super::{ChatClient, ChatTurn, EmbedClient, FinishReason, PromptClient, PromptReply};

type Scripted<T> = Mutex<VecDeque<Result<T, String>>>;

fn next<T: Clone>(script: &Scripted<T>, what: &str) -> Result<T, EngineError> {
    let mut q = script.lock().expect("mock script lock");
    let entry = if q.len() > 1 {
        q.pop_front()
    } else {
        q.front().cloned()
    };
    match entry {
        Some(Ok(v)) => Ok(v),
        Some(Err(msg)) => Err(EngineError::Execution(msg)),
        None => Err(EngineError::Execution(format!("{what} script is empty"))),
    }
}

/// Mock prompt client with a scripted reply sequence.
pub struct MockPromptClient {
    script: Scripted<String>,
}

impl MockPromptClient {
    /// Always replies with `text`.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(text.into())])
    }

    /// Replies in sequence; `Err` entries fail that call.
    pub fn scripted(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }
}

#[async_trait]
impl PromptClient for MockPromptClient {
    async fn prompt(
        &self,
        _ctx: &ExecContext,
        _system_instruction: Option<&str>,
        _prompt: &str,
    ) -> Result<PromptReply, EngineError> {
        next(&self.script, "prompt").map(|text| PromptReply { text, usage: None })
    }
}

/// One scripted chat reply.
#[derive(Debug, Clone)]
pub struct MockChatReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish: FinishReason,
}

/// Mock chat client with a scripted turn sequence.
pub struct MockChatClient {
    script: Scripted<MockChatReply>,
}

impl MockChatClient {
    pub fn fixed(content: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(MockChatReply {
            content: content.into(),
            tool_calls: vec![],
            finish: FinishReason::Stop,
        })])
    }

    pub fn scripted(script: Vec<Result<MockChatReply, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(
        &self,
        _ctx: &ExecContext,
        _history: &ChatHistory,
        _tools: &[ToolSpec],
    ) -> Result<ChatTurn, EngineError> {
        next(&self.script, "chat").map(|r| ChatTurn {
            content: r.content,
            tool_calls: r.tool_calls,
            finish: r.finish,
            usage: None,
        })
    }
}

impl super::StreamClient for MockChatClient {}

/// Mock embedder: a deterministic vector derived from the input text.
pub struct MockEmbedClient {
    dimensions: usize,
}

impl MockEmbedClient {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbedClient for MockEmbedClient {
    async fn embed(&self, _ctx: &ExecContext, text: &str) -> Result<Vec<f32>, EngineError> {
        let seed = text.bytes().fold(0u32, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(u32::from(b))
        });
        Ok((0..self.dimensions)
            .map(|i| ((seed.wrapping_add(i as u32) % 1000) as f32) / 1000.0)
            .collect())
    }
}
