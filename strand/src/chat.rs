//! Chat history types: role-tagged messages with token accounting.
//!
//! `ChatHistory` is the value that flows between chat-oriented tasks.
//! Merge and append operations live here; the compose pass in the
//! interpreter calls them when a transition branch requests composition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tool invocation requested by the model.
///
/// `name` is the qualified tool name (`"{hook}.{tool}"` for hook tools);
/// `arguments` is the raw JSON string as the model produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// One message in a chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Tool calls attached to an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool-role messages: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Tool-result message correlated to a call id.
    pub fn tool(content: impl Into<String>, call_id: Option<String>) -> Self {
        Self {
            tool_call_id: call_id,
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// Ordered chat history with token accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    /// Model that produced the assistant turns; empty when unknown or mixed.
    #[serde(default)]
    pub model: String,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// The chronologically last assistant message, if any.
    pub fn last_assistant(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    /// Appends `text` as an assistant message and returns the new history.
    ///
    /// This is the `append_string_to_chat_history` compose strategy: a bare
    /// string becomes one appended assistant turn. Appending to an empty
    /// history yields a one-message history.
    pub fn with_appended_assistant(mut self, text: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::assistant(text));
        self
    }

    /// Merges two histories: `earlier` first, then `self`.
    ///
    /// Token counts are summed. The model is kept only when both sides agree;
    /// otherwise it is cleared, since the merged transcript no longer has a
    /// single producer.
    pub fn merged_onto(self, earlier: &ChatHistory) -> ChatHistory {
        let model = if earlier.model == self.model {
            self.model.clone()
        } else {
            String::new()
        };
        let mut messages = earlier.messages.clone();
        messages.extend(self.messages);
        ChatHistory {
            messages,
            input_tokens: earlier.input_tokens + self.input_tokens,
            output_tokens: earlier.output_tokens + self.output_tokens,
            model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(model: &str, msgs: Vec<ChatMessage>, input: u32, output: u32) -> ChatHistory {
        ChatHistory {
            messages: msgs,
            input_tokens: input,
            output_tokens: output,
            model: model.into(),
        }
    }

    /// **Scenario**: merge keeps order earlier-then-self, sums tokens, keeps equal model.
    #[test]
    fn merge_orders_and_sums_tokens() {
        let l = history("m1", vec![ChatMessage::user("Hello")], 3, 0);
        let r = history("m1", vec![ChatMessage::assistant("Hi")], 0, 2);
        let merged = r.merged_onto(&l);
        assert_eq!(merged.messages.len(), 2);
        assert_eq!(merged.messages[0].content, "Hello");
        assert_eq!(merged.messages[1].content, "Hi");
        assert_eq!(merged.input_tokens, 3);
        assert_eq!(merged.output_tokens, 2);
        assert_eq!(merged.model, "m1");
    }

    /// **Scenario**: merge clears the model when the two sides disagree.
    #[test]
    fn merge_clears_model_on_mismatch() {
        let l = history("m1", vec![ChatMessage::user("a")], 1, 0);
        let r = history("m2", vec![ChatMessage::assistant("b")], 0, 1);
        let merged = r.merged_onto(&l);
        assert!(merged.model.is_empty());
    }

    /// **Scenario**: appending a string to an empty history yields one assistant message.
    #[test]
    fn append_to_empty_history_yields_assistant() {
        let h = ChatHistory::new().with_appended_assistant("done");
        assert_eq!(h.messages.len(), 1);
        assert_eq!(h.messages[0].role, Role::Assistant);
        assert_eq!(h.messages[0].content, "done");
    }

    /// **Scenario**: last_assistant skips trailing tool messages.
    #[test]
    fn last_assistant_skips_tool_messages() {
        let mut h = ChatHistory::new();
        h.push(ChatMessage::user("q"));
        h.push(
            ChatMessage::assistant("calling").with_tool_calls(vec![ToolCall {
                id: Some("c1".into()),
                name: "echo.echo".into(),
                arguments: "{}".into(),
            }]),
        );
        h.push(ChatMessage::tool("{\"ok\":true}", Some("c1".into())));
        let last = h.last_assistant().expect("assistant present");
        assert_eq!(last.content, "calling");
        assert_eq!(last.tool_calls.len(), 1);
    }
}
