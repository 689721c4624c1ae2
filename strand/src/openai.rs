//! OpenAI-compatible chat request/response DTOs and history conversions.
//!
//! `ChatRequest` is the `openai_chat` input type a caller's client submits;
//! `ChatResponse` is the `openai_chat_response` envelope produced by the
//! `convert_to_openai_chat_response` handler. Field shapes match the
//! [OpenAI chat API](https://platform.openai.com/docs/api-reference/chat).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::chat::{ChatHistory, ChatMessage, Role, ToolCall};
use crate::error::EngineError;

/// One message in an OpenAI-shaped request or response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A tool call in the OpenAI wire shape (`type: "function"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAiFunctionCall,
}

/// Nested function payload of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool definition offered to the model (`tools` array entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: OpenAiFunction,
}

/// Function schema inside a tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// An OpenAI-shaped chat completion request (`openai_chat` data type).
///
/// Unknown fields are ignored on deserialization; the engine reads only the
/// parts it routes on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<OpenAiMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// One choice in a chat completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: OpenAiMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token usage block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// An OpenAI-shaped chat completion response (`openai_chat_response`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: ChatUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
}

impl ChatResponse {
    /// Object type string for non-streamed completions.
    pub const OBJECT: &'static str = "chat.completion";
}

fn role_from_wire(role: &str) -> Result<Role, EngineError> {
    match role {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(EngineError::Execution(format!(
            "unknown message role: {other}"
        ))),
    }
}

impl ChatRequest {
    /// Converts the request into an engine-native chat history.
    ///
    /// Tool calls on assistant messages are carried over so a following
    /// `execute_tool_calls` task can act on them.
    pub fn to_history(&self) -> Result<ChatHistory, EngineError> {
        let mut history = ChatHistory::new().with_model(self.model.clone());
        for m in &self.messages {
            let mut msg = ChatMessage::new(
                role_from_wire(&m.role)?,
                m.content.clone().unwrap_or_default(),
            );
            if let Some(calls) = &m.tool_calls {
                msg.tool_calls = calls
                    .iter()
                    .map(|c| ToolCall {
                        id: Some(c.id.clone()),
                        name: c.function.name.clone(),
                        arguments: c.function.arguments.clone(),
                    })
                    .collect();
            }
            msg.tool_call_id = m.tool_call_id.clone();
            history.push(msg);
        }
        Ok(history)
    }
}

fn message_to_wire(m: &ChatMessage) -> OpenAiMessage {
    let tool_calls = if m.tool_calls.is_empty() {
        None
    } else {
        Some(
            m.tool_calls
                .iter()
                .map(|c| OpenAiToolCall {
                    id: c
                        .id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    call_type: "function".into(),
                    function: OpenAiFunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    },
                })
                .collect(),
        )
    };
    OpenAiMessage {
        role: m.role.as_str().into(),
        content: Some(m.content.clone()),
        tool_calls,
        tool_call_id: m.tool_call_id.clone(),
    }
}

impl ChatResponse {
    /// Packs a history into the response envelope.
    ///
    /// The last assistant message becomes `choices[0].message`; the finish
    /// reason is `tool_calls` when that message carries tool calls, `stop`
    /// otherwise. Token counts come from the history's accounting.
    pub fn from_history(history: &ChatHistory) -> Result<Self, EngineError> {
        let last = history.last_assistant().ok_or_else(|| {
            EngineError::Execution("chat history has no assistant message to pack".into())
        })?;
        let finish = if last.tool_calls.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };
        Ok(ChatResponse {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            object: Self::OBJECT.into(),
            created: Utc::now().timestamp(),
            model: history.model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: message_to_wire(last),
                finish_reason: Some(finish.into()),
            }],
            usage: ChatUsage {
                prompt_tokens: history.input_tokens,
                completion_tokens: history.output_tokens,
                total_tokens: history.input_tokens + history.output_tokens,
            },
            system_fingerprint: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: A request with system/user messages converts into a history in order.
    #[test]
    fn request_to_history_preserves_order() {
        let req: ChatRequest = serde_json::from_value(serde_json::json!({
            "model": "test-model",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ],
            "ignored_field": true
        }))
        .expect("deserialize with unknown fields");
        let h = req.to_history().expect("convert");
        assert_eq!(h.model, "test-model");
        assert_eq!(h.messages.len(), 2);
        assert_eq!(h.messages[0].role, Role::System);
        assert_eq!(h.messages[1].content, "hi");
    }

    /// **Scenario**: An unknown role fails the conversion.
    #[test]
    fn request_with_unknown_role_errors() {
        let req: ChatRequest = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "narrator", "content": "x"}]
        }))
        .expect("deserialize");
        assert!(req.to_history().is_err());
    }

    /// **Scenario**: from_history packs the last assistant turn with usage totals.
    #[test]
    fn from_history_packs_last_assistant() {
        let mut h = ChatHistory::new().with_model("m");
        h.input_tokens = 10;
        h.output_tokens = 5;
        h.push(ChatMessage::user("q"));
        h.push(ChatMessage::assistant("a1"));
        h.push(ChatMessage::assistant("a2"));
        let resp = ChatResponse::from_history(&h).expect("pack");
        assert_eq!(resp.object, "chat.completion");
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("a2"));
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.total_tokens, 15);
        assert!(resp.id.starts_with("chatcmpl-"));
    }

    /// **Scenario**: from_history reports tool_calls as the finish reason when present.
    #[test]
    fn from_history_tool_calls_finish_reason() {
        let mut h = ChatHistory::new();
        h.push(
            ChatMessage::assistant("").with_tool_calls(vec![ToolCall {
                id: Some("c1".into()),
                name: "echo.echo".into(),
                arguments: "{}".into(),
            }]),
        );
        let resp = ChatResponse::from_history(&h).expect("pack");
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    /// **Scenario**: from_history on a history without assistant turns errors.
    #[test]
    fn from_history_requires_assistant() {
        let mut h = ChatHistory::new();
        h.push(ChatMessage::user("only user"));
        assert!(ChatResponse::from_history(&h).is_err());
    }
}
