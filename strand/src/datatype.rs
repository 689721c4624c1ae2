//! Runtime value types: the closed `DataType` tag and the `TaskValue` carrier.
//!
//! Every value flowing between tasks is a `TaskValue`; its tag is derived by
//! `data_type()`, so a value and its type can never disagree. `DataType::Any`
//! exists only as a wildcard in requests and validator profiles — no stored
//! value carries it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ChatHistory;
use crate::error::EngineError;
use crate::openai::{ChatRequest, ChatResponse};

/// Closed enumeration of runtime data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Any,
    String,
    Bool,
    Int,
    Float,
    Vector,
    SearchResults,
    Json,
    ChatHistory,
    OpenaiChat,
    OpenaiChatResponse,
    Nil,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Any => "any",
            DataType::String => "string",
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Vector => "vector",
            DataType::SearchResults => "search_results",
            DataType::Json => "json",
            DataType::ChatHistory => "chat_history",
            DataType::OpenaiChat => "openai_chat",
            DataType::OpenaiChatResponse => "openai_chat_response",
            DataType::Nil => "nil",
        }
    }

    /// Whether a value of type `self` satisfies a declared profile type.
    ///
    /// `Any` on either side is a wildcard: a profile of `Any` accepts
    /// everything, and a statically unknowable output (`Any`) cannot be
    /// refuted ahead of execution.
    pub fn satisfies(&self, profile: DataType) -> bool {
        profile == DataType::Any || *self == DataType::Any || *self == profile
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One semantic-search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub distance: f32,
    #[serde(default)]
    pub content: Value,
}

/// A typed value flowing between tasks.
///
/// Serialized with an external `type`/`value` tag so traces and stores keep
/// the tag alongside the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TaskValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Vector(Vec<f32>),
    SearchResults(Vec<SearchResult>),
    Json(Value),
    ChatHistory(ChatHistory),
    OpenaiChat(ChatRequest),
    OpenaiChatResponse(ChatResponse),
    Nil,
}

impl TaskValue {
    /// The runtime type tag of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            TaskValue::String(_) => DataType::String,
            TaskValue::Bool(_) => DataType::Bool,
            TaskValue::Int(_) => DataType::Int,
            TaskValue::Float(_) => DataType::Float,
            TaskValue::Vector(_) => DataType::Vector,
            TaskValue::SearchResults(_) => DataType::SearchResults,
            TaskValue::Json(_) => DataType::Json,
            TaskValue::ChatHistory(_) => DataType::ChatHistory,
            TaskValue::OpenaiChat(_) => DataType::OpenaiChat,
            TaskValue::OpenaiChatResponse(_) => DataType::OpenaiChatResponse,
            TaskValue::Nil => DataType::Nil,
        }
    }

    /// The untagged JSON shape of the value, used for template contexts,
    /// hook arguments, and debug capture.
    pub fn to_json(&self) -> Result<Value, EngineError> {
        Ok(match self {
            TaskValue::String(s) => Value::String(s.clone()),
            TaskValue::Bool(b) => Value::Bool(*b),
            TaskValue::Int(i) => Value::from(*i),
            TaskValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .ok_or_else(|| {
                    EngineError::Serialization(format!("float {f} is not representable"))
                })?,
            TaskValue::Vector(v) => serde_json::to_value(v)?,
            TaskValue::SearchResults(r) => serde_json::to_value(r)?,
            TaskValue::Json(v) => v.clone(),
            TaskValue::ChatHistory(h) => serde_json::to_value(h)?,
            TaskValue::OpenaiChat(c) => serde_json::to_value(c)?,
            TaskValue::OpenaiChatResponse(c) => serde_json::to_value(c)?,
            TaskValue::Nil => Value::Null,
        })
    }

    /// Canonical string fed to transition comparison for values that have no
    /// handler-specific eval (hook outputs, noop pass-through).
    pub fn eval_string(&self) -> String {
        match self {
            TaskValue::String(s) => s.clone(),
            TaskValue::Bool(b) => b.to_string(),
            TaskValue::Int(i) => i.to_string(),
            TaskValue::Float(f) => f.to_string(),
            TaskValue::Nil => String::new(),
            other => other
                .to_json()
                .ok()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        }
    }

    /// Borrows the value as a string, when it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TaskValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Extracts a chat history, converting `openai_chat` requests on the fly.
    pub fn into_history(self) -> Result<ChatHistory, EngineError> {
        match self {
            TaskValue::ChatHistory(h) => Ok(h),
            TaskValue::OpenaiChat(req) => req.to_history(),
            other => Err(EngineError::Execution(format!(
                "expected chat_history or openai_chat input, got {}",
                other.data_type()
            ))),
        }
    }
}
