//! Branch compose: merging the current task output with a stored variable.
//!
//! Scoped to one transition branch. The strategy is either named in the
//! chain or auto-selected from the operand types. The composed value
//! replaces the task output and is additionally stored under
//! `"{task_id}_{sanitized_when}_composed"`.

use serde_json::Value;

use crate::chain::definition::{BranchCompose, ComposeStrategy};
use crate::datatype::{DataType, TaskValue};
use crate::error::EngineError;

/// Applies a compose directive. `current` is the task's output; `with` is
/// the stored variable named by `with_var`.
pub fn compose(
    directive: &BranchCompose,
    current: TaskValue,
    with: &TaskValue,
) -> Result<TaskValue, EngineError> {
    let strategy = match directive.strategy {
        Some(s) => s,
        None => auto_strategy(with.data_type(), current.data_type())?,
    };
    match strategy {
        ComposeStrategy::Override => compose_override(current, with),
        ComposeStrategy::AppendStringToChatHistory => compose_append(current, with),
        ComposeStrategy::MergeChatHistories => compose_merge(current, with),
    }
}

/// Picks a strategy from the operand types.
fn auto_strategy(with: DataType, current: DataType) -> Result<ComposeStrategy, EngineError> {
    match (with, current) {
        (DataType::ChatHistory, DataType::ChatHistory) => Ok(ComposeStrategy::MergeChatHistories),
        (DataType::ChatHistory, DataType::String) | (DataType::String, DataType::ChatHistory) => {
            Ok(ComposeStrategy::AppendStringToChatHistory)
        }
        (DataType::Json, DataType::Json) => Ok(ComposeStrategy::Override),
        _ => Err(EngineError::Execution(format!(
            "no compose strategy for operand types {with} and {current}"
        ))),
    }
}

/// Map merge; keys from the current output win on overlap.
fn compose_override(current: TaskValue, with: &TaskValue) -> Result<TaskValue, EngineError> {
    let (TaskValue::Json(Value::Object(cur)), TaskValue::Json(Value::Object(base))) =
        (&current, with)
    else {
        return Err(EngineError::Execution(format!(
            "override compose requires two JSON objects, got {} and {}",
            with.data_type(),
            current.data_type()
        )));
    };
    let mut merged = base.clone();
    for (k, v) in cur {
        merged.insert(k.clone(), v.clone());
    }
    Ok(TaskValue::Json(Value::Object(merged)))
}

/// Appends the string operand to the history operand as an assistant turn.
fn compose_append(current: TaskValue, with: &TaskValue) -> Result<TaskValue, EngineError> {
    match (current, with) {
        (TaskValue::String(text), TaskValue::ChatHistory(history)) => Ok(TaskValue::ChatHistory(
            history.clone().with_appended_assistant(text),
        )),
        (TaskValue::ChatHistory(history), TaskValue::String(text)) => Ok(TaskValue::ChatHistory(
            history.with_appended_assistant(text.clone()),
        )),
        (current, with) => Err(EngineError::Execution(format!(
            "append_string_to_chat_history requires a string and a chat history, got {} and {}",
            with.data_type(),
            current.data_type()
        ))),
    }
}

/// Concatenates two histories, `with` first, summing token counts.
fn compose_merge(current: TaskValue, with: &TaskValue) -> Result<TaskValue, EngineError> {
    match (current, with) {
        (TaskValue::ChatHistory(cur), TaskValue::ChatHistory(base)) => {
            Ok(TaskValue::ChatHistory(cur.merged_onto(base)))
        }
        (current, with) => Err(EngineError::Execution(format!(
            "merge_chat_histories requires two chat histories, got {} and {}",
            with.data_type(),
            current.data_type()
        ))),
    }
}

/// Variable name for a composed value: `"{task_id}_{sanitized_when}_composed"`.
///
/// The `when` operand is sanitized to `[A-Za-z0-9_]` so the key stays a
/// plain identifier.
pub fn composed_var_name(task_id: &str, when: &str) -> String {
    let sanitized: String = when
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{task_id}_{sanitized}_composed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatHistory, ChatMessage, Role};

    fn directive(strategy: Option<ComposeStrategy>) -> BranchCompose {
        BranchCompose {
            with_var: "t1".into(),
            strategy,
        }
    }

    /// **Scenario**: Override on disjoint maps is a plain union, either order.
    #[test]
    fn override_disjoint_union() {
        let a = TaskValue::Json(serde_json::json!({"a": 1}));
        let b = TaskValue::Json(serde_json::json!({"b": 2}));
        let ab = compose(&directive(Some(ComposeStrategy::Override)), a.clone(), &b).unwrap();
        let ba = compose(&directive(Some(ComposeStrategy::Override)), b, &a).unwrap();
        let expected = serde_json::json!({"a": 1, "b": 2});
        assert_eq!(ab, TaskValue::Json(expected.clone()));
        assert_eq!(ba, TaskValue::Json(expected));
    }

    /// **Scenario**: On overlapping keys the current output wins.
    #[test]
    fn override_current_wins() {
        let current = TaskValue::Json(serde_json::json!({"k": "new"}));
        let with = TaskValue::Json(serde_json::json!({"k": "old", "other": 1}));
        let out = compose(&directive(Some(ComposeStrategy::Override)), current, &with).unwrap();
        assert_eq!(
            out,
            TaskValue::Json(serde_json::json!({"k": "new", "other": 1}))
        );
    }

    /// **Scenario**: merge keeps withVar's messages first, then the current output's.
    #[test]
    fn merge_orders_with_first() {
        let mut first = ChatHistory::new();
        first.push(ChatMessage::user("Hello"));
        first.input_tokens = 2;
        let mut second = ChatHistory::new();
        second.push(ChatMessage::assistant("Hi"));
        second.output_tokens = 1;
        let out = compose(
            &directive(Some(ComposeStrategy::MergeChatHistories)),
            TaskValue::ChatHistory(second),
            &TaskValue::ChatHistory(first),
        )
        .unwrap();
        let TaskValue::ChatHistory(h) = out else {
            panic!("expected chat history")
        };
        assert_eq!(h.messages.len(), 2);
        assert_eq!(h.messages[0].role, Role::User);
        assert_eq!(h.messages[1].role, Role::Assistant);
        assert_eq!(h.input_tokens, 2);
        assert_eq!(h.output_tokens, 1);
    }

    /// **Scenario**: Auto-select picks merge for two histories, append for
    /// string+history, override for two objects, and errors otherwise.
    #[test]
    fn auto_strategy_by_types() {
        let h = TaskValue::ChatHistory(ChatHistory::new());
        let s = TaskValue::String("x".into());
        let j = TaskValue::Json(serde_json::json!({}));
        assert!(compose(&directive(None), h.clone(), &h).is_ok());
        assert!(compose(&directive(None), s.clone(), &h).is_ok());
        assert!(compose(&directive(None), j.clone(), &j).is_ok());
        assert!(compose(&directive(None), s.clone(), &s).is_err());
        assert!(compose(&directive(None), TaskValue::Int(1), &h).is_err());
    }

    /// **Scenario**: Append turns the string into an assistant turn on the history.
    #[test]
    fn append_string_becomes_assistant() {
        let mut h = ChatHistory::new();
        h.push(ChatMessage::user("q"));
        let out = compose(
            &directive(Some(ComposeStrategy::AppendStringToChatHistory)),
            TaskValue::String("answer".into()),
            &TaskValue::ChatHistory(h),
        )
        .unwrap();
        let TaskValue::ChatHistory(h) = out else {
            panic!("expected history")
        };
        assert_eq!(h.messages.len(), 2);
        assert_eq!(h.messages[1].role, Role::Assistant);
        assert_eq!(h.messages[1].content, "answer");
    }

    /// **Scenario**: Composed variable names sanitize the when operand.
    #[test]
    fn composed_var_name_sanitizes() {
        assert_eq!(composed_var_name("t2", "tool-call"), "t2_tool_call_composed");
        assert_eq!(composed_var_name("t2", ""), "t2__composed");
    }
}
