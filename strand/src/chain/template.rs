//! Template rendering over the variable map.
//!
//! Prompt, print, and output templates are Jinja-style (`{{ input }}`),
//! rendered with minijinja against the chain's variables after macro
//! expansion. Undefined variables are errors: a template that references a
//! variable no task has produced fails the chain instead of silently
//! rendering empty.

use std::collections::HashMap;

use minijinja::{Environment, UndefinedBehavior};

use crate::datatype::TaskValue;
use crate::error::EngineError;

/// Renders `template` against the variable map.
///
/// Values are exposed untagged: a string variable renders as its text, a
/// chat history as an object with `messages` and token fields.
pub fn render(template: &str, vars: &HashMap<String, TaskValue>) -> Result<String, EngineError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let mut ctx = serde_json::Map::new();
    for (name, value) in vars {
        ctx.insert(name.clone(), value.to_json()?);
    }
    env.render_str(template, serde_json::Value::Object(ctx))
        .map_err(|e| EngineError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, TaskValue)]) -> HashMap<String, TaskValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// **Scenario**: A simple substitution renders the variable's text.
    #[test]
    fn renders_string_variable() {
        let v = vars(&[("input", TaskValue::String("6*7".into()))]);
        assert_eq!(render("What is {{ input }}?", &v).unwrap(), "What is 6*7?");
    }

    /// **Scenario**: Numeric variables render through filters and arithmetic.
    #[test]
    fn renders_numeric_variable() {
        let v = vars(&[("score", TaskValue::Float(7.5))]);
        assert_eq!(render("score={{ score }}", &v).unwrap(), "score=7.5");
    }

    /// **Scenario**: Referencing an undefined variable is a rendering error.
    #[test]
    fn undefined_variable_errors() {
        let v = vars(&[]);
        let err = render("{{ missing }}", &v).unwrap_err();
        assert!(matches!(err, EngineError::Template(_)), "{err}");
    }

    /// **Scenario**: A parse error in the template is a rendering error.
    #[test]
    fn template_parse_error_surfaces() {
        let v = vars(&[("input", TaskValue::String("x".into()))]);
        assert!(render("{% broken", &v).is_err());
    }

    /// **Scenario**: Chat histories expose their message list to templates.
    #[test]
    fn renders_chat_history_fields() {
        use crate::chat::{ChatHistory, ChatMessage};
        let mut h = ChatHistory::new();
        h.push(ChatMessage::user("hello"));
        let v = vars(&[("t1", TaskValue::ChatHistory(h))]);
        let out = render("{{ t1.messages[0].content }}", &v).unwrap();
        assert_eq!(out, "hello");
    }
}
