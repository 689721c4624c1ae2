//! Webhook hook: POST the task input to a caller-configured URL.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::chain::definition::HookCall;
use crate::context::ExecContext;
use crate::datatype::TaskValue;

use super::{merge_args, HookError, LocalHook, ToolSpec};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends the merged arguments as a JSON POST body to the `url` argument.
///
/// An allow-list of URL prefixes, when configured, rejects calls to any
/// other destination before a connection is attempted.
pub struct WebhookHook {
    client: reqwest::Client,
    allowed_prefixes: Vec<String>,
}

impl WebhookHook {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            allowed_prefixes: Vec::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            allowed_prefixes: Vec::new(),
        }
    }

    /// Restricts calls to URLs starting with one of `prefixes`.
    pub fn with_allowed_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.allowed_prefixes = prefixes;
        self
    }
}

impl Default for WebhookHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalHook for WebhookHook {
    fn name(&self) -> &str {
        "webhook"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "post".into(),
            description: Some("POSTs the input as JSON to the given URL.".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Destination URL."}
                },
                "required": ["url"]
            }),
        }]
    }

    async fn exec(
        &self,
        ctx: &ExecContext,
        input: &TaskValue,
        call: &HookCall,
    ) -> Result<TaskValue, HookError> {
        let url = call
            .args
            .get("url")
            .ok_or_else(|| HookError::InvalidArgs("webhook requires a url argument".into()))?;
        if !self.allowed_prefixes.is_empty()
            && !self.allowed_prefixes.iter().any(|p| url.starts_with(p))
        {
            return Err(HookError::Denied(format!("url {url} not in allow-list")));
        }

        let mut body = merge_args(call, input)?;
        if let Some(obj) = body.as_object_mut() {
            obj.remove("url");
        }
        let timeout = ctx.io_timeout(Some(DEFAULT_TIMEOUT)).unwrap_or(DEFAULT_TIMEOUT);
        let response = self
            .client
            .post(url)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HookError::Timeout
                } else {
                    HookError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("application/json"))
            .unwrap_or(false);
        let text = response
            .text()
            .await
            .map_err(|e| HookError::Transport(e.to_string()))?;
        if !status.is_success() {
            let mut body = text;
            body.truncate(512);
            return Err(HookError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if is_json {
            let value = serde_json::from_str(&text)
                .map_err(|e| HookError::Transport(format!("bad JSON response: {e}")))?;
            Ok(TaskValue::Json(value))
        } else {
            Ok(TaskValue::String(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// **Scenario**: A missing url argument is rejected before any I/O.
    #[tokio::test]
    async fn missing_url_rejected() {
        let err = WebhookHook::new()
            .exec(&ExecContext::new(), &TaskValue::Nil, &HookCall::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::InvalidArgs(_)));
    }

    /// **Scenario**: A URL outside the allow-list is denied without a connection.
    #[tokio::test]
    async fn allow_list_denies() {
        let hook =
            WebhookHook::new().with_allowed_prefixes(vec!["https://hooks.internal/".into()]);
        let call = HookCall {
            name: "webhook".into(),
            tool_name: None,
            args: HashMap::from([("url".to_string(), "https://evil.example/x".to_string())]),
        };
        let err = hook
            .exec(&ExecContext::new(), &TaskValue::Nil, &call)
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Denied(_)));
    }
}
