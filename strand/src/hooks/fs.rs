//! Path-sandboxed filesystem hook: read, write, and list under one root.
//!
//! Every path argument is resolved against the root and canonicalized; a
//! result outside the root is rejected before any filesystem access.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tokio::fs;

use crate::chain::definition::HookCall;
use crate::context::ExecContext;
use crate::datatype::TaskValue;

use super::{HookError, LocalHook, ToolSpec};

/// Filesystem tools scoped to a root directory.
pub struct LocalFsHook {
    root: PathBuf,
}

impl LocalFsHook {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `raw` under the root, rejecting escapes.
    ///
    /// The parent is canonicalized (the file itself may not exist yet for
    /// writes) and must stay inside the canonicalized root.
    fn resolve(&self, raw: &str) -> Result<PathBuf, HookError> {
        let requested = Path::new(raw);
        if requested.is_absolute() {
            return Err(HookError::Denied(format!(
                "absolute path {raw:?} not allowed"
            )));
        }
        let root = self
            .root
            .canonicalize()
            .map_err(|e| HookError::InvalidArgs(format!("root unavailable: {e}")))?;
        let joined = root.join(requested);
        let parent = joined
            .parent()
            .ok_or_else(|| HookError::Denied(format!("path {raw:?} has no parent")))?;
        let canonical_parent = parent
            .canonicalize()
            .map_err(|e| HookError::InvalidArgs(format!("path {raw:?}: {e}")))?;
        if !canonical_parent.starts_with(&root) {
            return Err(HookError::Denied(format!(
                "path {raw:?} escapes the sandbox root"
            )));
        }
        Ok(match joined.file_name() {
            Some(name) => canonical_parent.join(name),
            None => canonical_parent,
        })
    }

    fn required_arg<'a>(call: &'a HookCall, name: &str) -> Result<&'a str, HookError> {
        call.args
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| HookError::InvalidArgs(format!("missing argument {name:?}")))
    }
}

#[async_trait]
impl LocalHook for LocalFsHook {
    fn name(&self) -> &str {
        "local_fs"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "read_file".into(),
                description: Some("Reads a UTF-8 file under the sandbox root.".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }),
            },
            ToolSpec {
                name: "write_file".into(),
                description: Some("Writes content to a file under the sandbox root.".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "content": {"type": "string"}
                    },
                    "required": ["path", "content"]
                }),
            },
            ToolSpec {
                name: "list_dir".into(),
                description: Some("Lists entries of a directory under the sandbox root.".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"path": {"type": "string", "default": "."}}
                }),
            },
        ]
    }

    async fn exec(
        &self,
        _ctx: &ExecContext,
        input: &TaskValue,
        call: &HookCall,
    ) -> Result<TaskValue, HookError> {
        let tool = call.tool_name.as_deref().unwrap_or("read_file");
        match tool {
            "read_file" => {
                let path = self.resolve(Self::required_arg(call, "path")?)?;
                let content = fs::read_to_string(&path)
                    .await
                    .map_err(|e| HookError::Transport(format!("read {path:?}: {e}")))?;
                Ok(TaskValue::String(content))
            }
            "write_file" => {
                let path = self.resolve(Self::required_arg(call, "path")?)?;
                let content = match call.args.get("content") {
                    Some(c) => c.clone(),
                    None => input.eval_string(),
                };
                fs::write(&path, &content)
                    .await
                    .map_err(|e| HookError::Transport(format!("write {path:?}: {e}")))?;
                Ok(TaskValue::Json(json!({"written": content.len()})))
            }
            "list_dir" => {
                let raw = call.args.get("path").map(String::as_str).unwrap_or(".");
                let path = self.resolve(raw)?;
                let mut entries = Vec::new();
                let mut dir = fs::read_dir(&path)
                    .await
                    .map_err(|e| HookError::Transport(format!("list {path:?}: {e}")))?;
                while let Some(entry) = dir
                    .next_entry()
                    .await
                    .map_err(|e| HookError::Transport(e.to_string()))?
                {
                    entries.push(entry.file_name().to_string_lossy().into_owned());
                }
                entries.sort();
                Ok(TaskValue::Json(json!(entries)))
            }
            other => Err(HookError::UnknownTool {
                hook: "local_fs".into(),
                tool: other.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn call(tool: &str, args: &[(&str, &str)]) -> HookCall {
        HookCall {
            name: "local_fs".into(),
            tool_name: Some(tool.into()),
            args: args
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    /// **Scenario**: write then read round-trips inside the sandbox.
    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hook = LocalFsHook::new(dir.path());
        let ctx = ExecContext::new();
        hook.exec(
            &ctx,
            &TaskValue::Nil,
            &call("write_file", &[("path", "note.txt"), ("content", "hello")]),
        )
        .await
        .expect("write");
        let out = hook
            .exec(&ctx, &TaskValue::Nil, &call("read_file", &[("path", "note.txt")]))
            .await
            .expect("read");
        assert_eq!(out.as_str(), Some("hello"));
    }

    /// **Scenario**: Traversal and absolute paths are denied.
    #[tokio::test]
    async fn sandbox_escapes_denied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hook = LocalFsHook::new(dir.path());
        let ctx = ExecContext::new();
        let err = hook
            .exec(
                &ctx,
                &TaskValue::Nil,
                &call("read_file", &[("path", "../outside.txt")]),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, HookError::Denied(_) | HookError::InvalidArgs(_)),
            "{err}"
        );
        let err = hook
            .exec(
                &ctx,
                &TaskValue::Nil,
                &call("read_file", &[("path", "/etc/hostname")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Denied(_)), "{err}");
    }

    /// **Scenario**: list_dir returns sorted entry names.
    #[tokio::test]
    async fn list_dir_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let hook = LocalFsHook::new(dir.path());
        let out = hook
            .exec(&ExecContext::new(), &TaskValue::Nil, &call("list_dir", &[]))
            .await
            .expect("list");
        assert_eq!(
            out,
            TaskValue::Json(json!(["a.txt", "b.txt"]))
        );
    }
}
