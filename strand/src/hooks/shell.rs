//! Gated local shell hook.
//!
//! Disabled unless constructed with an explicit policy: a working directory
//! the commands run in, an allow-list of permitted program names, and a
//! deny-list that always wins. The first token of the command line is the
//! program checked against both lists.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use crate::chain::definition::HookCall;
use crate::context::ExecContext;
use crate::datatype::TaskValue;

use super::{HookError, LocalHook, ToolSpec};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// What the shell hook may run, and where.
#[derive(Debug, Clone)]
pub struct ShellPolicy {
    /// Directory commands run in.
    pub allow_dir: PathBuf,
    /// Program names that may be executed.
    pub allow_list: HashSet<String>,
    /// Program names that are always rejected, even when allow-listed.
    pub deny_list: HashSet<String>,
}

impl ShellPolicy {
    pub fn new(allow_dir: impl Into<PathBuf>) -> Self {
        Self {
            allow_dir: allow_dir.into(),
            allow_list: HashSet::new(),
            deny_list: HashSet::new(),
        }
    }

    pub fn allow(mut self, program: impl Into<String>) -> Self {
        self.allow_list.insert(program.into());
        self
    }

    pub fn deny(mut self, program: impl Into<String>) -> Self {
        self.deny_list.insert(program.into());
        self
    }

    fn check(&self, command: &str) -> Result<(), HookError> {
        let program = command
            .split_whitespace()
            .next()
            .ok_or_else(|| HookError::InvalidArgs("empty command".into()))?;
        let name = program.rsplit('/').next().unwrap_or(program);
        if self.deny_list.contains(name) {
            return Err(HookError::Denied(format!("program {name:?} is denied")));
        }
        if !self.allow_list.contains(name) {
            return Err(HookError::Denied(format!(
                "program {name:?} is not allow-listed"
            )));
        }
        Ok(())
    }
}

/// Shell execution behind an allow/deny policy.
pub struct LocalShellHook {
    policy: ShellPolicy,
}

impl LocalShellHook {
    pub fn new(policy: ShellPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl LocalHook for LocalShellHook {
    fn name(&self) -> &str {
        "local_shell"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "exec".into(),
            description: Some(
                "Runs an allow-listed command via sh -c in the configured directory. \
                 Returns combined stdout and stderr."
                    .into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command line to run."}
                },
                "required": ["command"]
            }),
        }]
    }

    async fn exec(
        &self,
        ctx: &ExecContext,
        input: &TaskValue,
        call: &HookCall,
    ) -> Result<TaskValue, HookError> {
        let command = match call.args.get("command") {
            Some(c) => c.clone(),
            None => input
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| HookError::InvalidArgs("missing command argument".into()))?,
        };
        self.policy.check(&command)?;

        let timeout = ctx.io_timeout(Some(DEFAULT_TIMEOUT)).unwrap_or(DEFAULT_TIMEOUT);
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.policy.allow_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HookError::Transport(format!("spawn failed: {e}")))?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| HookError::Timeout)?
            .map_err(|e| HookError::Transport(e.to_string()))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(HookError::Status {
                status: output.status.code().unwrap_or(-1) as u16,
                body: text.chars().take(512).collect(),
            });
        }
        Ok(TaskValue::String(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn call(command: &str) -> HookCall {
        HookCall {
            name: "local_shell".into(),
            tool_name: Some("exec".into()),
            args: HashMap::from([("command".to_string(), command.to_string())]),
        }
    }

    fn hook(dir: &std::path::Path) -> LocalShellHook {
        LocalShellHook::new(ShellPolicy::new(dir).allow("echo").allow("pwd").deny("rm"))
    }

    /// **Scenario**: An allow-listed command runs in the policy directory.
    #[tokio::test]
    async fn allowed_command_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = hook(dir.path())
            .exec(&ExecContext::new(), &TaskValue::Nil, &call("echo hello"))
            .await
            .expect("exec");
        assert!(out.as_str().unwrap_or_default().contains("hello"));
    }

    /// **Scenario**: Programs outside the allow-list are denied.
    #[tokio::test]
    async fn unlisted_program_denied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = hook(dir.path())
            .exec(&ExecContext::new(), &TaskValue::Nil, &call("ls -la"))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Denied(_)));
    }

    /// **Scenario**: The deny-list wins even for allow-listed names.
    #[tokio::test]
    async fn deny_list_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shell = LocalShellHook::new(
            ShellPolicy::new(dir.path()).allow("rm").deny("rm"),
        );
        let err = shell
            .exec(&ExecContext::new(), &TaskValue::Nil, &call("rm -rf x"))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Denied(_)));
    }

    /// **Scenario**: Path-qualified programs are checked by basename.
    #[tokio::test]
    async fn path_qualified_program_checked_by_basename() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = hook(dir.path())
            .exec(
                &ExecContext::new(),
                &TaskValue::Nil,
                &call("/bin/rm file"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Denied(_)));
    }
}
