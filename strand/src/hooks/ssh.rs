//! SSH hook: remote command execution through the system OpenSSH client.
//!
//! Runs `ssh` in batch mode with strict host-key checking, so authentication
//! is non-interactive and the host must already be present in `known_hosts`.
//! With a control directory configured, ControlMaster multiplexing reuses
//! one connection across calls.

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

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for one SSH target.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    /// Identity file passed via `-i`.
    pub identity_file: Option<PathBuf>,
    /// Directory for ControlMaster sockets; enables connection reuse.
    pub control_dir: Option<PathBuf>,
}

impl SshConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
            control_dir: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = Some(dir.into());
        self
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// Remote exec over OpenSSH.
pub struct SshHook {
    config: SshConfig,
}

impl SshHook {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=yes");
        if let Some(dir) = &self.config.control_dir {
            cmd.arg("-o")
                .arg("ControlMaster=auto")
                .arg("-o")
                .arg(format!("ControlPath={}/%r@%h:%p", dir.display()))
                .arg("-o")
                .arg("ControlPersist=60s");
        }
        if let Some(port) = self.config.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(self.config.destination());
        cmd.arg(remote_command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl LocalHook for SshHook {
    fn name(&self) -> &str {
        "ssh"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "exec".into(),
            description: Some(format!(
                "Runs a command on {} over SSH and returns its output.",
                self.config.host
            )),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Remote command line."}
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
        let timeout = ctx.io_timeout(Some(DEFAULT_TIMEOUT)).unwrap_or(DEFAULT_TIMEOUT);
        let child = self
            .build_command(&command)
            .spawn()
            .map_err(|e| HookError::Transport(format!("ssh spawn failed: {e}")))?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| HookError::Timeout)?
            .map_err(|e| HookError::Transport(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HookError::Status {
                status: output.status.code().unwrap_or(-1) as u16,
                body: stderr.chars().take(512).collect(),
            });
        }
        Ok(TaskValue::String(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }
}
