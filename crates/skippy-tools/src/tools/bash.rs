//! `bash` tool — one-shot commands plus background sessions.
//!
//! Intentionally unsandboxed. The only gate: init refuses to run as root
//! unless `tools.bash.unsafe` is set in the config.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{args, Tool, ToolError, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

pub struct BashTool {
    unsafe_mode: bool,
    background: Mutex<HashMap<String, tokio::process::Child>>,
}

impl BashTool {
    pub fn new(unsafe_mode: bool) -> Self {
        Self {
            unsafe_mode,
            background: Mutex::new(HashMap::new()),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BashArgs {
    op: Option<String>,
    command: Option<String>,
    timeout_secs: Option<u64>,
    id: Option<String>,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    async fn init(&self) -> Result<(), ToolError> {
        // SAFETY: geteuid has no preconditions.
        let euid = unsafe { libc::geteuid() };
        if euid == 0 && !self.unsafe_mode {
            return Err(ToolError::Init(
                "refusing to enable the bash tool as root; set tools.bash.unsafe = true to override"
                    .to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let parsed: BashArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        match parsed.op.as_deref().unwrap_or("run") {
            "run" => {
                let Some(command) = parsed.command.as_deref() else {
                    return ToolResult::error("missing required parameter: command");
                };
                self.run_once(command, parsed.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
                    .await
            }
            "spawn" => {
                let Some(command) = parsed.command.as_deref() else {
                    return ToolResult::error("missing required parameter: command");
                };
                self.spawn_background(command)
            }
            "list" => self.list_background(),
            "kill" => {
                let Some(id) = parsed.id.as_deref() else {
                    return ToolResult::error("missing required parameter: id");
                };
                self.kill_background(id).await
            }
            other => ToolResult::error(format!(
                "unknown op '{other}'; expected run, spawn, list, or kill"
            )),
        }
    }

    fn context(&self) -> String {
        r#"Operations:
- {op: "run", command, timeout_secs?} -> {stdout, stderr, exit_code}. Default timeout 60s.
- {op: "spawn", command} -> {id}. Starts a background process.
- {op: "list"} -> {sessions: [{id, running}]}
- {op: "kill", id} -> {}
Commands run through `sh -c` with the daemon's privileges. No sandbox."#
            .to_string()
    }
}

impl BashTool {
    async fn run_once(&self, command: &str, timeout_secs: u64) -> ToolResult {
        info!(command, "bash run");
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to spawn: {e}")),
        };

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await;

        match output {
            Ok(Ok(out)) => {
                let exit_code = out.status.code().unwrap_or(-1);
                let stdout = clip(&String::from_utf8_lossy(&out.stdout));
                let stderr = clip(&String::from_utf8_lossy(&out.stderr));
                let result = serde_json::json!({
                    "stdout": stdout,
                    "stderr": stderr,
                    "exit_code": exit_code,
                });
                if exit_code == 0 {
                    ToolResult::success(result)
                } else {
                    ToolResult {
                        success: false,
                        output: result,
                        error: Some(format!("command exited with code {exit_code}")),
                    }
                }
            }
            Ok(Err(e)) => ToolResult::error(format!("command failed: {e}")),
            Err(_) => ToolResult::error(format!("command timed out after {timeout_secs}s")),
        }
    }

    fn spawn_background(&self, command: &str) -> ToolResult {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();
        match child {
            Ok(child) => {
                let id = uuid::Uuid::new_v4().to_string();
                info!(id, command, "bash background spawn");
                self.background.lock().unwrap().insert(id.clone(), child);
                ToolResult::success(serde_json::json!({ "id": id }))
            }
            Err(e) => ToolResult::error(format!("failed to spawn: {e}")),
        }
    }

    fn list_background(&self) -> ToolResult {
        let mut sessions = Vec::new();
        let mut guard = self.background.lock().unwrap();
        for (id, child) in guard.iter_mut() {
            let running = matches!(child.try_wait(), Ok(None));
            sessions.push(serde_json::json!({ "id": id, "running": running }));
        }
        ToolResult::success(serde_json::json!({ "sessions": sessions }))
    }

    async fn kill_background(&self, id: &str) -> ToolResult {
        let child = self.background.lock().unwrap().remove(id);
        match child {
            Some(mut child) => {
                if let Err(e) = child.kill().await {
                    warn!(id, error = %e, "background kill failed");
                    return ToolResult::error(format!("failed to kill '{id}': {e}"));
                }
                ToolResult::success(serde_json::json!({}))
            }
            None => ToolResult::error(format!("no background session with id '{id}'")),
        }
    }
}

fn clip(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_BYTES {
        return s.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[output truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout_and_exit_code() {
        let tool = BashTool::new(false);
        let r = tool
            .run(serde_json::json!({"command": "echo hello"}))
            .await;
        assert!(r.success);
        assert_eq!(r.output["stdout"].as_str().unwrap().trim(), "hello");
        assert_eq!(r.output["exit_code"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_output() {
        let tool = BashTool::new(false);
        let r = tool
            .run(serde_json::json!({"command": "echo oops >&2; exit 3"}))
            .await;
        assert!(r.is_failure());
        assert_eq!(r.output["exit_code"], 3);
        assert!(r.output["stderr"].as_str().unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn spawn_list_kill_lifecycle() {
        let tool = BashTool::new(false);
        let r = tool
            .run(serde_json::json!({"op": "spawn", "command": "sleep 30"}))
            .await;
        assert!(r.success);
        let id = r.output["id"].as_str().unwrap().to_string();

        let r = tool.run(serde_json::json!({"op": "list"})).await;
        assert_eq!(r.output["sessions"].as_array().unwrap().len(), 1);

        let r = tool.run(serde_json::json!({"op": "kill", "id": id})).await;
        assert!(r.success);
        let r = tool.run(serde_json::json!({"op": "list"})).await;
        assert!(r.output["sessions"].as_array().unwrap().is_empty());
    }
}
