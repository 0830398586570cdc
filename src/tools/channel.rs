use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::server::PROTOCOL_VERSION;
use super::{NutritionTools, ToolError};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Request/response access to the nutrition tools for one workflow run.
///
/// The owner must call `close` when done, on success and on failure.
#[async_trait]
pub trait ToolChannel: Send {
    async fn call(&mut self, tool: &str, arguments: Value) -> Result<Value, ToolError>;
    async fn close(&mut self) -> Result<(), ToolError>;
}

/// Tools running in this process.
pub struct InProcessChannel {
    tools: NutritionTools,
}

impl InProcessChannel {
    pub fn new(tools: NutritionTools) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl ToolChannel for InProcessChannel {
    async fn call(&mut self, tool: &str, arguments: Value) -> Result<Value, ToolError> {
        Ok(self.tools.call(tool, &arguments).await)
    }

    async fn close(&mut self) -> Result<(), ToolError> {
        debug!("Closing in-process tool channel");
        Ok(())
    }
}

/// Tools served by a child process speaking line-delimited JSON-RPC on its stdio.
pub struct SubprocessChannel {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl SubprocessChannel {
    /// Starts `program args...` and completes the initialize handshake.
    pub async fn spawn(program: &Path, args: &[String]) -> Result<Self, ToolError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Transport("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Transport("child stdout unavailable".to_string()))?;

        let mut channel = Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
        };
        let init = channel
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
                }),
            )
            .await;
        if let Err(err) = init {
            let _ = channel.close().await;
            return Err(err);
        }
        channel
            .send(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await?;
        info!(program = %program.display(), "Connected to nutrition tool server");
        Ok(channel)
    }

    async fn send(&mut self, message: &Value) -> Result<(), ToolError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ToolError::Transport("channel is closed".to_string()))?;
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, ToolError> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await?;

        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| ToolError::Transport("tool server closed its output".to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let message: Value = serde_json::from_str(&line)?;
            // Server-side notifications and stale replies carry no matching id.
            if message.get("id").and_then(Value::as_u64) != Some(id) {
                debug!(line = %line, "Skipping unrelated message from tool server");
                continue;
            }
            if let Some(error) = message.get("error") {
                let text = error.get("message").and_then(Value::as_str).unwrap_or("unknown error");
                return Err(ToolError::Transport(format!("{} failed: {}", method, text)));
            }
            return message
                .get("result")
                .cloned()
                .ok_or_else(|| ToolError::Transport(format!("{} reply has no result", method)));
        }
    }
}

/// Tool payload carried in the first text content item of a `tools/call` result.
fn payload_from_result(result: &Value) -> Result<Value, ToolError> {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.iter().find(|item| item.get("type").and_then(Value::as_str) == Some("text")))
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Transport("tool result has no text content".to_string()))?;
    Ok(serde_json::from_str(text)?)
}

#[async_trait]
impl ToolChannel for SubprocessChannel {
    async fn call(&mut self, tool: &str, arguments: Value) -> Result<Value, ToolError> {
        let result = self
            .request("tools/call", json!({ "name": tool, "arguments": arguments }))
            .await?;
        payload_from_result(&result)
    }

    async fn close(&mut self) -> Result<(), ToolError> {
        // Closing stdin ends the server's read loop.
        drop(self.stdin.take());
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(?status, "Tool server exited");
            }
            Err(_) => {
                warn!("Tool server did not exit in time, killing it");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}
