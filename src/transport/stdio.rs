//! Child-process STDIO transport
//!
//! Spawns the configured command with resolved env and cwd, frames
//! JSON-RPC as one object per line over stdin/stdout, and owns the child
//! handle. Stderr is drained line-by-line into the log so a misbehaving
//! server is visible without corrupting the protocol stream.

use super::{Transport, TransportKind, TransportState};
use crate::{McporterError, Result, utils};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// Transport over a spawned MCP server process
pub struct StdioTransport {
    server_name: String,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    stdout: Arc<Mutex<BufReader<ChildStdout>>>,
    next_id: Arc<Mutex<i64>>,
    pid: Option<u32>,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn the server process. Env values go through placeholder
    /// expansion; entries whose variables are unset are dropped.
    pub async fn spawn(
        server_name: &str,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in env {
            let expanded = utils::expand_env_value(value);
            if expanded.is_empty() && value.contains('$') {
                tracing::debug!(
                    "Dropping env '{}' for server '{}': variable unset",
                    key,
                    server_name
                );
                continue;
            }
            cmd.env(key, expanded);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            McporterError::connection(
                server_name,
                &format!("Failed to spawn MCP server '{server_name}': {e}"),
            )
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McporterError::internal("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McporterError::internal("child stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            let name = server_name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("[{} stderr] {}", name, line);
                }
            });
        }
        let pid = child.id();

        Ok(StdioTransport {
            server_name: server_name.to_string(),
            child: Arc::new(Mutex::new(Some(child))),
            stdin: Arc::new(Mutex::new(Some(stdin))),
            stdout: Arc::new(Mutex::new(BufReader::new(stdout))),
            next_id: Arc::new(Mutex::new(1)),
            pid,
            closed: AtomicBool::new(false),
        })
    }

    async fn next_id(&self) -> i64 {
        let mut id = self.next_id.lock().await;
        let current = *id;
        *id += 1;
        current
    }

    async fn write_line(&self, payload: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McporterError::connection(&self.server_name, &"Connection closed"))?;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id().await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        // Taking the read lock before writing keeps request/response pairs
        // atomic when callers overlap on one transport.
        let mut stdout = self.stdout.lock().await;
        self.write_line(&serde_json::to_string(&request)?).await?;

        loop {
            let mut line = String::new();
            let read = stdout.read_line(&mut line).await?;
            if read == 0 {
                return Err(McporterError::connection(
                    &self.server_name,
                    &"Connection closed",
                ));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) else {
                tracing::debug!("[{}] skipping non-response line", self.server_name);
                continue;
            };
            // Server-initiated notifications interleave with responses
            if response.id != Some(id) {
                continue;
            }
            if let Some(error) = response.error {
                return Err(McporterError::connection(
                    &self.server_name,
                    &format!("RPC error {}: {}", error.code, error.message),
                ));
            }
            return Ok(response.result.unwrap_or(json!({})));
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_line(&serde_json::to_string(&notification)?).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping stdin delivers EOF; escalation is the pool's job
        self.stdin.lock().await.take();
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn state(&self) -> TransportState {
        if self.closed.load(Ordering::SeqCst) {
            TransportState::Closed
        } else {
            TransportState::Ready
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn take_child(&self) -> Option<Child> {
        self.child.lock().await.take()
    }
}
