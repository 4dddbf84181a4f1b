//! Daemon client side
//!
//! Connects to the per-config socket, sends one request, reads the one
//! response. `ensure_daemon` spawns the daemon detached when nothing is
//! listening and polls `status` until it answers. Transport-level
//! failures retry once after a restart; request-level errors propagate
//! untouched.

use super::DaemonMetadata;
use crate::config::LoadOptions;
use crate::model::{DaemonRequest, DaemonResponse, DaemonStatus};
use crate::{McporterError, Result, constants, utils};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub struct DaemonClient {
    socket_path: PathBuf,
    load_options: LoadOptions,
    next_id: std::sync::atomic::AtomicU64,
}

impl DaemonClient {
    pub fn for_options(opts: &LoadOptions) -> Self {
        let config_path = super::identity_path(opts);
        Self::at_socket(super::socket_path(&config_path), opts.clone())
    }

    pub fn at_socket(socket_path: PathBuf, load_options: LoadOptions) -> Self {
        DaemonClient {
            socket_path,
            load_options,
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// One request, one response, socket closed by the server.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let timeout_ms = match method {
            // Tool calls carry their own (longer) deadline server-side
            "callTool" => params
                .get("timeoutMs")
                .and_then(Value::as_u64)
                .unwrap_or(constants::DEFAULT_CALL_TIMEOUT_MS),
            _ => utils::env_ms(
                constants::ENV_DAEMON_TIMEOUT,
                constants::DEFAULT_DAEMON_TIMEOUT_MS,
            ),
        };
        utils::with_timeout(timeout_ms, self.request_inner(method, params)).await
    }

    async fn request_inner(&self, method: &str, params: Value) -> Result<Value> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            .to_string();
        let request = DaemonRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        let mut stream = UnixStream::connect(&self.socket_path).await?;
        let mut payload = serde_json::to_string(&request)?;
        payload.push('\n');
        stream.write_all(payload.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        if line.trim().is_empty() {
            return Err(McporterError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "daemon closed the connection without responding",
            )));
        }
        let response: DaemonResponse = serde_json::from_str(line.trim())?;
        if let Some(error) = response.error {
            return Err(McporterError::daemon(error.code, error.message));
        }
        if !response.ok {
            return Err(McporterError::daemon("EINTERNAL", "daemon replied not-ok"));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn status(&self) -> Result<DaemonStatus> {
        let value = self.request("status", json!({})).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Stale-socket diagnostics from the metadata sidecar.
    pub fn read_metadata(&self) -> Option<DaemonMetadata> {
        let content = std::fs::read_to_string(super::metadata_path(&self.socket_path)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Make sure a daemon is serving this config: probe `status`, spawn
    /// detached on transport failure, then poll for up to ten seconds.
    pub async fn ensure_daemon(&self) -> Result<DaemonStatus> {
        match self.status().await {
            Ok(status) => return Ok(status),
            Err(e) if is_transport_error(&e) => {
                if std::env::var(constants::ENV_DISABLE_AUTORUN).is_ok_and(|v| !v.is_empty()) {
                    return Err(McporterError::daemon(
                        "ECONNREFUSED",
                        "daemon is not running and autostart is disabled",
                    ));
                }
                self.spawn_detached()?;
            }
            Err(e) => return Err(e),
        }

        let deadline =
            std::time::Instant::now() + Duration::from_millis(constants::DAEMON_SPAWN_WAIT_MS);
        loop {
            match self.status().await {
                Ok(status) => return Ok(status),
                Err(_) if std::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(constants::DAEMON_SPAWN_POLL_MS))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Request with one transparent retry after restarting the daemon on
    /// a transport-level error.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        match self.request(method, params.clone()).await {
            Ok(value) => Ok(value),
            Err(e) if is_transport_error(&e) => {
                tracing::debug!("Daemon transport error ({}), restarting once", e);
                self.ensure_daemon().await?;
                self.request(method, params).await
            }
            Err(e) => Err(e),
        }
    }

    fn spawn_detached(&self) -> Result<()> {
        let exe = std::env::current_exe()?;
        let mut command = std::process::Command::new(exe);
        command
            .args(["daemon", "run"])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        if let Some(config) = &self.load_options.config_path {
            command.arg("--config").arg(config);
        }
        if let Some(root) = &self.load_options.root_dir {
            command.arg("--root").arg(root);
        }
        let child = command.spawn()?;
        tracing::info!("Spawned daemon (pid {})", child.id());
        Ok(())
    }
}

/// ENOENT / ECONNREFUSED / ECONNRESET / ETIMEDOUT at the socket layer.
fn is_transport_error(err: &McporterError) -> bool {
    match err {
        McporterError::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::TimedOut
        ),
        McporterError::Timeout(_) => true,
        _ => false,
    }
}
