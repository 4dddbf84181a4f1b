//! Daemon server side
//!
//! Accepts one request per connection, executes it against a shared
//! [`Runtime`], and closes the socket after the single response. Requests
//! to the same server serialize through the pool's per-server lock;
//! different servers proceed concurrently. The daemon exits on `stop` or
//! after fifteen idle minutes.

use super::DaemonMetadata;
use crate::config::{ConfigLoader, LoadOptions};
use crate::model::{DaemonRequest, DaemonResponse, DaemonServerStatus, DaemonStatus};
use crate::runtime::{ConnectOptions, ListToolsOptions, Runtime};
use crate::{McporterError, Result, constants, utils};
use chrono::Utc;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

pub struct DaemonServer {
    runtime: Arc<Runtime>,
    socket_path: PathBuf,
    metadata_path: PathBuf,
    config_path: PathBuf,
    started_at: chrono::DateTime<Utc>,
    last_activity: Arc<parking_lot::Mutex<Instant>>,
    stop: Arc<tokio::sync::Notify>,
}

impl DaemonServer {
    /// Load the config and prepare a server on the standard socket for
    /// that config identity.
    pub fn prepare(opts: &LoadOptions) -> Result<Self> {
        let config_path = super::identity_path(opts);
        let socket_path = super::socket_path(&config_path);
        let mut loader = ConfigLoader::new();
        let definitions = loader.load(opts)?;
        Ok(Self::with_runtime(
            Arc::new(Runtime::new(definitions)),
            socket_path,
            config_path,
        ))
    }

    /// Assemble a server on an explicit socket path (used by tests).
    pub fn with_runtime(runtime: Arc<Runtime>, socket_path: PathBuf, config_path: PathBuf) -> Self {
        let metadata_path = super::metadata_path(&socket_path);
        DaemonServer {
            runtime,
            socket_path,
            metadata_path,
            config_path,
            started_at: Utc::now(),
            last_activity: Arc::new(parking_lot::Mutex::new(Instant::now())),
            stop: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind and serve until `stop` or the idle window elapses.
    pub async fn run(self) -> Result<()> {
        let listener = self.bind()?;
        self.write_metadata()?;
        self.warm_keep_alive_servers();
        tracing::info!(
            "Daemon listening on {} (pid {})",
            self.socket_path.display(),
            std::process::id()
        );

        let mut sweep =
            tokio::time::interval(Duration::from_millis(constants::DAEMON_IDLE_SWEEP_MS));
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            *self.last_activity.lock() = Instant::now();
                            self.spawn_connection(stream);
                        }
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                        }
                    }
                }
                _ = sweep.tick() => {
                    let idle = self.last_activity.lock().elapsed();
                    if idle >= Duration::from_millis(constants::DAEMON_IDLE_TIMEOUT_MS) {
                        tracing::info!("Daemon idle for {:?}, shutting down", idle);
                        break;
                    }
                }
                _ = self.stop.notified() => {
                    tracing::info!("Daemon stopping on request");
                    break;
                }
            }
        }

        self.runtime.close(None).await;
        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(&self.metadata_path);
        Ok(())
    }

    /// First bind wins. A stale socket file (no listener behind it) is
    /// removed; a live one means another daemon owns this config.
    fn bind(&self) -> Result<UnixListener> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match UnixListener::bind(&self.socket_path) {
            Ok(listener) => Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok() {
                    return Err(McporterError::daemon(
                        "EADDRINUSE",
                        format!("daemon already running on {}", self.socket_path.display()),
                    ));
                }
                std::fs::remove_file(&self.socket_path)?;
                Ok(UnixListener::bind(&self.socket_path)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_metadata(&self) -> Result<()> {
        let metadata = DaemonMetadata {
            pid: std::process::id(),
            started_at: self.started_at,
            config_path: self.config_path.clone(),
        };
        std::fs::write(&self.metadata_path, serde_json::to_string_pretty(&metadata)?)?;
        Ok(())
    }

    /// Pre-connect servers that opted into keep-alive; failures only log.
    fn warm_keep_alive_servers(&self) {
        for def in self.runtime.definitions() {
            if !def.lifecycle.keep_alive {
                continue;
            }
            let runtime = self.runtime.clone();
            let name = def.name.clone();
            tokio::spawn(async move {
                match runtime.connect(&name, ConnectOptions::default()).await {
                    Ok(_) => tracing::info!("Warmed keep-alive server '{}'", name),
                    Err(e) => tracing::warn!("Could not warm '{}': {}", name, e),
                }
            });
        }
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let runtime = self.runtime.clone();
        let started_at = self.started_at;
        let stop = self.stop.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, runtime, started_at, stop).await {
                tracing::debug!("Connection handling failed: {}", e);
            }
        });
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    runtime: Arc<Runtime>,
    started_at: chrono::DateTime<Utc>,
    stop: Arc<tokio::sync::Notify>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let (response, stop_after_reply) = match serde_json::from_str::<DaemonRequest>(line.trim()) {
        Ok(request) => {
            let is_stop = request.method == "stop";
            let response = dispatch(&runtime, started_at, request).await;
            let stop_after_reply = is_stop && response.ok;
            (response, stop_after_reply)
        }
        Err(e) => (DaemonResponse::err("", "EBADREQUEST", e.to_string()), false),
    };

    let mut payload = serde_json::to_string(&response)?;
    payload.push('\n');
    write_half.write_all(payload.as_bytes()).await?;
    write_half.shutdown().await?;
    if stop_after_reply {
        stop.notify_one();
    }
    Ok(())
}

async fn dispatch(
    runtime: &Arc<Runtime>,
    started_at: chrono::DateTime<Utc>,
    request: DaemonRequest,
) -> DaemonResponse {
    let id = request.id.clone();
    let default_timeout = utils::env_ms(
        constants::ENV_DAEMON_TIMEOUT,
        constants::DEFAULT_DAEMON_TIMEOUT_MS,
    );

    let result: Result<Value> = match request.method.as_str() {
        "status" => status(runtime, started_at).await,
        "callTool" => {
            let timeout_ms = request
                .params
                .get("timeoutMs")
                .and_then(Value::as_u64)
                .unwrap_or(default_timeout);
            call_tool(runtime, &request.params, timeout_ms).await
        }
        "listTools" => {
            utils::with_timeout(default_timeout, list_tools(runtime, &request.params)).await
        }
        "listResources" => {
            utils::with_timeout(default_timeout, list_resources(runtime, &request.params)).await
        }
        "closeServer" => match required_str(&request.params, "server") {
            Ok(server) => {
                runtime.close(Some(&server)).await;
                Ok(json!({"closed": server}))
            }
            Err(e) => Err(e),
        },
        "stop" => {
            runtime.close(None).await;
            Ok(json!({"stopping": true}))
        }
        other => Err(McporterError::daemon(
            "UNKNOWN_METHOD",
            format!("unknown method '{other}'"),
        )),
    };

    match result {
        Ok(value) => DaemonResponse::ok(id, value),
        Err(e) => DaemonResponse::err(id, error_code(&e), e.to_string()),
    }
}

async fn status(runtime: &Arc<Runtime>, started_at: chrono::DateTime<Utc>) -> Result<Value> {
    let connected = runtime.connected_servers().await;
    let mut servers = Vec::new();
    for def in runtime.definitions() {
        let last_used = connected
            .iter()
            .find(|(name, _)| *name == def.name)
            .map(|(_, at)| *at);
        servers.push(DaemonServerStatus {
            name: def.name.clone(),
            state: if last_used.is_some() {
                "connected".to_string()
            } else {
                "idle".to_string()
            },
            last_used_at: last_used,
        });
    }
    let status = DaemonStatus {
        pid: std::process::id(),
        started_at,
        uptime_ms: (Utc::now() - started_at).num_milliseconds().max(0) as u64,
        servers,
    };
    Ok(serde_json::to_value(status)?)
}

async fn call_tool(runtime: &Arc<Runtime>, params: &Value, timeout_ms: u64) -> Result<Value> {
    let server = required_str(params, "server")?;
    let tool = required_str(params, "tool")?;
    let args = params.get("args").cloned().unwrap_or(json!({}));
    let result = utils::with_timeout(timeout_ms, runtime.call_tool(&server, &tool, args)).await?;
    Ok(result.raw().clone())
}

async fn list_tools(runtime: &Arc<Runtime>, params: &Value) -> Result<Value> {
    let server = required_str(params, "server")?;
    let include_schema = params
        .pointer("/options/includeSchema")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let tools = runtime
        .list_tools(
            &server,
            ListToolsOptions {
                include_schema,
                auto_authorize: true,
            },
        )
        .await?;
    Ok(json!({"tools": tools}))
}

async fn list_resources(runtime: &Arc<Runtime>, params: &Value) -> Result<Value> {
    let server = required_str(params, "server")?;
    let resources = runtime.list_resources(&server).await?;
    Ok(json!({"resources": resources}))
}

fn required_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| McporterError::daemon("EBADREQUEST", format!("missing '{key}'")))
}

fn error_code(err: &McporterError) -> &'static str {
    match err {
        McporterError::Timeout(_) | McporterError::OAuthTimeout { .. } => "ETIMEDOUT",
        McporterError::UnknownServer(_) => "UNKNOWN_SERVER",
        McporterError::UnknownTool { .. } => "UNKNOWN_TOOL",
        e if e.is_unauthorized() => "NOT_AUTHORIZED",
        McporterError::Io(_) => "ECONNRESET",
        _ => "EINTERNAL",
    }
}
