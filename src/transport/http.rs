//! HTTP transports: streamable HTTP and the legacy SSE fallback
//!
//! The streaming variant POSTs each JSON-RPC message to the server URL
//! and accepts either a plain JSON response or a short event-stream body
//! carrying the response. The SSE variant holds one long-lived GET stream
//! for responses and POSTs messages to the endpoint the server announces.
//!
//! Auth comes from two places: resolved static headers, and the OAuth
//! vault (bearer token) when the definition carries one.

use super::{Transport, TransportKind, TransportState};
use crate::auth::vault::OAuthVault;
use crate::{McporterError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{Mutex, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    Streaming,
    Sse,
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

/// State of the legacy SSE channel once established
struct SseChannel {
    endpoint: String,
    pending: Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>,
    reader: tokio::task::JoinHandle<()>,
}

pub struct HttpTransport {
    server_name: String,
    url: String,
    headers: BTreeMap<String, String>,
    mode: HttpMode,
    vault: Option<OAuthVault>,
    http: reqwest::Client,
    bearer: parking_lot::RwLock<Option<String>>,
    session_id: parking_lot::RwLock<Option<String>>,
    next_id: AtomicI64,
    sse: Mutex<Option<SseChannel>>,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(
        server_name: &str,
        url: &str,
        headers: BTreeMap<String, String>,
        mode: HttpMode,
        vault: Option<OAuthVault>,
    ) -> Result<Self> {
        let bearer = vault
            .as_ref()
            .and_then(|v| v.read_tokens())
            .map(|t| t.access_token);
        Ok(HttpTransport {
            server_name: server_name.to_string(),
            url: url.to_string(),
            headers,
            mode,
            vault,
            http: reqwest::Client::new(),
            bearer: parking_lot::RwLock::new(bearer),
            session_id: parking_lot::RwLock::new(None),
            next_id: AtomicI64::new(1),
            sse: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if !self.headers.contains_key("Authorization")
            && let Some(bearer) = self.bearer.read().clone()
        {
            request = request.header("Authorization", format!("Bearer {bearer}"));
        }
        if let Some(session) = self.session_id.read().clone() {
            request = request.header("Mcp-Session-Id", session);
        }
        request
    }

    fn status_error(&self, status: reqwest::StatusCode) -> McporterError {
        let message = if status.as_u16() == 401 || status.as_u16() == 403 {
            format!("Unauthorized (HTTP {})", status.as_u16())
        } else {
            format!("Non-200 status code ({})", status.as_u16())
        };
        McporterError::connection(&self.server_name, &message)
    }

    fn rpc_error(&self, error: JsonRpcError) -> McporterError {
        McporterError::connection(
            &self.server_name,
            &format!("RPC error {}: {}", error.code, error.message),
        )
    }

    // ------------------------------------------------------------------
    // Streamable HTTP
    // ------------------------------------------------------------------

    async fn streaming_request(&self, id: i64, body: Value) -> Result<Value> {
        let request = self
            .apply_headers(self.http.post(&self.url))
            .header("Accept", "application/json, text/event-stream")
            .json(&body);
        let response = request
            .send()
            .await
            .map_err(|e| McporterError::connection(&self.server_name, &format!("fetch failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status));
        }
        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session.to_string());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            let mut parser = SseParser::default();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| {
                    McporterError::connection(&self.server_name, &format!("fetch failed: {e}"))
                })?;
                for event in parser.feed(&chunk) {
                    if let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&event.data)
                        && parsed.id == Some(id)
                    {
                        if let Some(error) = parsed.error {
                            return Err(self.rpc_error(error));
                        }
                        return Ok(parsed.result.unwrap_or(json!({})));
                    }
                }
            }
            Err(McporterError::connection(
                &self.server_name,
                &"Connection closed",
            ))
        } else {
            let parsed: JsonRpcResponse = response.json().await.map_err(|e| {
                McporterError::connection(&self.server_name, &format!("fetch failed: {e}"))
            })?;
            if let Some(error) = parsed.error {
                return Err(self.rpc_error(error));
            }
            Ok(parsed.result.unwrap_or(json!({})))
        }
    }

    // ------------------------------------------------------------------
    // Legacy SSE
    // ------------------------------------------------------------------

    /// Open the event stream and wait for the `endpoint` announcement.
    async fn ensure_sse(&self) -> Result<(String, Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>)> {
        let mut guard = self.sse.lock().await;
        if let Some(channel) = guard.as_ref() {
            return Ok((channel.endpoint.clone(), channel.pending.clone()));
        }

        let response = self
            .apply_headers(self.http.get(&self.url))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| McporterError::connection(&self.server_name, &format!("fetch failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status));
        }

        let mut parser = SseParser::default();
        let mut stream = response.bytes_stream();
        let mut endpoint: Option<String> = None;
        let mut leftover: Vec<SseEvent> = Vec::new();

        while endpoint.is_none() {
            let Some(chunk) = stream.next().await else {
                return Err(McporterError::connection(
                    &self.server_name,
                    &"Connection closed",
                ));
            };
            let chunk = chunk.map_err(|e| {
                McporterError::connection(&self.server_name, &format!("fetch failed: {e}"))
            })?;
            for event in parser.feed(&chunk) {
                if event.event == "endpoint" && endpoint.is_none() {
                    endpoint = Some(event.data.clone());
                } else {
                    leftover.push(event);
                }
            }
        }
        let endpoint = resolve_endpoint(&self.url, &endpoint.unwrap_or_default())?;

        let pending: Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let server_name = self.server_name.clone();
        let reader = tokio::spawn(async move {
            for event in leftover {
                route_sse_event(&server_name, &reader_pending, event).await;
            }
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                for event in parser.feed(&chunk) {
                    route_sse_event(&server_name, &reader_pending, event).await;
                }
            }
            tracing::debug!("[{}] SSE stream ended", server_name);
        });

        *guard = Some(SseChannel {
            endpoint: endpoint.clone(),
            pending: pending.clone(),
            reader,
        });
        Ok((endpoint, pending))
    }

    async fn sse_request(&self, id: i64, body: Value) -> Result<Value> {
        let (endpoint, pending) = self.ensure_sse().await?;
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(id, tx);

        let response = self
            .apply_headers(self.http.post(&endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| McporterError::connection(&self.server_name, &format!("fetch failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            pending.lock().await.remove(&id);
            return Err(self.status_error(status));
        }

        match rx.await {
            Ok(parsed) => {
                if let Some(error) = parsed.error {
                    return Err(self.rpc_error(error));
                }
                Ok(parsed.result.unwrap_or(json!({})))
            }
            Err(_) => Err(McporterError::connection(
                &self.server_name,
                &"Connection closed",
            )),
        }
    }

    async fn post_notification(&self, body: Value) -> Result<()> {
        let target = match self.mode {
            HttpMode::Streaming => self.url.clone(),
            HttpMode::Sse => self.ensure_sse().await?.0,
        };
        let mut request = self.apply_headers(self.http.post(&target)).json(&body);
        if self.mode == HttpMode::Streaming {
            request = request.header("Accept", "application/json, text/event-stream");
        }
        let response = request.send().await.map_err(|e| {
            McporterError::connection(&self.server_name, &format!("fetch failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        match self.mode {
            HttpMode::Streaming => self.streaming_request(id, body).await,
            HttpMode::Sse => self.sse_request(id, body).await,
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.post_notification(json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(channel) = self.sse.lock().await.take() {
            channel.reader.abort();
        }
    }

    fn kind(&self) -> TransportKind {
        match self.mode {
            HttpMode::Streaming => TransportKind::HttpStreaming,
            HttpMode::Sse => TransportKind::Sse,
        }
    }

    fn state(&self) -> TransportState {
        if self.closed.load(Ordering::SeqCst) {
            TransportState::Closed
        } else {
            TransportState::Ready
        }
    }

    /// Reload the bearer token after an interactive authorization.
    fn finish_auth(&self) {
        if let Some(vault) = &self.vault {
            *self.bearer.write() = vault.read_tokens().map(|t| t.access_token);
        }
    }
}

async fn route_sse_event(
    server_name: &str,
    pending: &Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>,
    event: SseEvent,
) {
    if event.event != "message" {
        return;
    }
    let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&event.data) else {
        tracing::debug!("[{}] skipping unparseable SSE message", server_name);
        return;
    };
    let Some(id) = parsed.id else { return };
    if let Some(tx) = pending.lock().await.remove(&id) {
        let _ = tx.send(parsed);
    }
}

/// The endpoint event may carry an absolute URL or a path relative to
/// the stream URL.
pub(crate) fn resolve_endpoint(base: &str, endpoint: &str) -> Result<String> {
    if endpoint.contains("://") {
        return Ok(endpoint.to_string());
    }
    let base = url::Url::parse(base)
        .map_err(|e| McporterError::internal(format!("invalid base URL: {e}")))?;
    let joined = base
        .join(endpoint)
        .map_err(|e| McporterError::internal(format!("invalid endpoint '{endpoint}': {e}")))?;
    Ok(joined.to_string())
}

// ============================================================================
// SSE FRAMING
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental server-sent-events parser: `event:`/`data:` fields,
/// dispatch on blank line. Comments and unknown fields are ignored.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: String,
    event: String,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if !self.data.is_empty() || !self.event.is_empty() {
                    events.push(SseEvent {
                        event: if self.event.is_empty() {
                            "message".to_string()
                        } else {
                            std::mem::take(&mut self.event)
                        },
                        data: std::mem::take(&mut self.data).join("\n"),
                    });
                    self.event.clear();
                }
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                self.event = value.trim_start().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.trim_start().to_string());
            }
        }
        events
    }
}
