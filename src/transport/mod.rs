//! Transport construction
//!
//! A [`Transport`] carries JSON-RPC messages to one MCP server. Three
//! concrete channels exist: child-process STDIO, streamable HTTP, and the
//! legacy HTTP+SSE pair the runtime falls back to when the streaming
//! handshake fails. The factory resolves header placeholders and hands
//! the HTTP variants their auth source.

use crate::auth::vault::OAuthVault;
use crate::model::{CommandSpec, ServerDefinition};
use crate::{McporterError, Result, utils};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

pub mod http;
pub mod stdio;

pub use http::{HttpMode, HttpTransport};
pub use stdio::StdioTransport;

/// Connection states a transport moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Ready,
    Closing,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    HttpStreaming,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::HttpStreaming => "http",
            TransportKind::Sse => "sse",
        };
        f.write_str(s)
    }
}

/// One JSON-RPC channel to a server.
///
/// Requests on a single transport are serialized by the implementations;
/// ordering follows submission order.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request and wait for its response `result`. RPC-level
    /// errors surface as `McporterError` with the server's message.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Fire a notification (no response expected).
    async fn notify(&self, method: &str, params: Value) -> Result<()>;

    /// Release the channel; idempotent.
    async fn close(&self);

    fn kind(&self) -> TransportKind;

    fn state(&self) -> TransportState;

    /// Child process id for STDIO transports
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Hand over the owned child process for teardown escalation. Only
    /// STDIO transports return one.
    async fn take_child(&self) -> Option<tokio::process::Child> {
        None
    }

    /// Re-read auth material after an interactive flow finished. Only
    /// meaningful for HTTP variants.
    fn finish_auth(&self) {}
}

/// Resolve `${VAR}` / `$env:VAR` placeholders in a header map.
///
/// A missing variable aborts construction with `HeaderResolutionFailed`.
pub fn resolve_headers(
    server: &str,
    headers: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();
    for (key, value) in headers {
        let value = utils::expand_env_value_checked(value).map_err(|_| {
            McporterError::HeaderResolution {
                server: server.to_string(),
                key: key.clone(),
            }
        })?;
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

/// Build the transport for a definition.
///
/// STDIO definitions spawn their child here; HTTP definitions pick the
/// streaming or SSE shape per `mode` and read OAuth tokens through the
/// optional vault handle.
pub async fn build(
    def: &ServerDefinition,
    mode: HttpMode,
    vault: Option<OAuthVault>,
) -> Result<Box<dyn Transport>> {
    match &def.command {
        CommandSpec::Stdio {
            command,
            args,
            cwd,
            env,
        } => {
            let transport = StdioTransport::spawn(&def.name, command, args, cwd.as_deref(), env)
                .await?;
            Ok(Box::new(transport))
        }
        CommandSpec::Http { url, headers } => {
            let headers = resolve_headers(&def.name, headers)?;
            let transport = HttpTransport::new(&def.name, url, headers, mode, vault)?;
            Ok(Box::new(transport))
        }
    }
}

#[cfg(test)]
mod transport_test {
    include!("transport_test.rs");
}
