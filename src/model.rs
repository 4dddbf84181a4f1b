//! Core data model for mcporter
//!
//! The central record is [`ServerDefinition`]: a normalized description of
//! how to reach one MCP server, produced by the config loader and consumed
//! by the runtime. This module also carries the daemon wire protocol, the
//! schema snapshot shape, generated-artifact metadata, and the thin helper
//! around tool-call envelopes.

use crate::{McporterError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// SERVER DEFINITION
// ============================================================================

/// How the runtime reaches a server: a child process or an HTTP endpoint.
///
/// Exactly one variant per definition. `env` values and header values may
/// contain `${VAR}` / `$env:VAR` placeholders; resolution is deferred to
/// transport construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CommandSpec {
    #[serde(rename = "stdio")]
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    #[serde(rename = "http")]
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

impl CommandSpec {
    pub fn is_http(&self) -> bool {
        matches!(self, CommandSpec::Http { .. })
    }

    /// The HTTP endpoint, when this is an HTTP definition
    pub fn url(&self) -> Option<&str> {
        match self {
            CommandSpec::Http { url, .. } => Some(url),
            CommandSpec::Stdio { .. } => None,
        }
    }
}

/// Where a definition came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Import,
}

/// One file that contributed a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub path: PathBuf,
}

/// Daemon participation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    #[serde(default)]
    pub keep_alive: bool,
}

/// Authentication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    OAuth,
}

/// Normalized description of one MCP server.
///
/// Identity is `name`, unique within a load. Constructed by the config
/// loader; mutated only through the runtime's `register_definition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDefinition {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub command: CommandSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthKind>,

    /// Materialized whenever `auth == oauth` (explicit or defaulted)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cache_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_redirect_url: Option<String>,

    /// Canonical origin: the first file that defined this server
    pub source: SourceRef,

    /// Every file that defined this server, primary first
    pub sources: Vec<SourceRef>,

    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl ServerDefinition {
    /// Default token cache directory for this server (`<home>/.mcporter/<name>`)
    pub fn default_token_cache_dir(name: &str) -> PathBuf {
        crate::constants::mcporter_dir().join(name)
    }

    /// The token cache dir, materializing the default when auth is oauth
    pub fn effective_token_cache_dir(&self) -> Option<PathBuf> {
        match (&self.token_cache_dir, self.auth) {
            (Some(dir), _) => Some(dir.clone()),
            (None, Some(AuthKind::OAuth)) => Some(Self::default_token_cache_dir(&self.name)),
            (None, None) => None,
        }
    }

    /// Upgrade this definition to OAuth, materializing the cache dir.
    ///
    /// Used by the pool's one-shot auto-promotion on 401.
    pub fn promote_to_oauth(&mut self) {
        self.auth = Some(AuthKind::OAuth);
        if self.token_cache_dir.is_none() {
            self.token_cache_dir = Some(Self::default_token_cache_dir(&self.name));
        }
    }

    /// Stable key for credential storage.
    ///
    /// Derived from the command kind and the endpoint (URL, or command plus
    /// args) so renaming a server keeps its credentials as long as the
    /// endpoint is unchanged. The name only participates when the endpoint
    /// is empty.
    pub fn server_key(&self) -> String {
        let endpoint = match &self.command {
            CommandSpec::Http { url, .. } => normalize_endpoint(url),
            CommandSpec::Stdio { command, args, .. } => {
                let mut parts = vec![command.clone()];
                parts.extend(args.iter().cloned());
                parts.join(" ")
            }
        };
        let kind = if self.command.is_http() { "http" } else { "stdio" };
        if endpoint.is_empty() {
            format!("{}:{}", kind, self.name.trim())
        } else {
            format!("{}:{}", kind, endpoint)
        }
    }

    /// Validate the §3 invariants; the loader rejects entries that fail.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(McporterError::usage("server name must be non-empty"));
        }
        if let CommandSpec::Http { url, .. } = &self.command {
            url::Url::parse(url)
                .map_err(|e| McporterError::usage(format!("invalid server URL '{url}': {e}")))?;
        }
        if let CommandSpec::Stdio { env, .. } = &self.command {
            for key in env.keys() {
                if !is_valid_env_key(key) {
                    return Err(McporterError::usage(format!(
                        "invalid env key '{key}' for server '{}'",
                        self.name
                    )));
                }
            }
        }
        if self.auth == Some(AuthKind::OAuth) && self.token_cache_dir.is_none() {
            return Err(McporterError::internal(format!(
                "oauth server '{}' lacks a token cache dir",
                self.name
            )));
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn normalize_endpoint(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
            let path = parsed.path().trim_end_matches('/');
            format!("{}://{}{}", parsed.scheme(), host, path)
        }
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}

// ============================================================================
// TOOLS
// ============================================================================

/// One schema-described callable exposed by a server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Schema snapshot persisted under `tokenCacheDir/schema.json`.
///
/// A performance hint for generated CLIs, never a source of truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub updated_at: DateTime<Utc>,
    pub tools: BTreeMap<String, SchemaSnapshotEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshotEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaSnapshot {
    pub fn from_tools(tools: &[ToolDescriptor]) -> Self {
        let mut map = BTreeMap::new();
        for tool in tools {
            map.insert(
                tool.name.clone(),
                SchemaSnapshotEntry {
                    input_schema: tool.input_schema.clone(),
                    output_schema: tool.output_schema.clone(),
                    description: tool.description.clone(),
                },
            );
        }
        SchemaSnapshot {
            updated_at: Utc::now(),
            tools: map,
        }
    }
}

/// Thin helper over the raw MCP `tools/call` envelope.
///
/// Extraction is on demand; the raw envelope stays available for `--output raw`.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    envelope: Value,
}

impl ToolCallResult {
    pub fn new(envelope: Value) -> Self {
        ToolCallResult { envelope }
    }

    pub fn raw(&self) -> &Value {
        &self.envelope
    }

    /// Concatenated text content blocks
    pub fn text(&self) -> String {
        self.envelope
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    /// Text content rendered as a markdown block per content item
    pub fn markdown(&self) -> String {
        let text = self.text();
        if text.is_empty() {
            return text;
        }
        text.lines()
            .map(|line| line.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First text block parsed as JSON, or the structured content
    pub fn json(&self) -> Option<Value> {
        if let Some(structured) = self.structured_content() {
            return Some(structured.clone());
        }
        serde_json::from_str(&self.text()).ok()
    }

    pub fn structured_content(&self) -> Option<&Value> {
        self.envelope.get("structuredContent")
    }

    /// Whether the server flagged this call as an error
    pub fn is_error(&self) -> bool {
        self.envelope
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

// ============================================================================
// DAEMON PROTOCOL
// ============================================================================

/// One request per socket connection; the server closes after responding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DaemonError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonError {
    pub code: String,
    pub message: String,
}

impl DaemonResponse {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        DaemonResponse {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        DaemonResponse {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(DaemonError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// `status` result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
    pub servers: Vec<DaemonServerStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonServerStatus {
    pub name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

// ============================================================================
// GENERATED ARTIFACT METADATA
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Template,
    Bundle,
    Binary,
}

/// Sidecar metadata persisted at `<artifact>.mcporter.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliArtifactMetadata {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub generator: GeneratorInfo,
    pub server: ArtifactServerInfo,
    pub artifact: ArtifactInfo,
    pub invocation: ArtifactInvocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactServerInfo {
    pub name: String,
    pub source: SourceRef,
    pub definition: ServerDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

/// The flags that produced the artifact; `generate --from` replays these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInvocation {
    pub server_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,
    pub runtime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bundle: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compile: bool,
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub minify: bool,
}

/// Sidecar path for an artifact (`<artifact>.mcporter.json`)
pub fn artifact_metadata_path(artifact: &Path) -> PathBuf {
    let mut os = artifact.as_os_str().to_owned();
    os.push(crate::constants::ARTIFACT_METADATA_SUFFIX);
    PathBuf::from(os)
}

#[cfg(test)]
mod model_test {
    include!("model_test.rs");
}
