//! Error types for mcporter
//!
//! This module provides the error hierarchy using thiserror plus the
//! connection-issue classifier used by list output, auth retry decisions,
//! and JSON envelopes. All errors convert to McporterError for unified
//! handling at the CLI boundary.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for mcporter operations
#[derive(Error, Debug)]
pub enum McporterError {
    #[error("{0}")]
    Usage(String),

    #[error("Malformed config {path}: {message}")]
    ConfigMalformed { path: String, message: String },

    #[error("Unknown server '{0}'")]
    UnknownServer(String),

    #[error("Unknown tool '{tool}' on server '{server}'{}", .suggestion.as_ref().map(|s| format!(". Did you mean '{s}'?")).unwrap_or_default())]
    UnknownTool {
        server: String,
        tool: String,
        suggestion: Option<String>,
    },

    #[error("Connection to '{server}' failed: {issue}")]
    Connection {
        server: String,
        issue: ConnectionIssue,
    },

    #[error("OAuth authorization for '{server_name}' timed out after {timeout_ms}ms")]
    OAuthTimeout { server_name: String, timeout_ms: u64 },

    #[error("OAuth state parameter mismatch")]
    InvalidState,

    #[error("Authorization redirect did not carry a code")]
    MissingAuthorizationCode,

    #[error("OAuth provider returned error: {0}")]
    OAuthProvider(String),

    #[error("OAuth session closed")]
    SessionClosed,

    #[error("Header '{key}' for server '{server}' references an unset environment variable")]
    HeaderResolution { server: String, key: String },

    #[error("Environment variable '{0}' is not set")]
    EnvUnresolved(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Daemon error ({code}): {message}")]
    Daemon { code: String, message: String },

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenient result type for mcporter operations
pub type Result<T> = std::result::Result<T, McporterError>;

impl McporterError {
    /// Create a usage error
    #[inline]
    pub fn usage<S: Into<String>>(msg: S) -> Self {
        McporterError::Usage(msg.into())
    }

    /// Create a config-malformed error for an explicit path
    #[inline]
    pub fn config_malformed(path: impl Into<String>, message: impl Into<String>) -> Self {
        McporterError::ConfigMalformed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an OAuth error
    #[inline]
    pub fn oauth<S: Into<String>>(msg: S) -> Self {
        McporterError::OAuth(msg.into())
    }

    /// Create a daemon error
    #[inline]
    pub fn daemon(code: impl Into<String>, message: impl Into<String>) -> Self {
        McporterError::Daemon {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create an internal error for unexpected conditions
    #[inline]
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        McporterError::Internal(msg.into())
    }

    /// Wrap an arbitrary error as a connection failure against `server`
    pub fn connection(server: impl Into<String>, source: &dyn std::fmt::Display) -> Self {
        McporterError::Connection {
            server: server.into(),
            issue: classify_message(&source.to_string()),
        }
    }

    /// The classified issue, when this error carries or implies one.
    ///
    /// Interactive-OAuth terminal failures (timeout, bad state, missing
    /// code, provider error) are auth issues even though they never went
    /// through the transport classifier, so envelopes and retry decisions
    /// see one consistent kind.
    pub fn issue(&self) -> Option<ConnectionIssue> {
        match self {
            McporterError::Connection { issue, .. } => Some(issue.clone()),
            McporterError::OAuthTimeout { .. }
            | McporterError::InvalidState
            | McporterError::MissingAuthorizationCode
            | McporterError::OAuthProvider(_)
            | McporterError::OAuth(_) => Some(ConnectionIssue {
                kind: IssueKind::Auth,
                status_code: None,
                raw_message: self.to_string(),
            }),
            _ => None,
        }
    }

    /// Whether this error indicates the server rejected our credentials
    pub fn is_unauthorized(&self) -> bool {
        self.issue()
            .is_some_and(|issue| issue.kind == IssueKind::Auth)
    }

    /// Exit code for the CLI boundary: 1 for user errors, 2 for transport/auth
    pub fn exit_code(&self) -> i32 {
        match self {
            McporterError::Usage(_)
            | McporterError::UnknownServer(_)
            | McporterError::UnknownTool { .. }
            | McporterError::ConfigMalformed { .. } => 1,
            _ => 2,
        }
    }
}

// ============================================================================
// CONNECTION ISSUE CLASSIFIER
// ============================================================================

/// Category of a classified connection failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Auth,
    Offline,
    Http,
    Unknown,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueKind::Auth => "auth",
            IssueKind::Offline => "offline",
            IssueKind::Http => "http",
            IssueKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Structured classification of an arbitrary transport or RPC failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionIssue {
    pub kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub raw_message: String,
}

impl std::fmt::Display for ConnectionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.raw_message),
            None => write!(f, "{}: {}", self.kind, self.raw_message),
        }
    }
}

static AUTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)unauthorized|invalid[_-]?token|\b(401|403)\b").unwrap());
static OFFLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ECONNREFUSED|ENOTFOUND|fetch failed|Connection closed").unwrap());
static HTTP_STATUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Non-200 status code \((\d{3})\)|HTTP (\d{3})").unwrap());

/// Map an error message onto a `ConnectionIssue`
pub fn classify_message(message: &str) -> ConnectionIssue {
    if AUTH_RE.is_match(message) {
        let status_code = HTTP_STATUS_RE.captures(message).and_then(extract_status);
        return ConnectionIssue {
            kind: IssueKind::Auth,
            status_code,
            raw_message: message.to_string(),
        };
    }
    if OFFLINE_RE.is_match(message) {
        return ConnectionIssue {
            kind: IssueKind::Offline,
            status_code: None,
            raw_message: message.to_string(),
        };
    }
    if let Some(caps) = HTTP_STATUS_RE.captures(message) {
        return ConnectionIssue {
            kind: IssueKind::Http,
            status_code: extract_status(caps),
            raw_message: message.to_string(),
        };
    }
    ConnectionIssue {
        kind: IssueKind::Unknown,
        status_code: None,
        raw_message: message.to_string(),
    }
}

/// Classify any error value (transport, RPC, IO)
pub fn classify_error(err: &dyn std::fmt::Display) -> ConnectionIssue {
    classify_message(&err.to_string())
}

fn extract_status(caps: regex::Captures<'_>) -> Option<u16> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod error_test {
    include!("error_test.rs");
}
