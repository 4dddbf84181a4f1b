//! Third-party ecosystem imports
//!
//! Each supported editor ecosystem yields a fixed list of candidate config
//! paths (project-scoped, user-scoped, OS-specific). Existing files parse
//! tolerantly: empty or whitespace files yield nothing, malformed files
//! log a one-time warning and are ignored.

use super::{ConfigLoader, RawOccurrence, parse_raw_entry, strip_jsonc_comments};
use crate::model::{SourceKind, SourceRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Supported import ecosystems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ImportKind {
    Cursor,
    ClaudeCode,
    ClaudeDesktop,
    Codex,
    Opencode,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Cursor => "cursor",
            ImportKind::ClaudeCode => "claude-code",
            ImportKind::ClaudeDesktop => "claude-desktop",
            ImportKind::Codex => "codex",
            ImportKind::Opencode => "opencode",
        }
    }
}

/// Collect server occurrences for one import kind.
pub fn collect(
    kind: ImportKind,
    root_dir: Option<&Path>,
    loader: &mut ConfigLoader,
) -> Vec<RawOccurrence> {
    let mut occurrences = Vec::new();
    for path in candidate_paths(kind, root_dir) {
        if !path.is_file() {
            continue;
        }
        match read_entries(kind, &path) {
            Ok(entries) => {
                for (name, value) in entries {
                    match parse_raw_entry(&name, value) {
                        Ok(entry) => occurrences.push(RawOccurrence {
                            name,
                            entry,
                            source: SourceRef {
                                kind: SourceKind::Import,
                                path: path.clone(),
                            },
                        }),
                        Err(e) => {
                            tracing::warn!(
                                "Skipping imported server '{}' from {}: {}",
                                name,
                                path.display(),
                                e
                            );
                        }
                    }
                }
            }
            Err(message) => loader.warn_once(&path, &message),
        }
    }
    occurrences
}

/// Fixed candidate paths per kind: project-scoped first, then user-scoped.
pub fn candidate_paths(kind: ImportKind, root_dir: Option<&Path>) -> Vec<PathBuf> {
    let home = crate::constants::home_dir();
    let root = root_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok());
    let mut paths = Vec::new();

    match kind {
        ImportKind::Cursor => {
            if let Some(root) = &root {
                paths.push(root.join(".cursor/mcp.json"));
            }
            paths.push(home.join(".cursor/mcp.json"));
        }
        ImportKind::ClaudeCode => {
            if let Some(root) = &root {
                paths.push(root.join(".claude/settings.json"));
                paths.push(root.join(".mcp.json"));
            }
            paths.push(home.join(".claude/settings.json"));
            paths.push(home.join(".claude.json"));
        }
        ImportKind::ClaudeDesktop => {
            #[cfg(target_os = "macos")]
            paths.push(home.join("Library/Application Support/Claude/claude_desktop_config.json"));
            #[cfg(target_os = "windows")]
            if let Ok(appdata) = std::env::var("APPDATA") {
                paths.push(PathBuf::from(appdata).join("Claude/claude_desktop_config.json"));
            }
            #[cfg(not(any(target_os = "macos", target_os = "windows")))]
            {
                let config_home = std::env::var("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| home.join(".config"));
                paths.push(config_home.join("Claude/claude_desktop_config.json"));
            }
        }
        ImportKind::Codex => {
            if let Some(root) = &root {
                paths.push(root.join(".codex/config.toml"));
            }
            paths.push(home.join(".codex/config.toml"));
        }
        ImportKind::Opencode => {
            if let Some(root) = &root {
                paths.push(root.join("opencode.json"));
            }
            let config_home = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join(".config"));
            paths.push(config_home.join("opencode/opencode.json"));
        }
    }
    paths
}

/// Read named entries out of one file, honoring the container rules for
/// the kind. Errors are returned as plain messages for warn-once logging.
fn read_entries(
    kind: ImportKind,
    path: &Path,
) -> std::result::Result<Vec<(String, Value)>, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    if kind == ImportKind::Codex {
        return read_codex_toml(&content);
    }

    let root: Value =
        serde_json::from_str(&strip_jsonc_comments(&content)).map_err(|e| e.to_string())?;
    let Some(obj) = root.as_object() else {
        return Err("root is not an object".to_string());
    };

    let containers: &[&str] = match kind {
        // opencode nests servers only under `mcp`
        ImportKind::Opencode => &["mcp"],
        _ => &["mcpServers", "servers", "mcp"],
    };
    for container in containers {
        if let Some(Value::Object(servers)) = obj.get(*container)
            && !servers.is_empty()
        {
            return Ok(servers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect());
        }
    }

    // Legacy ~/.claude.json keeps name→entry at the root; settings.json
    // never falls back past the named containers.
    if path.file_name().and_then(|n| n.to_str()) == Some(".claude.json") {
        return Ok(obj
            .iter()
            .filter(|(_, value)| looks_like_server_entry(value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect());
    }

    Ok(Vec::new())
}

fn looks_like_server_entry(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    ["command", "url", "baseUrl", "base_url", "serverUrl", "server_url"]
        .iter()
        .any(|key| obj.contains_key(*key))
}

/// Codex keeps servers in an `mcp_servers` TOML table.
fn read_codex_toml(content: &str) -> std::result::Result<Vec<(String, Value)>, String> {
    let root: toml::Value = toml::from_str(content).map_err(|e| e.to_string())?;
    let Some(servers) = root.get("mcp_servers").and_then(toml::Value::as_table) else {
        return Ok(Vec::new());
    };
    let mut entries = Vec::new();
    for (name, value) in servers {
        let json = serde_json::to_value(value.clone()).map_err(|e| e.to_string())?;
        entries.push((name.clone(), json));
    }
    Ok(entries)
}

#[cfg(test)]
mod imports_test {
    include!("imports_test.rs");
}
