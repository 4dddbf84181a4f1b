//! Configuration loading for mcporter
//!
//! Merges layered config files plus third-party ecosystem imports into a
//! deterministic ordered list of [`ServerDefinition`]. Resolution order:
//!
//! 1. Explicit config via `--config` or `MCPORTER_CONFIG` (parse failure
//!    here is fatal).
//! 2. Otherwise the home config (`~/.mcporter/mcporter.json[c]`) and the
//!    project config (`<root>/config/mcporter.json`), merged as two layers
//!    in that order. Within a layer, imports apply first and the
//!    `mcpServers` block wins over them; later layers win over earlier.
//!
//! Implicit paths degrade gracefully: unreadable or malformed files log a
//! one-time warning and are skipped.

use crate::model::{
    AuthKind, CommandSpec, Lifecycle, ServerDefinition, SourceKind, SourceRef,
};
use crate::{McporterError, Result, constants, utils};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub mod imports;
pub use imports::ImportKind;

/// Options for one load
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub root_dir: Option<PathBuf>,
}

/// One raw server entry as it appears on disk.
///
/// Accepts every field shape the supported ecosystems write; unknown
/// fields are ignored. URL aliases collapse onto `url`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(
        alias = "baseUrl",
        alias = "base_url",
        alias = "serverUrl",
        alias = "server_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandField>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    #[serde(
        default,
        alias = "environment",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cache_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_redirect_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
}

/// `command` may be a single shell-style string or an argv array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandField {
    Line(String),
    Argv(Vec<String>),
}

/// Root object of an mcporter config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfigFile {
    #[serde(default)]
    pub mcp_servers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub imports: Vec<ImportKind>,
}

/// One occurrence of a server in some file, before merging
#[derive(Debug, Clone)]
pub struct RawOccurrence {
    pub name: String,
    pub entry: RawEntry,
    pub source: SourceRef,
}

/// Layered loader with per-process warning dedup.
///
/// The warned-path set is an explicit field rather than process-global
/// state; each CLI invocation owns one loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    warned_paths: HashSet<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and merge all configured sources into an ordered definition list.
    pub fn load(&mut self, opts: &LoadOptions) -> Result<Vec<ServerDefinition>> {
        let occurrences = self.collect_occurrences(opts)?;
        Ok(self.merge(occurrences))
    }

    /// The file `config add` / `--persist` should write to
    pub fn default_write_path(opts: &LoadOptions) -> PathBuf {
        if let Some(explicit) = explicit_config_path(opts) {
            return explicit;
        }
        constants::home_config_candidates()
            .into_iter()
            .find(|p| p.exists())
            .unwrap_or_else(|| constants::mcporter_dir().join("mcporter.json"))
    }

    fn collect_occurrences(&mut self, opts: &LoadOptions) -> Result<Vec<RawOccurrence>> {
        let mut occurrences = Vec::new();

        if let Some(path) = explicit_config_path(opts) {
            let file = self.read_config_file(&path, true)?.unwrap_or_default();
            self.push_layer(&mut occurrences, &path, file, opts);
            return Ok(occurrences);
        }

        // Home layer, then project layer; later layers win in merge()
        if let Some(home_path) = constants::home_config_candidates()
            .into_iter()
            .find(|p| p.exists())
        {
            if let Some(file) = self.read_config_file(&home_path, false)? {
                self.push_layer(&mut occurrences, &home_path, file, opts);
            }
        }

        let root = opts
            .root_dir
            .clone()
            .or_else(|| std::env::current_dir().ok());
        if let Some(root) = root {
            let project_path = root.join(constants::PROJECT_CONFIG_RELATIVE);
            if project_path.exists()
                && let Some(file) = self.read_config_file(&project_path, false)?
            {
                self.push_layer(&mut occurrences, &project_path, file, opts);
            }
        }

        Ok(occurrences)
    }

    /// Apply one layer: imports first, then the local `mcpServers` block.
    fn push_layer(
        &mut self,
        occurrences: &mut Vec<RawOccurrence>,
        path: &Path,
        file: RawConfigFile,
        opts: &LoadOptions,
    ) {
        for kind in &file.imports {
            let imported = imports::collect(*kind, opts.root_dir.as_deref(), self);
            occurrences.extend(imported);
        }
        for (name, value) in file.mcp_servers {
            match parse_raw_entry(&name, value) {
                Ok(entry) => occurrences.push(RawOccurrence {
                    name,
                    entry,
                    source: SourceRef {
                        kind: SourceKind::Local,
                        path: path.to_path_buf(),
                    },
                }),
                Err(e) => {
                    tracing::warn!("Skipping server '{}' in {}: {}", name, path.display(), e);
                }
            }
        }
    }

    /// Read one config file. `explicit` paths fail hard on parse errors;
    /// implicit paths warn once and return None.
    fn read_config_file(&mut self, path: &Path, explicit: bool) -> Result<Option<RawConfigFile>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if explicit => {
                return Err(McporterError::config_malformed(
                    path.display().to_string(),
                    e.to_string(),
                ));
            }
            Err(_) => return Ok(None),
        };
        if content.trim().is_empty() {
            return Ok(Some(RawConfigFile::default()));
        }
        let stripped = strip_jsonc_comments(&content);
        match serde_json::from_str::<RawConfigFile>(&stripped) {
            Ok(file) => Ok(Some(file)),
            Err(e) if explicit => Err(McporterError::config_malformed(
                path.display().to_string(),
                e.to_string(),
            )),
            Err(e) => {
                self.warn_once(path, &e.to_string());
                Ok(None)
            }
        }
    }

    pub(crate) fn warn_once(&mut self, path: &Path, message: &str) {
        if self.warned_paths.insert(path.to_path_buf()) {
            tracing::warn!("Ignoring malformed config {}: {}", path.display(), message);
        }
    }

    /// Merge occurrences: payload of the highest-precedence occurrence wins
    /// (occurrences arrive lowest-precedence first), `sources` lists the
    /// winner first and then the rest in encounter order, and output order
    /// is first-encounter order of names.
    fn merge(&mut self, occurrences: Vec<RawOccurrence>) -> Vec<ServerDefinition> {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: BTreeMap<String, Vec<RawOccurrence>> = BTreeMap::new();

        for occ in occurrences {
            let name = occ.name.trim().to_string();
            if name.is_empty() {
                tracing::warn!("Skipping server with empty name in {}", occ.source.path.display());
                continue;
            }
            if !grouped.contains_key(&name) {
                order.push(name.clone());
            }
            grouped.entry(name).or_default().push(occ);
        }

        let mut definitions = Vec::new();
        for name in order {
            let group = grouped.remove(&name).unwrap_or_default();
            let Some(winner) = group.last().cloned() else {
                continue;
            };
            let mut sources = vec![winner.source.clone()];
            for occ in &group {
                if occ.source != winner.source && !sources.contains(&occ.source) {
                    sources.push(occ.source.clone());
                }
            }
            match materialize(&name, &winner.entry, winner.source, sources) {
                Ok(def) => definitions.push(def),
                Err(e) => {
                    tracing::warn!("Skipping server '{}': {}", name, e);
                }
            }
        }
        definitions
    }
}

fn explicit_config_path(opts: &LoadOptions) -> Option<PathBuf> {
    if let Some(path) = &opts.config_path {
        return Some(path.clone());
    }
    std::env::var(constants::ENV_CONFIG)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Parse one raw server value. Strings with a scheme are shorthand for an
/// HTTP entry; objects deserialize tolerantly.
pub fn parse_raw_entry(name: &str, value: Value) -> Result<RawEntry> {
    match value {
        Value::String(s) if s.contains("://") => Ok(RawEntry {
            url: Some(s),
            ..RawEntry::default()
        }),
        Value::String(s) => Err(McporterError::usage(format!(
            "server '{name}' is a bare string '{s}'; expected a URL or an object"
        ))),
        Value::Object(_) => serde_json::from_value(value).map_err(|e| {
            McporterError::usage(format!("server '{name}' has an invalid shape: {e}"))
        }),
        _ => Err(McporterError::usage(format!(
            "server '{name}' must be a URL string or an object"
        ))),
    }
}

/// Turn a raw entry into a normalized definition.
///
/// Entries with neither URL nor command are rejected; bearer-token fields
/// fold into an `Authorization` header with resolution deferred.
pub fn materialize(
    name: &str,
    entry: &RawEntry,
    source: SourceRef,
    sources: Vec<SourceRef>,
) -> Result<ServerDefinition> {
    let command = if let Some(url) = entry.url.as_deref().filter(|u| !u.trim().is_empty()) {
        let mut headers = entry.headers.clone();
        if let Some(token) = &entry.bearer_token {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        } else if let Some(var) = &entry.bearer_token_env {
            headers.insert("Authorization".to_string(), format!("Bearer ${{{var}}}"));
        }
        CommandSpec::Http {
            url: url.trim().to_string(),
            headers,
        }
    } else if let Some(command) = &entry.command {
        let (program, mut argv) = match command {
            CommandField::Line(line) => {
                let mut words = utils::shell_split(line);
                if words.is_empty() {
                    return Err(McporterError::usage(format!(
                        "server '{name}' has an empty command"
                    )));
                }
                let program = words.remove(0);
                (program, words)
            }
            CommandField::Argv(argv) => {
                let mut argv = argv.clone();
                if argv.is_empty() {
                    return Err(McporterError::usage(format!(
                        "server '{name}' has an empty command"
                    )));
                }
                let program = argv.remove(0);
                (program, argv)
            }
        };
        argv.extend(entry.args.iter().cloned());
        CommandSpec::Stdio {
            command: program,
            args: argv,
            cwd: entry.cwd.clone(),
            env: entry.env.clone(),
        }
    } else {
        return Err(McporterError::usage(format!(
            "server '{name}' defines neither a URL nor a command"
        )));
    };

    let auth = match entry.auth.as_deref() {
        Some("oauth") => Some(AuthKind::OAuth),
        Some(other) => {
            tracing::warn!("Server '{}' has unknown auth '{}', ignoring", name, other);
            None
        }
        None => None,
    };

    let token_cache_dir = match (&entry.token_cache_dir, auth) {
        (Some(dir), _) => Some(dir.clone()),
        (None, Some(AuthKind::OAuth)) => Some(ServerDefinition::default_token_cache_dir(name)),
        (None, None) => None,
    };

    let def = ServerDefinition {
        name: name.trim().to_string(),
        description: entry.description.clone(),
        command,
        auth,
        token_cache_dir,
        client_name: entry.client_name.clone(),
        oauth_redirect_url: entry.oauth_redirect_url.clone(),
        source,
        sources,
        lifecycle: entry.lifecycle.unwrap_or_default(),
    };
    def.validate()?;
    Ok(def)
}

/// Strip `//` and `/* */` comments outside of strings (JSONC tolerance
/// for the home config).
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' => match chars.peek() {
                Some('/') => {
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut prev = '\0';
                    for skipped in chars.by_ref() {
                        if prev == '*' && skipped == '/' {
                            break;
                        }
                        prev = skipped;
                    }
                }
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// PERSISTENCE (config add/remove, adhoc --persist)
// ============================================================================

/// Append or replace one server entry in a config file, creating the file
/// (and `mcpServers` block) as needed.
pub fn upsert_server(path: &Path, name: &str, entry: &RawEntry) -> Result<()> {
    let mut root: Value = match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            serde_json::from_str(&strip_jsonc_comments(&content)).map_err(|e| {
                McporterError::config_malformed(path.display().to_string(), e.to_string())
            })?
        }
        _ => Value::Object(serde_json::Map::new()),
    };

    let obj = root
        .as_object_mut()
        .ok_or_else(|| McporterError::config_malformed(path.display().to_string(), "root is not an object"))?;
    let servers = obj
        .entry("mcpServers")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let servers = servers.as_object_mut().ok_or_else(|| {
        McporterError::config_malformed(path.display().to_string(), "mcpServers is not an object")
    })?;
    servers.insert(name.to_string(), serde_json::to_value(entry)?);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&root)?)?;
    Ok(())
}

/// Remove one server entry; errors when the entry is absent.
pub fn remove_server(path: &Path, name: &str) -> Result<()> {
    let content = fs::read_to_string(path).map_err(|e| {
        McporterError::config_malformed(path.display().to_string(), e.to_string())
    })?;
    let mut root: Value = serde_json::from_str(&strip_jsonc_comments(&content)).map_err(|e| {
        McporterError::config_malformed(path.display().to_string(), e.to_string())
    })?;
    let removed = root
        .get_mut("mcpServers")
        .and_then(Value::as_object_mut)
        .and_then(|servers| servers.remove(name));
    if removed.is_none() {
        return Err(McporterError::UnknownServer(name.to_string()));
    }
    fs::write(path, serde_json::to_string_pretty(&root)?)?;
    Ok(())
}

#[cfg(test)]
mod config_test;
