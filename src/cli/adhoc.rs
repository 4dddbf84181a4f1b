//! Adhoc server registration
//!
//! Turns `--http-url` / `--stdio` flags (or a bare URL on the command
//! line) into an ephemeral [`ServerDefinition`] registered in the pool
//! for this invocation only. `--persist` additionally appends the entry
//! to a config file.

use crate::config::{CommandField, RawEntry};
use crate::model::{
    CommandSpec, Lifecycle, ServerDefinition, SourceKind, SourceRef, is_valid_env_key,
};
use crate::{McporterError, Result, utils};
use std::collections::BTreeMap;
use std::path::PathBuf;
use url::Url;

/// Raw adhoc flags as they arrive from clap
#[derive(Debug, Clone, Default)]
pub struct AdhocFlags {
    pub http_url: Option<String>,
    pub allow_http: bool,
    pub stdio: Option<String>,
    pub stdio_args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub persist: Option<PathBuf>,
    pub yes: bool,
}

impl AdhocFlags {
    pub fn is_empty(&self) -> bool {
        self.http_url.is_none() && self.stdio.is_none()
    }
}

/// Build the ephemeral definition described by the flags.
pub fn definition_from_flags(flags: &AdhocFlags) -> Result<ServerDefinition> {
    let command = match (&flags.http_url, &flags.stdio) {
        (Some(_), Some(_)) => {
            return Err(McporterError::usage(
                "--http-url and --stdio are mutually exclusive",
            ));
        }
        (Some(raw), None) => {
            let url = parse_http_url(raw, flags.allow_http)?;
            CommandSpec::Http {
                url: url.to_string(),
                headers: BTreeMap::new(),
            }
        }
        (None, Some(stdio)) => {
            let mut words = utils::shell_split(stdio);
            if words.is_empty() {
                return Err(McporterError::usage("--stdio command is empty"));
            }
            let program = words.remove(0);
            words.extend(flags.stdio_args.iter().cloned());
            CommandSpec::Stdio {
                command: program,
                args: words,
                cwd: flags.cwd.clone(),
                env: parse_env_flags(&flags.env)?,
            }
        }
        (None, None) => {
            return Err(McporterError::usage(
                "adhoc registration needs --http-url or --stdio",
            ));
        }
    };

    let name = match &flags.name {
        Some(name) => name.trim().to_string(),
        None => match &command {
            CommandSpec::Http { url, .. } => derived_name(
                &Url::parse(url)
                    .map_err(|e| McporterError::usage(format!("invalid server URL '{url}': {e}")))?,
            ),
            CommandSpec::Stdio { command, .. } => derived_stdio_name(command),
        },
    };

    let source = SourceRef {
        kind: SourceKind::Local,
        path: PathBuf::from("<adhoc>"),
    };
    let def = ServerDefinition {
        name,
        description: flags.description.clone(),
        command,
        auth: None,
        token_cache_dir: None,
        client_name: None,
        oauth_redirect_url: None,
        source: source.clone(),
        sources: vec![source],
        lifecycle: Lifecycle::default(),
    };
    def.validate()?;
    Ok(def)
}

/// Ephemeral definition for a bare URL on the command line.
pub fn definition_from_bare_url(raw: &str, allow_http: bool) -> Result<ServerDefinition> {
    definition_from_flags(&AdhocFlags {
        http_url: Some(raw.to_string()),
        allow_http,
        ..AdhocFlags::default()
    })
}

fn parse_http_url(raw: &str, allow_http: bool) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| McporterError::usage(format!("invalid server URL '{raw}': {e}")))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_http => Ok(url),
        "http" => Err(McporterError::usage(
            "plain http URLs need --allow-http",
        )),
        other => Err(McporterError::usage(format!(
            "unsupported URL scheme '{other}'"
        ))),
    }
}

/// `https://mcp.example.com/mcp` → `mcp-example-com-mcp`
pub fn derived_name(url: &Url) -> String {
    let host = url.host_str().unwrap_or("server");
    let mut raw = host.to_string();
    let path = url.path().trim_matches('/');
    if !path.is_empty() {
        raw.push('-');
        raw.push_str(path);
    }
    sanitize(&raw)
}

fn derived_stdio_name(command: &str) -> String {
    let base = std::path::Path::new(command)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(command);
    sanitize(base)
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

fn parse_env_flags(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(McporterError::usage(format!(
                "--env expects K=V, got '{pair}'"
            )));
        };
        if !is_valid_env_key(key) {
            return Err(McporterError::usage(format!("invalid env key '{key}'")));
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

/// The raw entry `--persist` appends to a config file.
pub fn to_raw_entry(def: &ServerDefinition) -> RawEntry {
    match &def.command {
        CommandSpec::Http { url, headers } => RawEntry {
            description: def.description.clone(),
            url: Some(url.clone()),
            headers: headers.clone(),
            ..RawEntry::default()
        },
        CommandSpec::Stdio {
            command,
            args,
            cwd,
            env,
        } => RawEntry {
            description: def.description.clone(),
            command: Some(CommandField::Argv(
                std::iter::once(command.clone())
                    .chain(args.iter().cloned())
                    .collect(),
            )),
            cwd: cwd.clone(),
            env: env.clone(),
            ..RawEntry::default()
        },
    }
}

#[cfg(test)]
mod adhoc_test {
    include!("adhoc_test.rs");
}
