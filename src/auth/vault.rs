//! Durable OAuth credential store
//!
//! Credentials live in up to three locations, read in this precedence and
//! written to every applicable one on save:
//!
//! 1. the definition's explicit `tokenCacheDir`,
//! 2. the consolidated vault at `~/.mcporter/.credentials.json` keyed by
//!    server key,
//! 3. the legacy per-server directory `~/.mcporter/<name>/`.
//!
//! Legacy directories found holding tokens are migrated into the vault on
//! first use. Reads of corrupt or empty files return absent, never fail.

use crate::model::ServerDefinition;
use crate::{Result, constants};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// OAuth token set, persisted in wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthTokens {
    /// Expired (with a one-minute buffer) and therefore due for refresh
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() + chrono::Duration::minutes(1) >= at,
            None => false,
        }
    }
}

/// Dynamic client registration result, persisted in wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthClientInfo {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,
}

/// One server's slot in the consolidated vault file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultEntry {
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<OAuthTokens>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<OAuthClientInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VaultFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, VaultEntry>,
}

/// What `clear` removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ClearScope {
    Tokens,
    Client,
    Verifier,
    All,
}

/// Credential store for one server.
///
/// Cheap to construct; every operation re-reads disk so concurrent CLI
/// invocations observe each other's saves.
#[derive(Debug, Clone)]
pub struct OAuthVault {
    server_name: String,
    server_key: String,
    /// Explicit cache dir when it differs from the legacy dir
    cache_dir: Option<PathBuf>,
    legacy_dir: PathBuf,
    vault_path: PathBuf,
}

impl OAuthVault {
    pub fn for_definition(def: &ServerDefinition) -> Self {
        let legacy_dir = constants::mcporter_dir().join(&def.name);
        let cache_dir = def
            .effective_token_cache_dir()
            .filter(|dir| *dir != legacy_dir);
        OAuthVault {
            server_name: def.name.clone(),
            server_key: def.server_key(),
            cache_dir,
            legacy_dir,
            vault_path: constants::vault_path(),
        }
    }

    #[cfg(test)]
    pub fn with_paths(
        server_name: &str,
        server_key: &str,
        cache_dir: Option<PathBuf>,
        legacy_dir: PathBuf,
        vault_path: PathBuf,
    ) -> Self {
        OAuthVault {
            server_name: server_name.to_string(),
            server_key: server_key.to_string(),
            cache_dir,
            legacy_dir,
            vault_path,
        }
    }

    pub fn server_key(&self) -> &str {
        &self.server_key
    }

    /// Every directory this vault touches (explicit cache dir first)
    pub fn locations(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = &self.cache_dir {
            dirs.push(dir.clone());
        }
        dirs.push(self.legacy_dir.clone());
        dirs
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    pub fn read_tokens(&self) -> Option<OAuthTokens> {
        if let Some(dir) = &self.cache_dir
            && let Some(tokens) = read_json(&dir.join(constants::TOKENS_FILE_NAME))
        {
            return Some(tokens);
        }
        if let Some(tokens) = self.vault_entry().and_then(|e| e.tokens) {
            return Some(tokens);
        }
        let legacy: Option<OAuthTokens> =
            read_json(&self.legacy_dir.join(constants::TOKENS_FILE_NAME));
        if let Some(tokens) = legacy {
            self.migrate_legacy(&tokens);
            return Some(tokens);
        }
        None
    }

    pub fn save_tokens(&self, tokens: &OAuthTokens) -> Result<()> {
        for dir in self.locations() {
            write_json_atomic(&dir.join(constants::TOKENS_FILE_NAME), tokens)?;
        }
        self.update_vault(|entry| entry.tokens = Some(tokens.clone()))
    }

    // ------------------------------------------------------------------
    // Client registration
    // ------------------------------------------------------------------

    pub fn read_client_info(&self) -> Option<OAuthClientInfo> {
        if let Some(dir) = &self.cache_dir
            && let Some(info) = read_json(&dir.join(constants::CLIENT_INFO_FILE_NAME))
        {
            return Some(info);
        }
        if let Some(info) = self.vault_entry().and_then(|e| e.client_info) {
            return Some(info);
        }
        read_json(&self.legacy_dir.join(constants::CLIENT_INFO_FILE_NAME))
    }

    pub fn save_client_info(&self, info: &OAuthClientInfo) -> Result<()> {
        for dir in self.locations() {
            write_json_atomic(&dir.join(constants::CLIENT_INFO_FILE_NAME), info)?;
        }
        self.update_vault(|entry| entry.client_info = Some(info.clone()))
    }

    // ------------------------------------------------------------------
    // PKCE verifier and state
    // ------------------------------------------------------------------

    pub fn read_code_verifier(&self) -> Option<String> {
        self.read_text(constants::CODE_VERIFIER_FILE_NAME)
            .or_else(|| self.vault_entry().and_then(|e| e.code_verifier))
    }

    pub fn save_code_verifier(&self, verifier: &str) -> Result<()> {
        for dir in self.locations() {
            write_text_atomic(&dir.join(constants::CODE_VERIFIER_FILE_NAME), verifier)?;
        }
        self.update_vault(|entry| entry.code_verifier = Some(verifier.to_string()))
    }

    pub fn read_state(&self) -> Option<String> {
        self.read_text(constants::STATE_FILE_NAME)
            .or_else(|| self.vault_entry().and_then(|e| e.state))
    }

    pub fn save_state(&self, state: &str) -> Result<()> {
        for dir in self.locations() {
            write_text_atomic(&dir.join(constants::STATE_FILE_NAME), state)?;
        }
        self.update_vault(|entry| entry.state = Some(state.to_string()))
    }

    // ------------------------------------------------------------------
    // Clearing
    // ------------------------------------------------------------------

    /// Remove the scoped credential material in every location.
    pub fn clear(&self, scope: ClearScope) -> Result<()> {
        let files: &[&str] = match scope {
            ClearScope::Tokens => &[constants::TOKENS_FILE_NAME],
            ClearScope::Client => &[constants::CLIENT_INFO_FILE_NAME],
            ClearScope::Verifier => {
                &[constants::CODE_VERIFIER_FILE_NAME, constants::STATE_FILE_NAME]
            }
            ClearScope::All => &[
                constants::TOKENS_FILE_NAME,
                constants::CLIENT_INFO_FILE_NAME,
                constants::CODE_VERIFIER_FILE_NAME,
                constants::STATE_FILE_NAME,
            ],
        };
        for dir in self.locations() {
            for file in files {
                let path = dir.join(file);
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
        }
        self.update_vault(|entry| match scope {
            ClearScope::Tokens => entry.tokens = None,
            ClearScope::Client => entry.client_info = None,
            ClearScope::Verifier => {
                entry.code_verifier = None;
                entry.state = None;
            }
            ClearScope::All => *entry = VaultEntry::default(),
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn read_text(&self, file: &str) -> Option<String> {
        if let Some(dir) = &self.cache_dir
            && let Some(text) = read_trimmed(&dir.join(file))
        {
            return Some(text);
        }
        read_trimmed(&self.legacy_dir.join(file))
    }

    fn vault_entry(&self) -> Option<VaultEntry> {
        let file: VaultFile = read_json(&self.vault_path)?;
        file.entries.get(&self.server_key).cloned()
    }

    fn update_vault(&self, apply: impl FnOnce(&mut VaultEntry)) -> Result<()> {
        let mut file: VaultFile = read_json(&self.vault_path).unwrap_or_default();
        file.version = constants::VAULT_VERSION;
        let entry = file.entries.entry(self.server_key.clone()).or_default();
        entry.server_name = self.server_name.clone();
        entry.updated_at = Some(Utc::now());
        apply(entry);
        write_json_atomic(&self.vault_path, &file)
    }

    /// Copy a legacy token directory into the vault the first time it is
    /// seen without a vault entry.
    fn migrate_legacy(&self, tokens: &OAuthTokens) {
        let client_info: Option<OAuthClientInfo> =
            read_json(&self.legacy_dir.join(constants::CLIENT_INFO_FILE_NAME));
        let verifier = read_trimmed(&self.legacy_dir.join(constants::CODE_VERIFIER_FILE_NAME));
        let state = read_trimmed(&self.legacy_dir.join(constants::STATE_FILE_NAME));
        let result = self.update_vault(|entry| {
            entry.tokens = Some(tokens.clone());
            if entry.client_info.is_none() {
                entry.client_info = client_info;
            }
            if entry.code_verifier.is_none() {
                entry.code_verifier = verifier;
            }
            if entry.state.is_none() {
                entry.state = state;
            }
        });
        match result {
            Ok(()) => tracing::info!(
                "Migrated legacy credentials for '{}' into the vault",
                self.server_name
            ),
            Err(e) => tracing::warn!(
                "Failed to migrate legacy credentials for '{}': {}",
                self.server_name,
                e
            ),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&content).ok()
}

fn read_trimmed(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Write-temp-then-rename so a concurrent reader never sees a torn file.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_bytes_atomic(path, serde_json::to_string_pretty(value)?.as_bytes())
}

fn write_text_atomic(path: &Path, value: &str) -> Result<()> {
    write_bytes_atomic(path, value.as_bytes())
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.persist(path)
        .map_err(|e| crate::McporterError::Io(e.error))?;
    Ok(())
}
