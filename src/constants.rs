//! Constants used throughout mcporter
//!
//! This module contains all constant values used in the mcporter runtime,
//! including configuration paths, environment variable names, and the
//! literal timeout defaults.

use once_cell::sync::Lazy;
use std::path::PathBuf;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Get the home directory with fallback to current directory
pub fn home_dir() -> PathBuf {
    static HOME_DIR: Lazy<PathBuf> =
        Lazy::new(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    HOME_DIR.clone()
}

/// Default mcporter directory (~/.mcporter), overridable via
/// `MCPORTER_HOME`. Read per call so the override works under test.
pub fn mcporter_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_HOME)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    home_dir().join(".mcporter")
}

/// Consolidated credential vault (~/.mcporter/.credentials.json)
pub fn vault_path() -> PathBuf {
    mcporter_dir().join(CREDENTIALS_FILE_NAME)
}

/// Home config candidates, in probe order (~/.mcporter/mcporter.json[c])
pub fn home_config_candidates() -> Vec<PathBuf> {
    vec![
        mcporter_dir().join("mcporter.json"),
        mcporter_dir().join("mcporter.jsonc"),
    ]
}

/// Runtime directory for daemon sockets ($XDG_RUNTIME_DIR or a tmp fallback)
pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DAEMON_DIR)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
        .join("mcporter")
}

/// Config file path inside a project root (config/mcporter.json)
pub const PROJECT_CONFIG_RELATIVE: &str = "config/mcporter.json";

/// Consolidated vault file name
pub const CREDENTIALS_FILE_NAME: &str = ".credentials.json";

/// Per-server schema cache file name
pub const SCHEMA_CACHE_FILE_NAME: &str = "schema.json";

/// Legacy per-server token file names
pub const TOKENS_FILE_NAME: &str = "tokens.json";
pub const CLIENT_INFO_FILE_NAME: &str = "client.json";
pub const CODE_VERIFIER_FILE_NAME: &str = "code_verifier.txt";
pub const STATE_FILE_NAME: &str = "state.txt";

/// Sidecar metadata suffix for generated artifacts
pub const ARTIFACT_METADATA_SUFFIX: &str = ".mcporter.json";

/// Vault schema version
pub const VAULT_VERSION: u32 = 1;

// ============================================================================
// ENVIRONMENT VARIABLES
// ============================================================================

/// Environment variable: explicit config path
pub const ENV_CONFIG: &str = "MCPORTER_CONFIG";

/// Environment variable: state directory override (default ~/.mcporter)
pub const ENV_HOME: &str = "MCPORTER_HOME";

/// Environment variable: per-server list timeout (ms)
pub const ENV_LIST_TIMEOUT: &str = "MCPORTER_LIST_TIMEOUT";

/// Environment variable: tool call timeout (ms)
pub const ENV_CALL_TIMEOUT: &str = "MCPORTER_CALL_TIMEOUT";

/// Environment variable: OAuth code wait timeout (ms)
pub const ENV_OAUTH_TIMEOUT: &str = "MCPORTER_OAUTH_TIMEOUT_MS";

/// Environment variable: daemon request timeout (ms)
pub const ENV_DAEMON_TIMEOUT: &str = "MCPORTER_DAEMON_TIMEOUT_MS";

/// Environment variable: daemon socket directory override
pub const ENV_DAEMON_DIR: &str = "MCPORTER_DAEMON_DIR";

/// Environment variable: log level
pub const ENV_LOG_LEVEL: &str = "MCPORTER_LOG_LEVEL";

/// Environment variable: opt out of the post-cleanup force exit
pub const ENV_NO_FORCE_EXIT: &str = "MCPORTER_NO_FORCE_EXIT";

/// Environment variable: disable daemon autostart
pub const ENV_DISABLE_AUTORUN: &str = "MCPORTER_DISABLE_AUTORUN";

// ============================================================================
// TIMEOUTS
// ============================================================================

/// Per-server tools/list timeout (ms)
pub const DEFAULT_LIST_TIMEOUT_MS: u64 = 30_000;

/// tools/call timeout (ms)
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 60_000;

/// OAuth authorization-code wait (ms)
pub const DEFAULT_OAUTH_TIMEOUT_MS: u64 = 60_000;

/// Daemon request timeout (ms)
pub const DEFAULT_DAEMON_TIMEOUT_MS: u64 = 30_000;

/// Daemon startup poll window and interval (ms)
pub const DAEMON_SPAWN_WAIT_MS: u64 = 10_000;
pub const DAEMON_SPAWN_POLL_MS: u64 = 100;

/// Daemon idle shutdown window (15 min) and sweep interval
pub const DAEMON_IDLE_TIMEOUT_MS: u64 = 15 * 60 * 1000;
pub const DAEMON_IDLE_SWEEP_MS: u64 = 60_000;

/// STDIO teardown escalation windows (ms)
pub const CHILD_GRACE_MS: u64 = 500;
pub const CHILD_TERM_WAIT_MS: u64 = 700;
pub const CHILD_KILL_WAIT_MS: u64 = 500;

// ============================================================================
// OAUTH
// ============================================================================

/// Scope requested during dynamic client registration
pub const OAUTH_SCOPE: &str = "mcp:tools";

/// Default loopback callback path
pub const OAUTH_CALLBACK_PATH: &str = "/callback";

/// Maximum OAuth attempts per connect
pub const DEFAULT_MAX_OAUTH_ATTEMPTS: u32 = 3;

// ============================================================================
// MCP
// ============================================================================

/// Protocol version advertised during initialize
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Client name advertised during initialize
pub const MCP_CLIENT_NAME: &str = "mcporter";
