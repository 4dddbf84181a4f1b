//! Keep-alive daemon
//!
//! One detached daemon per config-file identity hosts long-lived pool
//! connections behind a Unix-domain socket. The wire protocol is one
//! JSON request and one JSON response per connection; the server closes
//! the socket after responding.

use crate::config::LoadOptions;
use crate::{constants, utils};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod client;
pub mod server;

pub use client::DaemonClient;
pub use server::DaemonServer;

/// Sidecar metadata written next to the socket on start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonMetadata {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub config_path: PathBuf,
}

/// The config file that identifies a daemon: the explicit config when
/// set, otherwise the primary home config candidate.
pub fn identity_path(opts: &LoadOptions) -> PathBuf {
    let path = opts
        .config_path
        .clone()
        .or_else(|| {
            std::env::var(constants::ENV_CONFIG)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| {
            constants::home_config_candidates()
                .into_iter()
                .next()
                .unwrap_or_else(|| PathBuf::from("mcporter.json"))
        });
    std::fs::canonicalize(&path).unwrap_or(path)
}

/// `<runtime-dir>/mcporter/<hash12(absConfigPath)>.sock`
pub fn socket_path(config_path: &Path) -> PathBuf {
    let hash = utils::hash12(&config_path.to_string_lossy());
    constants::runtime_dir().join(format!("{hash}.sock"))
}

/// Metadata sits at the same prefix with a `.json` suffix
pub fn metadata_path(socket: &Path) -> PathBuf {
    socket.with_extension("json")
}

#[cfg(test)]
mod daemon_test {
    include!("daemon_test.rs");
}
