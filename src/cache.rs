//! Schema snapshot persistence
//!
//! Tool schemas are cached per server under `<tokenCacheDir>/schema.json`
//! (the default per-server directory when no explicit cache dir is set)
//! so generated CLIs can start without an introspection round-trip. The
//! cache is a performance hint: corrupt or missing files read as absent.

use crate::model::{SchemaSnapshot, ServerDefinition};
use crate::{Result, constants};
use std::fs;
use std::path::PathBuf;

/// Where this definition's snapshot lives
pub fn snapshot_path(def: &ServerDefinition) -> PathBuf {
    let dir = def
        .effective_token_cache_dir()
        .unwrap_or_else(|| ServerDefinition::default_token_cache_dir(&def.name));
    dir.join(constants::SCHEMA_CACHE_FILE_NAME)
}

pub fn read(def: &ServerDefinition) -> Option<SchemaSnapshot> {
    let content = fs::read_to_string(snapshot_path(def)).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn write(def: &ServerDefinition, snapshot: &SchemaSnapshot) -> Result<()> {
    let path = snapshot_path(def);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(snapshot)?)?;
    Ok(())
}
