//! Utility functions and helpers
//!
//! Shared helpers: environment placeholder expansion, shell-style command
//! splitting, the uniform timeout wrapper, and small string routines used
//! by the loader and the tool auto-corrector.

use crate::{McporterError, Result};
use std::future::Future;
use std::time::Duration;

// ============================================================================
// ENVIRONMENT PLACEHOLDERS
// ============================================================================

/// Expand `${NAME}` and `$env:NAME` placeholders against the process
/// environment. Single pass, non-recursive; missing variables expand to
/// the empty string.
pub fn expand_env_value(value: &str) -> String {
    expand_with(value, |name| std::env::var(name).ok())
}

/// Expand placeholders, failing on the first missing variable.
///
/// Used for header values, where an unresolved placeholder aborts
/// transport construction.
pub fn expand_env_value_checked(value: &str) -> Result<String> {
    let mut missing: Option<String> = None;
    let expanded = expand_with(value, |name| match std::env::var(name) {
        Ok(v) => Some(v),
        Err(_) => {
            if missing.is_none() {
                missing = Some(name.to_string());
            }
            None
        }
    });
    match missing {
        Some(name) => Err(McporterError::EnvUnresolved(name)),
        None => Ok(expanded),
    }
}

fn expand_with(value: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> String {
    // $env:NAME consumes the whole remaining identifier; ${NAME} is delimited.
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            if value[i..].starts_with("${") {
                if let Some(end) = value[i + 2..].find('}') {
                    let name = &value[i + 2..i + 2 + end];
                    if is_ident(name) {
                        out.push_str(&lookup(name).unwrap_or_default());
                        i += 2 + end + 1;
                        continue;
                    }
                }
            } else if value[i..].starts_with("$env:") {
                let rest = &value[i + 5..];
                let len = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(rest.len());
                if len > 0 {
                    out.push_str(&lookup(&rest[..len]).unwrap_or_default());
                    i += 5 + len;
                    continue;
                }
            }
        }
        match value[i..].chars().next() {
            Some(ch) => {
                out.push(ch);
                i += ch.len_utf8();
            }
            None => break,
        }
    }
    out
}

fn is_ident(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// SHELL SPLITTING
// ============================================================================

/// Split a command string into words, honoring single quotes, double
/// quotes, and backslash escapes. Used when a config entry gives
/// `command` as a single string.
pub fn shell_split(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                        }
                        _ => current.push(q),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

// ============================================================================
// TIMEOUTS
// ============================================================================

/// Run `fut` against a deadline, mapping exhaustion to `Timeout(ms)`.
///
/// Every external call in the runtime goes through this wrapper; the
/// pool closes the affected connection when it fires.
pub async fn with_timeout<T, F>(ms: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(McporterError::Timeout(ms)),
    }
}

/// Read a millisecond override from the environment, falling back to a
/// literal default.
pub fn env_ms(var: &str, default_ms: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_ms)
}

// ============================================================================
// STRINGS
// ============================================================================

/// Twelve hex chars of a stable 64-bit FNV-1a hash; names daemon sockets
/// per absolute config path.
pub fn hash12(input: &str) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{hash:016x}")[..12].to_string()
}

/// Lowercase and strip non-alphanumerics; the normal form used by the
/// tool-name auto-corrector.
pub fn normalize_tool_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Levenshtein distance over chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(prev[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}
