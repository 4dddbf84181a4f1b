//! Browser launching for the interactive OAuth flow
//!
//! Platform branching is peripheral, so it sits behind a capability trait
//! with an in-memory double for tests. Launch failures are never fatal:
//! the URL is logged for manual navigation.

use crate::Result;

pub trait BrowserOpener: Send + Sync {
    /// Best-effort open; implementations must not block on the browser.
    fn open(&self, url: &str) -> Result<()>;
}

/// Spawns the platform opener (`open` / `start` / `xdg-open`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowserOpener;

impl BrowserOpener for SystemBrowserOpener {
    fn open(&self, url: &str) -> Result<()> {
        let mut command = platform_command(url);
        match command.spawn() {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("Could not launch a browser ({}); open this URL manually: {}", e, url);
                Ok(())
            }
        }
    }
}

#[cfg(target_os = "macos")]
fn platform_command(url: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("open");
    cmd.arg(url);
    cmd
}

#[cfg(target_os = "windows")]
fn platform_command(url: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd");
    cmd.args(["/C", "start", "", url]);
    cmd
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_command(url: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("xdg-open");
    cmd.arg(url);
    cmd
}

/// Test double that records every URL instead of spawning anything.
#[derive(Debug, Default)]
pub struct RecordingBrowserOpener {
    pub opened: parking_lot::Mutex<Vec<String>>,
}

impl BrowserOpener for RecordingBrowserOpener {
    fn open(&self, url: &str) -> Result<()> {
        self.opened.lock().push(url.to_string());
        Ok(())
    }
}
