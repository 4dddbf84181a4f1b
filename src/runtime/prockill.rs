//! Process-tree termination for STDIO servers
//!
//! After a graceful close, surviving children are escalated: enumerate
//! the process tree, SIGTERM, wait, SIGKILL, wait, log anything still
//! alive. On Windows only the direct child is killed.

use std::time::Duration;
use tokio::process::Child;

/// Close escalation: grace wait, then tree SIGTERM, then SIGKILL.
pub async fn terminate(mut child: Child, root_pid: u32) {
    // Grace period after stdin EOF
    if wait_for_exit(&mut child, crate::constants::CHILD_GRACE_MS).await {
        return;
    }

    let tree = process_tree(root_pid);
    tracing::debug!("Escalating teardown of pid {} ({} in tree)", root_pid, tree.len());

    signal_tree(&tree, Signal::Term);
    if wait_for_exit(&mut child, crate::constants::CHILD_TERM_WAIT_MS).await {
        reap_stragglers(&tree, root_pid);
        return;
    }

    signal_tree(&tree, Signal::Kill);
    let _ = child.start_kill();
    if !wait_for_exit(&mut child, crate::constants::CHILD_KILL_WAIT_MS).await {
        tracing::warn!("Process {} survived SIGKILL escalation", root_pid);
    }
    reap_stragglers(&tree, root_pid);
}

/// True once the child has exited within `ms`.
async fn wait_for_exit(child: &mut Child, ms: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(ms), child.wait())
        .await
        .is_ok()
}

fn reap_stragglers(tree: &[u32], root_pid: u32) {
    for pid in tree {
        if *pid != root_pid && is_alive(*pid) {
            tracing::warn!("Descendant process {} survived teardown", pid);
        }
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_tree(tree: &[u32], signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // Children first so the parent cannot respawn into a dead group
    for pid in tree.iter().rev() {
        unsafe {
            libc::kill(*pid as libc::pid_t, sig);
        }
    }
}

#[cfg(not(unix))]
fn signal_tree(_tree: &[u32], _signal: Signal) {}

/// The root pid plus every live descendant, parents before children.
#[cfg(target_os = "linux")]
pub fn process_tree(root_pid: u32) -> Vec<u32> {
    let mut children: std::collections::HashMap<u32, Vec<u32>> = std::collections::HashMap::new();
    if let Ok(entries) = std::fs::read_dir("/proc") {
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            if let Some(ppid) = parent_of(pid) {
                children.entry(ppid).or_default().push(pid);
            }
        }
    }
    let mut tree = Vec::new();
    let mut queue = std::collections::VecDeque::from([root_pid]);
    while let Some(pid) = queue.pop_front() {
        tree.push(pid);
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }
    tree
}

#[cfg(target_os = "linux")]
fn parent_of(pid: u32) -> Option<u32> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("PPid:"))
        .and_then(|v| v.trim().parse().ok())
}

/// Parent-only fallback where /proc is unavailable.
#[cfg(not(target_os = "linux"))]
pub fn process_tree(root_pid: u32) -> Vec<u32> {
    vec![root_pid]
}

#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn terminate_kills_a_sleeping_child() {
        let child = Command::new("sleep")
            .arg("300")
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        assert!(is_alive(pid));
        terminate(child, pid).await;
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn terminate_kills_descendants() {
        // sh spawns a grandchild sleep; the tree walk must reach it
        let child = Command::new("sh")
            .args(["-c", "sleep 300 & wait"])
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        // Let the shell fork its child
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let tree = process_tree(pid);
        terminate(child, pid).await;
        // Give init a moment to reap reparented descendants
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(!is_alive(pid));
        for descendant in tree.iter().filter(|p| **p != pid) {
            let zombie_or_gone = !is_alive(*descendant)
                || std::fs::read_to_string(format!("/proc/{descendant}/status"))
                    .map(|s| s.contains("zombie"))
                    .unwrap_or(true);
            assert!(zombie_or_gone, "pid {descendant} survived");
        }
    }

    #[test]
    fn tree_contains_root() {
        let tree = process_tree(std::process::id());
        assert!(tree.contains(&std::process::id()));
    }
}
