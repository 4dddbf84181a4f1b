//! Integration tests for the keep-alive daemon (public API)

use mcporter::config::LoadOptions;
use mcporter::daemon::{DaemonClient, DaemonServer};
use mcporter::model::{CommandSpec, Lifecycle, ServerDefinition, SourceKind, SourceRef};
use mcporter::runtime::Runtime;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

const SERVER_SCRIPT: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping"}]}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;

fn keep_alive_def(name: &str) -> ServerDefinition {
    ServerDefinition {
        name: name.to_string(),
        description: None,
        command: CommandSpec::Stdio {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), SERVER_SCRIPT.to_string()],
            cwd: None,
            env: BTreeMap::new(),
        },
        auth: None,
        token_cache_dir: None,
        client_name: None,
        oauth_redirect_url: None,
        source: SourceRef {
            kind: SourceKind::Local,
            path: std::path::PathBuf::from("/tmp/mcporter.json"),
        },
        sources: vec![],
        lifecycle: Lifecycle { keep_alive: true },
    }
}

async fn start(socket_name: &str) -> (TempDir, DaemonClient, tokio::task::JoinHandle<mcporter::Result<()>>) {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join(socket_name);
    let server = DaemonServer::with_runtime(
        Arc::new(Runtime::new(vec![keep_alive_def("scripts")])),
        socket.clone(),
        dir.path().join("mcporter.json"),
    );
    let task = tokio::spawn(server.run());

    let client = DaemonClient::at_socket(socket, LoadOptions::default());
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while client.status().await.is_err() {
        assert!(std::time::Instant::now() < deadline, "daemon did not come up");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    (dir, client, task)
}

#[tokio::test]
async fn two_calls_reuse_the_warm_connection() {
    let (_dir, client, task) = start("reuse.sock").await;

    let first_started = std::time::Instant::now();
    let first = client
        .call("callTool", json!({"server": "scripts", "tool": "ping", "args": {}}))
        .await
        .unwrap();
    let first_elapsed = first_started.elapsed();
    assert_eq!(first["content"][0]["text"], "pong");

    let second_started = std::time::Instant::now();
    let second = client
        .call("callTool", json!({"server": "scripts", "tool": "ping", "args": {}}))
        .await
        .unwrap();
    let second_elapsed = second_started.elapsed();
    assert_eq!(second["content"][0]["text"], "pong");

    // The warm path skips process spawn and handshake entirely
    assert!(
        second_elapsed < first_elapsed || second_elapsed.as_millis() < 50,
        "second call ({second_elapsed:?}) should be cheaper than the first ({first_elapsed:?})"
    );

    let status = client.status().await.unwrap();
    assert_eq!(status.servers[0].name, "scripts");
    assert_eq!(status.servers[0].state, "connected");

    client.request("stop", json!({})).await.unwrap();
    let _ = task.await;
}

#[tokio::test]
async fn status_probe_never_perturbs_results() {
    let (_dir, client, task) = start("probe.sock").await;

    for _ in 0..3 {
        client.status().await.unwrap();
    }
    let result = client
        .call("callTool", json!({"server": "scripts", "tool": "ping", "args": {}}))
        .await
        .unwrap();
    for _ in 0..3 {
        client.status().await.unwrap();
    }
    let again = client
        .call("callTool", json!({"server": "scripts", "tool": "ping", "args": {}}))
        .await
        .unwrap();
    assert_eq!(result, again);

    client.request("stop", json!({})).await.unwrap();
    let _ = task.await;
}

#[tokio::test]
async fn request_level_errors_propagate_untouched() {
    let (_dir, client, task) = start("errors.sock").await;

    let err = client
        .call("callTool", json!({"server": "missing", "tool": "x", "args": {}}))
        .await
        .unwrap_err();
    match err {
        mcporter::McporterError::Daemon { code, .. } => assert_eq!(code, "UNKNOWN_SERVER"),
        other => panic!("expected daemon error, got {other:?}"),
    }

    client.request("stop", json!({})).await.unwrap();
    let _ = task.await;
}
