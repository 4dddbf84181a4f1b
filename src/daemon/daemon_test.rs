use super::*;
use crate::McporterError;
use crate::model::{CommandSpec, Lifecycle, ServerDefinition, SourceKind, SourceRef};
use crate::runtime::Runtime;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

const ECHO_SERVER: &str = r#"
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

fn scripts_def() -> ServerDefinition {
    ServerDefinition {
        name: "scripts".to_string(),
        description: None,
        command: CommandSpec::Stdio {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), ECHO_SERVER.to_string()],
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

struct Fixture {
    _dir: TempDir,
    client: DaemonClient,
    server_task: tokio::task::JoinHandle<crate::Result<()>>,
}

async fn start_daemon() -> Fixture {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("test.sock");
    let config = dir.path().join("mcporter.json");
    let server = DaemonServer::with_runtime(
        Arc::new(Runtime::new(vec![scripts_def()])),
        socket.clone(),
        config,
    );
    let server_task = tokio::spawn(server.run());

    let client = DaemonClient::at_socket(socket.clone(), crate::config::LoadOptions::default());
    // Wait for the listener to come up
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if client.status().await.is_ok() {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "daemon did not start");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    Fixture {
        _dir: dir,
        client,
        server_task,
    }
}

#[tokio::test]
async fn status_is_idempotent_and_reports_servers() {
    let fx = start_daemon().await;

    let first = fx.client.status().await.unwrap();
    assert_eq!(first.pid, std::process::id());
    assert_eq!(first.servers.len(), 1);
    assert_eq!(first.servers[0].name, "scripts");

    // Any number of status calls is safe and side-effect free
    for _ in 0..5 {
        let again = fx.client.status().await.unwrap();
        assert_eq!(again.servers.len(), 1);
    }

    fx.client.request("stop", json!({})).await.unwrap();
    let _ = fx.server_task.await;
}

#[tokio::test]
async fn call_tool_round_trips_through_the_socket() {
    let fx = start_daemon().await;

    let result = fx
        .client
        .request(
            "callTool",
            json!({"server": "scripts", "tool": "ping", "args": {}}),
        )
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "pong");

    // Status now reports the warm connection
    let status = fx.client.status().await.unwrap();
    let scripts = status.servers.iter().find(|s| s.name == "scripts").unwrap();
    assert_eq!(scripts.state, "connected");
    assert!(scripts.last_used_at.is_some());

    fx.client.request("stop", json!({})).await.unwrap();
    let _ = fx.server_task.await;
}

#[tokio::test]
async fn list_tools_and_close_server() {
    let fx = start_daemon().await;

    let tools = fx
        .client
        .request("listTools", json!({"server": "scripts", "options": {}}))
        .await
        .unwrap();
    assert_eq!(tools["tools"][0]["name"], "ping");

    let closed = fx
        .client
        .request("closeServer", json!({"server": "scripts"}))
        .await
        .unwrap();
    assert_eq!(closed["closed"], "scripts");

    fx.client.request("stop", json!({})).await.unwrap();
    let _ = fx.server_task.await;
}

#[tokio::test]
async fn unknown_server_and_method_yield_coded_errors() {
    let fx = start_daemon().await;

    let err = fx
        .client
        .request("callTool", json!({"server": "ghost", "tool": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        McporterError::Daemon { code, .. } if code == "UNKNOWN_SERVER"
    ));

    let err = fx.client.request("transmogrify", json!({})).await.unwrap_err();
    assert!(matches!(
        &err,
        McporterError::Daemon { code, .. } if code == "UNKNOWN_METHOD"
    ));

    fx.client.request("stop", json!({})).await.unwrap();
    let _ = fx.server_task.await;
}

#[tokio::test]
async fn stop_shuts_the_daemon_down() {
    let fx = start_daemon().await;
    let result = fx.client.request("stop", json!({})).await.unwrap();
    assert_eq!(result["stopping"], true);

    // The server task finishes and the socket stops answering
    let finished = tokio::time::timeout(std::time::Duration::from_secs(5), fx.server_task)
        .await
        .expect("daemon exited")
        .unwrap();
    assert!(finished.is_ok());
    assert!(fx.client.status().await.is_err());
}

#[tokio::test]
async fn daemon_reuse_keeps_one_process_side_connection() {
    // Two successive calls share the daemon's cached connection: the
    // status output keeps one server entry and its last_used_at advances.
    let fx = start_daemon().await;

    fx.client
        .request("callTool", json!({"server": "scripts", "tool": "ping", "args": {}}))
        .await
        .unwrap();
    let first = fx.client.status().await.unwrap();
    let first_used = first.servers[0].last_used_at.unwrap();

    fx.client
        .request("callTool", json!({"server": "scripts", "tool": "ping", "args": {}}))
        .await
        .unwrap();
    let second = fx.client.status().await.unwrap();
    let second_used = second.servers[0].last_used_at.unwrap();

    assert_eq!(second.servers.len(), 1);
    assert!(second_used >= first_used);

    fx.client.request("stop", json!({})).await.unwrap();
    let _ = fx.server_task.await;
}

#[test]
fn socket_path_is_stable_per_config_identity() {
    let a = socket_path(std::path::Path::new("/home/u/.mcporter/mcporter.json"));
    let b = socket_path(std::path::Path::new("/home/u/.mcporter/mcporter.json"));
    let c = socket_path(std::path::Path::new("/elsewhere/mcporter.json"));
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.extension().is_some_and(|e| e == "sock"));
    assert_eq!(metadata_path(&a).extension().unwrap(), "json");
}

#[tokio::test]
async fn metadata_file_is_written_and_removed() {
    let fx = start_daemon().await;
    let metadata = fx.client.read_metadata().expect("metadata written");
    assert_eq!(metadata.pid, std::process::id());

    fx.client.request("stop", json!({})).await.unwrap();
    let _ = fx.server_task.await;
    assert!(fx.client.read_metadata().is_none());
}
