//! Integration tests for the pool against a scripted stdio server
//!
//! The "server" is a small shell loop speaking line-delimited JSON-RPC,
//! which keeps these tests hermetic while exercising the real transport,
//! handshake, auto-correction, and teardown paths.

use mcporter::model::{CommandSpec, Lifecycle, ServerDefinition, SourceKind, SourceRef};
use mcporter::runtime::{ConnectOptions, ListToolsOptions, Runtime};
use mcporter::{McporterError, ToolCallResult};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

const SERVER_SCRIPT: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","serverInfo":{"name":"scripted"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping","description":"Reply with pong","inputSchema":{"type":"object","properties":{"message":{"type":"string"}}}}]}}\n' "$id" ;;
    *'"method":"resources/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"resources":[{"uri":"file:///tmp/demo.txt","name":"demo"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      name=$(printf '%s' "$line" | sed -n 's/.*"name":"\([^"]*\)".*/\1/p')
      if [ "$name" = "ping" ]; then
        printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id"
      else
        printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"Tool %s not found"}}\n' "$id" "$name"
      fi ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;

fn scripted_def(name: &str) -> ServerDefinition {
    ServerDefinition {
        name: name.to_string(),
        description: Some("scripted test server".to_string()),
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
            path: PathBuf::from("/tmp/mcporter.json"),
        },
        sources: vec![],
        lifecycle: Lifecycle::default(),
    }
}

#[tokio::test]
async fn list_call_and_resources_round_trip() {
    let runtime = Runtime::new(vec![scripted_def("scripted")]);

    let tools = runtime
        .list_tools("scripted", ListToolsOptions::default())
        .await
        .unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "ping");
    assert_eq!(tools[0].description.as_deref(), Some("Reply with pong"));

    let result: ToolCallResult = runtime
        .call_tool("scripted", "ping", json!({"message": "hi"}))
        .await
        .unwrap();
    assert_eq!(result.text(), "pong");
    assert!(!result.is_error());

    let resources = runtime.list_resources("scripted").await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0]["uri"], "file:///tmp/demo.txt");

    runtime.close(None).await;
}

#[tokio::test]
async fn misspelled_call_is_corrected_against_the_live_tool_list() {
    let runtime = Runtime::new(vec![scripted_def("scripted")]);
    let result = runtime
        .call_tool("scripted", "Ping", json!({}))
        .await
        .unwrap();
    assert_eq!(result.text(), "pong");
    runtime.close(None).await;
}

#[tokio::test]
async fn concurrent_calls_to_one_server_serialize_safely() {
    let runtime = std::sync::Arc::new(Runtime::new(vec![scripted_def("scripted")]));
    // Prime the connection so the tasks share one context
    runtime
        .connect("scripted", ConnectOptions::default())
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                runtime
                    .call_tool("scripted", "ping", json!({}))
                    .await
                    .map(|r| r.text())
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "pong");
    }
    runtime.close(None).await;
}

#[tokio::test]
async fn parallel_servers_list_independently() {
    let runtime = std::sync::Arc::new(Runtime::new(vec![
        scripted_def("one"),
        scripted_def("two"),
        scripted_def("three"),
    ]));

    let lists = futures::future::join_all(["one", "two", "three"].into_iter().map(|name| {
        let runtime = runtime.clone();
        async move { runtime.list_tools(name, ListToolsOptions::default()).await }
    }))
    .await;
    for list in lists {
        assert_eq!(list.unwrap().len(), 1);
    }
    runtime.close(None).await;
}

#[tokio::test]
async fn unknown_server_errors_cleanly() {
    let runtime = Runtime::new(vec![]);
    let err = runtime.call_tool("nope", "ping", json!({})).await.unwrap_err();
    assert!(matches!(err, McporterError::UnknownServer(_)));
    assert_eq!(err.exit_code(), 1);
}
