use super::*;
use crate::auth::browser::BrowserOpener;
use crate::model::{Lifecycle, SourceKind, SourceRef};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Point ~/.mcporter at a per-process temp dir so vault writes stay
/// isolated. Shared by every test in this module.
fn isolate_home() {
    static HOME: once_cell::sync::Lazy<tempfile::TempDir> = once_cell::sync::Lazy::new(|| {
        let dir = tempfile::TempDir::new().expect("temp home");
        // SAFETY: test-only env mutation before any vault access
        unsafe { std::env::set_var(crate::constants::ENV_HOME, dir.path()) };
        dir
    });
    let _ = &*HOME;
}

fn http_def(name: &str, url: &str) -> ServerDefinition {
    ServerDefinition {
        name: name.to_string(),
        description: None,
        command: CommandSpec::Http {
            url: url.to_string(),
            headers: BTreeMap::new(),
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

fn stdio_def(name: &str, script: &str) -> ServerDefinition {
    ServerDefinition {
        command: CommandSpec::Stdio {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: None,
            env: BTreeMap::new(),
        },
        ..http_def(name, "https://unused.example")
    }
}

/// A scripted stdio MCP server covering initialize, tools/list, and
/// tools/call with a misspelling-aware error.
const SCRIPTED_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26"}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"list_issues","description":"List issues","inputSchema":{"type":"object","properties":{"team":{"type":"string"}}}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      name=$(printf '%s' "$line" | sed -n 's/.*"name":"\([^"]*\)".*/\1/p')
      if [ "$name" = "list_issues" ]; then
        printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"issues listed"}]}}\n' "$id"
      else
        printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"Tool %s not found"}}\n' "$id" "$name"
      fi ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;

#[tokio::test]
async fn unknown_server_is_rejected() {
    isolate_home();
    let runtime = Runtime::new(vec![]);
    let err = runtime
        .connect("ghost", ConnectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, McporterError::UnknownServer(name) if name == "ghost"));
}

#[tokio::test]
async fn stdio_connect_lists_and_calls() {
    isolate_home();
    let runtime = Runtime::new(vec![stdio_def("linear", SCRIPTED_SERVER)]);

    let tools = runtime
        .list_tools("linear", ListToolsOptions { include_schema: true, auto_authorize: true })
        .await
        .unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "list_issues");
    assert!(tools[0].input_schema.is_some());

    let result = runtime
        .call_tool("linear", "list_issues", json!({}))
        .await
        .unwrap();
    assert_eq!(result.text(), "issues listed");
    runtime.close(None).await;
}

#[tokio::test]
async fn misspelled_tool_is_auto_corrected() {
    isolate_home();
    let runtime = Runtime::new(vec![stdio_def("linear", SCRIPTED_SERVER)]);

    // The server rejects "listIssues"; the runtime fetches tools/list and
    // silently retries with the canonical name.
    let result = runtime
        .call_tool("linear", "listIssues", json!({}))
        .await
        .unwrap();
    assert_eq!(result.text(), "issues listed");
    runtime.close(None).await;
}

#[tokio::test]
async fn distant_names_get_a_suggestion_not_a_retry() {
    isolate_home();
    let runtime = Runtime::new(vec![stdio_def("linear", SCRIPTED_SERVER)]);

    let err = runtime
        .call_tool("linear", "list_i", json!({}))
        .await
        .unwrap_err();
    match err {
        McporterError::UnknownTool { tool, suggestion, .. } => {
            assert_eq!(tool, "list_i");
            // distance 4 exceeds both thresholds
            assert!(suggestion.is_none());
        }
        other => panic!("expected UnknownTool, got {other:?}"),
    }

    // Distance 3: close enough for a suggestion, too far to retry
    let err = runtime
        .call_tool("linear", "list_iss", json!({}))
        .await
        .unwrap_err();
    match err {
        McporterError::UnknownTool { suggestion, .. } => {
            assert_eq!(suggestion.as_deref(), Some("list_issues"));
        }
        other => panic!("expected UnknownTool, got {other:?}"),
    }
    runtime.close(None).await;
}

#[tokio::test]
async fn connection_is_cached_and_reused() {
    isolate_home();
    let runtime = Runtime::new(vec![stdio_def("cached", SCRIPTED_SERVER)]);
    let first = runtime.connect("cached", ConnectOptions::default()).await.unwrap();
    let second = runtime.connect("cached", ConnectOptions::default()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    runtime.close(None).await;
}

#[tokio::test]
async fn failed_connect_leaves_no_cached_entry() {
    isolate_home();
    let runtime = Runtime::new(vec![stdio_def("broken", "exit 1")]);
    assert!(
        runtime
            .connect("broken", ConnectOptions::default())
            .await
            .is_err()
    );
    assert!(runtime.connected_servers().await.is_empty());
}

#[tokio::test]
async fn close_kills_the_stdio_child() {
    isolate_home();
    let runtime = Runtime::new(vec![stdio_def("victim", SCRIPTED_SERVER)]);
    let context = runtime.connect("victim", ConnectOptions::default()).await.unwrap();
    let pid = context.client.transport().pid().unwrap();
    assert!(prockill::is_alive(pid));
    drop(context);
    runtime.close(Some("victim")).await;
    assert!(!prockill::is_alive(pid));
}

#[tokio::test]
async fn register_definition_respects_overwrite() {
    isolate_home();
    let runtime = Runtime::new(vec![http_def("alpha", "https://a.example/mcp")]);
    let replacement = http_def("alpha", "https://b.example/mcp");

    let err = runtime.register_definition(replacement.clone(), false).unwrap_err();
    assert!(matches!(err, McporterError::Usage(_)));

    runtime.register_definition(replacement, true).unwrap();
    assert_eq!(
        runtime.definition("alpha").unwrap().command.url(),
        Some("https://b.example/mcp")
    );

    runtime
        .register_definition(http_def("fresh", "https://f.example/mcp"), false)
        .unwrap();
    assert_eq!(runtime.definitions().len(), 2);
}

#[tokio::test]
async fn find_by_url_matches_host_and_path() {
    isolate_home();
    let runtime = Runtime::new(vec![http_def("alpha", "https://mcp.example.com/mcp")]);
    let hit = url::Url::parse("https://mcp.example.com/mcp").unwrap();
    assert_eq!(runtime.find_by_url(&hit).unwrap().name, "alpha");
    let miss = url::Url::parse("https://mcp.example.com/other").unwrap();
    assert!(runtime.find_by_url(&miss).is_none());
}

// ---------------------------------------------------------------------------
// OAuth promotion
// ---------------------------------------------------------------------------

/// Browser double that immediately completes the redirect with a code.
struct CallbackOpener;

impl BrowserOpener for CallbackOpener {
    fn open(&self, url: &str) -> crate::Result<()> {
        let parsed = url::Url::parse(url).expect("authorize url");
        let mut redirect_uri = None;
        let mut state = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "redirect_uri" => redirect_uri = Some(value.to_string()),
                "state" => state = Some(value.to_string()),
                _ => {}
            }
        }
        let target = format!(
            "{}?code=CODE-1&state={}",
            redirect_uri.expect("redirect_uri param"),
            state.expect("state param")
        );
        tokio::spawn(async move {
            let _ = reqwest::get(target).await;
        });
        Ok(())
    }
}

async fn oauth_capable_server() -> MockServer {
    let server = MockServer::start().await;
    // Authorized requests succeed; the single body serves initialize,
    // tools/list, and the initialized notification alike.
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("Authorization", "Bearer tok-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "protocolVersion": "2025-03-26",
                "tools": [{"name": "ping", "description": "pong"}]
            }
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client_id": "client-1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-abc",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn unauthorized_server_is_promoted_and_authorized() {
    isolate_home();
    let server = oauth_capable_server().await;
    let def = http_def("vercel-like", &format!("{}/mcp", server.uri()));
    assert!(def.auth.is_none());

    let runtime = Runtime::with_opener(vec![def], Arc::new(CallbackOpener));
    let tools = runtime
        .list_tools("vercel-like", ListToolsOptions::default())
        .await
        .unwrap();
    assert!(!tools.is_empty());

    // The in-memory definition now carries the promotion
    let promoted = runtime.definition("vercel-like").unwrap();
    assert_eq!(promoted.auth, Some(AuthKind::OAuth));
    assert!(promoted.token_cache_dir.is_some());
    runtime.close(None).await;
}

#[tokio::test]
async fn promotion_happens_at_most_once() {
    isolate_home();
    // Every request is 401; no OAuth endpoints at all
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let def = http_def("always401", &format!("{}/mcp", server.uri()));
    let runtime = Runtime::with_opener(vec![def], Arc::new(CallbackOpener));

    let err = runtime
        .connect("always401", ConnectOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    // Promoted exactly once despite repeated 401s
    assert_eq!(
        runtime.definition("always401").unwrap().auth,
        Some(AuthKind::OAuth)
    );

    let err = runtime
        .connect("always401", ConnectOptions::default())
        .await
        .unwrap_err();
    assert!(err.exit_code() == 2);
}

#[tokio::test]
async fn oauth_disabled_connect_skips_promotion() {
    isolate_home();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let def = http_def("noauth", &format!("{}/mcp", server.uri()));
    let runtime = Runtime::new(vec![def]);
    let err = runtime
        .connect(
            "noauth",
            ConnectOptions {
                max_oauth_attempts: 0,
                skip_cache: true,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    // No promotion happened
    assert!(runtime.definition("noauth").unwrap().auth.is_none());
}

// ---------------------------------------------------------------------------
// Correction scoring
// ---------------------------------------------------------------------------

fn tool(name: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: None,
        input_schema: None,
        output_schema: None,
    }
}

#[test]
fn correction_prefers_unique_close_match() {
    let tools = vec![tool("list_issues"), tool("create_issue")];
    match find_correction("listIssues", &tools) {
        Correction::AutoCorrect(name) => assert_eq!(name, "list_issues"),
        _ => panic!("expected auto-correct"),
    }
}

#[test]
fn correction_suggests_on_medium_distance() {
    let tools = vec![tool("list_issues")];
    match find_correction("lst_issue", &tools) {
        Correction::AutoCorrect(name) => assert_eq!(name, "list_issues"),
        Correction::Suggest(name) => assert_eq!(name, "list_issues"),
        Correction::None => panic!("expected a match"),
    }
}

#[test]
fn correction_short_names_use_tight_threshold() {
    // distance 1 to both entries: ambiguous, nothing to auto-correct
    let tools = vec![tool("ping"), tool("pins")];
    assert!(matches!(find_correction("pin", &tools), Correction::None));

    // unique at distance 1 on a short name still corrects
    let tools = vec![tool("ping"), tool("deploy")];
    assert!(matches!(
        find_correction("pint", &tools),
        Correction::AutoCorrect(name) if name == "ping"
    ));
}

#[test]
fn correction_gives_up_when_nothing_is_near() {
    let tools = vec![tool("deploy_project")];
    assert!(matches!(
        find_correction("status", &tools),
        Correction::None
    ));
}
