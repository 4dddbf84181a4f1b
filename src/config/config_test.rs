use super::*;
use serde_json::json;
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn load_explicit(path: &Path) -> Result<Vec<ServerDefinition>> {
    let mut loader = ConfigLoader::new();
    loader.load(&LoadOptions {
        config_path: Some(path.to_path_buf()),
        root_dir: None,
    })
}

#[test]
fn loads_http_and_stdio_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcporter.json");
    write(
        &path,
        r#"{
            "mcpServers": {
                "linear": {"url": "https://mcp.linear.app/mcp", "description": "issues"},
                "scripts": {"command": "npx -y scripts-server", "env": {"TOKEN": "${SCRIPTS_TOKEN}"}}
            }
        }"#,
    );

    let defs = load_explicit(&path).unwrap();
    assert_eq!(defs.len(), 2);

    let linear = defs.iter().find(|d| d.name == "linear").unwrap();
    assert_eq!(linear.command.url(), Some("https://mcp.linear.app/mcp"));
    assert_eq!(linear.description.as_deref(), Some("issues"));
    assert_eq!(linear.source.kind, SourceKind::Local);

    let scripts = defs.iter().find(|d| d.name == "scripts").unwrap();
    match &scripts.command {
        CommandSpec::Stdio { command, args, env, .. } => {
            assert_eq!(command, "npx");
            assert_eq!(args, &vec!["-y".to_string(), "scripts-server".to_string()]);
            assert_eq!(env["TOKEN"], "${SCRIPTS_TOKEN}");
        }
        other => panic!("expected stdio, got {other:?}"),
    }
}

#[test]
fn url_aliases_collapse() {
    for alias in ["baseUrl", "base_url", "url", "serverUrl", "server_url"] {
        let entry = parse_raw_entry(
            "aliased",
            json!({alias: "https://mcp.example.com/mcp"}),
        )
        .unwrap();
        assert_eq!(entry.url.as_deref(), Some("https://mcp.example.com/mcp"));
    }
}

#[test]
fn bare_url_string_is_http_shorthand() {
    let entry = parse_raw_entry("short", json!("https://mcp.example.com/mcp")).unwrap();
    assert_eq!(entry.url.as_deref(), Some("https://mcp.example.com/mcp"));

    assert!(parse_raw_entry("bad", json!("not-a-url")).is_err());
    assert!(parse_raw_entry("bad", json!(42)).is_err());
}

#[test]
fn bearer_token_becomes_authorization_header() {
    let source = SourceRef {
        kind: SourceKind::Local,
        path: PathBuf::from("/tmp/c.json"),
    };
    let entry = RawEntry {
        url: Some("https://mcp.example.com".into()),
        bearer_token: Some("secret".into()),
        ..RawEntry::default()
    };
    let def = materialize("s", &entry, source.clone(), vec![source.clone()]).unwrap();
    match &def.command {
        CommandSpec::Http { headers, .. } => {
            assert_eq!(headers["Authorization"], "Bearer secret");
        }
        other => panic!("expected http, got {other:?}"),
    }

    let entry = RawEntry {
        url: Some("https://mcp.example.com".into()),
        bearer_token_env: Some("MY_TOKEN".into()),
        ..RawEntry::default()
    };
    let def = materialize("s", &entry, source.clone(), vec![source]).unwrap();
    match &def.command {
        CommandSpec::Http { headers, .. } => {
            // Placeholder resolution is deferred to transport construction
            assert_eq!(headers["Authorization"], "Bearer ${MY_TOKEN}");
        }
        other => panic!("expected http, got {other:?}"),
    }
}

#[test]
fn entry_without_url_or_command_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcporter.json");
    write(
        &path,
        r#"{"mcpServers": {"empty": {"description": "nothing"}, "good": {"url": "https://x.example/mcp"}}}"#,
    );
    let defs = load_explicit(&path).unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "good");
}

#[test]
fn oauth_auth_materializes_cache_dir() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcporter.json");
    write(
        &path,
        r#"{"mcpServers": {"vercel": {"url": "https://mcp.vercel.com/", "auth": "oauth"}}}"#,
    );
    let defs = load_explicit(&path).unwrap();
    assert_eq!(defs[0].auth, Some(AuthKind::OAuth));
    assert!(defs[0].token_cache_dir.is_some());
}

#[test]
fn explicit_path_parse_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    write(&path, "{ this is not json");
    let err = load_explicit(&path).unwrap_err();
    assert!(matches!(err, McporterError::ConfigMalformed { .. }));
}

#[test]
fn explicit_missing_path_is_fatal() {
    let err = load_explicit(Path::new("/definitely/not/here.json")).unwrap_err();
    assert!(matches!(err, McporterError::ConfigMalformed { .. }));
}

#[test]
fn empty_file_yields_no_servers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.json");
    write(&path, "   \n");
    assert!(load_explicit(&path).unwrap().is_empty());
}

#[test]
fn jsonc_comments_are_tolerated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcporter.jsonc");
    write(
        &path,
        r#"{
            // home config
            "mcpServers": {
                /* the only one */
                "alpha": {"url": "https://a.example/mcp"} // trailing
            }
        }"#,
    );
    let defs = load_explicit(&path).unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "alpha");
}

#[test]
fn strip_jsonc_preserves_strings_with_slashes() {
    let input = r#"{"url": "https://a.example/mcp" /* c */ }"#;
    let stripped = strip_jsonc_comments(input);
    let value: Value = serde_json::from_str(&stripped).unwrap();
    assert_eq!(value["url"], "https://a.example/mcp");
}

#[test]
fn project_block_wins_over_project_imports() {
    // Same server in the project config (url A) and in .cursor/mcp.json
    // (url B): one entry, payload A, both sources recorded, primary first.
    let dir = TempDir::new().unwrap();
    let project_path = dir.path().join("config/mcporter.json");
    write(
        &project_path,
        r#"{
            "imports": ["cursor"],
            "mcpServers": {"alpha": {"url": "https://a.example/mcp"}}
        }"#,
    );
    let cursor_path = dir.path().join(".cursor/mcp.json");
    write(
        &cursor_path,
        r#"{"mcpServers": {"alpha": {"url": "https://b.example/mcp"}}}"#,
    );

    let mut loader = ConfigLoader::new();
    let defs = loader
        .load(&LoadOptions {
            config_path: Some(project_path.clone()),
            root_dir: Some(dir.path().to_path_buf()),
        })
        .unwrap();

    let alpha = defs.iter().find(|d| d.name == "alpha").unwrap();
    assert_eq!(alpha.command.url(), Some("https://a.example/mcp"));
    assert_eq!(alpha.sources.len(), 2);
    assert_eq!(alpha.sources[0].path, project_path);
    assert_eq!(alpha.sources[0], alpha.source);
    assert_eq!(alpha.sources[1].path, cursor_path);
    assert_eq!(alpha.sources[1].kind, SourceKind::Import);
}

#[test]
fn load_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcporter.json");
    write(
        &path,
        r#"{"mcpServers": {
            "zeta": {"url": "https://z.example/mcp"},
            "alpha": {"url": "https://a.example/mcp"},
            "mid": {"command": ["cat"]}
        }}"#,
    );
    let first = load_explicit(&path).unwrap();
    let second = load_explicit(&path).unwrap();
    let names: Vec<_> = first.iter().map(|d| d.name.clone()).collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    assert_eq!(
        names,
        second.iter().map(|d| d.name.clone()).collect::<Vec<_>>()
    );
}

#[test]
fn upsert_and_remove_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mcporter.json");

    let entry = RawEntry {
        url: Some("https://mcp.example.com/mcp".into()),
        ..RawEntry::default()
    };
    upsert_server(&path, "added", &entry).unwrap();

    let defs = load_explicit(&path).unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "added");

    remove_server(&path, "added").unwrap();
    assert!(load_explicit(&path).unwrap().is_empty());

    let err = remove_server(&path, "added").unwrap_err();
    assert!(matches!(err, McporterError::UnknownServer(_)));
}
