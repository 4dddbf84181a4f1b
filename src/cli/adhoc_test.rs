use super::*;

#[test]
fn bare_https_url_derives_a_sanitized_name() {
    let def = definition_from_bare_url("https://mcp.example.com/mcp", false).unwrap();
    assert_eq!(def.name, "mcp-example-com-mcp");
    assert_eq!(def.command.url(), Some("https://mcp.example.com/mcp"));
    assert!(!def.lifecycle.keep_alive);
}

#[test]
fn plain_http_requires_opt_in() {
    let err = definition_from_bare_url("http://localhost:3000/mcp", false).unwrap_err();
    assert!(matches!(err, McporterError::Usage(_)));

    let def = definition_from_bare_url("http://localhost:3000/mcp", true).unwrap();
    assert_eq!(def.name, "localhost-mcp");
}

#[test]
fn explicit_name_wins_over_derivation() {
    let def = definition_from_flags(&AdhocFlags {
        http_url: Some("https://mcp.example.com/mcp".to_string()),
        name: Some("shortname".to_string()),
        description: Some("adhoc".to_string()),
        ..AdhocFlags::default()
    })
    .unwrap();
    assert_eq!(def.name, "shortname");
    assert_eq!(def.description.as_deref(), Some("adhoc"));
}

#[test]
fn stdio_flags_build_a_process_definition() {
    let def = definition_from_flags(&AdhocFlags {
        stdio: Some("npx -y some-server".to_string()),
        stdio_args: vec!["--verbose".to_string()],
        env: vec!["API_KEY=abc".to_string()],
        cwd: Some(PathBuf::from("/work")),
        ..AdhocFlags::default()
    })
    .unwrap();
    assert_eq!(def.name, "npx");
    match &def.command {
        CommandSpec::Stdio {
            command,
            args,
            cwd,
            env,
        } => {
            assert_eq!(command, "npx");
            assert_eq!(
                args,
                &vec![
                    "-y".to_string(),
                    "some-server".to_string(),
                    "--verbose".to_string()
                ]
            );
            assert_eq!(cwd.as_deref(), Some(std::path::Path::new("/work")));
            assert_eq!(env["API_KEY"], "abc");
        }
        other => panic!("expected stdio, got {other:?}"),
    }
}

#[test]
fn http_and_stdio_are_mutually_exclusive() {
    let err = definition_from_flags(&AdhocFlags {
        http_url: Some("https://a.example".to_string()),
        stdio: Some("cat".to_string()),
        ..AdhocFlags::default()
    })
    .unwrap_err();
    assert!(matches!(err, McporterError::Usage(_)));
}

#[test]
fn missing_both_is_a_usage_error() {
    assert!(definition_from_flags(&AdhocFlags::default()).is_err());
}

#[test]
fn bad_env_flags_are_rejected() {
    for bad in ["NOVALUE", "2BAD=x"] {
        let err = definition_from_flags(&AdhocFlags {
            stdio: Some("cat".to_string()),
            env: vec![bad.to_string()],
            ..AdhocFlags::default()
        })
        .unwrap_err();
        assert!(matches!(err, McporterError::Usage(_)), "case: {bad}");
    }
}

#[test]
fn persisted_entry_round_trips_through_the_loader() {
    let def = definition_from_flags(&AdhocFlags {
        stdio: Some("deno run server.ts".to_string()),
        env: vec!["TOKEN=${TOKEN}".to_string()],
        ..AdhocFlags::default()
    })
    .unwrap();
    let entry = to_raw_entry(&def);

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("mcporter.json");
    crate::config::upsert_server(&path, &def.name, &entry).unwrap();

    let mut loader = crate::config::ConfigLoader::new();
    let defs = loader
        .load(&crate::config::LoadOptions {
            config_path: Some(path),
            root_dir: None,
        })
        .unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "deno");
    match &defs[0].command {
        CommandSpec::Stdio { command, args, env, .. } => {
            assert_eq!(command, "deno");
            assert_eq!(args, &vec!["run".to_string(), "server.ts".to_string()]);
            assert_eq!(env["TOKEN"], "${TOKEN}");
        }
        other => panic!("expected stdio, got {other:?}"),
    }
}

#[test]
fn name_sanitization_strips_symbols() {
    let url = url::Url::parse("https://api.my-host.io:8443/v1/mcp/").unwrap();
    assert_eq!(derived_name(&url), "api-my-host-io-v1-mcp");
}
