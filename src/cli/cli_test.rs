use super::*;
use clap::Parser;

fn parse(argv: &[&str]) -> Cli {
    Cli::try_parse_from(argv).expect("parse failure")
}

#[test]
fn list_command_parses() {
    let cli = parse(&["mcporter", "list"]);
    assert!(matches!(
        cli.command,
        Commands::List {
            server: None,
            schemas: false,
            resources: false
        }
    ));

    let cli = parse(&["mcporter", "list", "linear", "--schemas", "--resources"]);
    match cli.command {
        Commands::List {
            server,
            schemas,
            resources,
        } => {
            assert_eq!(server.as_deref(), Some("linear"));
            assert!(schemas);
            assert!(resources);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn global_flags_parse_anywhere() {
    let cli = parse(&[
        "mcporter",
        "list",
        "--config",
        "/tmp/c.json",
        "--root",
        "/work",
        "--log-level",
        "debug",
        "--oauth-timeout",
        "1500",
        "--json",
    ]);
    assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/c.json")));
    assert_eq!(cli.root.as_deref(), Some(std::path::Path::new("/work")));
    assert!(matches!(cli.log_level, Some(LogLevel::Debug)));
    assert_eq!(cli.oauth_timeout, Some(1500));
    assert!(cli.json);
}

#[test]
fn call_command_collects_trailing_args() {
    let cli = parse(&[
        "mcporter",
        "call",
        "linear.list_issues",
        "team=ENG",
        "limit:5",
        "--output",
        "json",
    ]);
    match cli.command {
        Commands::Call {
            target,
            rest,
            output,
            ..
        } => {
            assert_eq!(target, "linear.list_issues");
            assert_eq!(rest, vec!["team=ENG", "limit:5"]);
            assert_eq!(output, OutputMode::Json);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn call_command_accepts_adhoc_flags() {
    let cli = parse(&[
        "mcporter",
        "call",
        "status",
        "--stdio",
        "npx -y some-server",
        "--stdio-arg",
        "--verbose",
        "--env",
        "K=V",
        "--name",
        "adhoc",
        "--yes",
    ]);
    match cli.command {
        Commands::Call { target, adhoc, .. } => {
            assert_eq!(target, "status");
            assert_eq!(adhoc.stdio.as_deref(), Some("npx -y some-server"));
            assert_eq!(adhoc.stdio_arg, vec!["--verbose"]);
            assert_eq!(adhoc.env, vec!["K=V"]);
            assert_eq!(adhoc.name.as_deref(), Some("adhoc"));
            assert!(adhoc.yes);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn auth_and_daemon_and_config_parse() {
    let cli = parse(&["mcporter", "auth", "vercel", "--status"]);
    assert!(matches!(
        cli.command,
        Commands::Auth {
            status: true,
            clear: None,
            ..
        }
    ));

    let cli = parse(&["mcporter", "auth", "vercel", "--clear", "all"]);
    assert!(matches!(
        cli.command,
        Commands::Auth {
            clear: Some(ClearScope::All),
            ..
        }
    ));

    let cli = parse(&["mcporter", "daemon", "restart"]);
    assert!(matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommands::Restart
        }
    ));

    let cli = parse(&["mcporter", "config", "import", "cursor"]);
    assert!(matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommands::Import {
                kind: ImportKind::Cursor
            }
        }
    ));
}

#[test]
fn generate_cli_parses_all_flags() {
    let cli = parse(&[
        "mcporter",
        "generate-cli",
        "linear",
        "--runtime",
        "bun",
        "--output",
        "out/cli.mjs",
        "--bundle",
        "--minify",
        "--timeout",
        "45000",
        "--dry-run",
    ]);
    match cli.command {
        Commands::GenerateCli {
            server_ref,
            runtime,
            output,
            bundle,
            compile,
            minify,
            timeout,
            dry_run,
            from,
        } => {
            assert_eq!(server_ref.as_deref(), Some("linear"));
            assert_eq!(runtime, "bun");
            assert_eq!(output.as_deref(), Some(std::path::Path::new("out/cli.mjs")));
            assert!(bundle);
            assert!(!compile);
            assert!(minify);
            assert_eq!(timeout, 45_000);
            assert!(dry_run);
            assert!(from.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn auth_error_envelope_carries_auth_command() {
    let err = McporterError::connection("vercel", &"Unauthorized (HTTP 401)");
    let envelope = error_envelope(Some("vercel"), &err);
    assert_eq!(envelope["status"], "auth");
    assert_eq!(envelope["issue"]["kind"], "auth");
    assert_eq!(envelope["issue"]["statusCode"], 401);
    assert_eq!(envelope["server"], "vercel");
    assert_eq!(envelope["authCommand"], "mcporter auth vercel");
}

#[test]
fn offline_error_envelope_has_no_auth_command() {
    let err = McporterError::connection("x", &"connect ECONNREFUSED 127.0.0.1:1");
    let envelope = error_envelope(Some("x"), &err);
    assert_eq!(envelope["status"], "offline");
    assert!(envelope["authCommand"].is_null());
}

#[test]
fn oauth_timeout_envelope_classifies_as_auth() {
    let err = McporterError::OAuthTimeout {
        server_name: "vercel".into(),
        timeout_ms: 500,
    };
    assert_eq!(err.exit_code(), 2);
    let envelope = error_envelope(Some("vercel"), &err);
    assert_eq!(envelope["status"], "auth");
    assert_eq!(envelope["issue"]["kind"], "auth");
    assert_eq!(envelope["server"], "vercel");
    assert_eq!(envelope["authCommand"], "mcporter auth vercel");
}

#[test]
fn fail_with_server_prints_envelope_only_in_json_mode() {
    let err = McporterError::OAuthTimeout {
        server_name: "vercel".into(),
        timeout_ms: 500,
    };
    // JSON mode resolves to the exit code after printing the envelope
    let code = fail_with_server("vercel", err, true).unwrap();
    assert_eq!(code, 2);

    // Plain mode bubbles the error for the text boundary
    let err = McporterError::UnknownServer("ghost".into());
    let bubbled = fail_with_server("ghost", err, false).unwrap_err();
    assert!(matches!(bubbled, McporterError::UnknownServer(_)));
}

#[test]
fn usage_errors_map_to_exit_code_one() {
    assert_eq!(McporterError::usage("bad").exit_code(), 1);
    assert_eq!(
        McporterError::connection("s", &"HTTP 500").exit_code(),
        2
    );
}
