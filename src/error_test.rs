use super::*;

#[test]
fn classifies_unauthorized_messages_as_auth() {
    for msg in [
        "Unauthorized",
        "server said: invalid_token",
        "invalid-token while refreshing",
        "request failed with 401",
        "got 403 from upstream",
    ] {
        let issue = classify_message(msg);
        assert_eq!(issue.kind, IssueKind::Auth, "message: {msg}");
        assert_eq!(issue.raw_message, msg);
    }
}

#[test]
fn classifies_network_failures_as_offline() {
    for msg in [
        "connect ECONNREFUSED 127.0.0.1:9999",
        "getaddrinfo ENOTFOUND mcp.internal",
        "fetch failed",
        "Connection closed",
    ] {
        assert_eq!(classify_message(msg).kind, IssueKind::Offline, "message: {msg}");
    }
}

#[test]
fn classifies_http_status_and_extracts_code() {
    let issue = classify_message("Non-200 status code (502)");
    assert_eq!(issue.kind, IssueKind::Http);
    assert_eq!(issue.status_code, Some(502));

    let issue = classify_message("upstream replied HTTP 500");
    assert_eq!(issue.kind, IssueKind::Http);
    assert_eq!(issue.status_code, Some(500));
}

#[test]
fn auth_wins_over_http_status() {
    // 401 matches both the auth and the status pattern; auth is checked first
    let issue = classify_message("HTTP 401");
    assert_eq!(issue.kind, IssueKind::Auth);
    assert_eq!(issue.status_code, Some(401));
}

#[test]
fn unmatched_messages_are_unknown() {
    let issue = classify_message("something odd happened");
    assert_eq!(issue.kind, IssueKind::Unknown);
    assert_eq!(issue.status_code, None);
}

#[test]
fn exit_codes_split_user_and_transport_errors() {
    assert_eq!(McporterError::usage("bad flag").exit_code(), 1);
    assert_eq!(McporterError::UnknownServer("x".into()).exit_code(), 1);
    assert_eq!(
        McporterError::config_malformed("/tmp/c.json", "trailing comma").exit_code(),
        1
    );
    assert_eq!(McporterError::Timeout(500).exit_code(), 2);
    assert_eq!(
        McporterError::connection("srv", &"Unauthorized").exit_code(),
        2
    );
}

#[test]
fn is_unauthorized_tracks_classified_kind() {
    assert!(McporterError::connection("srv", &"401 Unauthorized").is_unauthorized());
    assert!(!McporterError::connection("srv", &"ECONNREFUSED").is_unauthorized());
    assert!(!McporterError::Timeout(10).is_unauthorized());
}

#[test]
fn interactive_oauth_failures_imply_an_auth_issue() {
    let errors = [
        McporterError::OAuthTimeout {
            server_name: "vercel".into(),
            timeout_ms: 500,
        },
        McporterError::InvalidState,
        McporterError::MissingAuthorizationCode,
        McporterError::OAuthProvider("access_denied".into()),
        McporterError::oauth("token exchange failed"),
    ];
    for err in errors {
        let issue = err.issue().expect("oauth failure carries an issue");
        assert_eq!(issue.kind, IssueKind::Auth, "error: {err}");
        assert_eq!(issue.status_code, None);
        assert!(err.is_unauthorized());
    }

    // Plain deadline exhaustion stays unclassified
    assert!(McporterError::Timeout(10).issue().is_none());
}

#[test]
fn unknown_tool_renders_suggestion() {
    let err = McporterError::UnknownTool {
        server: "linear".into(),
        tool: "listIssues".into(),
        suggestion: Some("list_issues".into()),
    };
    let text = err.to_string();
    assert!(text.contains("listIssues"));
    assert!(text.contains("Did you mean 'list_issues'?"));
}

#[test]
fn issue_serializes_with_lowercase_kind() {
    let issue = classify_message("Non-200 status code (418)");
    let json = serde_json::to_value(&issue).unwrap();
    assert_eq!(json["kind"], "http");
    assert_eq!(json["statusCode"], 418);
}
