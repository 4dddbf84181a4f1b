use super::*;
use serde_json::json;

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "team": {"type": "string"},
            "limit": {"type": "number"},
            "archived": {"type": "boolean"},
            "query": {"type": "string"}
        },
        "required": ["team"]
    })
}

#[test]
fn selector_splits_server_and_tool() {
    let sel = parse_selector("linear.list_issues").unwrap();
    assert_eq!(sel.server, "linear");
    assert_eq!(sel.tool.as_deref(), Some("list_issues"));

    let sel = parse_selector("linear").unwrap();
    assert_eq!(sel.server, "linear");
    assert!(sel.tool.is_none());

    assert!(parse_selector("  ").is_err());
}

#[test]
fn key_value_and_key_colon_value_forms() {
    let expr = parse_call_expression(
        "linear.list_issues",
        &["team=ENG".to_string(), "limit:5".to_string()],
        None,
    )
    .unwrap();
    assert_eq!(expr.args.named["team"], json!("ENG"));
    assert_eq!(expr.args.named["limit"], json!(5));
    assert!(expr.args.positional.is_empty());
}

#[test]
fn urls_stay_positional() {
    let expr = parse_call_expression(
        "fetcher.get",
        &["https://example.com/page".to_string()],
        None,
    )
    .unwrap();
    assert!(expr.args.named.is_empty());
    assert_eq!(expr.args.positional[0], json!("https://example.com/page"));
}

#[test]
fn function_call_literal_parses() {
    let expr = parse_call_expression(
        r#"linear.list_issues(team: "ENG", limit: 5, archived: true)"#,
        &[],
        None,
    )
    .unwrap();
    assert_eq!(expr.selector.tool.as_deref(), Some("list_issues"));
    assert_eq!(expr.args.named["team"], json!("ENG"));
    assert_eq!(expr.args.named["limit"], json!(5));
    assert_eq!(expr.args.named["archived"], json!(true));
}

#[test]
fn function_call_literal_with_nested_structures() {
    let expr = parse_call_expression(
        r#"srv.create(payload: {"a": [1, 2]}, tags: ["x", "y"])"#,
        &[],
        None,
    )
    .unwrap();
    assert_eq!(expr.args.named["payload"], json!({"a": [1, 2]}));
    assert_eq!(expr.args.named["tags"], json!(["x", "y"]));
}

#[test]
fn unterminated_literal_is_a_usage_error() {
    let err = parse_call_expression("srv.create(team: 'x'", &[], None).unwrap_err();
    assert!(matches!(err, McporterError::Usage(_)));
}

#[test]
fn json_args_merge() {
    let expr = parse_call_expression(
        "srv.tool",
        &["team=CLI".to_string()],
        Some(r#"{"limit": 10, "archived": false}"#),
    )
    .unwrap();
    assert_eq!(expr.args.named["team"], json!("CLI"));
    assert_eq!(expr.args.named["limit"], json!(10));
    assert_eq!(expr.args.named["archived"], json!(false));

    let expr = parse_call_expression("srv.tool", &[], Some(r#"["a", "b"]"#)).unwrap();
    assert_eq!(expr.args.positional, vec![json!("a"), json!("b")]);

    assert!(parse_call_expression("srv.tool", &[], Some("42")).is_err());
    assert!(parse_call_expression("srv.tool", &[], Some("not json")).is_err());
}

#[test]
fn quoted_values_unquote() {
    let expr = parse_call_expression(
        "srv.tool",
        &["name='with space'".to_string(), r#"title="Quoted""#.to_string()],
        None,
    )
    .unwrap();
    assert_eq!(expr.args.named["name"], json!("with space"));
    assert_eq!(expr.args.named["title"], json!("Quoted"));
}

#[test]
fn positionals_map_required_keys_first() {
    let expr = parse_call_expression(
        "linear.list_issues",
        &["ENG".to_string(), "25".to_string()],
        None,
    )
    .unwrap();
    let mapped = map_arguments(&expr.args, Some(&schema())).unwrap();
    // "team" is required and fills first; "limit" is next in declaration order
    assert_eq!(mapped["team"], json!("ENG"));
    assert_eq!(mapped["limit"], json!(25));
}

#[test]
fn excess_positionals_are_rejected() {
    let args = CallArgs {
        positional: vec![json!("a"), json!("b"), json!("c"), json!("d"), json!("e")],
        named: Map::new(),
    };
    let err = map_arguments(&args, Some(&schema())).unwrap_err();
    assert!(matches!(err, McporterError::Usage(msg) if msg.contains("too many")));
}

#[test]
fn named_values_coerce_to_schema_types() {
    let expr = parse_call_expression(
        "linear.list_issues",
        &[
            "team=ENG".to_string(),
            "limit='25'".to_string(),
            "archived=false".to_string(),
        ],
        None,
    )
    .unwrap();
    let mapped = map_arguments(&expr.args, Some(&schema())).unwrap();
    // The quoted "25" re-coerces onto the declared number type
    assert_eq!(mapped["limit"], json!(25.0));
    assert_eq!(mapped["archived"], json!(false));
}

#[test]
fn schemaless_tools_take_positionals_verbatim() {
    let args = CallArgs {
        positional: vec![json!("anything"), json!(2)],
        named: Map::new(),
    };
    let mapped = map_arguments(&args, None).unwrap();
    assert_eq!(mapped["args"], json!(["anything", 2]));
}

#[test]
fn named_wins_over_positional_for_same_key() {
    let expr = parse_call_expression(
        "linear.list_issues",
        &["WRONG".to_string(), "team=RIGHT".to_string()],
        None,
    )
    .unwrap();
    let mapped = map_arguments(&expr.args, Some(&schema())).unwrap();
    assert_eq!(mapped["team"], json!("RIGHT"));
}
