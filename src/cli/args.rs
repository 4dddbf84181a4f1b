//! Call-argument grammar
//!
//! `call` accepts positionals, `key=value`, `key:value`, a JSON object or
//! array via `--args`, and a function-call literal
//! (`linear.list_issues(team: "ENG")`). Everything parses into one
//! explicit AST (selector, positional list, named map) which is then
//! validated against the tool's input schema.

use crate::{McporterError, Result};
use serde_json::{Map, Value};

/// `server[.tool]` target of one call
#[derive(Debug, Clone, PartialEq)]
pub struct CallSelector {
    pub server: String,
    pub tool: Option<String>,
}

/// Parsed arguments before schema mapping
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub named: Map<String, Value>,
}

/// Full parse result of the call command line
#[derive(Debug, Clone)]
pub struct CallExpression {
    pub selector: CallSelector,
    pub args: CallArgs,
}

/// Parse `target` plus trailing tokens plus an optional `--args` JSON
/// blob into one expression.
pub fn parse_call_expression(
    target: &str,
    rest: &[String],
    json_args: Option<&str>,
) -> Result<CallExpression> {
    let target = target.trim();
    let (selector_part, inline_args) = match target.find('(') {
        Some(open) => {
            if !target.ends_with(')') {
                return Err(McporterError::usage(format!(
                    "unterminated call literal '{target}'"
                )));
            }
            (
                &target[..open],
                Some(&target[open + 1..target.len() - 1]),
            )
        }
        None => (target, None),
    };

    let selector = parse_selector(selector_part)?;
    let mut args = CallArgs::default();

    if let Some(inline) = inline_args {
        for token in split_call_literal(inline) {
            push_token(&mut args, token.trim())?;
        }
    }
    for token in rest {
        push_token(&mut args, token)?;
    }
    if let Some(json) = json_args {
        merge_json_args(&mut args, json)?;
    }

    Ok(CallExpression { selector, args })
}

/// `server` or `server.tool` (tool may contain further dots)
pub fn parse_selector(raw: &str) -> Result<CallSelector> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(McporterError::usage("missing server name"));
    }
    match raw.split_once('.') {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Ok(CallSelector {
            server: server.to_string(),
            tool: Some(tool.to_string()),
        }),
        _ => Ok(CallSelector {
            server: raw.to_string(),
            tool: None,
        }),
    }
}

/// One argument token: `key=value`, `key:value`, or a positional.
fn push_token(args: &mut CallArgs, token: &str) -> Result<()> {
    if token.is_empty() {
        return Ok(());
    }
    if let Some((key, value)) = split_named(token, '=') {
        args.named.insert(key.to_string(), coerce(value));
        return Ok(());
    }
    if let Some((key, value)) = split_named(token, ':')
        && !value.starts_with("//")
    {
        args.named.insert(key.to_string(), coerce(value));
        return Ok(());
    }
    args.positional.push(coerce(token));
    Ok(())
}

/// Only a leading identifier counts as a key; this keeps URLs and
/// timestamps positional.
fn split_named(token: &str, separator: char) -> Option<(&str, &str)> {
    let (key, value) = token.split_once(separator)?;
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return None,
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, value))
}

/// Literal value coercion: JSON scalars and structures parse, quoted
/// strings unquote, everything else stays a string.
fn coerce(raw: &str) -> Value {
    let raw = raw.trim();
    if (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
        || (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
    {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    Value::String(raw.to_string())
}

/// Split the inside of a call literal on top-level commas.
fn split_call_literal(inside: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut current = String::new();

    for c in inside.chars() {
        match in_string {
            Some(quote) => {
                current.push(c);
                if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    in_string = Some(c);
                    current.push(c);
                }
                '[' | '{' | '(' => {
                    depth += 1;
                    current.push(c);
                }
                ']' | '}' | ')' => {
                    depth -= 1;
                    current.push(c);
                }
                ',' if depth == 0 => {
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn merge_json_args(args: &mut CallArgs, json: &str) -> Result<()> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| McporterError::usage(format!("--args is not valid JSON: {e}")))?;
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                args.named.insert(key, value);
            }
        }
        Value::Array(items) => args.positional.extend(items),
        other => {
            return Err(McporterError::usage(format!(
                "--args must be a JSON object or array, got {other}"
            )));
        }
    }
    Ok(())
}

// ============================================================================
// SCHEMA MAPPING
// ============================================================================

/// Build the final argument object for a tool.
///
/// Positional values map onto the schema's `required` keys first, then
/// the remaining declared properties in declaration order; excess
/// positionals are a usage error. Named arguments win over positionals.
pub fn map_arguments(args: &CallArgs, input_schema: Option<&Value>) -> Result<Value> {
    let mut object = Map::new();

    if !args.positional.is_empty() {
        let slots = positional_slots(input_schema);
        if args.positional.len() > slots.len() && input_schema.is_some() {
            return Err(McporterError::usage(format!(
                "too many positional arguments: got {}, the tool accepts {}",
                args.positional.len(),
                slots.len()
            )));
        }
        for (value, key) in args.positional.iter().zip(slots.iter()) {
            object.insert(key.clone(), value.clone());
        }
        if input_schema.is_none() {
            // No schema to map against: pass positionals through verbatim
            object.insert(
                "args".to_string(),
                Value::Array(args.positional.clone()),
            );
        }
    }

    for (key, value) in &args.named {
        object.insert(key.clone(), coerce_to_schema(value, input_schema, key));
    }

    Ok(Value::Object(object))
}

/// Required keys first (schema order), then other declared properties in
/// declaration order.
fn positional_slots(input_schema: Option<&Value>) -> Vec<String> {
    let Some(schema) = input_schema else {
        return Vec::new();
    };
    let required: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| {
            r.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let mut slots = required.clone();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for key in properties.keys() {
            if !slots.contains(key) {
                slots.push(key.clone());
            }
        }
    }
    slots
}

/// Nudge string values toward the schema-declared scalar type.
fn coerce_to_schema(value: &Value, input_schema: Option<&Value>, key: &str) -> Value {
    let Some(declared) = input_schema
        .and_then(|s| s.pointer(&format!("/properties/{key}/type")))
        .and_then(Value::as_str)
    else {
        return value.clone();
    };
    match (declared, value) {
        ("number", Value::String(s)) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        ("integer", Value::String(s)) => s
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        ("boolean", Value::String(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value.clone(),
        },
        ("string", Value::Number(n)) => Value::String(n.to_string()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod args_test {
    include!("args_test.rs");
}
