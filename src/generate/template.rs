//! The emitted standalone client
//!
//! Rendered with minijinja. The output is a single JavaScript module with
//! no dependency on this runtime: it embeds the server definition, the
//! tool list with derived flag surfaces, and the schema snapshot, and it
//! re-implements the minimal client (stdio spawn + streamable HTTP with
//! event-stream parsing) needed to call tools.

use super::GeneratedTool;
use crate::model::{SchemaSnapshot, ServerDefinition};
use crate::{McporterError, Result};
use minijinja::{Environment, context};

/// Render the client source for one server.
pub fn render(
    def: &ServerDefinition,
    tools: &[GeneratedTool],
    snapshot: &SchemaSnapshot,
    runtime: &str,
) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("cli.mjs", TEMPLATE)
        .map_err(|e| McporterError::internal(format!("template parse failure: {e}")))?;
    let template = env
        .get_template("cli.mjs")
        .map_err(|e| McporterError::internal(format!("template lookup failure: {e}")))?;
    template
        .render(context! {
            server_name => def.name.clone(),
            shebang_runtime => runtime.to_string(),
            generator_version => env!("CARGO_PKG_VERSION"),
            definition_json => serde_json::to_string_pretty(def)?,
            tools_json => serde_json::to_string_pretty(tools)?,
            snapshot_json => serde_json::to_string_pretty(snapshot)?,
        })
        .map_err(|e| McporterError::internal(format!("template render failure: {e}")))
}

const TEMPLATE: &str = r#"#!/usr/bin/env {{ shebang_runtime }}
// Standalone MCP client for "{{ server_name }}".
// Generated by mcporter {{ generator_version }}. Regenerate with
// `mcporter generate-cli`; edits here are overwritten.

import { spawn } from "node:child_process";
import readline from "node:readline";

const DEFINITION = {{ definition_json }};

const TOOLS = {{ tools_json }};

const SCHEMAS = {{ snapshot_json }};

const CALL_TIMEOUT_MS = Number(process.env.MCPORTER_CALL_TIMEOUT || 60000);

function expandEnv(value) {
  let out = value.replace(/\$\{([A-Za-z_][A-Za-z0-9_]*)\}/g, (_, name) => process.env[name] || "");
  out = out.replace(/\$env:([A-Za-z0-9_]+)/g, (_, name) => process.env[name] || "");
  return out;
}

function resolvedHeaders() {
  const headers = { "content-type": "application/json" };
  for (const [key, value] of Object.entries(DEFINITION.command.headers || {})) {
    headers[key.toLowerCase()] = expandEnv(value);
  }
  return headers;
}

let nextId = 1;

async function httpRequest(method, params) {
  const id = nextId++;
  const body = JSON.stringify({ jsonrpc: "2.0", id, method, params });
  const headers = resolvedHeaders();
  headers.accept = "application/json, text/event-stream";
  const controller = new AbortController();
  const timer = setTimeout(() => controller.abort(), CALL_TIMEOUT_MS);
  try {
    const response = await fetch(DEFINITION.command.url, {
      method: "POST",
      headers,
      body,
      signal: controller.signal,
    });
    if (!response.ok) {
      throw new Error("Non-200 status code (" + response.status + ")");
    }
    const contentType = response.headers.get("content-type") || "";
    if (contentType.startsWith("text/event-stream")) {
      const text = await response.text();
      for (const line of text.split("\n")) {
        if (!line.startsWith("data:")) continue;
        const message = JSON.parse(line.slice(5).trim());
        if (message.id === id) return unwrap(message);
      }
      throw new Error("no response in event stream");
    }
    return unwrap(await response.json());
  } finally {
    clearTimeout(timer);
  }
}

function unwrap(message) {
  if (message.error) {
    throw new Error("RPC error " + message.error.code + ": " + message.error.message);
  }
  return message.result ?? {};
}

function stdioSession() {
  const spec = DEFINITION.command;
  const env = { ...process.env };
  for (const [key, value] of Object.entries(spec.env || {})) {
    env[key] = expandEnv(value);
  }
  const child = spawn(spec.command, spec.args || [], {
    cwd: spec.cwd || undefined,
    env,
    stdio: ["pipe", "pipe", "inherit"],
  });
  const lines = readline.createInterface({ input: child.stdout });
  const pending = new Map();
  lines.on("line", (line) => {
    let message;
    try {
      message = JSON.parse(line);
    } catch {
      return;
    }
    const waiter = pending.get(message.id);
    if (waiter) {
      pending.delete(message.id);
      waiter(message);
    }
  });
  const request = (method, params) =>
    new Promise((resolve, reject) => {
      const id = nextId++;
      pending.set(id, (message) => {
        try {
          resolve(unwrap(message));
        } catch (e) {
          reject(e);
        }
      });
      const timer = setTimeout(() => {
        pending.delete(id);
        reject(new Error("timed out after " + CALL_TIMEOUT_MS + "ms"));
      }, CALL_TIMEOUT_MS);
      timer.unref?.();
      child.stdin.write(JSON.stringify({ jsonrpc: "2.0", id, method, params }) + "\n");
    });
  const notify = (method, params) => {
    child.stdin.write(JSON.stringify({ jsonrpc: "2.0", method, params }) + "\n");
  };
  const close = () => {
    child.stdin.end();
    child.kill("SIGTERM");
  };
  return { request, notify, close };
}

async function callTool(toolName, args) {
  const initParams = {
    protocolVersion: "2025-03-26",
    capabilities: {},
    clientInfo: { name: "{{ server_name }}-cli", version: "{{ generator_version }}" },
  };
  if (DEFINITION.command.kind === "http") {
    await httpRequest("initialize", initParams);
    return httpRequest("tools/call", { name: toolName, arguments: args });
  }
  const session = stdioSession();
  try {
    await session.request("initialize", initParams);
    session.notify("notifications/initialized", {});
    return await session.request("tools/call", { name: toolName, arguments: args });
  } finally {
    session.close();
  }
}

function parseValue(option, raw, existing) {
  switch (option.type) {
    case "number": {
      const parsed = Number(raw);
      if (Number.isNaN(parsed)) {
        fail("--" + option.cliName + " expects a number, got '" + raw + "'");
      }
      return parsed;
    }
    case "boolean":
      return raw === undefined || raw === "true" || raw === "";
    case "array": {
      const items = Array.isArray(existing) ? existing : [];
      items.push(raw);
      return items;
    }
    case "string":
      return raw;
    default:
      try {
        return JSON.parse(raw);
      } catch {
        return raw;
      }
  }
}

function fail(message) {
  process.stderr.write(message + "\n");
  process.exit(1);
}

function renderResult(envelope, mode) {
  if (mode === "raw") {
    return JSON.stringify(envelope, null, 2);
  }
  const blocks = envelope.content || [];
  const text = blocks
    .filter((b) => b.type === "text")
    .map((b) => b.text)
    .join("\n");
  if (mode === "json") {
    if (envelope.structuredContent !== undefined) {
      return JSON.stringify(envelope.structuredContent, null, 2);
    }
    try {
      return JSON.stringify(JSON.parse(text), null, 2);
    } catch {
      return JSON.stringify({ text }, null, 2);
    }
  }
  return text;
}

function usage() {
  const lines = ["Usage: {{ server_name }}-cli <command> [flags]", "", "Commands:"];
  lines.push("  list-tools  Show the tools this server exposes");
  for (const tool of TOOLS) {
    const summary = tool.description ? "  " + tool.description : "";
    lines.push("  " + tool.cliName + summary);
  }
  lines.push("", "Global flags: --output text|markdown|json|raw");
  return lines.join("\n");
}

async function main() {
  const argv = process.argv.slice(2);
  if (argv.length === 0 || argv[0] === "--help" || argv[0] === "-h") {
    console.log(usage());
    return;
  }
  const command = argv.shift();

  if (command === "list-tools") {
    for (const tool of TOOLS) {
      const schema = SCHEMAS.tools[tool.name] || {};
      console.log(tool.name + (schema.description ? " - " + schema.description : ""));
      for (const option of tool.options) {
        const req = option.required ? " (required)" : "";
        console.log("    --" + option.cliName + " <" + option.type + ">" + req);
      }
    }
    return;
  }

  const tool = TOOLS.find((t) => t.cliName === command || t.name === command);
  if (!tool) {
    fail("Unknown command '" + command + "'\n\n" + usage());
  }

  let output = "text";
  const args = {};
  for (const option of tool.options) {
    if (option.default !== undefined) args[option.name] = option.default;
  }
  while (argv.length > 0) {
    const flag = argv.shift();
    if (!flag.startsWith("--")) {
      fail("Unexpected positional argument '" + flag + "'");
    }
    const name = flag.slice(2);
    if (name === "output") {
      output = argv.shift();
      continue;
    }
    const option = tool.options.find((o) => o.cliName === name || o.name === name);
    if (!option) {
      fail("Unknown flag --" + name + " for " + tool.cliName);
    }
    const takesValue = option.type !== "boolean";
    const raw = takesValue ? argv.shift() : undefined;
    if (takesValue && raw === undefined) {
      fail("--" + name + " expects a value");
    }
    args[option.name] = parseValue(option, raw, args[option.name]);
  }

  for (const option of tool.options) {
    if (option.required && args[option.name] === undefined) {
      fail("Missing required flag --" + option.cliName);
    }
  }

  try {
    const envelope = await callTool(tool.name, args);
    console.log(renderResult(envelope, output));
    process.exit(envelope.isError ? 2 : 0);
  } catch (e) {
    process.stderr.write(String(e.message || e) + "\n");
    process.exit(2);
  }
}

main();
"#;

#[cfg(test)]
mod template_test {
    include!("template_test.rs");
}
