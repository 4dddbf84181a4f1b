//! Command-line interface for mcporter
//!
//! Thin layer over the runtime: parse flags, dispatch to the pool, the
//! daemon client, or the generator, and render results as text or JSON
//! envelopes. Exit codes: 0 success, 1 user error, 2 transport/auth.

use crate::auth::vault::{ClearScope, OAuthVault};
use crate::config::{ConfigLoader, ImportKind, LoadOptions};
use crate::daemon::{DaemonClient, DaemonServer};
use crate::error::IssueKind;
use crate::model::{ServerDefinition, ToolCallResult};
use crate::runtime::{ListToolsOptions, Runtime};
use crate::{McporterError, Result, constants};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use std::path::PathBuf;

pub mod adhoc;
pub mod args;

use adhoc::AdhocFlags;

#[derive(Parser, Debug)]
#[command(name = "mcporter", version, about = "CLI front-end and client runtime for MCP servers")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Explicit config file (or MCPORTER_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project root for config/mcporter.json and project-scoped imports
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// OAuth code wait deadline in milliseconds
    #[arg(long, global = true)]
    oauth_timeout: Option<u64>,

    /// Machine-readable output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    Text,
    Markdown,
    Json,
    Raw,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured servers and their tools
    List {
        /// A single server (all servers when omitted)
        server: Option<String>,
        /// Include tool input/output schemas
        #[arg(long)]
        schemas: bool,
        /// Also list server resources
        #[arg(long)]
        resources: bool,
    },

    /// Call a tool: `call server.tool team=ENG` or a bare URL
    Call {
        /// `server.tool`, a call literal, or an HTTP(S) URL
        target: String,
        /// Tool arguments: positionals, key=value, key:value
        #[arg(trailing_var_arg = true, allow_hyphen_values = false)]
        rest: Vec<String>,
        /// Arguments as one JSON object or array
        #[arg(long)]
        args: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        output: OutputMode,
        #[command(flatten)]
        adhoc: AdhocArgs,
    },

    /// Run or inspect the interactive OAuth flow for a server
    Auth {
        server: String,
        /// Report stored credentials instead of authorizing
        #[arg(long)]
        status: bool,
        /// Remove stored credential material
        #[arg(long, value_enum)]
        clear: Option<ClearScope>,
    },

    /// Generate a standalone CLI for one server
    GenerateCli {
        /// Server name, config path, or inline JSON definition
        server_ref: Option<String>,
        /// Regenerate from an artifact's sidecar metadata
        #[arg(long)]
        from: Option<PathBuf>,
        /// Target runtime: node, bun, or deno
        #[arg(long, default_value = "node")]
        runtime: String,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        bundle: bool,
        #[arg(long)]
        compile: bool,
        #[arg(long)]
        minify: bool,
        /// Tool-call timeout baked into the artifact (ms)
        #[arg(long, default_value_t = constants::DEFAULT_CALL_TIMEOUT_MS)]
        timeout: u64,
        /// Print the equivalent command without side effects
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the metadata sidecar of a generated artifact
    InspectCli { artifact: PathBuf },

    /// Keep-alive daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Args, Debug, Default)]
struct AdhocArgs {
    #[arg(long)]
    http_url: Option<String>,
    #[arg(long)]
    allow_http: bool,
    #[arg(long)]
    stdio: Option<String>,
    #[arg(long = "stdio-arg")]
    stdio_arg: Vec<String>,
    #[arg(long)]
    env: Vec<String>,
    #[arg(long)]
    cwd: Option<PathBuf>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Append the adhoc server to a config file
    #[arg(long)]
    persist: Option<PathBuf>,
    /// Skip the persist confirmation prompt
    #[arg(long)]
    yes: bool,
}

impl AdhocArgs {
    fn to_flags(&self) -> AdhocFlags {
        AdhocFlags {
            http_url: self.http_url.clone(),
            allow_http: self.allow_http,
            stdio: self.stdio.clone(),
            stdio_args: self.stdio_arg.clone(),
            env: self.env.clone(),
            cwd: self.cwd.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            persist: self.persist.clone(),
            yes: self.yes,
        }
    }
}

#[derive(Subcommand, Debug)]
enum DaemonCommands {
    /// Start (or confirm) the daemon for this config
    Start,
    Status,
    Stop,
    Restart,
    /// Run the daemon in the foreground (used by autostart)
    Run,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show every resolved server with its origin
    List,
    /// Print one server definition as JSON
    Get { name: String },
    /// Add a server to the config file
    Add {
        name: String,
        #[command(flatten)]
        adhoc: AdhocArgs,
    },
    /// Remove a server from the config file
    Remove { name: String },
    /// Copy servers from another ecosystem into the config
    Import {
        #[arg(value_enum)]
        kind: ImportKind,
    },
}

/// Synchronous entry: parse, configure the process, run the async body.
/// Returns the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();

    if let Some(level) = cli.log_level {
        // SAFETY: single-threaded here, before the tokio runtime starts
        unsafe { std::env::set_var(constants::ENV_LOG_LEVEL, level.as_str()) };
    }
    if let Some(ms) = cli.oauth_timeout {
        unsafe { std::env::set_var(constants::ENV_OAUTH_TIMEOUT, ms.to_string()) };
    }
    crate::init_logging();
    let _ = dotenvy::dotenv();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return 1;
        }
    };

    let json_mode = cli.json;
    match runtime.block_on(execute(cli)) {
        Ok(code) => code,
        Err(e) => {
            if json_mode {
                let envelope = error_envelope(None, &e);
                println!("{}", serde_json::to_string_pretty(&envelope).unwrap_or_default());
            } else {
                eprintln!("Error: {e}");
            }
            e.exit_code()
        }
    }
}

async fn execute(cli: Cli) -> Result<i32> {
    let load = LoadOptions {
        config_path: cli.config.clone(),
        root_dir: cli.root.clone(),
    };
    match cli.command {
        Commands::List {
            server,
            schemas,
            resources,
        } => list_command(&load, server, schemas, resources, cli.json).await,
        Commands::Call {
            target,
            rest,
            args,
            output,
            adhoc,
        } => call_command(&load, target, rest, args.as_deref(), output, &adhoc, cli.json).await,
        Commands::Auth {
            server,
            status,
            clear,
        } => auth_command(&load, &server, status, clear, cli.json).await,
        Commands::GenerateCli {
            server_ref,
            from,
            runtime,
            output,
            bundle,
            compile,
            minify,
            timeout,
            dry_run,
        } => {
            generate_command(
                &load, server_ref, from, runtime, output, bundle, compile, minify, timeout,
                dry_run, cli.json,
            )
            .await
        }
        Commands::InspectCli { artifact } => inspect_command(&artifact, cli.json),
        Commands::Daemon { command } => daemon_command(&load, command, cli.json).await,
        Commands::Config { command } => config_command(&load, command, cli.json).await,
    }
}

// ============================================================================
// LIST
// ============================================================================

async fn list_command(
    load: &LoadOptions,
    server: Option<String>,
    schemas: bool,
    resources: bool,
    json: bool,
) -> Result<i32> {
    let mut loader = ConfigLoader::new();
    let definitions = loader.load(load)?;
    if definitions.is_empty() {
        if json {
            println!("[]");
        } else {
            println!("No servers configured. Add one with `mcporter config add`.");
        }
        return Ok(0);
    }

    let runtime = std::sync::Arc::new(Runtime::new(definitions.clone()));
    let targets: Vec<ServerDefinition> = match &server {
        Some(name) => match runtime.definition(name) {
            Ok(def) => vec![def],
            Err(e) => return fail_with_server(name, e, json),
        },
        None => definitions,
    };
    // A named server may authorize interactively; a full sweep never does
    let auto_authorize = server.is_some();

    let lists = futures::future::join_all(targets.iter().map(|def| {
        let runtime = runtime.clone();
        let name = def.name.clone();
        async move {
            let tools = runtime
                .list_tools(
                    &name,
                    ListToolsOptions {
                        include_schema: schemas,
                        auto_authorize,
                    },
                )
                .await;
            let listed_resources = if resources {
                runtime.list_resources(&name).await.ok()
            } else {
                None
            };
            (name, tools, listed_resources)
        }
    }))
    .await;
    runtime.close(None).await;

    let mut exit = 0;
    let mut envelopes = Vec::new();
    for (def, (name, tools, listed_resources)) in targets.iter().zip(lists) {
        match tools {
            Ok(tools) => {
                if json {
                    envelopes.push(json!({
                        "server": name,
                        "status": "ok",
                        "description": def.description,
                        "tools": tools,
                        "resources": listed_resources,
                    }));
                } else {
                    let description = def
                        .description
                        .as_deref()
                        .map(|d| format!(" - {d}"))
                        .unwrap_or_default();
                    println!("{name}{description}");
                    for tool in &tools {
                        match &tool.description {
                            Some(text) => println!("  {}  {}", tool.name, text),
                            None => println!("  {}", tool.name),
                        }
                    }
                    if let Some(resources) = listed_resources {
                        for resource in resources {
                            let uri = resource.get("uri").and_then(Value::as_str).unwrap_or("?");
                            println!("  [resource] {uri}");
                        }
                    }
                }
            }
            Err(e) => {
                exit = 2;
                if json {
                    envelopes.push(error_envelope(Some(name.as_str()), &e));
                } else {
                    println!("{name} - unavailable: {e}");
                    if e.is_unauthorized() {
                        println!("  run `mcporter auth {name}` to authorize");
                    }
                }
            }
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&envelopes)?);
    }
    Ok(exit)
}

// ============================================================================
// CALL
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn call_command(
    load: &LoadOptions,
    target: String,
    mut rest: Vec<String>,
    json_args: Option<&str>,
    output: OutputMode,
    adhoc_args: &AdhocArgs,
    json: bool,
) -> Result<i32> {
    let mut loader = ConfigLoader::new();
    let definitions = loader.load(load)?;
    let runtime = Runtime::new(definitions);

    // Bare URLs become ephemeral servers unless the URL matches an
    // existing definition, whose name is then reused. One normalized
    // `server.tool[...]` target is then parsed exactly once so
    // call-literal arguments survive.
    let flags = adhoc_args.to_flags();
    let effective_target = if target.starts_with("http://") || target.starts_with("https://") {
        let parsed = url::Url::parse(&target)
            .map_err(|e| McporterError::usage(format!("invalid URL '{target}': {e}")))?;
        let name = match runtime.find_by_url(&parsed) {
            Some(existing) => existing.name,
            None => {
                let def = adhoc::definition_from_bare_url(&target, flags.allow_http)?;
                let name = def.name.clone();
                runtime.register_definition(def, true)?;
                name
            }
        };
        if rest.is_empty() {
            return Err(McporterError::usage("missing tool name after URL"));
        }
        format!("{name}.{}", rest.remove(0))
    } else if !flags.is_empty() {
        let def = adhoc::definition_from_flags(&flags)?;
        maybe_persist(&def, &flags)?;
        let name = def.name.clone();
        runtime.register_definition(def, true)?;
        // With adhoc flags the target is the tool (possibly a literal)
        if target.starts_with(&format!("{name}.")) {
            target.clone()
        } else {
            format!("{name}.{target}")
        }
    } else if !target.contains('.') && !target.contains('(') {
        // `call server tool ...` spelling
        if rest.is_empty() {
            return Err(McporterError::usage(
                "missing tool: use `call server.tool` or `call server tool`",
            ));
        }
        format!("{target}.{}", rest.remove(0))
    } else {
        target.clone()
    };

    let expression = args::parse_call_expression(&effective_target, &rest, json_args)?;
    let server = expression.selector.server.clone();
    let tool = expression.selector.tool.clone().ok_or_else(|| {
        McporterError::usage("missing tool: use `call server.tool` or `call server tool`")
    })?;

    // The server is identified from here on, so failures carry it in the
    // JSON envelope instead of falling through to the anonymous catch.
    let call_result = execute_call(&runtime, load, &server, &tool, &expression.args).await;
    runtime.close(None).await;
    match call_result {
        Ok(result) => {
            render_result(&result, output, json);
            Ok(if result.is_error() { 2 } else { 0 })
        }
        Err(e) => fail_with_server(&server, e, json),
    }
}

async fn execute_call(
    runtime: &Runtime,
    load: &LoadOptions,
    server: &str,
    tool: &str,
    call_args: &args::CallArgs,
) -> Result<ToolCallResult> {
    let def = runtime.definition(server)?;
    let input_schema = tool_input_schema(runtime, &def, tool).await;
    let arguments = args::map_arguments(call_args, input_schema.as_ref())?;

    if def.lifecycle.keep_alive && autorun_enabled() {
        // Local contexts go away before the daemon takes over the call
        runtime.close(None).await;
        call_via_daemon(load, server, tool, &arguments).await
    } else {
        runtime.call_tool(server, tool, arguments).await
    }
}

/// Schema for positional mapping: the snapshot cache first, then a live
/// fetch, and None when both fail.
async fn tool_input_schema(
    runtime: &Runtime,
    def: &ServerDefinition,
    tool: &str,
) -> Option<Value> {
    if let Some(snapshot) = crate::cache::read(def)
        && let Some(entry) = snapshot.tools.get(tool)
        && entry.input_schema.is_some()
    {
        return entry.input_schema.clone();
    }
    match runtime
        .list_tools(
            &def.name,
            ListToolsOptions {
                include_schema: true,
                auto_authorize: true,
            },
        )
        .await
    {
        Ok(tools) => tools
            .into_iter()
            .find(|t| t.name == tool)
            .and_then(|t| t.input_schema),
        Err(_) => None,
    }
}

async fn call_via_daemon(
    load: &LoadOptions,
    server: &str,
    tool: &str,
    arguments: &Value,
) -> Result<ToolCallResult> {
    let client = DaemonClient::for_options(load);
    client.ensure_daemon().await?;
    let envelope = client
        .call(
            "callTool",
            json!({"server": server, "tool": tool, "args": arguments}),
        )
        .await?;
    Ok(ToolCallResult::new(envelope))
}

fn render_result(result: &ToolCallResult, output: OutputMode, json: bool) {
    if json {
        let envelope = json!({
            "status": if result.is_error() { "error" } else { "ok" },
            "result": result.raw(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&envelope).unwrap_or_default()
        );
        return;
    }
    match output {
        OutputMode::Text => println!("{}", result.text()),
        OutputMode::Markdown => println!("{}", result.markdown()),
        OutputMode::Json => match result.json() {
            Some(value) => println!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_default()
            ),
            None => println!("{}", result.text()),
        },
        OutputMode::Raw => println!(
            "{}",
            serde_json::to_string_pretty(result.raw()).unwrap_or_default()
        ),
    }
}

fn maybe_persist(def: &ServerDefinition, flags: &AdhocFlags) -> Result<()> {
    let Some(path) = &flags.persist else {
        return Ok(());
    };
    if !flags.yes && !confirm(&format!("Persist '{}' into {}?", def.name, path.display()))? {
        tracing::info!("Skipping persist for '{}'", def.name);
        return Ok(());
    }
    crate::config::upsert_server(path, &def.name, &adhoc::to_raw_entry(def))?;
    println!("Added '{}' to {}", def.name, path.display());
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn autorun_enabled() -> bool {
    !std::env::var(constants::ENV_DISABLE_AUTORUN).is_ok_and(|v| !v.is_empty())
}

// ============================================================================
// AUTH
// ============================================================================

async fn auth_command(
    load: &LoadOptions,
    server: &str,
    status: bool,
    clear: Option<ClearScope>,
    json: bool,
) -> Result<i32> {
    let mut loader = ConfigLoader::new();
    let definitions = loader.load(load)?;
    let mut def = match definitions.iter().find(|d| d.name == server.trim()).cloned() {
        Some(def) => def,
        None => {
            return fail_with_server(server, McporterError::UnknownServer(server.to_string()), json);
        }
    };
    def.promote_to_oauth();
    let vault = OAuthVault::for_definition(&def);

    if let Some(scope) = clear {
        if let Err(e) = vault.clear(scope) {
            return fail_with_server(&def.name, e, json);
        }
        println!("Cleared credentials for '{}'", def.name);
        return Ok(0);
    }

    if status {
        let tokens = vault.read_tokens();
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "server": def.name,
                    "authorized": tokens.is_some(),
                    "expired": tokens.as_ref().map(|t| t.is_expired()),
                    "expiresAt": tokens.as_ref().and_then(|t| t.expires_at),
                    "hasRefreshToken": tokens.as_ref().map(|t| t.refresh_token.is_some()),
                    "clientRegistered": vault.read_client_info().is_some(),
                    "locations": vault.locations(),
                }))?
            );
        } else {
            match tokens {
                Some(tokens) => {
                    let freshness = if tokens.is_expired() { "expired" } else { "valid" };
                    println!("'{}' has {} tokens", def.name, freshness);
                    if let Some(at) = tokens.expires_at {
                        println!("  expires {at}");
                    }
                    for dir in vault.locations() {
                        println!("  stored in {}", dir.display());
                    }
                }
                None => println!("'{}' has no stored tokens", def.name),
            }
        }
        return Ok(0);
    }

    // Interactive authorization, then prove the connection works
    let runtime = Runtime::new(vec![def.clone()]);
    let tools = runtime
        .list_tools(
            &def.name,
            ListToolsOptions {
                include_schema: false,
                auto_authorize: true,
            },
        )
        .await;
    runtime.close(None).await;
    let tools = match tools {
        Ok(tools) => tools,
        Err(e) => return fail_with_server(&def.name, e, json),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "server": def.name,
                "status": "ok",
                "toolCount": tools.len(),
            }))?
        );
    } else {
        println!("Authorized '{}' ({} tools available)", def.name, tools.len());
    }
    Ok(0)
}

// ============================================================================
// GENERATE / INSPECT
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn generate_command(
    load: &LoadOptions,
    server_ref: Option<String>,
    from: Option<PathBuf>,
    runtime: String,
    output: Option<PathBuf>,
    bundle: bool,
    compile: bool,
    minify: bool,
    timeout: u64,
    dry_run: bool,
    json: bool,
) -> Result<i32> {
    let opts = if let Some(from) = from {
        let metadata = crate::generate::inspect(&from)?;
        let mut opts = crate::generate::options_from_metadata(&metadata);
        // Explicit flags override the recorded invocation
        if let Some(output) = output {
            opts.output = Some(output);
        }
        if bundle {
            opts.bundle = true;
        }
        if compile {
            opts.compile = true;
        }
        if minify {
            opts.minify = true;
        }
        opts.dry_run = dry_run;
        opts
    } else {
        let server_ref = server_ref
            .ok_or_else(|| McporterError::usage("generate-cli needs a server or --from"))?;
        crate::generate::GenerateOptions {
            server_ref,
            config_path: load.config_path.clone(),
            root_dir: load.root_dir.clone(),
            runtime,
            output,
            bundle,
            compile,
            minify,
            timeout_ms: timeout,
            dry_run,
        }
    };

    let outcome = crate::generate::generate(&opts).await?;
    if let Some(planned) = outcome.planned_command {
        println!("{planned}");
        return Ok(0);
    }
    if json {
        let artifacts: Vec<Value> = outcome
            .artifacts
            .iter()
            .map(|(path, kind)| json!({"path": path, "kind": kind}))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({"artifacts": artifacts}))?
        );
    } else {
        for (path, kind) in &outcome.artifacts {
            println!("Wrote {:?} artifact {}", kind, path.display());
        }
    }
    Ok(0)
}

fn inspect_command(artifact: &std::path::Path, json: bool) -> Result<i32> {
    let metadata = crate::generate::inspect(artifact)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
    } else {
        println!(
            "{} v{} artifact for '{}'",
            metadata.generator.name, metadata.generator.version, metadata.server.name
        );
        println!("  kind: {:?}", metadata.artifact.kind);
        println!("  path: {}", metadata.artifact.path.display());
        println!("  generated: {}", metadata.generated_at);
        println!(
            "  regenerate: {}",
            crate::generate::equivalent_command(
                &crate::generate::options_from_metadata(&metadata),
                &metadata.server.definition,
            )
        );
    }
    Ok(0)
}

// ============================================================================
// DAEMON
// ============================================================================

async fn daemon_command(load: &LoadOptions, command: DaemonCommands, json: bool) -> Result<i32> {
    let client = DaemonClient::for_options(load);
    match command {
        DaemonCommands::Start => {
            let status = client.ensure_daemon().await?;
            print_daemon_status(&status, json)?;
            Ok(0)
        }
        DaemonCommands::Status => match client.status().await {
            Ok(status) => {
                print_daemon_status(&status, json)?;
                Ok(0)
            }
            Err(e) => {
                if let Some(metadata) = client.read_metadata() {
                    println!(
                        "Daemon not answering on {} (last started pid {} at {})",
                        client.socket_path().display(),
                        metadata.pid,
                        metadata.started_at
                    );
                } else {
                    println!("Daemon is not running");
                }
                tracing::debug!("status probe failed: {}", e);
                Ok(1)
            }
        },
        DaemonCommands::Stop => {
            match client.request("stop", json!({})).await {
                Ok(_) => println!("Daemon stopped"),
                Err(e) if matches!(e, McporterError::Io(_)) => {
                    println!("Daemon was not running");
                }
                Err(e) => return Err(e),
            }
            Ok(0)
        }
        DaemonCommands::Restart => {
            let _ = client.request("stop", json!({})).await;
            let status = client.ensure_daemon().await?;
            print_daemon_status(&status, json)?;
            Ok(0)
        }
        DaemonCommands::Run => {
            DaemonServer::prepare(load)?.run().await?;
            Ok(0)
        }
    }
}

fn print_daemon_status(status: &crate::model::DaemonStatus, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }
    println!(
        "Daemon pid {} up {}s",
        status.pid,
        status.uptime_ms / 1000
    );
    for server in &status.servers {
        match server.last_used_at {
            Some(at) => println!("  {} [{}] last used {}", server.name, server.state, at),
            None => println!("  {} [{}]", server.name, server.state),
        }
    }
    Ok(())
}

// ============================================================================
// CONFIG
// ============================================================================

async fn config_command(load: &LoadOptions, command: ConfigCommands, json: bool) -> Result<i32> {
    match command {
        ConfigCommands::List => {
            let mut loader = ConfigLoader::new();
            let definitions = loader.load(load)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&definitions)?);
                return Ok(0);
            }
            for def in &definitions {
                let kind = match &def.command {
                    crate::model::CommandSpec::Http { url, .. } => format!("http {url}"),
                    crate::model::CommandSpec::Stdio { command, .. } => {
                        format!("stdio {command}")
                    }
                };
                println!("{}  ({})", def.name, kind);
                for source in &def.sources {
                    println!("    from {}", source.path.display());
                }
            }
            Ok(0)
        }
        ConfigCommands::Get { name } => {
            let mut loader = ConfigLoader::new();
            let definitions = loader.load(load)?;
            let def = definitions
                .iter()
                .find(|d| d.name == name.trim())
                .ok_or_else(|| McporterError::UnknownServer(name.clone()))?;
            println!("{}", serde_json::to_string_pretty(def)?);
            Ok(0)
        }
        ConfigCommands::Add { name, adhoc } => {
            let mut flags = adhoc.to_flags();
            flags.name = Some(name);
            let def = adhoc::definition_from_flags(&flags)?;
            let path = flags
                .persist
                .clone()
                .unwrap_or_else(|| ConfigLoader::default_write_path(load));
            crate::config::upsert_server(&path, &def.name, &adhoc::to_raw_entry(&def))?;
            println!("Added '{}' to {}", def.name, path.display());
            Ok(0)
        }
        ConfigCommands::Remove { name } => {
            let path = ConfigLoader::default_write_path(load);
            crate::config::remove_server(&path, &name)?;
            println!("Removed '{}' from {}", name, path.display());
            Ok(0)
        }
        ConfigCommands::Import { kind } => {
            let mut loader = ConfigLoader::new();
            let occurrences =
                crate::config::imports::collect(kind, load.root_dir.as_deref(), &mut loader);
            if occurrences.is_empty() {
                println!("No servers found for '{}'", kind.as_str());
                return Ok(0);
            }
            let path = ConfigLoader::default_write_path(load);
            let mut imported = 0usize;
            for occurrence in occurrences {
                crate::config::upsert_server(&path, &occurrence.name, &occurrence.entry)?;
                imported += 1;
            }
            println!(
                "Imported {} server(s) from {} into {}",
                imported,
                kind.as_str(),
                path.display()
            );
            Ok(0)
        }
    }
}

// ============================================================================
// ENVELOPES
// ============================================================================

/// Single-command failure with the server identified: in JSON mode print
/// the envelope here and return the exit code; otherwise bubble up for
/// the plain-text boundary.
fn fail_with_server(server: &str, err: McporterError, json: bool) -> Result<i32> {
    if !json {
        return Err(err);
    }
    let envelope = error_envelope(Some(server), &err);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(err.exit_code())
}

/// Machine-readable error shape: `{status, issue, server, authCommand?, error}`
fn error_envelope(server: Option<&str>, err: &McporterError) -> Value {
    let issue = err
        .issue()
        .unwrap_or_else(|| crate::error::classify_error(err));
    let auth_command = (issue.kind == IssueKind::Auth)
        .then(|| server.map(|s| format!("mcporter auth {s}")))
        .flatten();
    json!({
        "status": issue.kind.to_string(),
        "issue": issue,
        "server": server,
        "authCommand": auth_command,
        "error": err.to_string(),
    })
}
