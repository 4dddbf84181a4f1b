//! Connection pool runtime
//!
//! The [`Runtime`] owns the definition map and a cache of per-server
//! client contexts. Connecting runs an explicit state machine instead of
//! throw-for-flow: streaming HTTP first, SSE fallback on handshake
//! failure, one-shot OAuth auto-promotion on 401, interactive
//! authorization bounded by the configured deadline. Failed connects
//! never leave a cached entry.

use crate::auth::browser::{BrowserOpener, SystemBrowserOpener};
use crate::auth::session::OAuthSession;
use crate::auth::vault::OAuthVault;
use crate::model::{
    AuthKind, CommandSpec, SchemaSnapshot, ServerDefinition, ToolCallResult, ToolDescriptor,
};
use crate::transport::{HttpMode, Transport};
use crate::{McporterError, Result, cache, constants, utils};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod prockill;

/// Per-connect options
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// `0` disables every OAuth step (no session, no promotion)
    pub max_oauth_attempts: u32,
    pub skip_cache: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            max_oauth_attempts: constants::DEFAULT_MAX_OAUTH_ATTEMPTS,
            skip_cache: false,
        }
    }
}

/// Options for `list_tools`
#[derive(Debug, Clone, Copy)]
pub struct ListToolsOptions {
    pub include_schema: bool,
    /// When false the transient connection is torn down immediately and
    /// no OAuth flow is started.
    pub auto_authorize: bool,
}

impl Default for ListToolsOptions {
    fn default() -> Self {
        ListToolsOptions {
            include_schema: false,
            auto_authorize: true,
        }
    }
}

/// MCP client over one transport: handshake plus the typed operations.
pub struct McpClient {
    transport: Box<dyn Transport>,
    server_name: String,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl McpClient {
    pub fn new(server_name: &str, transport: Box<dyn Transport>) -> Self {
        McpClient {
            server_name: server_name.to_string(),
            transport,
        }
    }

    /// `initialize` + `notifications/initialized`
    pub async fn initialize(&self) -> Result<Value> {
        let result = self
            .transport
            .request(
                "initialize",
                json!({
                    "protocolVersion": constants::MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": constants::MCP_CLIENT_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;
        self.transport
            .notify("notifications/initialized", json!({}))
            .await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.transport.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(tools
            .into_iter()
            .filter_map(|tool| {
                Some(ToolDescriptor {
                    name: tool.get("name")?.as_str()?.to_string(),
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    input_schema: tool.get("inputSchema").cloned(),
                    output_schema: tool.get("outputSchema").cloned(),
                })
            })
            .collect())
    }

    pub async fn call_tool(&self, tool: &str, args: Value) -> Result<Value> {
        self.transport
            .request(
                "tools/call",
                json!({
                    "name": tool,
                    "arguments": args,
                }),
            )
            .await
    }

    pub async fn list_resources(&self) -> Result<Vec<Value>> {
        let result = self.transport.request("resources/list", json!({})).await?;
        Ok(result
            .get("resources")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

/// Cached per-server connection
pub struct ClientContext {
    pub client: McpClient,
    pub definition: ServerDefinition,
    /// Serializes tool invocations per server
    call_lock: Mutex<()>,
    pub last_used_at: parking_lot::Mutex<chrono::DateTime<chrono::Utc>>,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("client", &self.client)
            .field("definition", &self.definition)
            .finish()
    }
}

impl ClientContext {
    fn new(client: McpClient, definition: ServerDefinition) -> Self {
        ClientContext {
            client,
            definition,
            call_lock: Mutex::new(()),
            last_used_at: parking_lot::Mutex::new(chrono::Utc::now()),
        }
    }

    fn touch(&self) {
        *self.last_used_at.lock() = chrono::Utc::now();
    }
}

/// The connection pool.
pub struct Runtime {
    definitions: parking_lot::RwLock<Vec<ServerDefinition>>,
    clients: Mutex<HashMap<String, Arc<ClientContext>>>,
    /// Servers already auto-promoted in this process (one-shot)
    promoted: parking_lot::Mutex<HashSet<String>>,
    opener: Arc<dyn BrowserOpener>,
    http: reqwest::Client,
}

impl Runtime {
    pub fn new(definitions: Vec<ServerDefinition>) -> Self {
        Self::with_opener(definitions, Arc::new(SystemBrowserOpener))
    }

    pub fn with_opener(definitions: Vec<ServerDefinition>, opener: Arc<dyn BrowserOpener>) -> Self {
        Runtime {
            definitions: parking_lot::RwLock::new(definitions),
            clients: Mutex::new(HashMap::new()),
            promoted: parking_lot::Mutex::new(HashSet::new()),
            opener,
            http: reqwest::Client::new(),
        }
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    pub fn definitions(&self) -> Vec<ServerDefinition> {
        self.definitions.read().clone()
    }

    pub fn definition(&self, name: &str) -> Result<ServerDefinition> {
        let trimmed = name.trim();
        self.definitions
            .read()
            .iter()
            .find(|d| d.name == trimmed)
            .cloned()
            .ok_or_else(|| McporterError::UnknownServer(trimmed.to_string()))
    }

    /// Register or replace a definition.
    pub fn register_definition(&self, def: ServerDefinition, overwrite: bool) -> Result<()> {
        def.validate()?;
        let mut definitions = self.definitions.write();
        if let Some(existing) = definitions.iter_mut().find(|d| d.name == def.name) {
            if !overwrite {
                return Err(McporterError::usage(format!(
                    "server '{}' is already registered",
                    def.name
                )));
            }
            *existing = def;
        } else {
            definitions.push(def);
        }
        Ok(())
    }

    /// An existing definition whose URL matches exactly (hostname + path),
    /// used to reuse names for bare URLs on the command line.
    pub fn find_by_url(&self, url: &url::Url) -> Option<ServerDefinition> {
        self.definitions
            .read()
            .iter()
            .find(|d| match &d.command {
                CommandSpec::Http { url: existing, .. } => url::Url::parse(existing)
                    .map(|e| e.host_str() == url.host_str() && e.path() == url.path())
                    .unwrap_or(false),
                CommandSpec::Stdio { .. } => false,
            })
            .cloned()
    }

    // ------------------------------------------------------------------
    // Connecting
    // ------------------------------------------------------------------

    /// Connect (or return the cached context) for a server.
    pub async fn connect(&self, name: &str, opts: ConnectOptions) -> Result<Arc<ClientContext>> {
        let key = name.trim().to_string();

        if !opts.skip_cache
            && let Some(context) = self.clients.lock().await.get(&key)
        {
            return Ok(context.clone());
        }

        let result = self.connect_uncached(&key, opts).await;
        match result {
            Ok(context) => {
                if !opts.skip_cache {
                    self.clients.lock().await.insert(key, context.clone());
                }
                Ok(context)
            }
            Err(e) => {
                // A failed connect never leaves a cached entry
                self.clients.lock().await.remove(&key);
                Err(e)
            }
        }
    }

    async fn connect_uncached(&self, name: &str, opts: ConnectOptions) -> Result<Arc<ClientContext>> {
        let mut def = self.definition(name)?;

        if !def.command.is_http() {
            let transport = crate::transport::build(&def, HttpMode::Streaming, None).await?;
            let client = McpClient::new(name, transport);
            if let Err(e) = client.initialize().await {
                client.close().await;
                return Err(e);
            }
            return Ok(Arc::new(ClientContext::new(client, def)));
        }

        // HTTP connection state machine; one outer iteration per OAuth
        // promotion, which happens at most once.
        loop {
            let oauth_allowed = opts.max_oauth_attempts > 0;
            let session = if def.auth == Some(AuthKind::OAuth) && oauth_allowed {
                Some(OAuthSession::start(&def, self.http.clone()).await?)
            } else {
                None
            };
            let vault = (def.auth == Some(AuthKind::OAuth))
                .then(|| OAuthVault::for_definition(&def));

            // Refresh expired tokens up front so the first request does
            // not burn an interactive attempt on a stale bearer.
            if let Some(vault) = &vault
                && vault.read_tokens().is_some_and(|t| t.is_expired())
                && let Err(e) =
                    crate::auth::session::refresh_tokens(&def, vault, &self.http).await
            {
                tracing::debug!("Token refresh for '{}' failed: {}", name, e);
            }

            // Streaming attempt
            let transport =
                crate::transport::build(&def, HttpMode::Streaming, vault.clone()).await?;
            let client = McpClient::new(name, transport);
            let streaming = self
                .connect_with_auth(&client, session.as_ref(), name, opts.max_oauth_attempts)
                .await;

            match streaming {
                Ok(()) => {
                    if let Some(session) = session {
                        session.close().await;
                    }
                    return Ok(Arc::new(ClientContext::new(client, def)));
                }
                Err(e) if e.is_unauthorized() && session.is_none() => {
                    client.close().await;
                    if oauth_allowed && self.promote(&mut def)? {
                        continue;
                    }
                    return Err(e);
                }
                Err(e @ McporterError::OAuthTimeout { .. }) => {
                    client.close().await;
                    if let Some(session) = session {
                        session.close().await;
                    }
                    return Err(e);
                }
                Err(streaming_err) => {
                    client.close().await;
                    tracing::info!(
                        "Streaming connect to '{}' failed ({}), falling back to SSE",
                        name,
                        streaming_err
                    );
                }
            }

            // SSE fallback
            let transport = crate::transport::build(&def, HttpMode::Sse, vault).await?;
            let client = McpClient::new(name, transport);
            let sse = self
                .connect_with_auth(&client, session.as_ref(), name, opts.max_oauth_attempts)
                .await;
            match sse {
                Ok(()) => {
                    if let Some(session) = session {
                        session.close().await;
                    }
                    return Ok(Arc::new(ClientContext::new(client, def)));
                }
                Err(e @ McporterError::OAuthTimeout { .. }) => {
                    client.close().await;
                    if let Some(session) = session {
                        session.close().await;
                    }
                    return Err(e);
                }
                Err(e) => {
                    client.close().await;
                    if let Some(session) = session {
                        session.close().await;
                    }
                    if e.is_unauthorized() && oauth_allowed && self.promote(&mut def)? {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Initialize with interactive-auth retries: on Unauthorized with a
    /// live session, run the flow, refresh transport auth, try again.
    async fn connect_with_auth(
        &self,
        client: &McpClient,
        session: Option<&OAuthSession>,
        name: &str,
        max_attempts: u32,
    ) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            match client.initialize().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if !e.is_unauthorized() {
                        return Err(e);
                    }
                    let Some(session) = session else {
                        return Err(e);
                    };
                    attempts += 1;
                    if attempts > max_attempts {
                        return Err(e);
                    }
                    tracing::info!(
                        "Server '{}' requires authorization (attempt {}/{})",
                        name,
                        attempts,
                        max_attempts
                    );
                    session.authorize(self.opener.as_ref()).await?;
                    client.transport().finish_auth();
                }
            }
        }
    }

    /// One-shot OAuth promotion for a server defined without `auth`.
    ///
    /// Returns true when the promotion happened now; false when this
    /// server was already promoted in this process.
    fn promote(&self, def: &mut ServerDefinition) -> Result<bool> {
        if !self.promoted.lock().insert(def.name.clone()) {
            return Ok(false);
        }
        def.promote_to_oauth();
        tracing::info!(
            "Server '{}' rejected the connection as unauthorized; enabling OAuth",
            def.name
        );
        // Persist the upgraded definition in memory for this process
        self.register_definition(def.clone(), true)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Tool operations
    // ------------------------------------------------------------------

    pub async fn list_tools(
        &self,
        name: &str,
        opts: ListToolsOptions,
    ) -> Result<Vec<ToolDescriptor>> {
        let timeout_ms = utils::env_ms(
            constants::ENV_LIST_TIMEOUT,
            constants::DEFAULT_LIST_TIMEOUT_MS,
        );
        let connect_opts = if opts.auto_authorize {
            ConnectOptions::default()
        } else {
            ConnectOptions {
                max_oauth_attempts: 0,
                skip_cache: true,
            }
        };

        let context = self.connect(name, connect_opts).await?;
        let result = utils::with_timeout(timeout_ms, context.client.list_tools()).await;
        context.touch();

        if !opts.auto_authorize {
            // Transient connection: tear down immediately
            self.teardown_context(&context).await;
        }

        match result {
            Ok(mut tools) => {
                if opts.include_schema {
                    if let Err(e) = cache::write(
                        &context.definition,
                        &SchemaSnapshot::from_tools(&tools),
                    ) {
                        tracing::debug!("Failed to write schema cache for '{}': {}", name, e);
                    }
                } else {
                    for tool in &mut tools {
                        tool.input_schema = None;
                        tool.output_schema = None;
                    }
                }
                Ok(tools)
            }
            Err(e @ McporterError::Timeout(_)) => {
                self.close_one(name).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Call a tool through the cached connection, auto-correcting
    /// near-miss tool names once.
    pub async fn call_tool(&self, name: &str, tool: &str, args: Value) -> Result<ToolCallResult> {
        let timeout_ms = utils::env_ms(
            constants::ENV_CALL_TIMEOUT,
            constants::DEFAULT_CALL_TIMEOUT_MS,
        );
        let context = self.connect(name, ConnectOptions::default()).await?;
        let _serialized = context.call_lock.lock().await;
        context.touch();

        let first = utils::with_timeout(timeout_ms, context.client.call_tool(tool, args.clone()))
            .await;
        match first {
            Ok(envelope) => Ok(ToolCallResult::new(envelope)),
            Err(e @ McporterError::Timeout(_)) => {
                drop(_serialized);
                self.close_one(name).await;
                Err(e)
            }
            Err(e) if is_tool_not_found(&e, tool) => {
                let tools = context.client.list_tools().await.unwrap_or_default();
                match find_correction(tool, &tools) {
                    Correction::AutoCorrect(canonical) => {
                        tracing::info!("Auto-corrected tool call to {}.{}", name, canonical);
                        let envelope = utils::with_timeout(
                            timeout_ms,
                            context.client.call_tool(&canonical, args),
                        )
                        .await?;
                        Ok(ToolCallResult::new(envelope))
                    }
                    Correction::Suggest(suggestion) => Err(McporterError::UnknownTool {
                        server: name.to_string(),
                        tool: tool.to_string(),
                        suggestion: Some(suggestion),
                    }),
                    Correction::None => Err(McporterError::UnknownTool {
                        server: name.to_string(),
                        tool: tool.to_string(),
                        suggestion: None,
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_resources(&self, name: &str) -> Result<Vec<Value>> {
        let timeout_ms = utils::env_ms(
            constants::ENV_LIST_TIMEOUT,
            constants::DEFAULT_LIST_TIMEOUT_MS,
        );
        let context = self.connect(name, ConnectOptions::default()).await?;
        context.touch();
        match utils::with_timeout(timeout_ms, context.client.list_resources()).await {
            Err(e @ McporterError::Timeout(_)) => {
                self.close_one(name).await;
                Err(e)
            }
            other => other,
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Close one server or, with None, every cached connection.
    pub async fn close(&self, name: Option<&str>) {
        match name {
            Some(name) => self.close_one(name).await,
            None => {
                let contexts: Vec<_> = self.clients.lock().await.drain().collect();
                for (_, context) in contexts {
                    self.teardown_context(&context).await;
                }
            }
        }
    }

    async fn close_one(&self, name: &str) {
        let removed = self.clients.lock().await.remove(name.trim());
        if let Some(context) = removed {
            self.teardown_context(&context).await;
        }
    }

    async fn teardown_context(&self, context: &ClientContext) {
        let pid = context.client.transport().pid();
        context.client.close().await;
        if let Some(pid) = pid
            && let Some(child) = context.client.transport().take_child().await
        {
            // STDIO: escalate through the process tree
            prockill::terminate(child, pid).await;
        }
    }

    /// Cached server names with their last-use timestamps (daemon status)
    pub async fn connected_servers(&self) -> Vec<(String, chrono::DateTime<chrono::Utc>)> {
        self.clients
            .lock()
            .await
            .iter()
            .map(|(name, ctx)| (name.clone(), *ctx.last_used_at.lock()))
            .collect()
    }
}

// ============================================================================
// AUTO-CORRECTION
// ============================================================================

enum Correction {
    AutoCorrect(String),
    Suggest(String),
    None,
}

fn is_tool_not_found(err: &McporterError, tool: &str) -> bool {
    let message = err.to_string();
    message.contains("not found") && message.contains(tool)
}

/// Distance ≤ 2 (≤ 1 on short names) with a unique match → silently
/// retry; a single match at ≤ 3 → suggestion only.
fn find_correction(attempted: &str, tools: &[ToolDescriptor]) -> Correction {
    let normalized = utils::normalize_tool_name(attempted);
    let auto_threshold = if normalized.len() <= 4 { 1 } else { 2 };

    let mut scored: Vec<(usize, &ToolDescriptor)> = tools
        .iter()
        .map(|tool| {
            (
                utils::edit_distance(&normalized, &utils::normalize_tool_name(&tool.name)),
                tool,
            )
        })
        .collect();
    scored.sort_by_key(|(distance, _)| *distance);

    let auto: Vec<_> = scored
        .iter()
        .filter(|(d, _)| *d <= auto_threshold)
        .collect();
    if let [(_, tool)] = auto.as_slice() {
        return Correction::AutoCorrect(tool.name.clone());
    }

    let near: Vec<_> = scored.iter().filter(|(d, _)| *d <= 3).collect();
    if let [(_, tool)] = near.as_slice() {
        return Correction::Suggest(tool.name.clone());
    }
    Correction::None
}

#[cfg(test)]
mod runtime_test {
    include!("runtime_test.rs");
}
