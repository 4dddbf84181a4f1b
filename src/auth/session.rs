//! Interactive OAuth session
//!
//! One session per in-progress authorization. A session owns a loopback
//! HTTP listener for the redirect, the PKCE material for the attempt, and
//! the deferred authorization code the redirect handler resolves. The
//! durable side (tokens, client registration, state) goes through the
//! vault so a finished session leaves everything on disk.

use crate::auth::browser::BrowserOpener;
use crate::auth::vault::{OAuthClientInfo, OAuthTokens, OAuthVault};
use crate::model::ServerDefinition;
use crate::{McporterError, Result, constants, utils};
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::Html;
use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, CsrfToken, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use url::Url;

/// RFC 8414 discovery result, with path-convention fallbacks
#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
}

/// RFC 7591 registration request body
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetadata {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub scope: String,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// Shared with the redirect handler
struct SessionShared {
    expected_path: String,
    vault: OAuthVault,
    pending: Mutex<Option<oneshot::Sender<Result<String>>>>,
}

/// One interactive authorization attempt.
///
/// Never outlives the connect attempt that created it except via explicit
/// handoff to the cached context; `close` is idempotent.
pub struct OAuthSession {
    server_name: String,
    server_url: Option<String>,
    vault: OAuthVault,
    redirect_url: String,
    client_name: String,
    shared: Arc<SessionShared>,
    code_rx: Mutex<Option<oneshot::Receiver<Result<String>>>>,
    shutdown: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    listener_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    http: reqwest::Client,
}

impl OAuthSession {
    /// Bind the loopback listener and construct the session.
    ///
    /// A definition-supplied `oauthRedirectUrl` pins the port and path;
    /// otherwise an ephemeral port with `/callback` is used.
    pub async fn start(def: &ServerDefinition, http: reqwest::Client) -> Result<Self> {
        Self::start_with_vault(def, OAuthVault::for_definition(def), http).await
    }

    /// As `start`, with an explicit vault (dependency-injected in tests).
    pub async fn start_with_vault(
        def: &ServerDefinition,
        vault: OAuthVault,
        http: reqwest::Client,
    ) -> Result<Self> {
        let (port, path) = match def.oauth_redirect_url.as_deref() {
            Some(raw) => {
                let parsed = Url::parse(raw)
                    .map_err(|e| McporterError::oauth(format!("invalid oauthRedirectUrl: {e}")))?;
                let port = parsed.port().ok_or_else(|| {
                    McporterError::oauth("oauthRedirectUrl must carry an explicit port")
                })?;
                (port, parsed.path().to_string())
            }
            None => (0, constants::OAUTH_CALLBACK_PATH.to_string()),
        };

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| McporterError::oauth(format!("failed to bind loopback listener: {e}")))?;
        let bound_port = listener.local_addr()?.port();
        let redirect_url = format!("http://127.0.0.1:{bound_port}{path}");

        let (code_tx, code_rx) = oneshot::channel();
        let shared = Arc::new(SessionShared {
            expected_path: path,
            vault: vault.clone(),
            pending: Mutex::new(Some(code_tx)),
        });

        let app = axum::Router::new()
            .fallback(redirect_handler)
            .with_state(shared.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let listener_task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::debug!("OAuth redirect listener exited: {}", e);
            }
        });

        tracing::debug!(
            "OAuth session for '{}' listening at {}",
            def.name,
            redirect_url
        );

        Ok(OAuthSession {
            server_name: def.name.clone(),
            server_url: def.command.url().map(str::to_string),
            client_name: def
                .client_name
                .clone()
                .unwrap_or_else(|| format!("mcporter ({})", def.name)),
            vault,
            redirect_url,
            shared,
            code_rx: Mutex::new(Some(code_rx)),
            shutdown: parking_lot::Mutex::new(Some(shutdown_tx)),
            listener_task: parking_lot::Mutex::new(Some(listener_task)),
            http,
        })
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    pub fn vault(&self) -> &OAuthVault {
        &self.vault
    }

    /// Registration metadata advertised to the authorization server
    pub fn client_metadata(&self) -> ClientMetadata {
        ClientMetadata {
            client_name: self.client_name.clone(),
            redirect_uris: vec![self.redirect_url.clone()],
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            scope: constants::OAUTH_SCOPE.to_string(),
        }
    }

    /// The OAuth `state` value: stored if present, otherwise a fresh
    /// random UUID persisted before use.
    pub fn state(&self) -> Result<String> {
        if let Some(state) = self.vault.read_state() {
            return Ok(state);
        }
        let state = uuid::Uuid::new_v4().to_string();
        self.vault.save_state(&state)?;
        Ok(state)
    }

    /// Run the whole interactive flow: discovery, registration, browser
    /// redirect, code wait, token exchange, save.
    pub async fn authorize(&self, opener: &dyn BrowserOpener) -> Result<OAuthTokens> {
        let server_url = self
            .server_url
            .as_deref()
            .ok_or_else(|| McporterError::oauth("OAuth requires an HTTP server definition"))?;
        let base = Url::parse(server_url)
            .map_err(|e| McporterError::oauth(format!("invalid server URL: {e}")))?;
        let metadata = discover_metadata(&self.http, &base).await;
        let client_info = self.ensure_client_registration(&metadata).await?;

        let auth_url = AuthUrl::new(metadata.authorization_endpoint.clone())
            .map_err(|e| McporterError::oauth(format!("invalid authorization endpoint: {e}")))?;
        let token_url = TokenUrl::new(metadata.token_endpoint.clone())
            .map_err(|e| McporterError::oauth(format!("invalid token endpoint: {e}")))?;
        let redirect = RedirectUrl::new(self.redirect_url.clone())
            .map_err(|e| McporterError::oauth(format!("invalid redirect URL: {e}")))?;

        let client = BasicClient::new(ClientId::new(client_info.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        self.vault.save_code_verifier(pkce_verifier.secret())?;
        let state = self.state()?;

        let (browse_url, _) = client
            .authorize_url(|| CsrfToken::new(state))
            .add_scope(Scope::new(constants::OAUTH_SCOPE.to_string()))
            .set_pkce_challenge(pkce_challenge)
            .url();

        tracing::info!(
            "Authorize '{}' in your browser: {}",
            self.server_name,
            browse_url
        );
        opener.open(browse_url.as_str())?;

        let code = self.wait_for_authorization_code().await?;
        let verifier = self
            .vault
            .read_code_verifier()
            .ok_or_else(|| McporterError::oauth("code verifier disappeared mid-flow"))?;

        let token_result = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier))
            .request_async(&self.http)
            .await
            .map_err(|e| McporterError::oauth(format!("token exchange failed: {e}")))?;

        let tokens = OAuthTokens {
            access_token: token_result.access_token().secret().clone(),
            token_type: Some("Bearer".to_string()),
            refresh_token: token_result.refresh_token().map(|t| t.secret().clone()),
            scope: token_result
                .scopes()
                .map(|s| s.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")),
            expires_at: token_result
                .expires_in()
                .map(|d| Utc::now() + chrono::Duration::seconds(d.as_secs() as i64)),
        };
        self.vault.save_tokens(&tokens)?;
        // The state is one-shot; drop it so the next flow generates fresh
        self.vault.clear(crate::auth::vault::ClearScope::Verifier)?;

        tracing::info!("Authorized '{}'", self.server_name);
        Ok(tokens)
    }

    /// Wait for the redirect to deliver an authorization code, bounded by
    /// the configured deadline. The session stays closable afterwards.
    pub async fn wait_for_authorization_code(&self) -> Result<String> {
        let timeout_ms = utils::env_ms(
            constants::ENV_OAUTH_TIMEOUT,
            constants::DEFAULT_OAUTH_TIMEOUT_MS,
        );
        self.wait_with_timeout(timeout_ms).await
    }

    /// Code wait against an explicit deadline.
    pub async fn wait_with_timeout(&self, timeout_ms: u64) -> Result<String> {
        let rx = self
            .code_rx
            .lock()
            .await
            .take()
            .ok_or(McporterError::SessionClosed)?;

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), rx).await;
        match waited {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McporterError::SessionClosed),
            Err(_) => Err(McporterError::OAuthTimeout {
                server_name: self.server_name.clone(),
                timeout_ms,
            }),
        }
    }

    /// Reject any pending wait and stop the listener. Idempotent.
    pub async fn close(&self) {
        if let Some(sender) = self.shared.pending.lock().await.take() {
            let _ = sender.send(Err(McporterError::SessionClosed));
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.listener_task.lock().take() {
            task.abort();
        }
    }

    async fn ensure_client_registration(
        &self,
        metadata: &AuthServerMetadata,
    ) -> Result<OAuthClientInfo> {
        if let Some(info) = self.vault.read_client_info() {
            return Ok(info);
        }
        let Some(endpoint) = &metadata.registration_endpoint else {
            return Err(McporterError::oauth(
                "server offers no dynamic client registration and no client is stored",
            ));
        };
        let response = self
            .http
            .post(endpoint)
            .json(&self.client_metadata())
            .send()
            .await
            .map_err(|e| McporterError::oauth(format!("client registration failed: {e}")))?;
        if !response.status().is_success() {
            return Err(McporterError::oauth(format!(
                "client registration failed: HTTP {}",
                response.status().as_u16()
            )));
        }
        let registered: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| McporterError::oauth(format!("invalid registration response: {e}")))?;
        let info = OAuthClientInfo {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            redirect_uris: if registered.redirect_uris.is_empty() {
                vec![self.redirect_url.clone()]
            } else {
                registered.redirect_uris
            },
        };
        self.vault.save_client_info(&info)?;
        tracing::info!("Registered OAuth client for '{}'", self.server_name);
        Ok(info)
    }
}

/// Refresh stored tokens without an interactive session.
///
/// Returns None when there is nothing to refresh with.
pub async fn refresh_tokens(
    def: &ServerDefinition,
    vault: &OAuthVault,
    http: &reqwest::Client,
) -> Result<Option<OAuthTokens>> {
    let Some(tokens) = vault.read_tokens() else {
        return Ok(None);
    };
    let Some(refresh) = tokens.refresh_token.clone() else {
        return Ok(None);
    };
    let Some(info) = vault.read_client_info() else {
        return Ok(None);
    };
    let Some(url) = def.command.url() else {
        return Ok(None);
    };
    let base = Url::parse(url)
        .map_err(|e| McporterError::oauth(format!("invalid server URL: {e}")))?;
    let metadata = discover_metadata(http, &base).await;

    let client = BasicClient::new(ClientId::new(info.client_id))
        .set_auth_uri(
            AuthUrl::new(metadata.authorization_endpoint)
                .map_err(|e| McporterError::oauth(format!("invalid authorization endpoint: {e}")))?,
        )
        .set_token_uri(
            TokenUrl::new(metadata.token_endpoint)
                .map_err(|e| McporterError::oauth(format!("invalid token endpoint: {e}")))?,
        );

    let result = client
        .exchange_refresh_token(&RefreshToken::new(refresh))
        .request_async(http)
        .await
        .map_err(|e| McporterError::oauth(format!("token refresh failed: {e}")))?;

    let refreshed = OAuthTokens {
        access_token: result.access_token().secret().clone(),
        token_type: Some("Bearer".to_string()),
        refresh_token: result
            .refresh_token()
            .map(|t| t.secret().clone())
            .or(tokens.refresh_token),
        scope: result
            .scopes()
            .map(|s| s.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" "))
            .or(tokens.scope),
        expires_at: result
            .expires_in()
            .map(|d| Utc::now() + chrono::Duration::seconds(d.as_secs() as i64)),
    };
    vault.save_tokens(&refreshed)?;
    tracing::info!("Refreshed tokens for '{}'", def.name);
    Ok(Some(refreshed))
}

/// Probe `/.well-known/oauth-authorization-server`; fall back to the
/// conventional `/authorize`, `/token`, `/register` paths on the origin.
pub async fn discover_metadata(http: &reqwest::Client, base: &Url) -> AuthServerMetadata {
    let origin = base.origin().ascii_serialization();
    let well_known = format!("{origin}/.well-known/oauth-authorization-server");
    if let Ok(response) = http.get(&well_known).send().await
        && response.status().is_success()
        && let Ok(metadata) = response.json::<AuthServerMetadata>().await
    {
        return metadata;
    }
    AuthServerMetadata {
        authorization_endpoint: format!("{origin}/authorize"),
        token_endpoint: format!("{origin}/token"),
        registration_endpoint: Some(format!("{origin}/register")),
    }
}

// ============================================================================
// REDIRECT HANDLER
// ============================================================================

async fn redirect_handler(
    State(shared): State<Arc<SessionShared>>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    if uri.path() != shared.expected_path {
        return (StatusCode::NOT_FOUND, Html("Not found".to_string()));
    }

    if let Some(state) = params.get("state") {
        let expected = shared.vault.read_state();
        if expected.as_deref() != Some(state.as_str()) {
            reject(&shared, McporterError::InvalidState).await;
            return (
                StatusCode::BAD_REQUEST,
                Html(page("Authorization failed", "State parameter mismatch.")),
            );
        }
    }

    if let Some(code) = params.get("code") {
        if let Some(sender) = shared.pending.lock().await.take() {
            let _ = sender.send(Ok(code.clone()));
        }
        return (
            StatusCode::OK,
            Html(page(
                "Authorization complete",
                "You can close this window and return to the terminal.",
            )),
        );
    }

    if let Some(error) = params.get("error") {
        reject(&shared, McporterError::OAuthProvider(error.clone())).await;
        return (
            StatusCode::BAD_REQUEST,
            Html(page("Authorization failed", error)),
        );
    }

    reject(&shared, McporterError::MissingAuthorizationCode).await;
    (
        StatusCode::BAD_REQUEST,
        Html(page("Authorization failed", "Missing authorization code.")),
    )
}

async fn reject(shared: &SessionShared, err: McporterError) {
    if let Some(sender) = shared.pending.lock().await.take() {
        let _ = sender.send(Err(err));
    }
}

fn page(heading: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>mcporter</title></head>
<body>
    <h1>{heading}</h1>
    <p>{body}</p>
</body>
</html>"#
    )
}

#[cfg(test)]
mod session_test {
    include!("session_test.rs");
}
