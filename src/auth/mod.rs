//! OAuth support: credential vault, interactive session, browser opener
//!
//! The vault is the durable side (tokens, client registration, verifier,
//! state across three storage locations); the session is the ephemeral
//! side (one loopback listener per in-progress authorization).

pub mod browser;
pub mod session;
pub mod vault;

pub use browser::{BrowserOpener, SystemBrowserOpener};
pub use session::OAuthSession;
pub use vault::{ClearScope, OAuthClientInfo, OAuthTokens, OAuthVault};
