//! mcporter - CLI front-end and client runtime for the Model Context Protocol
//!
//! This library provides the full client stack:
//! - Layered configuration with third-party ecosystem imports
//! - A connection pool over STDIO, streamable HTTP, and SSE transports
//! - Interactive OAuth with a loopback redirect listener and a durable
//!   credential vault
//! - A keep-alive daemon multiplexing warm connections over a Unix socket
//! - A generator that emits standalone single-file CLIs per server
//!
//! # Example
//!
//! ```rust,no_run
//! use mcporter::config::{ConfigLoader, LoadOptions};
//! use mcporter::runtime::Runtime;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut loader = ConfigLoader::new();
//!     let definitions = loader.load(&LoadOptions::default())?;
//!     let runtime = Runtime::new(definitions);
//!
//!     let result = runtime.call_tool("linear", "list_issues", json!({})).await?;
//!     println!("{}", result.text());
//!     runtime.close(None).await;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod constants;
pub mod error;
pub mod model;

// Infrastructure
pub mod cache;
pub mod config;
pub mod utils;

// Client stack
pub mod auth;
pub mod runtime;
pub mod transport;

// Interface layers
pub mod cli;
pub mod daemon;
pub mod generate;

// Re-exports for convenience
pub use error::{ConnectionIssue, IssueKind, McporterError, Result};
pub use model::{CommandSpec, ServerDefinition, ToolCallResult, ToolDescriptor};
pub use runtime::Runtime;

/// Initialize logging for the application
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let default_directive = std::env::var(constants::ENV_LOG_LEVEL)
        .map(|level| format!("mcporter={level}"))
        .unwrap_or_else(|_| "mcporter=info".to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
