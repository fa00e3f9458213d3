//! remex server entry point.
//!
//! Initialises tracing, loads configuration from environment variables
//! (prefixed with `REMEX_`), validates the command allowlist, and
//! starts a Streamable-HTTP MCP server exposing the read-only
//! diagnostic tools.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod state;
mod tools;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};

use crate::state::AppState;
use crate::tools::RemexTools;

// ===================================================================
// Configuration
// ===================================================================

/// Server configuration loaded from environment variables via `envy`.
///
/// Each field maps to `REMEX_<FIELD>`:
///   - `REMEX_LISTEN_ADDR`          (default `127.0.0.1:8085`)
///   - `REMEX_ALLOWLIST`            (optional path; builtin set when unset)
///   - `REMEX_COMMAND_TIMEOUT_SECS` (default 30)
///
/// The SSH target is read separately from `REMEX_SSH_*` (host, port,
/// user, key, known_hosts) by `SshTarget::from_env`.
#[derive(Debug, Deserialize)]
struct Config {
    /// Socket address to bind the HTTP server to.
    #[serde(default = "default_listen_addr")]
    listen_addr: String,

    /// Path to a YAML allowlist overriding the builtin command set.
    allowlist: Option<String>,

    /// Wall-clock deadline for one remote command, in seconds.
    #[serde(default = "default_command_timeout_secs")]
    command_timeout_secs: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8085".to_string()
}

fn default_command_timeout_secs() -> u64 {
    30
}

// ===================================================================
// Health endpoint
// ===================================================================

/// Minimal health-check handler for container / load-balancer probes.
async fn health() -> StatusCode {
    StatusCode::OK
}

// ===================================================================
// Entry point
// ===================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialise tracing with RUST_LOG env filter.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("remex-server starting");

    // 2. Load configuration from REMEX_* env vars.
    let config: Config = envy::prefixed("REMEX_")
        .from_env()
        .context("failed to load config from REMEX_* env vars")?;

    // 3. SSH target: host, user, and key are required; startup fails
    //    with the missing variable named rather than at first use.
    let target = remex_core::SshTarget::from_env().context(
        "failed to load SSH target from REMEX_SSH_* env vars \
             (REMEX_SSH_HOST, REMEX_SSH_USER and REMEX_SSH_KEY are required)",
    )?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        remote = %target,
        allowlist = config.allowlist.as_deref().unwrap_or("<builtin>"),
        command_timeout_secs = config.command_timeout_secs,
        "configuration loaded",
    );

    // 4. Build AppState — loads and validates the allowlist. The
    //    server refuses to start with an invalid registry.
    let app_state = AppState::new(
        config.allowlist.as_deref().map(std::path::Path::new),
        target,
        Duration::from_secs(config.command_timeout_secs),
    )
    .context("failed to initialise application state")?;

    let state = Arc::new(app_state);

    // 5. Build the Streamable-HTTP MCP service. The factory closure
    //    creates a fresh RemexTools per session, each sharing the same
    //    Arc<AppState> — and therefore the same serialized session.
    let state_for_factory = state.clone();
    let service = StreamableHttpService::new(
        move || Ok(RemexTools::new(state_for_factory.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    // 6. Compose the axum router:
    //    - `/mcp`    → MCP Streamable-HTTP transport
    //    - `/health` → liveness probe
    let router = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", axum::routing::get(health));

    // 7. Bind and serve.
    tracing::info!("MCP server ready — http://{}/mcp", config.listen_addr);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .context("failed to bind TCP listener")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("remex-server shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl-C handler");
    tracing::info!("received shutdown signal");
}
