//! Execution Service — internal HTTP surface over the sandbox-pool manager.
//!
//! Usage:
//!   execution-service                      # reads configuration from the environment

mod http;
mod state;

use execution_core::{Config, Engine};
use sandbox_provider::HttpSandboxProvider;
use state::AppState;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use url::Url;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            exit(1);
        }
    };

    let provider = Arc::new(build_provider());
    let engine = Arc::new(Engine::new(provider, config));

    info!("pre-warming sandbox pool");
    engine.start().await;

    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8081);
    let state = AppState::new(engine.clone());

    let server = tokio::spawn(http::run_server(port, state));

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
    info!("shutdown signal received, draining in-flight executions");
    engine.shutdown(SHUTDOWN_GRACE).await;
    server.abort();
}

fn build_provider() -> HttpSandboxProvider {
    let http_base = env_url("SANDBOX_PROVIDER_HTTP_BASE", "http://127.0.0.1:9000");
    let ws_base = env_url("SANDBOX_PROVIDER_WS_BASE", "ws://127.0.0.1:9000");
    let api_key = std::env::var("SANDBOX_PROVIDER_API_KEY").unwrap_or_default();
    HttpSandboxProvider::new(http_base, ws_base, api_key)
}

fn env_url(key: &str, default: &str) -> Url {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).unwrap_or_else(|e| panic!("{key} is not a valid URL: {e}"))
}
