//! Parlance server binary.
//!
//! Starts the axum HTTP/WebSocket server with structured logging, background
//! provider initialization, and graceful shutdown on SIGTERM/SIGINT. The
//! server binds and answers `/health` immediately; `/ready` flips to 200
//! only once every provider passes its connectivity check.

use parlance_providers::ServiceRegistry;
use parlance_server::config::load_config;
use parlance_server::AppState;
use parlance_session::CallSupervisor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLANCE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let state = AppState::new();

    // Provider initialization runs in the background so /health is up
    // immediately; /ready stays 503 until it completes.
    match config.providers.clone() {
        Some(providers) => {
            let state = state.clone();
            let session_config = config.session.clone();
            let startup_timeout = Duration::from_millis(config.server.startup_timeout_ms);
            tokio::spawn(async move {
                match ServiceRegistry::initialize_all(&providers, startup_timeout).await {
                    Ok(registry) => {
                        state.install_supervisor(Arc::new(CallSupervisor::new(
                            Arc::new(registry),
                            session_config,
                        )));
                        tracing::info!("providers initialized, accepting calls");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "provider initialization failed, refusing calls");
                    }
                }
            });
        }
        None => {
            tracing::warn!("no [providers] configuration, serving health endpoints only");
        }
    }

    // Build application
    let app = parlance_server::app(state.clone());
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting parlance server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Drain live calls before exit.
    if let Some(supervisor) = state.supervisor() {
        supervisor.shutdown().await;
    }

    tracing::info!("parlance server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
