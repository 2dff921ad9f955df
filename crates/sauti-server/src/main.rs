//! Sauti Server - ASR, conversation, and TTS behind the voice session
//! WebSocket protocol.

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod asr;
mod config;
mod conversation;
mod health;
mod process;
mod sink;
mod state;
mod tts;
mod turn;

use config::ServerConfig;
use state::AppState;

#[derive(Debug, Parser)]
#[command(
    name = "sauti-server",
    about = "Voice backend for the Sauti telephony pipeline",
    version = env!("CARGO_PKG_VERSION")
)]
struct ServerArgs {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sauti_server=info,sauti_core=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sauti voice backend");

    let cfg = ServerConfig::from_env();
    let state = AppState::new(cfg);

    let snapshot = state.readiness();
    if snapshot.ready {
        info!("Voice toolchain ready");
    } else {
        warn!(
            "Voice toolchain not ready (missing: {}); sessions will answer commits with a config error",
            snapshot.missing()
        );
    }

    let app = api::create_router(state);

    let port = args.port.unwrap_or_else(config::port_from_env_or_default);
    let addr = format!("{}:{}", args.host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
