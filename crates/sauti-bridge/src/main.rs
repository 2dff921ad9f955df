//! Sauti Bridge - terminates carrier media streams and shuttles audio to
//! the relay.

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod carrier;
mod config;
mod session;

use config::BridgeConfig;

#[derive(Debug, Parser)]
#[command(
    name = "sauti-bridge",
    about = "Telephony bridge between carrier media streams and the Sauti relay",
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
                .unwrap_or_else(|_| "sauti_bridge=info,sauti_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Arc::new(BridgeConfig::from_env());
    info!("Downstream URL: {}", cfg.downstream_url);
    info!("Media URL advertised to carrier: {}", cfg.media_url);
    if cfg.opener_text.is_some() {
        info!("Opener configured");
    }

    let app = Router::new()
        .route("/voice", post(voice_webhook))
        .route("/media", get(media_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(cfg);

    let port = args.port.unwrap_or_else(config::port_from_env_or_default);
    let addr = format!("{}:{}", args.host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Bridge listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// The carrier's voice webhook: answer with a single `<Connect><Stream>`
/// directive pointing at our media WebSocket.
async fn voice_webhook(State(cfg): State<Arc<BridgeConfig>>) -> Response {
    let xml = carrier::twiml_connect_stream(&cfg.media_url);
    ([(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

async fn media_upgrade(ws: WebSocketUpgrade, State(cfg): State<Arc<BridgeConfig>>) -> Response {
    ws.on_upgrade(move |socket| session::handle_media(socket, cfg))
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
