//! # loopcast - Main Application Entry Point
//!
//! Starts the audio stream and the HTTP server that hands it out.
//!
//! ## What happens at startup:
//! 1. **Loads configuration** from defaults, config.toml and the environment
//! 2. **Sets up logging** for debugging and monitoring
//! 3. **Starts the audio stream** (loopback capture and relay)
//! 4. **Serves HTTP** on every interface and prints the URLs clients can open
//! 5. **Handles graceful shutdown**: stop the server, close every client, stop capture

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use loopcast::audio::cpal_host::CpalHost;
use loopcast::config::AppConfig;
use loopcast::service::StreamService;
use loopcast::state::AppState;
use loopcast::transport::webrtc::WebRtcTransport;
use loopcast::{handlers, middleware, net};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting loopcast v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let host = Arc::new(CpalHost::new());
    let transport = Arc::new(WebRtcTransport::new(&config.transport)?);
    let stream = Arc::new(StreamService::new(&config, host, transport));

    // The server still comes up without audio so /health can explain why
    if let Err(e) = stream.on_start() {
        warn!(error = %e, "Audio stream unavailable, offers will be rejected");
    }

    let app_state = AppState::new(config.clone(), stream.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    print_banner(config.server.port);

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Whichever finishes first wins: the server (usually an error) or a signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            match signal {
                Ok(name) => info!("Received {}, stopping server...", name),
                Err(e) => error!("Signal handling failed, stopping server: {}", e),
            }
            server_handle.stop(true).await;
        }
    }

    stream.on_stop().await;

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "loopcast=trace")
/// - If not set, defaults to "loopcast=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loopcast=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Waits for SIGTERM or SIGINT (Ctrl+C) and returns which one arrived.
#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

fn print_banner(port: u16) {
    let rule = "=".repeat(60);
    println!("{}", rule);
    println!("  loopcast - system audio over WebRTC");
    println!("{}", rule);
    for url in net::client_urls(port) {
        println!("  {}", url);
    }
    println!("{}", rule);
}
