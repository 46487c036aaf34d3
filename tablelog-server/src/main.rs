use clap::Parser;
use tablelog_core::ipc::TablelogRequest;
use tablelog_core::TablelogConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use tablelog_server::{server, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tablelog.toml")]
    config: String,

    /// Query a running server over its socket and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match TablelogConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging: RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        match server::send_request(&config.service.socket_path, &TablelogRequest::Health).await {
            Ok(resp) if resp.is_ok() => {
                let data = resp.data.unwrap_or_default();
                println!("✅ Tablelog server healthy");
                println!("   active sessions: {}", data["active_sessions"]);
                println!("   scanner running: {}", data["scanner_running"]);
                println!("   notifier:        {}", data["notifier"]);
                return Ok(());
            }
            Ok(resp) => {
                println!("❌ Health check failed: {}", resp.error.unwrap_or_default());
                std::process::exit(1);
            }
            Err(e) => {
                println!("❌ Server unreachable: {}", e);
                std::process::exit(1);
            }
        }
    }

    let (state, scanner) = AppState::build(config.clone())?;

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Reminder / overtime ticker
    let scanner_handle = scanner.spawn(tx.subscribe());

    // HTTP API + dashboard push stream
    let http_handle = if config.http.enabled {
        let http_state = state.clone();
        let http_shutdown = tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = tablelog_server::http::start_http_server(http_state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    server::run_unix_server(&config.service.socket_path, state, tx.subscribe()).await?;

    // Let the in-flight tick and HTTP connections finish.
    if let Err(e) = scanner_handle.await {
        tracing::warn!("Scanner task ended abnormally: {}", e);
    }
    if let Some(handle) = http_handle {
        if let Err(e) = handle.await {
            tracing::warn!("HTTP task ended abnormally: {}", e);
        }
    }

    tracing::info!("Tablelog server stopped");
    Ok(())
}
