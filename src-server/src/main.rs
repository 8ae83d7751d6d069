mod handlers;
mod routes;
mod state;

use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::http::Method;
use clap::Parser;
use tenderpipe::config::LoggingConfig;
use tenderpipe::{load_config, Config, Database};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "tenderpipe-server", version, about = "Tender analysis pipeline over HTTP")]
struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "TENDERPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.listen`.
    #[arg(short, long)]
    listen: Option<String>,
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    LogTracer::init().context("Failed to route log records into tracing")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };
    let subscriber = tracing_subscriber::registry().with(fmt_layer).with(filter);
    tracing::subscriber::set_global_default(subscriber).context("Failed to install tracing subscriber")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    log::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => {
            load_config(path).with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    init_logging(&config.logging)?;
    log::info!("Starting tenderpipe-server v{}", env!("CARGO_PKG_VERSION"));

    let db_path = config
        .database
        .resolved_path()
        .context("Could not determine a database path")?;
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    log::info!("Using database {}", db_path.display());

    let state = AppState::from_config(&config, db)?;

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);
    let app = routes::create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;
    log::info!("Listening on http://{}", config.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    log::info!("Server stopped");
    Ok(())
}
