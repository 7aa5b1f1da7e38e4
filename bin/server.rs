// Vacina Insights - Web Server
// REST API with Axum over the shared Service

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vacina_insights::server::{router, spawn_rules_reload};
use vacina_insights::{Config, Service};

#[derive(Parser, Debug)]
#[command(name = "vacina-server", version, about = "Vaccine distribution dashboard API")]
struct Args {
    /// Configuration file (defaults to ./vacina.toml when present)
    #[arg(short, long, env = "VACINA_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides server.bind)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::resolve(args.config.as_deref())?;

    info!("🚀 Starting Vacina Insights Server v{}", vacina_insights::VERSION);

    let service = Arc::new(Service::from_config(&config)?);

    let secs = config.mappings.reload_interval_secs;
    if secs > 0 {
        if service.has_mappings_file() {
            spawn_rules_reload(Arc::clone(&service), Duration::from_secs(secs));
            info!(every_secs = secs, "Mapping reload enabled");
        } else {
            warn!("mappings.reload_interval_secs set without mappings.path, ignoring");
        }
    }

    let app = router(Arc::clone(&service), &config.server.cors_origins);

    let addr = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server running on http://{}", addr);
    info!("   API: http://{}/api/previsao?insumo_nome=BCG", addr);

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}
