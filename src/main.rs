use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engagement_sources::config::{self, Config};
use engagement_sources::{api, spawn_health_reporter, RefreshController, SourceType, TableSummaryTransformer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Path to source configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source to use first, overriding the config file
    #[arg(long)]
    source: Option<SourceType>,

    /// Cohort selected at startup, overriding the config file
    #[arg(long)]
    cohort: Option<String>,

    /// Seconds between background health checks, overriding the config file
    #[arg(long)]
    health_interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut cfg = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading source config");
            config::load_config(path)?
        }
        None => Config::default(),
    };
    if let Some(source) = args.source {
        cfg.default_source = source;
    }
    if let Some(cohort) = args.cohort {
        cfg.cohort = cohort;
    }
    if let Some(secs) = args.health_interval_secs {
        cfg.health_interval_secs = secs;
    }

    let orchestrator = config::build_orchestrator(&cfg)?;
    info!(
        current = %orchestrator.current_type(),
        registered = ?orchestrator.registered(),
        fallback = ?orchestrator.fallback_order(),
        "Sources ready"
    );

    let controller = Arc::new(
        RefreshController::new(orchestrator, TableSummaryTransformer::default(), cfg.cohort.clone())
            .with_ttl(cfg.cache_ttl()),
    );

    // An interval of zero disables background health checks.
    let _reporter = (cfg.health_interval_secs > 0)
        .then(|| spawn_health_reporter(controller.clone(), cfg.health_interval()));

    if let Err(e) = controller.refresh(&cfg.cohort).await {
        warn!(cohort = %cfg.cohort, error = %e, "Initial load failed, serving anyway");
    }

    let app = api::router(controller);

    info!("Starting engagement-sources on {}", args.bind);
    axum::Server::bind(&args.bind)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
