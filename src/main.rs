use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod analyzer;
mod config;
mod error;
mod observability;
mod profile;
mod protocol;
mod server;
mod storage;

use analyzer::{Analyzer, RegexMatcher};
use config::Config;
use observability::{Logger, MetricsCollector};
use profile::ProfileStore;
use server::{Server, SessionContext};
use storage::{Database, SqlDatabase};

#[derive(Parser, Debug)]
#[command(name = "shadowd")]
#[command(about = "Web honeypot daemon that assesses signed request parameters")]
struct Args {
    #[arg(short, long, default_value = "shadowd.yaml")]
    config: String,

    #[arg(short, long)]
    validate_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // The worker pool size comes from the configuration, so it has to be
    // read before the main runtime exists.
    let config = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(Config::load(&args.config))?;

    observability::init_tracing(&config.logging);

    if args.validate_config {
        info!("Configuration is valid");
        return Ok(());
    }

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.threads)
        .enable_all()
        .build()
        .context("Failed to build runtime")?
        .block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    info!("Starting shadowd");

    let metrics_collector = Arc::new(MetricsCollector::new(&config.metrics)?);
    let logger = Arc::new(Logger::new(&config.logging)?);

    let database: Arc<dyn Database> = Arc::new(
        SqlDatabase::connect(&config.database)
            .await
            .context("Failed to connect to database")?,
    );

    let analyzer = Arc::new(Analyzer::new(
        database.clone(),
        Arc::new(RegexMatcher::new()),
        metrics_collector.clone(),
    ));

    let context = Arc::new(SessionContext {
        profiles: ProfileStore::new(database.clone()),
        analyzer,
        database: database.clone(),
        logger,
        metrics: metrics_collector.clone(),
        max_frame_size: config.server.max_frame_size,
        read_timeout: config.server.read_timeout,
    });

    let server = Server::bind(&config.server, &config.ssl, context).await?;

    // Start metrics server if enabled
    let metrics_task = if config.metrics.enabled {
        let metrics_collector = metrics_collector.clone();
        let metrics_config = config.metrics.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = metrics_collector.start_server(&metrics_config).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!(
        "shadowd started on {} with {} worker threads",
        server.local_addr()?,
        config.server.threads
    );

    server
        .run(async {
            if let Err(e) = server::shutdown_signal().await {
                error!("Failed to install signal handlers: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    if let Some(metrics_task) = metrics_task {
        metrics_task.abort();
    }

    if let Err(e) = database.close().await {
        error!("Failed to close database connection: {}", e);
    }

    info!("shadowd shutdown complete");
    Ok(())
}
