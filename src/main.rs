mod collector;
mod config;
mod error;
mod http;
mod kafka;
mod metrics;
#[cfg(test)]
mod testutil;

use crate::collector::coordinator::ScrapeCoordinator;
use crate::config::Config;
use crate::http::server::HttpServer;
use crate::kafka::client::RdGateway;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "kstate-exporter")]
#[command(about = "Prometheus exporter for Kafka cluster state and consumer group lag")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Starting kstate-exporter");

    let config = Config::load(&args.config)?;
    info!(
        bootstrap_servers = %config.kafka.bootstrap_servers,
        topic_workers = config.exporter.topic_workers,
        "Configuration loaded"
    );

    let filters = config.exporter.compile_filters()?;

    // Blocks until an initial metadata snapshot is loaded.
    let gateway = RdGateway::connect(&config.kafka)?;
    info!("Connected to cluster");

    let coordinator = Arc::new(ScrapeCoordinator::new(
        Arc::new(gateway),
        filters.topic,
        filters.group,
        config.exporter.topic_workers,
        config.exporter.offset_show_all,
        config.exporter.allow_concurrent,
        config.exporter.metadata_refresh_interval,
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_server = HttpServer::new(
        &config.exporter.http_host,
        config.exporter.http_port,
        coordinator,
        config.exporter.labels.clone(),
    )?;

    let shutdown_rx = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!(error = %e, "HTTP server error");
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received, stopping...");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    info!("kstate-exporter stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
