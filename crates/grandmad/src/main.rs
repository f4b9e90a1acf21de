//! Grandma Server - durable delayed notification scheduling
//!
//! Usage:
//!   # Standalone mode (default)
//!   grandmad
//!
//!   # From a config file
//!   grandmad --config /etc/grandma/grandma.yaml
//!
//!   # Slave listening for its master
//!   grandmad --mode slave --name Grandma-West --network-addr 0.0.0.0:12345
//!
//!   # Master distributing to two slaves
//!   grandmad --mode master --slaves 10.0.0.2:12345,10.0.0.3:12345

use clap::Parser;
use grandmad::{Cli, DaemonConfig, LogDeliverer, Server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    print_banner(&config);

    let deliverer = Arc::new(LogDeliverer::new());
    let server = Server::start(config, deliverer.clone(), deliverer).await?;
    let shutdown = server.shutdown_handle();

    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received, initiating graceful shutdown...");
    shutdown.shutdown();

    let shutdown_timeout = tokio::time::Duration::from_secs(30);
    if tokio::time::timeout(shutdown_timeout, server.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            "Shutdown timed out after {:?}, forcing exit",
            shutdown_timeout
        );
    }

    tracing::info!("Goodbye!");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

fn print_banner(config: &DaemonConfig) {
    let storage = config
        .data_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "memory".to_string());

    eprintln!(
        r#"
  ____                     _
 / ___|_ __ __ _ _ __   __| |_ __ ___   __ _
| |  _| '__/ _` | '_ \ / _` | '_ ` _ \ / _` |
| |_| | | | (_| | | | | (_| | | | | | | (_| |
 \____|_|  \__,_|_| |_|\__,_|_| |_| |_|\__,_|

Grandma Scheduling Services v{}

  Name:         {}
  Mode:         {:?}
  Storage:      {}
  Queue length: {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.name,
        config.mode,
        storage,
        config.queue_length,
    );

    match config.mode {
        grandma_cluster::ClusterMode::Master => {
            eprintln!("  Slaves:       {}\n", config.slaves.join(", "));
        }
        grandma_cluster::ClusterMode::Slave => {
            eprintln!("  Listening:    {}\n", config.network_addr);
        }
        grandma_cluster::ClusterMode::Standalone => {}
    }
}
