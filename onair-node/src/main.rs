use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use onair_node::{start_management_api, LogOutput, NodeConfig, StaticDiscovery, Synchronizer};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path =
        std::env::var("ONAIR_CONFIG").unwrap_or_else(|_| "config/default".to_string());

    // Load configuration from file if available, otherwise use defaults
    let (config, load_error) = match NodeConfig::from_file(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (NodeConfig::default(), Some(e)),
    };

    init_tracing(&config);

    info!("Starting On-Air Node v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!(path = %config_path, "Configuration loaded"),
        Some(e) => warn!("Failed to load config file: {}, using defaults", e),
    }

    config.validate().context("Invalid configuration")?;

    info!(
        identity = %config.identity(),
        statuses = ?config.statuses,
        default_status = %config.default_status,
        static_peers = config.discovery.peers.len(),
        "Node configuration"
    );

    initialize_metrics();
    if config.metrics.enabled {
        start_metrics_exporter(&config.metrics.listen_addr)?;
    }

    let discovery = StaticDiscovery::new(config.static_peers());
    let mut synchronizer =
        match Synchronizer::start(&config, Box::new(discovery), Arc::new(LogOutput)).await {
            Ok(synchronizer) => synchronizer,
            Err(e) => {
                error!(error = %e, fatal = e.is_fatal(), "Failed to start synchronizer");
                return Err(e.into());
            }
        };

    // Initialize and start management API
    let (management_shutdown, management_shutdown_rx) = oneshot::channel();
    let management_task = if config.management.enabled {
        info!("Starting management API server");
        let management_config = config.management.clone();
        let handle = synchronizer.handle();

        Some(tokio::spawn(async move {
            if let Err(e) =
                start_management_api(management_config, handle, management_shutdown_rx).await
            {
                error!(error = %e, "Management API server failed");
            }
        }))
    } else {
        info!("Management API is disabled");
        None
    };

    wait_for_shutdown().await;
    info!("Shutdown signal received, stopping node");

    let _ = management_shutdown.send(());
    if let Some(task) = management_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Management API task ended abnormally");
        }
    }

    synchronizer.stop().await;
    info!("On-Air Node stopped");
    Ok(())
}

/// Initialize structured logging; `RUST_LOG` overrides the configured level
fn init_tracing(config: &NodeConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("onair_node={}", config.logging.level).into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn initialize_metrics() {
    describe_counter!(
        "status_pushes_sent",
        "Total number of status pushes sent to peers"
    );
    describe_counter!(
        "status_push_failures",
        "Total number of status pushes that failed or timed out"
    );
    describe_counter!(
        "status_pushes_received",
        "Total number of status pushes received from peers"
    );
    describe_counter!(
        "status_pushes_rejected",
        "Total number of inbound status pushes rejected"
    );
    describe_counter!(
        "output_status_changes",
        "Total number of aggregate output status changes"
    );
    describe_gauge!("known_peers", "Current number of registered peers");
}

/// Install the Prometheus exporter
fn start_metrics_exporter(listen_addr: &str) -> Result<()> {
    let addr: SocketAddr = listen_addr
        .parse()
        .with_context(|| format!("Invalid metrics listen address {}", listen_addr))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(metrics_addr = %addr, "Prometheus metrics server started");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
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
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
