use clap::Parser;
use pathgate::admin::{PKG_NAME, VERSION};
use pathgate::config::Config;
use pathgate::pool::ConnectionPool;
use pathgate::proxy::ProxyServer;
use pathgate::routes::RouteTable;
use pathgate::selector::SelectorRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let registry = SelectorRegistry::default();

    let config = Config::load(&args.config, &registry).map_err(|e| {
        error!(path = %args.config.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %args.config.display(), "Configuration loaded");
    print_startup_banner(&config, &registry);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let connections = Arc::new(ConnectionPool::new(config.pool_config()));
    let routes = Arc::new(RouteTable::new(
        config.route_keys()?,
        &config.algorithm,
        &registry,
        Arc::clone(&connections),
        config.health_check_config(),
        shutdown_rx.clone(),
    )?);

    let server = ProxyServer::bind(
        config.listen_addr()?,
        routes,
        shutdown_rx,
        config.shutdown_grace(),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to start load balancer");
        e
    })?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Load balancer error");
        }
    });

    wait_for_signal().await?;

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    if let Err(e) = server_handle.await {
        warn!(error = %e, "Load balancer task did not finish cleanly");
    }

    let stats = connections.stats();
    info!(
        requests = stats.get_total_requests(),
        probes = stats.get_probes(),
        "Shutdown complete"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    Ok(())
}

fn print_startup_banner(config: &Config, registry: &SelectorRegistry) {
    info!(name = PKG_NAME, version = VERSION, "Starting load balancer");
    info!(
        bind = %config.bind,
        port = config.port,
        algorithm = %config.algorithm,
        available = ?registry.names(),
        "Server configuration"
    );
    info!(routes = ?config.paths, "Configured routes");
    info!(
        path = %config.health_check.path,
        interval_secs = config.health_check.interval_secs,
        timeout_secs = config.health_check.timeout_secs,
        unhealthy_threshold = config.health_check.unhealthy_threshold,
        healthy_threshold = config.health_check.healthy_threshold,
        "Health check settings"
    );
    info!(
        pool_max_idle = config.pool.max_idle_per_host,
        pool_idle_timeout_secs = config.pool.idle_timeout_secs,
        shutdown_grace_secs = config.shutdown_grace_secs,
        "Connection settings"
    );
}
