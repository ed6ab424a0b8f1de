use anyhow::{Context, Result};
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::tokio::TokioIo;
use registry_cluster::{Cluster, HttpPeerClient, PeerClient, ServerHealth};
use registry_core::{InstanceHealthChecker, Leadership, RegistryStore};
use registry_http::{MetricsCollector, RegistryApi};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting registry-server...");

    let config = ServerConfig::load(config_path().as_deref())?;
    info!("Configuration loaded");
    info!("  - Bind: {}", config.bind);
    info!("  - Self: {}", config.advertised_address());
    info!("  - Peers: {:?}", config.peers);

    // Registry store and cluster membership
    let store = Arc::new(RegistryStore::new());
    let cluster = Arc::new(
        Cluster::new(config.cluster(), store.clone()).context("invalid cluster configuration")?,
    );

    let client: Arc<dyn PeerClient> = Arc::new(HttpPeerClient::new(cluster.config().peer_timeout));
    let server_health = Arc::new(ServerHealth::new(cluster.clone(), client));

    let leadership: Arc<dyn Leadership> = cluster.clone();
    let instance_checker = Arc::new(
        InstanceHealthChecker::new(config.health_check(), store.clone())
            .with_leadership(leadership),
    );

    let metrics = MetricsCollector::new().context("Failed to create metrics collector")?;
    let api = Arc::new(RegistryApi::new(cluster.clone(), metrics));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let probe_task = tokio::spawn(server_health.run(shutdown_rx.clone()));
    let sweep_task = tokio::spawn(instance_checker.run(shutdown_rx));
    info!("Background tasks started");

    let listener = TcpListener::bind(&config.bind).await?;
    info!("HTTP server listening on {}", config.bind);

    tokio::select! {
        result = accept_connections(listener, api) => {
            if let Err(e) = result {
                error!("Accept loop failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    join_background(vec![
        ("server health loop", probe_task),
        ("instance health checker", sweep_task),
    ])
    .await;
    info!("registry-server stopped");
    Ok(())
}

async fn accept_connections(listener: TcpListener, api: Arc<RegistryApi>) -> Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let api = api.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let api = api.clone();
                async move { api.handle(req).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Wait for background loops after shutdown, returning how many ended by panic or cancellation
async fn join_background(tasks: Vec<(&str, JoinHandle<()>)>) -> usize {
    let mut failed = 0;
    for (name, task) in tasks {
        if let Err(e) = task.await {
            error!("Background task {} ended abnormally: {}", name, e);
            failed += 1;
        }
    }
    failed
}

/// `REGISTRY_LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("REGISTRY_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// `--config <path>` on the command line, then `REGISTRY_CONFIG`
fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var_os("REGISTRY_CONFIG").map(PathBuf::from)
}
