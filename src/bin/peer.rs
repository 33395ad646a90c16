use anyhow::{bail, Context, Result};
use clap::Parser;
use deltavault::cache::CacheLayer;
use deltavault::config::Config;
use deltavault::metrics::start_metrics_server;
use deltavault::network::{PeerServer, PeerService};
use deltavault::storage::{ContentStore, StorageBackend};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serve signatures, patches and blobs over QUIC
#[derive(Parser, Debug)]
#[command(name = "deltavault-peer", version)]
struct Args {
    /// JSON config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override network.bind_addr
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Store a local file and publish it under a name, as NAME=PATH
    #[arg(long = "seed", value_name = "NAME=PATH")]
    seeds: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for rustls/quinn
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        bail!("Failed to install rustls crypto provider");
    }

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.network.bind_addr = listen;
    }

    if let Some(metrics) = config.metrics.clone() {
        start_metrics_server(metrics)?;
    }

    let backend = StorageBackend::from_config(&config.storage.backend)?;
    info!("Content store: {} backend", backend.name());
    let store = Arc::new(ContentStore::new(backend, &config.storage.staging_dir).await?);
    let cache = Arc::new(CacheLayer::new(store.clone(), config.cache.clone()).await?);
    let _maintenance = cache.spawn_maintenance();

    let service =
        Arc::new(PeerService::new(cache).with_spool_dir(config.storage.staging_dir.clone()));
    for seed in &args.seeds {
        let (name, path) = seed
            .split_once('=')
            .with_context(|| format!("seed {seed:?} is not NAME=PATH"))?;
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening seed {path}"))?;
        let blob = store.put(file).await?;
        service.register(name, blob.sha256);
        info!("Seeded {} from {} ({} bytes, {})", name, path, blob.size, blob.sha256);
    }

    let server = Arc::new(PeerServer::bind(config.network.clone(), service).await?);
    println!("deltavault peer listening on {}", server.local_addr()?);

    let serving = server.clone().spawn();
    tokio::select! {
        result = serving => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
