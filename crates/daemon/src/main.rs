//! wgsync daemon
//!
//! Serves the subnet/client API and keeps the WireGuard interface
//! document in sync with the registry.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wgsync_common::{Database, Registry};
use wgsync_daemon::config::{DaemonConfig, KeyProviderKind};
use wgsync_daemon::{
    routes, BuiltinKeyProvisioner, ClientSettings, ConfigStore, InterfaceSeed, KeyProvisioner,
    NetworkManager, Synchronizer, WgToolKeyProvisioner,
};

#[derive(Parser)]
#[command(name = "wgsyncd")]
#[command(about = "wgsync daemon - WireGuard subnet and client management")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to <store>/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// WireGuard interface document
    #[arg(long, env = "WGSYNC_DOCUMENT")]
    document: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn key_provisioner(config: &DaemonConfig) -> Arc<dyn KeyProvisioner> {
    match config.keys.provider {
        KeyProviderKind::Builtin => Arc::new(BuiltinKeyProvisioner),
        KeyProviderKind::WgTool => Arc::new(WgToolKeyProvisioner::new(
            config.keys.wg_binary.clone(),
            config.key_timeout(),
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("wgsync daemon v{}", wgsync_common::VERSION);

    // Load configuration, then apply command line overrides
    let config_path = cli.config.clone().unwrap_or_else(|| {
        cli.store
            .clone()
            .unwrap_or_else(wgsync_common::default_store_path)
            .join("config.toml")
    });
    let mut config = DaemonConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(document) = cli.document {
        config.wireguard.document_path = document;
    }

    // Ensure store directory exists
    tokio::fs::create_dir_all(&config.store_path).await?;
    let db = Database::open(config.db_path())?;
    let registry: Arc<dyn Registry> = Arc::new(db);
    let keys = key_provisioner(&config);

    let store = ConfigStore::new(config.wireguard.document_path.clone(), config.io_timeout());
    let seed = InterfaceSeed {
        address: config.wireguard.interface_address.clone(),
        listen_port: config.wireguard.listen_port,
        hooks: config.wireguard.hook_defaults(),
    };
    if store.bootstrap(keys.as_ref(), &seed).await? {
        info!("Bootstrapped {}", config.wireguard.document_path.display());
    }

    let sync = Arc::new(Synchronizer::new(
        store,
        registry.clone(),
        config.wireguard.hook_defaults(),
    ));
    let settings = ClientSettings {
        endpoint: config.wireguard.endpoint.clone(),
        dns: config.wireguard.dns.clone(),
    };
    let manager = Arc::new(NetworkManager::new(registry, sync, keys, settings));

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!("Daemon started on {}", config.listen);

    axum::serve(listener, routes::router(manager))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("Daemon shutdown complete");
    Ok(())
}
