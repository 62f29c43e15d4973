//! Wiring for each daemon role.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use stripefs_core::config::StripeConfig;
use stripefs_services::{
    CacheService, ConnectionMode, FastCache, MemoryCache, MetaStore, NodePool, RequestHandler,
    Server, ShardStore, StorageCoordinator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Cache,
    Storage,
    Node,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Cache => "cache",
            Role::Storage => "storage",
            Role::Node => "node",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(Role::Cache),
            "storage" => Ok(Role::Storage),
            "node" => Ok(Role::Node),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

pub async fn run(role: Role, config: StripeConfig) -> Result<()> {
    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let bind = &config.network.bind;
    let api = stripefs_api::ApiState::new(role.name(), config.storage.stripe_size);

    // ── Service ──────────────────────────────────────────────────────────────
    let (server_task, api) = match role {
        Role::Cache => {
            let store = MetaStore::open(
                &config.cache.file_metadata_dir,
                &config.cache.dir_metadata_dir,
            )
            .context("failed to open metadata store")?;
            tracing::info!(
                files = %config.cache.file_metadata_dir.display(),
                dirs = %config.cache.dir_metadata_dir.display(),
                default_ttl = config.cache.default_ttl,
                "metadata store ready"
            );
            let fast: Arc<dyn FastCache> = Arc::new(MemoryCache::new());
            let service = Arc::new(CacheService::new(store, fast, config.cache.default_ttl));
            let addr = format!("{bind}:{}", config.network.cache_port);
            let task = spawn_server(&addr, service.clone(), ConnectionMode::Persistent, &shutdown_tx).await?;
            (task, api.with_cache(service))
        }

        Role::Storage => {
            let pool = NodePool::new(
                config.storage.nodes.iter().cloned(),
                config.storage.max_connections_per_node,
            );
            let coordinator = Arc::new(
                StorageCoordinator::new(config.storage.stripe_size, Arc::new(pool.clone()))
                    .context("invalid stripe layout")?,
            );
            tracing::info!(
                stripe_size = config.storage.stripe_size,
                nodes = ?config.storage.nodes,
                "storage coordinator ready"
            );
            // Nodes that are not up yet keep their own stripe size until the
            // next coordinator start.
            if let Err(e) = coordinator.init_nodes().await {
                tracing::warn!(error = %e, "failed to push stripe size to every node");
            }
            let addr = format!("{bind}:{}", config.network.storage_port);
            let task = spawn_server(&addr, coordinator, ConnectionMode::Persistent, &shutdown_tx).await?;
            (task, api.with_nodes(pool))
        }

        Role::Node => {
            let store = ShardStore::open(&config.storage.data_dir, config.storage.stripe_size)
                .await
                .context("failed to open stripe directory")?;
            tracing::info!(root = %store.root().display(), "storage node ready");
            let addr = format!("{bind}:{}", config.network.node_port);
            let task =
                spawn_server(&addr, Arc::new(store), ConnectionMode::SingleExchange, &shutdown_tx)
                    .await?;
            (task, api)
        }
    };

    // ── Status API ───────────────────────────────────────────────────────────
    let api_port = config.network.api_port;
    if api_port != 0 {
        tokio::spawn(async move {
            if let Err(e) = stripefs_api::serve(api, api_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = server_task        => tracing::error!("server exited: {:?}", r),
    }

    Ok(())
}

async fn spawn_server<H: RequestHandler>(
    addr: &str,
    handler: Arc<H>,
    mode: ConnectionMode,
    shutdown: &broadcast::Sender<()>,
) -> Result<tokio::task::JoinHandle<Result<()>>> {
    let server = Server::bind(addr, handler, mode).await?;
    Ok(tokio::spawn(server.run(shutdown.subscribe())))
}
