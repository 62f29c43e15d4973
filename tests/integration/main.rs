//! stripefs integration test harness.
//!
//! Every test starts its own cluster in-process: one cache service, one
//! storage coordinator and N storage nodes, all on 127.0.0.1 with
//! OS-assigned ports and their own temp directories. Servers run on a
//! dedicated multi-thread runtime so tests can drive the blocking
//! `FileSystem` façade from the test thread.

mod cache;
mod filesystem;
mod protocol;
mod storage;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::broadcast;

use stripefs_services::{
    CacheService, ConnectionMode, MemoryCache, MetaStore, NodePool, Server, ShardStore,
    StorageCoordinator,
};

static COUNTER: AtomicU64 = AtomicU64::new(0);

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Cluster {
    pub runtime: Runtime,
    pub base: PathBuf,
    pub stripe_size: u32,
    pub cache_addr: String,
    pub storage_addr: String,
    /// Stripe directory of each node, in ring order.
    pub node_dirs: Vec<PathBuf>,
    pub cache: Arc<CacheService>,
    shutdown: broadcast::Sender<()>,
}

impl Cluster {
    pub fn start(nodes: usize, stripe_size: u32) -> Result<Self> {
        Self::start_with_dead(nodes, stripe_size, &[])
    }

    /// Like `start`, but the ring positions in `dead` point at a port
    /// nothing listens on.
    pub fn start_with_dead(nodes: usize, stripe_size: u32, dead: &[usize]) -> Result<Self> {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let base = std::env::temp_dir()
            .join(format!("stripefs-it-{}-{}", std::process::id(), n));
        let _ = std::fs::remove_dir_all(&base);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .context("failed to build server runtime")?;
        let (shutdown, _) = broadcast::channel::<()>(1);

        let (cache_addr, storage_addr, node_dirs, cache) = runtime.block_on(async {
            let mut node_addrs = Vec::new();
            let mut node_dirs = Vec::new();
            for i in 0..nodes {
                let dir = base.join(format!("node{i}"));
                if dead.contains(&i) {
                    node_addrs.push(unused_addr().await?);
                } else {
                    // Deliberately wrong until the coordinator's INIT arrives.
                    let store = ShardStore::open(&dir, 1).await?;
                    let server = bind(Arc::new(store), ConnectionMode::SingleExchange).await?;
                    node_addrs.push(server.local_addr()?.to_string());
                    tokio::spawn(server.run(shutdown.subscribe()));
                }
                node_dirs.push(dir);
            }

            let pool = Arc::new(NodePool::new(node_addrs, 8));
            let coordinator = Arc::new(StorageCoordinator::new(stripe_size, pool)?);
            // Live nodes get INIT even when a dead one fails the call.
            let init = coordinator.init_nodes().await;
            if dead.is_empty() {
                init?;
            }
            let server = bind(coordinator, ConnectionMode::Persistent).await?;
            let storage_addr = server.local_addr()?.to_string();
            tokio::spawn(server.run(shutdown.subscribe()));

            let store = MetaStore::open(base.join("meta-files"), base.join("meta-dirs"))?;
            let cache = Arc::new(CacheService::new(store, Arc::new(MemoryCache::new()), 0));
            let server = bind(cache.clone(), ConnectionMode::Persistent).await?;
            let cache_addr = server.local_addr()?.to_string();
            tokio::spawn(server.run(shutdown.subscribe()));

            Ok::<_, anyhow::Error>((cache_addr, storage_addr, node_dirs, cache))
        })?;

        Ok(Self {
            runtime,
            base,
            stripe_size,
            cache_addr,
            storage_addr,
            node_dirs,
            cache,
            shutdown,
        })
    }

    /// Stripe file for `path` at absolute `offset` on ring position `node`.
    pub fn stripe_file(&self, node: usize, path: &str, offset: u32) -> PathBuf {
        let rel = path.trim_start_matches('/');
        self.node_dirs[node].join(format!("{rel}#{offset}"))
    }

    pub fn stripe_len(&self, node: usize, path: &str, offset: u32) -> Option<u64> {
        std::fs::metadata(self.stripe_file(node, path, offset))
            .ok()
            .map(|m| m.len())
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        let _ = std::fs::remove_dir_all(&self.base);
    }
}

async fn bind<H: stripefs_services::RequestHandler>(
    handler: Arc<H>,
    mode: ConnectionMode,
) -> Result<Server<H>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(Server::from_listener(listener, handler, mode))
}

/// An address that refuses connections.
async fn unused_addr() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.to_string())
}

/// Deterministic test data.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}
