//! Coordinator-to-node RPC.
//!
//! Each call is independent: it dials the node, sends one storage frame,
//! reads one frame back and closes. Calls to the same or different nodes
//! may run concurrently; the only shared state is a per-node permit count
//! bounding how many sockets are open to that node at once.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use stripefs_core::wire::StoragePacket;

use crate::conn::{Connection, ConnectionMode, TransportError};

/// How the striping engine reaches its nodes.
///
/// Nodes are addressed by their index in the configured ring, so the engine
/// does not care whether the other end is a TCP socket or something else.
pub trait NodeTransport: Send + Sync + 'static {
    fn node_count(&self) -> usize;

    fn call(
        &self,
        node: usize,
        request: StoragePacket,
    ) -> impl Future<Output = Result<StoragePacket, TransportError>> + Send;
}

/// One storage node.
pub struct NodeClient {
    addr: String,
    permits: Semaphore,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl NodeClient {
    pub fn new(addr: impl Into<String>, max_connections: usize) -> Self {
        Self {
            addr: addr.into(),
            permits: Semaphore::new(max_connections.max(1)),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open a connection, exchange one frame, close.
    pub async fn send_receive(&self, request: &StoragePacket) -> Result<StoragePacket, TransportError> {
        let _permit = self.permits.acquire().await.map_err(|_| TransportError::Closed)?;
        self.calls.fetch_add(1, Ordering::Relaxed);

        let mut conn = Connection::new(self.addr.as_str(), ConnectionMode::SingleExchange);
        let result = conn.send_and_receive(request).await;
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

/// Per-node call counters, for status reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeStats {
    pub addr: String,
    pub calls: u64,
    pub failures: u64,
}

/// TCP transport over a fixed, ordered node list.
#[derive(Clone)]
pub struct NodePool {
    nodes: Arc<Vec<NodeClient>>,
}

impl NodePool {
    pub fn new<S: Into<String>>(addrs: impl IntoIterator<Item = S>, max_connections_per_node: usize) -> Self {
        let nodes = addrs
            .into_iter()
            .map(|a| NodeClient::new(a, max_connections_per_node))
            .collect();
        Self {
            nodes: Arc::new(nodes),
        }
    }

    pub fn stats(&self) -> Vec<NodeStats> {
        self.nodes
            .iter()
            .map(|n| NodeStats {
                addr: n.addr.clone(),
                calls: n.calls.load(Ordering::Relaxed),
                failures: n.failures.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl NodeTransport for NodePool {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    async fn call(&self, node: usize, request: StoragePacket) -> Result<StoragePacket, TransportError> {
        let client = self.nodes.get(node).ok_or(TransportError::UnknownNode(node))?;
        client.send_receive(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use crate::service::RequestHandler;
    use stripefs_core::wire::{Frame, ResultCode, StorageOp};
    use tokio::net::TcpListener;
    use tokio::sync::broadcast;

    struct Ack;

    impl RequestHandler for Ack {
        type Packet = StoragePacket;

        fn name(&self) -> &'static str {
            "ack"
        }

        async fn handle_request(&self, request: StoragePacket) -> StoragePacket {
            request.reply().with_data(request.path.clone())
        }
    }

    #[tokio::test]
    async fn concurrent_calls_to_one_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (_tx, rx) = broadcast::channel(1);
        tokio::spawn(Server::from_listener(listener, Arc::new(Ack), ConnectionMode::SingleExchange).run(rx));

        let pool = NodePool::new([addr], 2);
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let pool = pool.clone();
            tasks.spawn(async move {
                let req = StoragePacket::request(StorageOp::Nop, format!("/p{i}"), 0);
                let resp = pool.call(0, req.clone()).await.unwrap();
                assert_eq!(resp.id, req.id);
                assert_eq!(resp.data, req.path);
            });
        }
        while let Some(done) = tasks.join_next().await {
            done.unwrap();
        }
        assert_eq!(pool.stats()[0].calls, 16);
        assert_eq!(pool.stats()[0].failures, 0);
    }

    #[tokio::test]
    async fn unknown_node_index() {
        let pool = NodePool::new(Vec::<String>::new(), 1);
        let err = pool
            .call(3, StoragePacket::status(1, ResultCode::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownNode(3)));
    }
}
