//! HTTP API handlers: daemon state as JSON.

pub mod cache;
pub mod status;

use std::sync::Arc;
use std::time::Instant;

use stripefs_services::{CacheService, NodePool};

#[derive(Clone)]
pub struct ApiState {
    /// "cache", "storage" or "node".
    pub role: &'static str,
    pub stripe_size: u32,
    /// Present when serving the cache role.
    pub cache: Option<Arc<CacheService>>,
    /// Present when serving the storage role.
    pub nodes: Option<NodePool>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(role: &'static str, stripe_size: u32) -> Self {
        Self {
            role,
            stripe_size,
            cache: None,
            nodes: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_nodes(mut self, nodes: NodePool) -> Self {
        self.nodes = Some(nodes);
        self
    }
}

pub use cache::{handle_cache, handle_cache_clear};
pub use status::handle_status;
