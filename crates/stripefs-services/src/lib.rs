//! stripefs-services: the connection layer and the three services built on it.
//!
//! - storage coordinator (`striping`): stripes client data over the nodes
//! - storage node (`shard`): keeps stripe files on local disk
//! - cache service (`cache_service`): metadata with a fast cache in front

pub mod cache_service;
pub mod conn;
pub mod error;
pub mod kv;
pub mod meta_store;
pub mod node_pool;
pub mod server;
pub mod service;
pub mod shard;
pub mod striping;

pub use cache_service::{CacheService, CacheStats, Namespace};
pub use conn::{Connection, ConnectionMode, FrameReader, TransportError};
pub use error::ServiceError;
pub use kv::{CachedValue, FastCache, MemoryCache};
pub use meta_store::{EntryKind, MetaStore};
pub use node_pool::{NodeClient, NodePool, NodeStats, NodeTransport};
pub use server::Server;
pub use service::RequestHandler;
pub use shard::ShardStore;
pub use striping::{ReadAggregate, StorageCoordinator};
