//! libstripefs: client side of stripefs.
//!
//! [`CacheClient`] and [`StorageClient`] speak the wire protocols
//! asynchronously. [`FileSystem`] wraps both behind blocking,
//! errno-returning calls for a kernel shim.

pub mod cache_client;
pub mod error;
pub mod fs;
pub mod storage_client;

pub use cache_client::CacheClient;
pub use error::{ClientError, Errno, FsResult};
pub use fs::FileSystem;
pub use storage_client::StorageClient;
pub use stripefs_core::metadata::Stat;
