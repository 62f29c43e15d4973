//! Synchronous filesystem façade.
//!
//! Every method blocks the calling thread on the async clients and reports
//! failure as an [`Errno`], which is what a kernel shim hands back. This is
//! the only place in the workspace that blocks on async code, so it must not
//! be called from inside a tokio runtime.

use std::future::Future;

use bytes::Bytes;
use tokio::runtime::{Builder, Runtime};

use stripefs_core::config::ClientConfig;
use stripefs_core::metadata::Stat;

use crate::cache_client::CacheClient;
use crate::error::{ClientError, Errno, FsResult};
use crate::storage_client::StorageClient;

pub struct FileSystem {
    runtime: Runtime,
    cache: CacheClient,
    storage: StorageClient,
}

impl FileSystem {
    pub fn connect(cache_addr: &str, storage_addr: &str) -> Result<Self, ClientError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ClientError::Runtime)?;
        let (cache, storage) = runtime.block_on(async {
            let cache = CacheClient::connect(cache_addr).await?;
            let storage = StorageClient::connect(storage_addr).await?;
            Ok::<_, ClientError>((cache, storage))
        })?;
        tracing::info!(cache = cache_addr, storage = storage_addr, "filesystem connected");
        Ok(Self {
            runtime,
            cache,
            storage,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::connect(&config.cache_addr, &config.storage_addr)
    }

    fn run<T>(&self, op: &'static str, fut: impl Future<Output = Result<T, ClientError>>) -> FsResult<T> {
        self.runtime.block_on(fut).map_err(|e| {
            if e.is_not_found() {
                tracing::debug!(op, "not found");
            } else {
                tracing::warn!(op, error = %e, "filesystem call failed");
            }
            Errno::from(e)
        })
    }

    // ── Metadata ──────────────────────────────────────────────────────────────

    /// File record if there is one, otherwise the directory record.
    pub fn getattr(&self, path: &str) -> FsResult<Stat> {
        self.run("getattr", async {
            match self.cache.get_file(path).await {
                Err(e) if e.is_not_found() => self.cache.get_dir(path).await,
                other => other,
            }
        })
    }

    pub fn create(&self, path: &str, mode: u32) -> FsResult<Stat> {
        self.run("create", self.cache.set_file(path, Some(mode)))
    }

    /// Succeeds only for an existing file.
    pub fn open(&self, path: &str) -> FsResult<Stat> {
        self.run("open", self.cache.get_file(path))
    }

    /// Drops the record, then the stripes.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        self.run("unlink", async {
            self.cache.remove_file(path).await?;
            self.storage.remove(path).await
        })
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<Stat> {
        self.run("mkdir", self.cache.set_dir(path, Some(mode)))
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        self.run("rmdir", self.cache.remove_dir(path))
    }

    pub fn opendir(&self, path: &str) -> FsResult<Stat> {
        self.run("opendir", self.cache.get_dir(path))
    }

    /// Names in the directory, `.` and `..` included.
    pub fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        self.run("readdir", async { Ok(self.cache.get_dir(path).await?.entries) })
    }

    /// Metadata only; stripes stay where they are.
    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.run("rename", async {
            self.cache.rename(from, to).await?;
            Ok(())
        })
    }

    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<Stat> {
        self.run("chmod", self.cache.chmod(path, mode))
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<Stat> {
        self.run("chown", self.cache.chown(path, uid, gid))
    }

    // ── Data ──────────────────────────────────────────────────────────────────

    pub fn read(&self, path: &str, size: usize, offset: u64) -> FsResult<Bytes> {
        self.run("read", async {
            let size = u32::try_from(size).map_err(|_| ClientError::OutOfRange("read size"))?;
            let offset = wire_offset(offset)?;
            self.storage.read(path, size, offset).await
        })
    }

    pub fn write(&self, path: &str, data: &[u8], offset: u64) -> FsResult<usize> {
        self.run("write", async {
            let offset = wire_offset(offset)?;
            self.storage
                .write(path, Bytes::copy_from_slice(data), offset)
                .await
        })
    }
}

fn wire_offset(offset: u64) -> Result<u32, ClientError> {
    u32::try_from(offset).map_err(|_| ClientError::OutOfRange("offset"))
}
