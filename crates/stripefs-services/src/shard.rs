//! Storage node: keeps the stripes the coordinator sends it.
//!
//! Each stripe is a plain file next to where the logical file would live,
//! named after the stripe's absolute offset:
//!   {root}/dir/file#0, {root}/dir/file#12288, ...
//!
//! A write rewrites the stripe from position 0 without truncating, so a
//! shorter write over a longer stripe leaves the old tail in place.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use stripefs_core::wire::{Frame, ResultCode, StorageOp, StoragePacket};

use crate::error::ServiceError;
use crate::service::RequestHandler;

pub struct ShardStore {
    root: PathBuf,
    stripe_size: AtomicU32,
}

impl ShardStore {
    pub async fn open(root: impl Into<PathBuf>, stripe_size: u32) -> Result<Self, ServiceError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| ServiceError::io(format!("create {}", root.display()), e))?;
        Ok(Self {
            root,
            stripe_size: AtomicU32::new(stripe_size),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stripe_size(&self) -> u32 {
        self.stripe_size.load(Ordering::Relaxed)
    }

    pub fn set_stripe_size(&self, size: u32) {
        self.stripe_size.store(size, Ordering::Relaxed);
    }

    /// Host path of the logical file `path` under the root.
    fn file_path(&self, path: &[u8]) -> Result<PathBuf, ServiceError> {
        let text = std::str::from_utf8(path)
            .map_err(|_| ServiceError::InvalidArgument("path is not UTF-8".into()))?;
        let mut out = self.root.clone();
        let mut named = false;
        for component in Path::new(text).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => {
                    out.push(part);
                    named = true;
                }
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ServiceError::InvalidArgument(format!("bad path {text}")));
                }
            }
        }
        if !named {
            return Err(ServiceError::InvalidArgument(format!("bad path {text}")));
        }
        Ok(out)
    }

    pub fn stripe_path(&self, path: &[u8], offset: u32) -> Result<PathBuf, ServiceError> {
        let mut name = self.file_path(path)?.into_os_string();
        name.push(format!("#{offset}"));
        Ok(PathBuf::from(name))
    }

    pub async fn write(&self, path: &[u8], offset: u32, data: &[u8]) -> Result<(), ServiceError> {
        let target = self.stripe_path(path, offset)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::io(format!("create {}", parent.display()), e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&target)
            .await
            .map_err(|e| ServiceError::io(format!("open {}", target.display()), e))?;
        file.write_all(data)
            .await
            .map_err(|e| ServiceError::io(format!("write {}", target.display()), e))?;
        file.flush()
            .await
            .map_err(|e| ServiceError::io(format!("flush {}", target.display()), e))?;
        Ok(())
    }

    /// Up to `min(len, stripe_size)` bytes. A stripe that was never written
    /// reads as empty.
    pub async fn read(&self, path: &[u8], offset: u32, len: u32) -> Result<Bytes, ServiceError> {
        let target = self.stripe_path(path, offset)?;
        let file = match fs::File::open(&target).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Bytes::new()),
            Err(e) => return Err(ServiceError::io(format!("open {}", target.display()), e)),
        };
        let limit = len.min(self.stripe_size());
        let mut buf = Vec::with_capacity(limit as usize);
        file.take(limit as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ServiceError::io(format!("read {}", target.display()), e))?;
        Ok(Bytes::from(buf))
    }

    /// Delete every stripe of `path`. Returns how many were removed.
    pub async fn remove(&self, path: &[u8]) -> Result<usize, ServiceError> {
        let file = self.file_path(path)?;
        let (Some(dir), Some(name)) = (file.parent(), file.file_name()) else {
            return Ok(0);
        };
        let prefix = format!("{}#", name.to_string_lossy());

        let mut entries = match fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ServiceError::io(format!("list {}", dir.display()), e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ServiceError::io(format!("list {}", dir.display()), e))?
        {
            let entry_name = entry.file_name();
            let entry_name = entry_name.to_string_lossy();
            let is_stripe = entry_name
                .strip_prefix(&prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()));
            if !is_stripe {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ServiceError::io(format!("remove {}", entry.path().display()), e))
                }
            }
        }
        Ok(removed)
    }

    async fn execute(&self, op: StorageOp, request: &StoragePacket) -> Result<StoragePacket, ServiceError> {
        let reply = request.reply();
        match op {
            StorageOp::Nop => Ok(reply),
            StorageOp::Init => {
                if let Ok(raw) = <[u8; 4]>::try_from(request.message.as_ref()) {
                    let size = u32::from_be_bytes(raw);
                    if size == 0 {
                        return Err(ServiceError::InvalidArgument("stripe size 0".into()));
                    }
                    tracing::info!(stripe_size = size, "stripe size set by coordinator");
                    self.set_stripe_size(size);
                }
                Ok(reply)
            }
            StorageOp::Read => {
                let len = request.requested_len().ok_or_else(|| {
                    ServiceError::InvalidArgument("READ must carry a 4-byte length".into())
                })?;
                let data = self.read(&request.path, request.offset, len).await?;
                Ok(reply.with_data(data))
            }
            StorageOp::Write => {
                self.write(&request.path, request.offset, &request.data).await?;
                Ok(reply)
            }
            StorageOp::RemoveFile => {
                let removed = self.remove(&request.path).await?;
                tracing::debug!(path = %String::from_utf8_lossy(&request.path), removed, "stripes removed");
                Ok(reply)
            }
        }
    }
}

impl RequestHandler for ShardStore {
    type Packet = StoragePacket;

    fn name(&self) -> &'static str {
        "node"
    }

    async fn handle_request(&self, request: StoragePacket) -> StoragePacket {
        let Ok(op) = request.op() else {
            return StoragePacket::status(request.id, ResultCode::InvalidOp);
        };
        match self.execute(op, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(request = %request, error = %e, "node request failed");
                request.reply().fail_errno(e.errno())
            }
        }
    }
}
