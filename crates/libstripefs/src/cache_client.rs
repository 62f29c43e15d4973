//! Async client for the cache service.

use bytes::Bytes;
use tokio::sync::Mutex;

use stripefs_core::metadata::Stat;
use stripefs_core::wire::{CacheOp, CachePacket, Frame, UpdateCommand};
use stripefs_services::{Connection, ConnectionMode};

use crate::error::ClientError;

/// One persistent connection; requests are serialised on it.
pub struct CacheClient {
    conn: Mutex<Connection<CachePacket>>,
}

impl CacheClient {
    /// Connect and say INIT.
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let mut conn = Connection::new(addr, ConnectionMode::Persistent);
        conn.connect().await?;
        let client = Self {
            conn: Mutex::new(conn),
        };
        client.call(CachePacket::request(CacheOp::Init, Bytes::new())).await?;
        tracing::debug!(addr, "cache client connected");
        Ok(client)
    }

    async fn call(&self, request: CachePacket) -> Result<CachePacket, ClientError> {
        let response = self.conn.lock().await.send_and_receive(&request).await?;
        if !response.is_success() {
            return Err(ClientError::Remote {
                result: response.result_code(),
                errno: response.errno(),
                message: response.message,
            });
        }
        Ok(response)
    }

    async fn call_stat(&self, request: CachePacket) -> Result<Stat, ClientError> {
        let response = self.call(request).await?;
        Ok(Stat::from_bytes(&response.value)?)
    }

    pub async fn get_file(&self, path: &str) -> Result<Stat, ClientError> {
        self.call_stat(CachePacket::request(CacheOp::GetFile, key(path))).await
    }

    pub async fn get_dir(&self, path: &str) -> Result<Stat, ClientError> {
        self.call_stat(CachePacket::request(CacheOp::GetDir, key(path))).await
    }

    /// `None` leaves the mode to the service default.
    pub async fn set_file(&self, path: &str, mode: Option<u32>) -> Result<Stat, ClientError> {
        self.set_file_with_ttl(path, mode, 0).await
    }

    pub async fn set_file_with_ttl(
        &self,
        path: &str,
        mode: Option<u32>,
        ttl: u32,
    ) -> Result<Stat, ClientError> {
        self.call_stat(set_request(CacheOp::SetFile, path, mode, ttl)).await
    }

    pub async fn set_dir(&self, path: &str, mode: Option<u32>) -> Result<Stat, ClientError> {
        self.set_dir_with_ttl(path, mode, 0).await
    }

    pub async fn set_dir_with_ttl(
        &self,
        path: &str,
        mode: Option<u32>,
        ttl: u32,
    ) -> Result<Stat, ClientError> {
        self.call_stat(set_request(CacheOp::SetDir, path, mode, ttl)).await
    }

    pub async fn remove_file(&self, path: &str) -> Result<(), ClientError> {
        self.call(CachePacket::request(CacheOp::RemoveFile, key(path))).await?;
        Ok(())
    }

    pub async fn remove_dir(&self, path: &str) -> Result<(), ClientError> {
        self.call(CachePacket::request(CacheOp::RemoveDir, key(path))).await?;
        Ok(())
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> Result<Stat, ClientError> {
        self.update(path, UpdateCommand::chmod(mode)).await
    }

    /// `u32::MAX` for either id leaves it unchanged.
    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<Stat, ClientError> {
        self.update(path, UpdateCommand::chown(uid, gid)).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<Stat, ClientError> {
        self.update(from, UpdateCommand::rename(key(to))).await
    }

    async fn update(&self, path: &str, cmd: UpdateCommand) -> Result<Stat, ClientError> {
        let request = CachePacket::request(CacheOp::Update, key(path)).with_value(cmd.encode()?);
        self.call_stat(request).await
    }
}

fn key(path: &str) -> Bytes {
    Bytes::copy_from_slice(path.as_bytes())
}

fn set_request(op: CacheOp, path: &str, mode: Option<u32>, ttl: u32) -> CachePacket {
    let value = mode.map(|m| m.to_string()).unwrap_or_default();
    CachePacket::request(op, key(path))
        .with_value(value)
        .with_time(ttl)
}
