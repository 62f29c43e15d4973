//! Async client for the storage coordinator.

use bytes::Bytes;
use tokio::sync::Mutex;

use stripefs_core::wire::{max_payload, Frame, StorageOp, StoragePacket};
use stripefs_services::{Connection, ConnectionMode};

use crate::error::ClientError;

pub struct StorageClient {
    conn: Mutex<Connection<StoragePacket>>,
}

impl StorageClient {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let mut conn = Connection::new(addr, ConnectionMode::Persistent);
        conn.connect().await?;
        let client = Self {
            conn: Mutex::new(conn),
        };
        client.call(StoragePacket::request(StorageOp::Init, Bytes::new(), 0)).await?;
        tracing::debug!(addr, "storage client connected");
        Ok(client)
    }

    async fn call(&self, request: StoragePacket) -> Result<StoragePacket, ClientError> {
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

    /// Up to `size` bytes from `offset`. Fewer bytes means end of data.
    pub async fn read(&self, path: &str, size: u32, offset: u32) -> Result<Bytes, ClientError> {
        fits_frame("read size", size as usize, 0)?;
        let request = StoragePacket::read_request(path_bytes(path), offset, size);
        Ok(self.call(request).await?.data)
    }

    /// Returns the number of bytes written, which is all of them.
    pub async fn write(&self, path: &str, data: Bytes, offset: u32) -> Result<usize, ClientError> {
        let len = data.len();
        fits_frame("write size", len, path.len())?;
        self.call(StoragePacket::write_request(path_bytes(path), offset, data))
            .await?;
        Ok(len)
    }

    /// Delete every stripe of `path` on every node.
    pub async fn remove(&self, path: &str) -> Result<(), ClientError> {
        self.call(StoragePacket::request(StorageOp::RemoveFile, path_bytes(path), 0))
            .await?;
        Ok(())
    }
}

fn path_bytes(path: &str) -> Bytes {
    Bytes::copy_from_slice(path.as_bytes())
}

/// `len` bytes of data must fit in one frame next to `key_len` bytes of path.
fn fits_frame(what: &'static str, len: usize, key_len: usize) -> Result<(), ClientError> {
    if len > max_payload(key_len) {
        return Err(ClientError::OutOfRange(what));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripefs_core::wire::{HEADER_SIZE, MAX_FRAME_LEN};

    #[test]
    fn payload_must_fit_one_frame() {
        assert!(fits_frame("write size", 4096, 10).is_ok());
        assert!(fits_frame("write size", MAX_FRAME_LEN - HEADER_SIZE - 10, 10).is_ok());

        let err = fits_frame("write size", MAX_FRAME_LEN - HEADER_SIZE - 9, 10).unwrap_err();
        assert_eq!(err.errno(), libc::EFBIG);
        assert!(matches!(
            fits_frame("read size", u32::MAX as usize, 0),
            Err(ClientError::OutOfRange("read size"))
        ));
    }
}
