use crate::*;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use stripefs_core::wire::{
    CacheOp, CachePacket, Frame, ResultCode, StorageOp, StoragePacket, HEADER_SIZE,
};
use stripefs_services::conn::{read_frame, write_frame};
use stripefs_services::FrameReader;

/// Id 0 is rejected before any handler runs.
#[test]
fn test_zero_id_is_invalid_packet() -> Result<()> {
    let cluster = Cluster::start(1, 4096)?;
    cluster.runtime.block_on(async {
        let mut stream = TcpStream::connect(&cluster.cache_addr).await?;
        let mut request = CachePacket::request(CacheOp::SetFile, "/x");
        request.id = 0;
        write_frame(&mut stream, &request).await?;

        let mut frames = FrameReader::<CachePacket>::new();
        let response = read_frame(&mut stream, &mut frames).await?.context("no response")?;
        assert_eq!(response.result_code(), ResultCode::InvalidPacket);
        Ok::<_, anyhow::Error>(())
    })?;
    // The handler never saw it.
    assert!(!cluster.cache.store().file_root().join("x").exists());
    Ok(())
}

#[test]
fn test_unknown_opcode_is_invalid_op() -> Result<()> {
    let cluster = Cluster::start(1, 4096)?;
    cluster.runtime.block_on(async {
        let mut stream = TcpStream::connect(&cluster.storage_addr).await?;
        let mut request = StoragePacket::request(StorageOp::Nop, Bytes::new(), 0);
        request.opcode = 0x7f;
        write_frame(&mut stream, &request).await?;

        let mut frames = FrameReader::<StoragePacket>::new();
        let response = read_frame(&mut stream, &mut frames).await?.context("no response")?;
        assert_eq!(response.id, request.id);
        assert_eq!(response.result_code(), ResultCode::InvalidOp);

        // Persistent: the same socket still serves.
        let nop = StoragePacket::request(StorageOp::Nop, Bytes::new(), 0);
        write_frame(&mut stream, &nop).await?;
        let response = read_frame(&mut stream, &mut frames).await?.context("no response")?;
        assert!(response.is_success());
        Ok::<_, anyhow::Error>(())
    })
}

/// Two requests in one write, answered in order on a persistent connection.
#[test]
fn test_pipelined_frames() -> Result<()> {
    let cluster = Cluster::start(1, 4096)?;
    cluster.runtime.block_on(async {
        let mut stream = TcpStream::connect(&cluster.cache_addr).await?;
        let first = CachePacket::request(CacheOp::SetDir, "/p");
        let second = CachePacket::request(CacheOp::GetDir, "/p");
        let mut bytes = first.to_buffer();
        bytes.extend(second.to_buffer());
        stream.write_all(&bytes).await?;

        let mut frames = FrameReader::<CachePacket>::new();
        let a = read_frame(&mut stream, &mut frames).await?.context("no response")?;
        let b = read_frame(&mut stream, &mut frames).await?.context("no response")?;
        assert_eq!((a.id, b.id), (first.id, second.id));
        assert!(a.is_success() && b.is_success());
        Ok::<_, anyhow::Error>(())
    })
}

/// A header declaring an absurd length gets INVALID_PACKET and a close.
#[test]
fn test_oversized_frame_is_rejected() -> Result<()> {
    let cluster = Cluster::start(1, 4096)?;
    cluster.runtime.block_on(async {
        let mut stream = TcpStream::connect(&cluster.cache_addr).await?;
        let mut header = [0u8; HEADER_SIZE];
        header[0..2].copy_from_slice(&7u16.to_be_bytes());
        header[16..20].copy_from_slice(&u32::MAX.to_be_bytes());
        stream.write_all(&header).await?;

        let mut frames = FrameReader::<CachePacket>::new();
        let response = read_frame(&mut stream, &mut frames).await?.context("no response")?;
        assert_eq!(response.result_code(), ResultCode::InvalidPacket);

        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).await?, 0);
        Ok::<_, anyhow::Error>(())
    })
}
