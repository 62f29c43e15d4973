use crate::*;

use bytes::Bytes;
use libstripefs::{ClientError, StorageClient};

/// 10000 bytes over three nodes with 4096-byte stripes.
#[test]
fn test_write_stripes_over_ring() -> Result<()> {
    let cluster = Cluster::start(3, 4096)?;
    let data = pattern(10_000, 7);

    let read_back = cluster.runtime.block_on(async {
        let client = StorageClient::connect(&cluster.storage_addr).await?;
        let written = client.write("/file", Bytes::from(data.clone()), 0).await?;
        assert_eq!(written, 10_000);
        Ok::<_, ClientError>(client.read("/file", 10_000, 0).await?)
    })?;
    assert_eq!(read_back.as_ref(), &data[..]);

    assert_eq!(cluster.stripe_len(0, "/file", 0), Some(4096));
    assert_eq!(cluster.stripe_len(1, "/file", 4096), Some(4096));
    assert_eq!(cluster.stripe_len(2, "/file", 8192), Some(1808));
    // Nothing lands anywhere else.
    assert_eq!(cluster.stripe_len(1, "/file", 0), None);
    assert_eq!(cluster.stripe_len(0, "/file", 8192), None);

    let contents = std::fs::read(cluster.stripe_file(2, "/file", 8192))?;
    assert_eq!(contents, &data[8192..]);
    Ok(())
}

#[test]
fn test_read_past_end_is_empty() -> Result<()> {
    let cluster = Cluster::start(3, 4096)?;
    cluster.runtime.block_on(async {
        let client = StorageClient::connect(&cluster.storage_addr).await?;
        client.write("/file", Bytes::from(pattern(10_000, 1)), 0).await?;

        assert!(client.read("/file", 4096, 10_000).await?.is_empty());
        assert!(client.read("/never-written", 4096, 0).await?.is_empty());
        // Straddles the end: only what exists comes back.
        assert_eq!(client.read("/file", 4096, 8192).await?.len(), 1808);
        Ok::<_, anyhow::Error>(())
    })
}

/// A read spanning two stripes of a longer file: nodes cap at the stripe size.
#[test]
fn test_read_across_stripes() -> Result<()> {
    let cluster = Cluster::start(3, 4096)?;
    let data = pattern(12_288, 3);
    let part = cluster.runtime.block_on(async {
        let client = StorageClient::connect(&cluster.storage_addr).await?;
        client.write("/f", Bytes::from(data.clone()), 0).await?;
        Ok::<_, ClientError>(client.read("/f", 8192, 4096).await?)
    })?;
    assert_eq!(part.as_ref(), &data[4096..12_288]);
    Ok(())
}

/// Unaligned offsets use whole stripes starting at the offset itself.
#[test]
fn test_unaligned_offset_ring_position() -> Result<()> {
    let cluster = Cluster::start(3, 4096)?;
    let data = pattern(5000, 9);
    let offset = 4 * 4096 + 100;

    let back = cluster.runtime.block_on(async {
        let client = StorageClient::connect(&cluster.storage_addr).await?;
        client.write("/u", Bytes::from(data.clone()), offset).await?;
        Ok::<_, ClientError>(client.read("/u", 5000, offset).await?)
    })?;
    assert_eq!(back.as_ref(), &data[..]);

    // offset / stripe_size = 4, so the first stripe goes to node 4 % 3 = 1.
    assert_eq!(cluster.stripe_len(1, "/u", offset), Some(4096));
    assert_eq!(cluster.stripe_len(2, "/u", offset + 4096), Some(904));
    Ok(())
}

#[test]
fn test_remove_clears_every_node() -> Result<()> {
    let cluster = Cluster::start(3, 4096)?;
    cluster.runtime.block_on(async {
        let client = StorageClient::connect(&cluster.storage_addr).await?;
        client.write("/dir/f", Bytes::from(pattern(20_000, 2)), 0).await?;
        client.write("/dir/other", Bytes::from(pattern(10, 2)), 0).await?;
        client.remove("/dir/f").await?;
        assert!(client.read("/dir/f", 20_000, 0).await?.is_empty());
        assert_eq!(client.read("/dir/other", 10, 0).await?.len(), 10);
        // Removing again is not an error.
        client.remove("/dir/f").await?;
        Ok::<_, anyhow::Error>(())
    })?;

    for node in 0..3 {
        for stripe in 0..5u32 {
            assert_eq!(cluster.stripe_len(node, "/dir/f", stripe * 4096), None);
        }
    }
    Ok(())
}

#[test]
fn test_zero_length_write_touches_nothing() -> Result<()> {
    let cluster = Cluster::start(2, 4096)?;
    cluster.runtime.block_on(async {
        let client = StorageClient::connect(&cluster.storage_addr).await?;
        assert_eq!(client.write("/empty", Bytes::new(), 0).await?, 0);
        assert!(client.read("/empty", 0, 0).await?.is_empty());
        Ok::<_, anyhow::Error>(())
    })?;
    assert_eq!(cluster.stripe_len(0, "/empty", 0), None);
    Ok(())
}

/// A hole in the middle of a file fails the whole read.
#[test]
fn test_missing_middle_stripe_is_fragmented() -> Result<()> {
    let cluster = Cluster::start(3, 4096)?;
    cluster.runtime.block_on(async {
        let client = StorageClient::connect(&cluster.storage_addr).await?;
        client.write("/frag", Bytes::from(pattern(12_288, 4)), 0).await?;
        Ok::<_, ClientError>(())
    })?;
    std::fs::remove_file(cluster.stripe_file(1, "/frag", 4096))?;

    let err = cluster.runtime.block_on(async {
        let client = StorageClient::connect(&cluster.storage_addr).await?;
        client.read("/frag", 12_288, 0).await
    });
    match err {
        Err(ClientError::Remote { errno, message, .. }) => {
            assert_eq!(errno, None);
            assert_eq!(message.as_ref(), b"Fragmented result");
        }
        other => panic!("expected a fragmented read, got {other:?}"),
    }
    Ok(())
}

/// A write that needs an unreachable node fails as a whole.
#[test]
fn test_dead_node_fails_write() -> Result<()> {
    let cluster = Cluster::start_with_dead(3, 4096, &[2])?;
    let result = cluster.runtime.block_on(async {
        let client = StorageClient::connect(&cluster.storage_addr).await?;
        // Fits in nodes 0 and 1.
        client.write("/ok", Bytes::from(pattern(8192, 5)), 0).await?;
        client.write("/bad", Bytes::from(pattern(10_000, 5)), 0).await
    });
    let err = result.expect_err("write touching the dead node must fail");
    assert_eq!(err.errno(), libc::EIO);
    assert_eq!(cluster.stripe_len(0, "/ok", 0), Some(4096));
    Ok(())
}
