use crate::*;

use libstripefs::{CacheClient, ClientError};
use stripefs_services::Namespace;

#[test]
fn test_directory_tree_round_trip() -> Result<()> {
    let cluster = Cluster::start(1, 4096)?;
    cluster.runtime.block_on(async {
        let client = CacheClient::connect(&cluster.cache_addr).await?;
        let dir = client.set_dir("/docs", Some(0o750)).await?;
        assert!(dir.is_dir());
        assert_eq!(dir.mode & 0o7777, 0o750);

        client.set_file("/docs/a.txt", None).await?;
        client.set_file("/docs/b.txt", Some(0o600)).await?;
        client.set_dir("/docs/sub", None).await?;

        let listing = client.get_dir("/docs").await?;
        assert_eq!(listing.entries, vec![".", "..", "a.txt", "b.txt", "sub"]);

        let b = client.get_file("/docs/b.txt").await?;
        assert!(!b.is_dir());
        assert_eq!(b.mode & 0o7777, 0o600);

        let err = client.remove_dir("/docs").await.expect_err("directory is not empty");
        assert_eq!(err.errno(), libc::ENOTEMPTY);

        client.remove_file("/docs/a.txt").await?;
        client.remove_file("/docs/b.txt").await?;
        client.remove_dir("/docs/sub").await?;
        client.remove_dir("/docs").await?;

        let root = client.get_dir("/").await?;
        assert_eq!(root.entries, vec![".", ".."]);
        Ok::<_, ClientError>(())
    })?;
    Ok(())
}

#[test]
fn test_missing_records_are_enoent() -> Result<()> {
    let cluster = Cluster::start(1, 4096)?;
    cluster.runtime.block_on(async {
        let client = CacheClient::connect(&cluster.cache_addr).await?;
        let err = client.get_file("/nope").await.expect_err("no such file");
        assert!(err.is_not_found());

        // A file is not a directory and vice versa.
        client.set_file("/f", None).await?;
        client.set_dir("/d", None).await?;
        assert!(client.get_dir("/f").await.expect_err("file").is_not_found());
        assert!(client.get_file("/d").await.expect_err("dir").is_not_found());

        // No parent.
        let err = client.set_file("/missing/f", None).await.expect_err("no parent");
        assert!(err.is_not_found());
        Ok::<_, ClientError>(())
    })?;
    Ok(())
}

#[test]
fn test_updates() -> Result<()> {
    let cluster = Cluster::start(1, 4096)?;
    cluster.runtime.block_on(async {
        let client = CacheClient::connect(&cluster.cache_addr).await?;
        client.set_dir("/d", None).await?;
        let created = client.set_file("/d/f", Some(0o644)).await?;

        let changed = client.chmod("/d/f", 0o400).await?;
        assert_eq!(changed.mode & 0o7777, 0o400);
        assert!(!changed.is_dir());
        assert!(changed.ctime >= created.ctime);

        let owned = client.chown("/d/f", 1234, u32::MAX).await?;
        assert_eq!(owned.uid, 1234);
        assert_eq!(owned.gid, created.gid);

        client.rename("/d/f", "/g").await?;
        assert!(client.get_file("/d/f").await.expect_err("moved").is_not_found());
        assert_eq!(client.get_file("/g").await?.mode & 0o7777, 0o400);
        assert_eq!(client.get_dir("/d").await?.entries, vec![".", ".."]);
        assert_eq!(client.get_dir("/").await?.entries, vec![".", "..", "d", "g"]);
        Ok::<_, ClientError>(())
    })?;
    Ok(())
}

/// Records survive the fast cache being emptied and come back into it.
#[test]
fn test_cache_aside_over_the_wire() -> Result<()> {
    let cluster = Cluster::start(1, 4096)?;
    cluster.runtime.block_on(async {
        let client = CacheClient::connect(&cluster.cache_addr).await?;
        let created = client.set_file_with_ttl("/f", Some(0o640), 60).await?;

        let hit = client.get_file("/f").await?;
        assert_eq!(hit, created);
        assert_eq!(cluster.cache.stats().hits, 1);

        cluster.cache.cache().clear();
        let miss = client.get_file("/f").await?;
        assert_eq!(miss, created);
        assert_eq!(cluster.cache.stats().misses, 1);
        assert!(cluster.cache.cache().get(&Namespace::File.key("/f")).is_some());
        Ok::<_, ClientError>(())
    })?;
    Ok(())
}

/// Many clients, one service.
#[test]
fn test_concurrent_clients() -> Result<()> {
    let cluster = Cluster::start(1, 4096)?;
    cluster.runtime.block_on(async {
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let addr = cluster.cache_addr.clone();
            tasks.spawn(async move {
                let client = CacheClient::connect(&addr).await?;
                for j in 0..16 {
                    client.set_file(&format!("/c{i}-{j}"), None).await?;
                }
                Ok::<_, ClientError>(())
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined??;
        }
        let client = CacheClient::connect(&cluster.cache_addr).await?;
        assert_eq!(client.get_dir("/").await?.entries.len(), 2 + 8 * 16);
        Ok::<_, anyhow::Error>(())
    })
}
