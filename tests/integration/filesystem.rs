use crate::*;

use libstripefs::{Errno, FileSystem};

fn mount(cluster: &Cluster) -> Result<FileSystem> {
    Ok(FileSystem::connect(&cluster.cache_addr, &cluster.storage_addr)?)
}

#[test]
fn test_file_lifecycle() -> Result<()> {
    let cluster = Cluster::start(3, 4096)?;
    let fs = mount(&cluster)?;
    let data = pattern(10_000, 11);

    fs.mkdir("/home", 0o755)?;
    let created = fs.create("/home/notes", 0o644)?;
    assert!(!created.is_dir());
    assert_eq!(fs.open("/home/notes")?, created);

    assert_eq!(fs.write("/home/notes", &data, 0)?, data.len());
    assert_eq!(fs.read("/home/notes", 10_000, 0)?.as_ref(), &data[..]);
    assert!(fs.read("/home/notes", 100, 10_000)?.is_empty());

    assert_eq!(fs.readdir("/home")?, vec![".", "..", "notes"]);
    assert!(fs.getattr("/home")?.is_dir());
    assert!(!fs.getattr("/home/notes")?.is_dir());

    fs.unlink("/home/notes")?;
    assert_eq!(fs.getattr("/home/notes"), Err(Errno(libc::ENOENT)));
    assert!(fs.read("/home/notes", 10_000, 0)?.is_empty());
    assert_eq!(cluster.stripe_len(0, "/home/notes", 0), None);

    fs.rmdir("/home")?;
    assert_eq!(fs.opendir("/home").map(|_| ()), Err(Errno(libc::ENOENT)));
    Ok(())
}

#[test]
fn test_errno_mapping() -> Result<()> {
    let cluster = Cluster::start(2, 4096)?;
    let fs = mount(&cluster)?;

    assert_eq!(fs.getattr("/missing").map(|_| ()), Err(Errno(libc::ENOENT)));
    assert_eq!(fs.open("/missing").map(|_| ()), Err(Errno(libc::ENOENT)));

    fs.mkdir("/d", 0o755)?;
    fs.create("/d/f", 0o644)?;
    assert_eq!(fs.rmdir("/d"), Err(Errno(libc::ENOTEMPTY)));
    assert_eq!(fs.rmdir("/"), Err(Errno(libc::EINVAL)));
    assert_eq!(fs.create("/d", 0o644).map(|_| ()), Err(Errno(libc::EISDIR)));

    let too_far = u64::from(u32::MAX) + 1;
    assert_eq!(fs.write("/d/f", b"x", too_far), Err(Errno(libc::EFBIG)));
    Ok(())
}

/// Requests that could not travel in one frame fail locally and leave the
/// connection usable.
#[test]
fn test_oversized_transfer_is_efbig() -> Result<()> {
    let cluster = Cluster::start(2, 4096)?;
    let fs = mount(&cluster)?;
    fs.create("/big", 0o644)?;

    let huge = vec![0u8; 64 * 1024 * 1024];
    assert_eq!(fs.write("/big", &huge, 0), Err(Errno(libc::EFBIG)));
    assert_eq!(fs.read("/big", 70 * 1024 * 1024, 0).map(|_| ()), Err(Errno(libc::EFBIG)));

    assert_eq!(fs.write("/big", b"still here", 0)?, 10);
    assert_eq!(fs.read("/big", 10, 0)?.as_ref(), b"still here");
    Ok(())
}

/// Rename and permission changes go through the metadata path only.
#[test]
fn test_rename_chmod_chown() -> Result<()> {
    let cluster = Cluster::start(2, 4096)?;
    let fs = mount(&cluster)?;

    fs.mkdir("/a", 0o755)?;
    fs.create("/a/x", 0o644)?;
    fs.rename("/a", "/b")?;
    assert_eq!(fs.readdir("/")?, vec![".", "..", "b"]);
    assert_eq!(fs.readdir("/b")?, vec![".", "..", "x"]);
    assert!(fs.getattr("/a/x").is_err());

    let st = fs.chmod("/b/x", 0o600)?;
    assert_eq!(st.mode & 0o7777, 0o600);
    assert_eq!(fs.getattr("/b/x")?.mode & 0o7777, 0o600);

    let st = fs.chown("/b", 77, 88)?;
    assert!(st.is_dir());
    assert_eq!((st.uid, st.gid), (77, 88));
    Ok(())
}

/// The fast cache can be dropped at any time without losing metadata.
#[test]
fn test_survives_cache_clear() -> Result<()> {
    let cluster = Cluster::start(2, 4096)?;
    let fs = mount(&cluster)?;

    fs.mkdir("/keep", 0o700)?;
    fs.create("/keep/me", 0o640)?;
    cluster.cache.cache().clear();

    assert_eq!(fs.getattr("/keep")?.mode & 0o7777, 0o700);
    assert_eq!(fs.readdir("/keep")?, vec![".", "..", "me"]);
    assert_eq!(fs.getattr("/keep/me")?.mode & 0o7777, 0o640);
    Ok(())
}
