//! Filesystem commands, over the client façade.

use std::io::{Read, Write};

use anyhow::{Context, Result};

use libstripefs::{FileSystem, Stat};

/// Bytes per READ/WRITE request.
const CHUNK: usize = 64 * 1024;

pub fn cmd_stat(fs: &FileSystem, path: &str) -> Result<()> {
    let stat = fs.getattr(path).with_context(|| format!("stat {path}"))?;
    print_stat(path, &stat);
    Ok(())
}

pub fn cmd_ls(fs: &FileSystem, path: &str) -> Result<()> {
    for name in fs.readdir(path).with_context(|| format!("ls {path}"))? {
        println!("{name}");
    }
    Ok(())
}

pub fn cmd_mkdir(fs: &FileSystem, path: &str, mode: u32) -> Result<()> {
    fs.mkdir(path, mode).with_context(|| format!("mkdir {path}"))?;
    Ok(())
}

pub fn cmd_touch(fs: &FileSystem, path: &str, mode: u32) -> Result<()> {
    if fs.open(path).is_err() {
        fs.create(path, mode).with_context(|| format!("touch {path}"))?;
    }
    Ok(())
}

pub fn cmd_rm(fs: &FileSystem, path: &str) -> Result<()> {
    fs.unlink(path).with_context(|| format!("rm {path}"))
}

pub fn cmd_rmdir(fs: &FileSystem, path: &str) -> Result<()> {
    fs.rmdir(path).with_context(|| format!("rmdir {path}"))
}

pub fn cmd_chmod(fs: &FileSystem, mode: &str, path: &str) -> Result<()> {
    let mode = parse_octal(mode)?;
    fs.chmod(path, mode).with_context(|| format!("chmod {path}"))?;
    Ok(())
}

/// `uid:gid`; either side may be empty to leave it unchanged.
pub fn cmd_chown(fs: &FileSystem, owner: &str, path: &str) -> Result<()> {
    let (uid, gid) = owner.split_once(':').unwrap_or((owner, ""));
    let id = |s: &str| -> Result<u32> {
        if s.is_empty() {
            Ok(u32::MAX)
        } else {
            s.parse().with_context(|| format!("bad id {s:?}"))
        }
    };
    fs.chown(path, id(uid)?, id(gid)?)
        .with_context(|| format!("chown {path}"))?;
    Ok(())
}

pub fn cmd_mv(fs: &FileSystem, from: &str, to: &str) -> Result<()> {
    fs.rename(from, to).with_context(|| format!("mv {from} {to}"))
}

/// Copy a local file (or `-` for stdin) into stripefs.
pub fn cmd_put(fs: &FileSystem, local: &str, remote: &str) -> Result<()> {
    let input: Box<dyn Read> = if local == "-" {
        Box::new(std::io::stdin())
    } else {
        Box::new(std::fs::File::open(local).with_context(|| format!("open {local}"))?)
    };
    if fs.open(remote).is_err() {
        fs.create(remote, 0o644).with_context(|| format!("create {remote}"))?;
    }

    let offset = copy_chunks(input, |chunk, offset| {
        fs.write(remote, chunk, offset)
            .with_context(|| format!("write {remote} at {offset}"))?;
        Ok(())
    })
    .with_context(|| format!("copy {local}"))?;
    println!("{offset} bytes written to {remote}");
    Ok(())
}

/// Feed `input` to `write` in full `CHUNK`s, so every write starts at a
/// multiple of `CHUNK` where `cat` reads it back. Returns the byte count.
fn copy_chunks<R: Read>(mut input: R, mut write: impl FnMut(&[u8], u64) -> Result<()>) -> Result<u64> {
    let mut buf = Vec::with_capacity(CHUNK);
    let mut offset = 0u64;
    loop {
        buf.clear();
        let n = input.by_ref().take(CHUNK as u64).read_to_end(&mut buf)?;
        if n == 0 {
            break;
        }
        write(&buf, offset)?;
        offset += n as u64;
        if n < CHUNK {
            break;
        }
    }
    Ok(offset)
}

pub fn cmd_cat(fs: &FileSystem, path: &str) -> Result<()> {
    let mut out = std::io::stdout().lock();
    let mut offset = 0u64;
    loop {
        let data = fs
            .read(path, CHUNK, offset)
            .with_context(|| format!("read {path} at {offset}"))?;
        out.write_all(&data)?;
        offset += data.len() as u64;
        if data.len() < CHUNK {
            break;
        }
    }
    out.flush()?;
    Ok(())
}

pub fn parse_octal(mode: &str) -> Result<u32> {
    u32::from_str_radix(mode, 8).with_context(|| format!("bad mode {mode:?}, expected octal"))
}

fn print_stat(path: &str, stat: &Stat) {
    let kind = if stat.is_dir() { "directory" } else { "file" };
    println!("  File  : {path} ({kind})");
    println!("  Mode  : {:o}", stat.mode);
    println!("  Owner : {}:{}", stat.uid, stat.gid);
    println!("  Size  : {}", stat.size);
    println!("  Links : {}", stat.nlink);
    println!("  Times : atime {} mtime {} ctime {}", stat.atime, stat.mtime, stat.ctime);
}
