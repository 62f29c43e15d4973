//! Metadata service: cache-aside over the on-disk metadata store.
//!
//! Reads hit the fast cache first and fall back to disk, repopulating the
//! cache. Writes go to disk first, then the cache. A change to a directory's
//! children also patches the parent's cached listing in place so the next
//! `readdir` sees it without rescanning disk.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use stripefs_core::metadata::{parse_mode, Stat, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use stripefs_core::wire::{CacheOp, CachePacket, Frame, ResultCode, UpdateCommand, UpdateOp};

use crate::error::ServiceError;
use crate::kv::{CachedValue, FastCache};
use crate::meta_store::{relative, split_parent, EntryKind, MetaStore};
use crate::service::RequestHandler;

/// The two cache sub-keyspaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    File,
    Dir,
}

impl Namespace {
    fn prefix(self) -> &'static str {
        match self {
            Namespace::File => "file:",
            Namespace::Dir => "dir:",
        }
    }

    pub fn key(self, path: &str) -> String {
        format!("{}{}", self.prefix(), path)
    }
}

impl From<EntryKind> for Namespace {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::File => Namespace::File,
            EntryKind::Dir => Namespace::Dir,
        }
    }
}

/// Counters reported by the status API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub file_generation: u64,
    pub dir_generation: u64,
    pub hits: u64,
    pub misses: u64,
}

enum ListingChange<'a> {
    Add(&'a str),
    Remove(&'a str),
}

pub struct CacheService {
    store: MetaStore,
    cache: Arc<dyn FastCache>,
    default_ttl: u32,
    file_generation: AtomicU64,
    dir_generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheService {
    pub fn new(store: MetaStore, cache: Arc<dyn FastCache>, default_ttl: u32) -> Self {
        Self {
            store,
            cache,
            default_ttl,
            file_generation: AtomicU64::new(0),
            dir_generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<dyn FastCache> {
        &self.cache
    }

    pub fn store(&self) -> &MetaStore {
        &self.store
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            file_generation: self.file_generation.load(Ordering::Relaxed),
            dir_generation: self.dir_generation.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn bump(&self, ns: Namespace) {
        let counter = match ns {
            Namespace::File => &self.file_generation,
            Namespace::Dir => &self.dir_generation,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn ttl(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.default_ttl
        } else {
            requested
        }
    }

    fn load(&self, ns: Namespace, path: &str) -> Result<Stat, ServiceError> {
        match ns {
            Namespace::File => self.store.read_file(path),
            Namespace::Dir => self.store.read_dir(path),
        }
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Cache-aside lookup.
    pub fn get(&self, ns: Namespace, path: &str) -> Result<CachedValue, ServiceError> {
        let path = canonical(path)?;
        let key = ns.key(&path);
        if let Some(hit) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%key, "cache hit");
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%key, "cache miss");
        let value = Bytes::from(encode(&self.load(ns, &path)?, &path)?);
        self.cache.set(&key, value.clone(), self.default_ttl, 0);
        Ok(CachedValue { value, flags: 0 })
    }

    /// Create or replace a record and mirror it into the cache.
    pub fn set(
        &self,
        ns: Namespace,
        path: &str,
        mode: Option<u32>,
        ttl: u32,
        flags: u8,
    ) -> Result<Bytes, ServiceError> {
        let path = canonical(path)?;
        let stat = match ns {
            Namespace::File => {
                let stat = Stat::file(mode.unwrap_or(DEFAULT_FILE_MODE));
                self.store.write_file(&path, &stat)?;
                stat
            }
            Namespace::Dir => {
                self.store
                    .write_dir(&path, &Stat::dir(mode.unwrap_or(DEFAULT_DIR_MODE)))?;
                self.store.read_dir(&path)?
            }
        };
        let value = Bytes::from(encode(&stat, &path)?);
        self.cache.set(&ns.key(&path), value.clone(), self.ttl(ttl), flags);
        self.bump(ns);

        if let Some((parent, name)) = split_parent(&path) {
            self.refresh_parent(&parent, ListingChange::Add(&name));
        }
        tracing::debug!(path = %path, ns = ?ns, "record set");
        Ok(value)
    }

    pub fn remove(&self, ns: Namespace, path: &str) -> Result<(), ServiceError> {
        let path = canonical(path)?;
        match ns {
            Namespace::File => self.store.remove_file(&path)?,
            Namespace::Dir => self.store.remove_dir(&path)?,
        }
        self.cache.remove(&ns.key(&path));
        self.bump(ns);

        if let Some((parent, name)) = split_parent(&path) {
            self.refresh_parent(&parent, ListingChange::Remove(&name));
        }
        tracing::debug!(path = %path, ns = ?ns, "record removed");
        Ok(())
    }

    /// Apply an UPDATE command. Returns the record as now stored.
    pub fn update(&self, path: &str, cmd: &UpdateCommand) -> Result<Bytes, ServiceError> {
        let path = canonical(path)?;
        match cmd.op()? {
            UpdateOp::Chmod => {
                let mode = single_u32(cmd, "CHMOD")?;
                self.apply(&path, |s| s.set_permissions(mode))
            }
            UpdateOp::Chown => {
                let (uid, gid) = match (cmd.argv.len(), cmd.arg_u32(0), cmd.arg_u32(1)) {
                    (2, Some(uid), Some(gid)) => (uid, gid),
                    _ => {
                        return Err(ServiceError::InvalidArgument(
                            "CHOWN takes a 4-byte uid and a 4-byte gid".into(),
                        ))
                    }
                };
                self.apply(&path, |s| s.set_owner(uid, gid))
            }
            UpdateOp::Rename => {
                let [target] = cmd.argv.as_slice() else {
                    return Err(ServiceError::InvalidArgument("RENAME takes one path".into()));
                };
                let target = std::str::from_utf8(target)
                    .map_err(|_| ServiceError::InvalidArgument("RENAME target is not UTF-8".into()))?;
                self.rename(&path, &canonical(target)?)
            }
        }
    }

    fn apply(&self, path: &str, f: impl FnOnce(&mut Stat)) -> Result<Bytes, ServiceError> {
        let (kind, stat) = self.store.update(path, f)?;
        let ns = Namespace::from(kind);
        let value = Bytes::from(encode(&stat, path)?);
        self.cache.set(&ns.key(path), value.clone(), self.default_ttl, 0);
        self.bump(ns);
        Ok(value)
    }

    fn rename(&self, from: &str, to: &str) -> Result<Bytes, ServiceError> {
        let kind = self.store.rename(from, to)?;
        let ns = Namespace::from(kind);

        self.cache.remove(&ns.key(from));
        if kind == EntryKind::Dir {
            // Everything cached below the old path is now stale.
            let dropped = self.cache.remove_prefix(&Namespace::File.key(&format!("{from}/")))
                + self.cache.remove_prefix(&Namespace::Dir.key(&format!("{from}/")));
            tracing::debug!(from, dropped, "descendant cache entries dropped");
        }
        // The target may have been a cached file that was just replaced.
        self.cache.remove(&Namespace::File.key(to));

        let value = Bytes::from(encode(&self.load(ns, to)?, to)?);
        self.cache.set(&ns.key(to), value.clone(), self.default_ttl, 0);
        self.bump(ns);

        if let Some((parent, name)) = split_parent(from) {
            self.refresh_parent(&parent, ListingChange::Remove(&name));
        }
        if let Some((parent, name)) = split_parent(to) {
            self.refresh_parent(&parent, ListingChange::Add(&name));
        }
        tracing::debug!(from, to, "record renamed");
        Ok(value)
    }

    /// Patch the cached listing of `parent`, if it is cached at all.
    fn refresh_parent(&self, parent: &str, change: ListingChange<'_>) {
        let key = Namespace::Dir.key(parent);
        let Some(hit) = self.cache.get(&key) else {
            return;
        };
        let mut stat = match Stat::from_bytes(&hit.value) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%key, error = %e, "unreadable cached listing dropped");
                self.cache.remove(&key);
                return;
            }
        };

        match change {
            ListingChange::Add(name) => {
                if !stat.entries.iter().any(|e| e == name) {
                    stat.entries.push(name.to_string());
                    sort_listing(&mut stat.entries);
                }
            }
            ListingChange::Remove(name) => stat.entries.retain(|e| e != name),
        }
        match stat.to_bytes() {
            Ok(bytes) => self.cache.set(&key, Bytes::from(bytes), self.default_ttl, hit.flags),
            Err(_) => {
                self.cache.remove(&key);
            }
        }
        self.bump(Namespace::Dir);
    }

    fn execute(&self, op: CacheOp, request: &CachePacket) -> Result<CachePacket, ServiceError> {
        let reply = request.reply();
        let path = || {
            std::str::from_utf8(&request.key)
                .map_err(|_| ServiceError::InvalidArgument("key is not UTF-8".into()))
        };
        let mode = || {
            parse_mode(&request.value)
                .transpose()
                .map_err(|e| ServiceError::InvalidArgument(format!("bad mode: {e}")))
        };

        match op {
            CacheOp::Nop | CacheOp::Init => Ok(reply),
            CacheOp::GetFile | CacheOp::GetDir => {
                let ns = if op == CacheOp::GetFile { Namespace::File } else { Namespace::Dir };
                let hit = self.get(ns, path()?)?;
                let mut reply = reply.with_value(hit.value);
                reply.flags = hit.flags;
                Ok(reply)
            }
            CacheOp::SetFile | CacheOp::SetDir => {
                let ns = if op == CacheOp::SetFile { Namespace::File } else { Namespace::Dir };
                let value = self.set(ns, path()?, mode()?, request.time, request.flags)?;
                Ok(reply.with_value(value))
            }
            CacheOp::RemoveFile => {
                self.remove(Namespace::File, path()?)?;
                Ok(reply)
            }
            CacheOp::RemoveDir => {
                self.remove(Namespace::Dir, path()?)?;
                Ok(reply)
            }
            CacheOp::Update => {
                let cmd = UpdateCommand::decode(&request.value)?;
                let value = self.update(path()?, &cmd)?;
                Ok(reply.with_value(value))
            }
        }
    }
}

impl RequestHandler for CacheService {
    type Packet = CachePacket;

    fn name(&self) -> &'static str {
        "cache"
    }

    async fn handle_request(&self, request: CachePacket) -> CachePacket {
        let Ok(op) = request.op() else {
            return CachePacket::status(request.id, ResultCode::InvalidOp);
        };
        match self.execute(op, &request) {
            Ok(response) => response,
            Err(ServiceError::NotFound(what)) => {
                tracing::debug!(request = %request, %what, "not found");
                request.reply().fail_errno(libc::ENOENT)
            }
            Err(e) => {
                tracing::warn!(request = %request, error = %e, "cache request failed");
                request.reply().fail_message(e.wire_message())
            }
        }
    }
}

/// Canonical form used for cache keys: `/a/b`, never `/a//b/`.
fn canonical(path: &str) -> Result<String, ServiceError> {
    let rel = relative(path)?;
    Ok(format!("/{}", rel.to_string_lossy()))
}

fn single_u32(cmd: &UpdateCommand, what: &str) -> Result<u32, ServiceError> {
    match (cmd.argv.len(), cmd.arg_u32(0)) {
        (1, Some(v)) => Ok(v),
        _ => Err(ServiceError::InvalidArgument(format!("{what} takes one 4-byte argument"))),
    }
}

fn encode(stat: &Stat, path: &str) -> Result<Vec<u8>, ServiceError> {
    stat.to_bytes().map_err(|source| ServiceError::CorruptRecord {
        path: path.to_string(),
        source,
    })
}

/// `.` and `..` first, then names in byte order.
fn sort_listing(entries: &mut [String]) {
    entries.sort_by(|a, b| {
        let rank = |s: &str| match s {
            "." => 0,
            ".." => 1,
            _ => 2,
        };
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });
}
