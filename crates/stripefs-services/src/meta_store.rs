//! On-disk metadata records, the slow tier behind the fast cache.
//!
//! Files and directories live under separate roots:
//!
//!   {file_root}/a/b/f          serialized Stat of file /a/b/f
//!   {dir_root}/a/b/.stripefs-dir   serialized Stat of directory /a/b
//!
//! Every directory also exists as a plain directory under `file_root` so its
//! children's file records have somewhere to go. Directory listings are
//! built from the two trees on demand.
//!
//! All I/O here is synchronous. Paths are expected to be short local
//! operations; concurrent writers to one path race at the filesystem level.

use std::fs;
use std::path::{Component, Path, PathBuf};

use stripefs_core::metadata::{Stat, DEFAULT_DIR_MODE};

use crate::error::ServiceError;

/// Name of the record file inside each directory under `dir_root`.
pub const DIR_RECORD: &str = ".stripefs-dir";

/// Whether a path names a file or a directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

pub struct MetaStore {
    file_root: PathBuf,
    dir_root: PathBuf,
}

impl MetaStore {
    /// Open both roots, creating them and the `/` record if missing.
    pub fn open(file_root: impl Into<PathBuf>, dir_root: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let store = Self {
            file_root: file_root.into(),
            dir_root: dir_root.into(),
        };
        for root in [&store.file_root, &store.dir_root] {
            fs::create_dir_all(root)
                .map_err(|e| ServiceError::io(format!("create {}", root.display()), e))?;
        }
        let root_record = store.dir_root.join(DIR_RECORD);
        if !root_record.exists() {
            write_record(&root_record, &Stat::dir(DEFAULT_DIR_MODE))?;
        }
        Ok(store)
    }

    pub fn file_root(&self) -> &Path {
        &self.file_root
    }

    pub fn dir_root(&self) -> &Path {
        &self.dir_root
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    pub fn read_file(&self, path: &str) -> Result<Stat, ServiceError> {
        let rel = relative(path)?;
        let record = self.file_root.join(&rel);
        if record.is_dir() {
            return Err(ServiceError::NotFound(path.to_string()));
        }
        read_record(&record, path)
    }

    /// Create or replace the record of file `path`. The parent directory
    /// must already exist.
    pub fn write_file(&self, path: &str, stat: &Stat) -> Result<(), ServiceError> {
        let rel = relative(path)?;
        if rel.as_os_str().is_empty() || self.dir_exists(&rel) {
            return Err(ServiceError::IsDir(path.to_string()));
        }
        self.require_parent(&rel, path)?;
        write_record(&self.file_root.join(&rel), stat)
    }

    pub fn remove_file(&self, path: &str) -> Result<(), ServiceError> {
        let rel = relative(path)?;
        let record = self.file_root.join(&rel);
        if rel.as_os_str().is_empty() || record.is_dir() {
            return Err(ServiceError::IsDir(path.to_string()));
        }
        fs::remove_file(&record).map_err(|e| not_found_or_io(e, path, "remove"))
    }

    // ── Directories ───────────────────────────────────────────────────────────

    /// Directory record with a freshly built listing.
    pub fn read_dir(&self, path: &str) -> Result<Stat, ServiceError> {
        let rel = relative(path)?;
        let mut stat = read_record(&self.dir_root.join(&rel).join(DIR_RECORD), path)?;
        stat.entries = self.listing_of(&rel)?;
        Ok(stat)
    }

    /// Create or replace directory `path`. The parent must already exist.
    pub fn write_dir(&self, path: &str, stat: &Stat) -> Result<(), ServiceError> {
        let rel = relative(path)?;
        if !rel.as_os_str().is_empty() {
            self.require_parent(&rel, path)?;
            if self.file_root.join(&rel).is_file() {
                return Err(ServiceError::InvalidArgument(format!("{path} is a file")));
            }
        }
        for dir in [self.dir_root.join(&rel), self.file_root.join(&rel)] {
            fs::create_dir_all(&dir)
                .map_err(|e| ServiceError::io(format!("create {}", dir.display()), e))?;
        }
        // Listings are rebuilt on read; never persist them.
        let mut stored = stat.clone();
        stored.entries.clear();
        write_record(&self.dir_root.join(&rel).join(DIR_RECORD), &stored)
    }

    /// Remove an empty directory.
    pub fn remove_dir(&self, path: &str) -> Result<(), ServiceError> {
        let rel = relative(path)?;
        if rel.as_os_str().is_empty() {
            return Err(ServiceError::InvalidArgument("cannot remove /".into()));
        }
        if !self.dir_exists(&rel) {
            return Err(ServiceError::NotFound(path.to_string()));
        }
        if !self.children(&rel)?.is_empty() {
            return Err(ServiceError::NotEmpty(path.to_string()));
        }
        let record_dir = self.dir_root.join(&rel);
        fs::remove_file(record_dir.join(DIR_RECORD)).map_err(|e| not_found_or_io(e, path, "remove"))?;
        fs::remove_dir(&record_dir).map_err(|e| ServiceError::io(format!("remove {}", record_dir.display()), e))?;
        let mirror = self.file_root.join(&rel);
        match fs::remove_dir(&mirror) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServiceError::io(format!("remove {}", mirror.display()), e)),
        }
    }

    /// `.`, `..` and the sorted child names of directory `path`.
    pub fn listing(&self, path: &str) -> Result<Vec<String>, ServiceError> {
        let rel = relative(path)?;
        if !self.dir_exists(&rel) {
            return Err(ServiceError::NotFound(path.to_string()));
        }
        self.listing_of(&rel)
    }

    // ── Updates ───────────────────────────────────────────────────────────────

    /// Which kind of record `path` names, if any.
    pub fn kind(&self, path: &str) -> Result<Option<EntryKind>, ServiceError> {
        let rel = relative(path)?;
        if self.dir_exists(&rel) {
            Ok(Some(EntryKind::Dir))
        } else if self.file_root.join(&rel).is_file() {
            Ok(Some(EntryKind::File))
        } else {
            Ok(None)
        }
    }

    /// Apply `f` to the record of `path` and store it. Returns the updated
    /// record (with a fresh listing for directories).
    pub fn update(&self, path: &str, f: impl FnOnce(&mut Stat)) -> Result<(EntryKind, Stat), ServiceError> {
        match self.kind(path)? {
            Some(EntryKind::File) => {
                let mut stat = self.read_file(path)?;
                f(&mut stat);
                self.write_file(path, &stat)?;
                Ok((EntryKind::File, stat))
            }
            Some(EntryKind::Dir) => {
                let mut stat = self.read_dir(path)?;
                f(&mut stat);
                self.write_dir(path, &stat)?;
                Ok((EntryKind::Dir, stat))
            }
            None => Err(ServiceError::NotFound(path.to_string())),
        }
    }

    /// Move the record at `from` to `to`, in both trees for directories.
    /// An existing file at `to` is replaced; an existing directory is not.
    pub fn rename(&self, from: &str, to: &str) -> Result<EntryKind, ServiceError> {
        let src = relative(from)?;
        let dst = relative(to)?;
        if src.as_os_str().is_empty() || dst.as_os_str().is_empty() {
            return Err(ServiceError::InvalidArgument("cannot rename /".into()));
        }
        if dst.starts_with(&src) && dst != src {
            return Err(ServiceError::InvalidArgument(format!("{to} is inside {from}")));
        }
        let kind = self
            .kind(from)?
            .ok_or_else(|| ServiceError::NotFound(from.to_string()))?;
        self.require_parent(&dst, to)?;
        if self.dir_exists(&dst) {
            return Err(ServiceError::IsDir(to.to_string()));
        }

        match kind {
            EntryKind::File => {
                let (a, b) = (self.file_root.join(&src), self.file_root.join(&dst));
                fs::rename(&a, &b).map_err(|e| ServiceError::io(format!("rename {}", a.display()), e))?;
            }
            EntryKind::Dir => {
                if self.file_root.join(&dst).is_file() {
                    return Err(ServiceError::InvalidArgument(format!("{to} is a file")));
                }
                for root in [&self.dir_root, &self.file_root] {
                    let (a, b) = (root.join(&src), root.join(&dst));
                    fs::rename(&a, &b).map_err(|e| ServiceError::io(format!("rename {}", a.display()), e))?;
                }
            }
        }
        self.update(to, Stat::touch_ctime)?;
        Ok(kind)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn dir_exists(&self, rel: &Path) -> bool {
        self.dir_root.join(rel).join(DIR_RECORD).is_file()
    }

    fn require_parent(&self, rel: &Path, path: &str) -> Result<(), ServiceError> {
        let parent = rel.parent().unwrap_or(Path::new(""));
        if self.dir_exists(parent) {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("parent of {path}")))
        }
    }

    /// Child names: file records plus subdirectories, sorted.
    fn children(&self, rel: &Path) -> Result<Vec<String>, ServiceError> {
        let mut names = Vec::new();
        collect_names(&self.file_root.join(rel), |t| t.is_file(), &mut names)?;
        collect_names(&self.dir_root.join(rel), |t| t.is_dir(), &mut names)?;
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn listing_of(&self, rel: &Path) -> Result<Vec<String>, ServiceError> {
        let mut entries = vec![".".to_string(), "..".to_string()];
        entries.extend(self.children(rel)?);
        Ok(entries)
    }
}

/// Normalise an absolute wire path into a path relative to a root.
/// `/` maps to the empty path.
pub fn relative(path: &str) -> Result<PathBuf, ServiceError> {
    if !path.starts_with('/') {
        return Err(ServiceError::InvalidArgument(format!("path {path:?} is not absolute")));
    }
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) if part == DIR_RECORD => {
                return Err(ServiceError::InvalidArgument(format!("reserved name in {path}")));
            }
            Component::Normal(part) => out.push(part),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(ServiceError::InvalidArgument(format!("bad path {path}")));
            }
        }
    }
    Ok(out)
}

/// Parent of an absolute path, and the final component. `None` for `/`.
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let rel = relative(path).ok()?;
    let name = rel.file_name()?.to_string_lossy().into_owned();
    let parent = rel
        .parent()
        .map(|p| format!("/{}", p.to_string_lossy()))
        .unwrap_or_else(|| "/".to_string());
    Some((parent, name))
}

fn collect_names(
    dir: &Path,
    keep: impl Fn(&fs::FileType) -> bool,
    out: &mut Vec<String>,
) -> Result<(), ServiceError> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ServiceError::io(format!("list {}", dir.display()), e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| ServiceError::io(format!("list {}", dir.display()), e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| ServiceError::io(format!("stat {}", entry.path().display()), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name != DIR_RECORD && keep(&file_type) {
            out.push(name);
        }
    }
    Ok(())
}

fn read_record(record: &Path, path: &str) -> Result<Stat, ServiceError> {
    let bytes = fs::read(record).map_err(|e| not_found_or_io(e, path, "read"))?;
    Stat::from_bytes(&bytes).map_err(|source| ServiceError::CorruptRecord {
        path: path.to_string(),
        source,
    })
}

fn write_record(record: &Path, stat: &Stat) -> Result<(), ServiceError> {
    let bytes = stat.to_bytes().map_err(|source| ServiceError::CorruptRecord {
        path: record.display().to_string(),
        source,
    })?;
    fs::write(record, bytes).map_err(|e| ServiceError::io(format!("write {}", record.display()), e))
}

fn not_found_or_io(e: std::io::Error, path: &str, what: &str) -> ServiceError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ServiceError::NotFound(path.to_string())
    } else {
        ServiceError::io(format!("{what} {path}"), e)
    }
}
