//! File and directory attribute records.
//!
//! The cache service stores one `Stat` per path and ships it to clients as
//! an opaque serialized blob.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const DEFAULT_FILE_MODE: u32 = libc::S_IFREG as u32 | 0o644;
pub const DEFAULT_DIR_MODE: u32 = libc::S_IFDIR as u32 | 0o755;

const TYPE_MASK: u32 = libc::S_IFMT as u32;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stat {
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    /// Directory listing, including `.` and `..`. Empty for files.
    pub entries: Vec<String>,
}

impl Stat {
    /// Fresh regular-file record. Missing type bits are filled in.
    pub fn file(mode: u32) -> Self {
        Self::with_mode(with_type(mode, libc::S_IFREG as u32), 1)
    }

    /// Fresh directory record.
    pub fn dir(mode: u32) -> Self {
        Self::with_mode(with_type(mode, libc::S_IFDIR as u32), 2)
    }

    fn with_mode(mode: u32, nlink: u64) -> Self {
        let now = unix_now();
        Self {
            mode,
            nlink,
            uid: current_uid(),
            gid: current_gid(),
            blksize: 4096,
            atime: now,
            mtime: now,
            ctime: now,
            ..Default::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & TYPE_MASK == libc::S_IFDIR as u32
    }

    /// Replace permission bits, keeping the file type.
    pub fn set_permissions(&mut self, mode: u32) {
        self.mode = (self.mode & TYPE_MASK) | (mode & !TYPE_MASK);
        self.touch_ctime();
    }

    /// `u32::MAX` leaves the corresponding id unchanged.
    pub fn set_owner(&mut self, uid: u32, gid: u32) {
        if uid != u32::MAX {
            self.uid = uid;
        }
        if gid != u32::MAX {
            self.gid = gid;
        }
        self.touch_ctime();
    }

    pub fn touch_ctime(&mut self) {
        self.ctime = unix_now();
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Parse a decimal mode string as sent in SET requests. Empty means `None`.
pub fn parse_mode(value: &[u8]) -> Option<Result<u32, std::num::ParseIntError>> {
    let text = String::from_utf8_lossy(value);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.parse())
}

fn with_type(mode: u32, kind: u32) -> u32 {
    if mode & TYPE_MASK == 0 {
        mode | kind
    } else {
        mode
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

fn current_gid() -> u32 {
    // SAFETY: getgid has no preconditions and cannot fail.
    unsafe { libc::getgid() }
}
