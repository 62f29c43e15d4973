//! Client-side errors and their errno mapping.

use std::fmt;

use bytes::Bytes;

use stripefs_core::wire::{ResultCode, WireError};
use stripefs_services::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("server answered {result}: {}", describe(.errno, .message))]
    Remote {
        result: ResultCode,
        errno: Option<i32>,
        message: Bytes,
    },

    #[error("invalid metadata record: {0}")]
    Record(#[from] serde_json::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("{0} does not fit the wire format")]
    OutOfRange(&'static str),

    #[error("runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

fn describe(errno: &Option<i32>, message: &Bytes) -> String {
    match errno {
        Some(e) => std::io::Error::from_raw_os_error(*e).to_string(),
        None => String::from_utf8_lossy(message).into_owned(),
    }
}

impl ClientError {
    /// Errno reported to the filesystem layer.
    pub fn errno(&self) -> i32 {
        match self {
            ClientError::Remote { errno: Some(e), .. } => *e,
            ClientError::Wire(_) => libc::EINVAL,
            ClientError::OutOfRange(_) => libc::EFBIG,
            ClientError::Remote { .. }
            | ClientError::Transport(_)
            | ClientError::Record(_)
            | ClientError::Runtime(_) => libc::EIO,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.errno() == libc::ENOENT
    }
}

/// An errno value as returned to the kernel shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl Errno {
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Negated form, as FUSE callbacks return it.
    pub const fn negated(self) -> i32 {
        -self.0
    }
}

impl From<&ClientError> for Errno {
    fn from(e: &ClientError) -> Self {
        Errno(e.errno())
    }
}

impl From<ClientError> for Errno {
    fn from(e: ClientError) -> Self {
        Errno::from(&e)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

impl std::error::Error for Errno {}

pub type FsResult<T> = Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errno_passes_through() {
        let e = ClientError::Remote {
            result: ResultCode::ErrorWithMessage,
            errno: Some(libc::ENOTEMPTY),
            message: Bytes::copy_from_slice(&libc::ENOTEMPTY.to_be_bytes()),
        };
        assert_eq!(Errno::from(&e), Errno(libc::ENOTEMPTY));
        assert!(!e.is_not_found());
    }

    #[test]
    fn everything_else_is_eio() {
        let textual = ClientError::Remote {
            result: ResultCode::ErrorWithMessage,
            errno: None,
            message: Bytes::from_static(b"Fragmented result"),
        };
        assert_eq!(textual.errno(), libc::EIO);
        assert!(textual.to_string().contains("Fragmented result"));

        let closed = ClientError::Transport(TransportError::Closed);
        assert_eq!(Errno::from(closed).negated(), -libc::EIO);
    }
}
