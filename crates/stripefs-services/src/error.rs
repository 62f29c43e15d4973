//! Service-side error taxonomy.
//!
//! Handlers return `ServiceError` internally. It is turned into response
//! fields only at the dispatch boundary, via [`ServiceError::wire_message`].

use bytes::Bytes;
use stripefs_core::stripe::StripeError;
use stripefs_core::wire::{ResultCode, WireError};

use crate::conn::TransportError;

/// Text reported when a striped read returns data after a hole.
pub const FRAGMENTED: &str = "Fragmented result";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("is a directory: {0}")]
    IsDir(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("corrupt metadata record {path}: {source}")]
    CorruptRecord {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Stripe(#[from] StripeError),

    #[error(transparent)]
    Wire(#[from] WireError),

    /// A node answered but reported failure.
    #[error("stripe {index} on node {node} failed with {result}")]
    Node {
        index: usize,
        node: usize,
        result: ResultCode,
        message: Bytes,
    },

    /// A node could not be reached or sent garbage.
    #[error("stripe {index} on node {node}: {source}")]
    Transport {
        index: usize,
        node: usize,
        #[source]
        source: TransportError,
    },

    #[error("stripe task failed: {0}")]
    Task(String),

    #[error("{}", FRAGMENTED)]
    Fragmented,
}

impl ServiceError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Numeric code for this error.
    pub fn errno(&self) -> i32 {
        match self {
            ServiceError::Io { source, .. } => source.raw_os_error().unwrap_or(match source.kind() {
                std::io::ErrorKind::NotFound => libc::ENOENT,
                std::io::ErrorKind::PermissionDenied => libc::EACCES,
                std::io::ErrorKind::AlreadyExists => libc::EEXIST,
                _ => libc::EIO,
            }),
            ServiceError::NotFound(_) => libc::ENOENT,
            ServiceError::NotEmpty(_) => libc::ENOTEMPTY,
            ServiceError::IsDir(_) => libc::EISDIR,
            ServiceError::InvalidArgument(_) | ServiceError::Wire(_) => libc::EINVAL,
            ServiceError::Stripe(StripeError::OffsetOverflow { .. }) => libc::EFBIG,
            ServiceError::Stripe(_) => libc::EINVAL,
            ServiceError::Node { message, .. } => message
                .as_ref()
                .try_into()
                .map(i32::from_be_bytes)
                .unwrap_or(libc::EIO),
            ServiceError::CorruptRecord { .. }
            | ServiceError::Transport { .. }
            | ServiceError::Task(_)
            | ServiceError::Fragmented => libc::EIO,
        }
    }

    /// Bytes to place in a response's `message` field.
    ///
    /// Consistency failures are reported as text since no single call
    /// failed. Node failures pass the node's own message through.
    pub fn wire_message(&self) -> Bytes {
        match self {
            ServiceError::Fragmented => Bytes::from_static(FRAGMENTED.as_bytes()),
            ServiceError::Node { message, .. } if !message.is_empty() => message.clone(),
            other => Bytes::copy_from_slice(&other.errno().to_be_bytes()),
        }
    }
}
