//! stripefs-core: shared types, wire format and stripe placement.
//! All other stripefs crates depend on this one.

pub mod buffer;
pub mod config;
pub mod metadata;
pub mod stripe;
pub mod wire;

pub use buffer::{BufferError, ByteBuffer};
pub use metadata::Stat;
pub use stripe::{Stripe, StripeLayout};
pub use wire::{
    CacheOp, CachePacket, Frame, ResultCode, StorageOp, StoragePacket, UpdateCommand, UpdateOp,
    WireError,
};
