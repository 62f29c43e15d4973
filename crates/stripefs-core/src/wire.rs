//! stripefs wire format: framed request/response packets.
//!
//! Both services speak the same frame layout. A frame is a fixed 20-byte
//! header followed by three variable-length fields:
//!
//! ```text
//!  0      2     3      4     5         7    8            12         16         20
//!  | id   | op  | res  | flg | msg_len | -- | offset/time | key_len  | val_len  |
//!  message[msg_len] key[key_len] value[val_len]
//! ```
//!
//! The storage family names the fields `offset`/`path`/`data`, the cache
//! family `time`/`key`/`value`. All integers are big-endian. The header alone
//! is enough to compute the total frame length, which is what lets a reader
//! reassemble frames from a byte stream without an outer length prefix.

use std::fmt;

use bytes::Bytes;
use rand::Rng;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::buffer::{BufferError, ByteBuffer};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Fixed header length shared by every frame.
pub const HEADER_SIZE: usize = 20;

/// Read chunk size, and the bound on control frames.
pub const MAX_PACKET_SIZE: usize = 8192;

/// Upper bound on a declared frame length. Anything larger is treated as a
/// corrupt header rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Correlation id reserved as "invalid".
pub const INVALID_ID: u16 = 0;

// ── Header ────────────────────────────────────────────────────────────────────

/// Zero-copy view of the fixed header.
///
/// Used to peek at the declared field lengths of a partially received frame.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RawHeader {
    pub id: U16<BigEndian>,
    pub opcode: u8,
    pub result: u8,
    pub flags: u8,
    pub message_len: U16<BigEndian>,
    /// Reserved, must be zero.
    pub pad: u8,
    /// `offset` for storage frames, `time` for cache frames.
    pub slot: U32<BigEndian>,
    pub key_len: U32<BigEndian>,
    pub value_len: U32<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(RawHeader, [u8; HEADER_SIZE]);

/// Total frame length declared by the first `HEADER_SIZE` bytes of `header`.
pub fn packet_size(header: &[u8]) -> Result<usize, WireError> {
    let raw = RawHeader::read_from_prefix(header).ok_or(WireError::Truncated {
        needed: HEADER_SIZE,
        available: header.len(),
    })?;
    let total = HEADER_SIZE as u64
        + raw.message_len.get() as u64
        + raw.key_len.get() as u64
        + raw.value_len.get() as u64;
    if total > MAX_FRAME_LEN as u64 {
        return Err(WireError::FrameTooLarge(total));
    }
    Ok(total as usize)
}

/// Largest data section a frame can carry next to a `key_len`-byte path
/// and an empty message.
pub fn max_payload(key_len: usize) -> usize {
    MAX_FRAME_LEN.saturating_sub(HEADER_SIZE + key_len)
}

/// Fresh non-zero correlation id.
pub fn generate_id() -> u16 {
    rand::thread_rng().gen_range(1..=u16::MAX)
}

// ── Frame trait ───────────────────────────────────────────────────────────────

/// A packet type that can travel over a stripefs connection.
pub trait Frame: Sized + Send + Sync + 'static {
    const HEADER_SIZE: usize = HEADER_SIZE;
    const MAX_PACKET_SIZE: usize = MAX_PACKET_SIZE;

    /// Expected total length of the frame whose header starts `partial`.
    fn packet_size(partial: &[u8]) -> Result<usize, WireError> {
        packet_size(partial)
    }

    fn from_buffer(bytes: &[u8]) -> Result<Self, WireError>;

    fn to_buffer(&self) -> Vec<u8>;

    fn id(&self) -> u16;

    /// Bare response carrying only an id and a result code. Used when a
    /// request could not be decoded or never reached a handler.
    fn status(id: u16, result: ResultCode) -> Self;

    fn result_code(&self) -> ResultCode;
}

// ── Codes ─────────────────────────────────────────────────────────────────────

/// Response status. Unrecognised bytes decode as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0x00,
    InvalidPacket = 0x01,
    InvalidOp = 0x02,
    ErrorWithMessage = 0x04,
    Unknown = 0xff,
}

impl From<u8> for ResultCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ResultCode::Success,
            0x01 => ResultCode::InvalidPacket,
            0x02 => ResultCode::InvalidOp,
            0x04 => ResultCode::ErrorWithMessage,
            _ => ResultCode::Unknown,
        }
    }
}

impl From<ResultCode> for u8 {
    fn from(c: ResultCode) -> u8 {
        c as u8
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultCode::Success => "SUCCESS",
            ResultCode::InvalidPacket => "INVALID_PACKET",
            ResultCode::InvalidOp => "INVALID_OP",
            ResultCode::ErrorWithMessage => "ERROR_WITH_MESSAGE",
            ResultCode::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Storage service opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageOp {
    Nop = 0x00,
    Init = 0x01,
    Read = 0x02,
    Write = 0x03,
    RemoveFile = 0x04,
}

impl TryFrom<u8> for StorageOp {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(StorageOp::Nop),
            0x01 => Ok(StorageOp::Init),
            0x02 => Ok(StorageOp::Read),
            0x03 => Ok(StorageOp::Write),
            0x04 => Ok(StorageOp::RemoveFile),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl From<StorageOp> for u8 {
    fn from(op: StorageOp) -> u8 {
        op as u8
    }
}

/// Cache service opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheOp {
    Nop = 0x00,
    Init = 0x01,
    GetFile = 0x02,
    GetDir = 0x03,
    SetFile = 0x04,
    SetDir = 0x05,
    RemoveFile = 0x06,
    RemoveDir = 0x07,
    Update = 0x08,
}

impl TryFrom<u8> for CacheOp {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(CacheOp::Nop),
            0x01 => Ok(CacheOp::Init),
            0x02 => Ok(CacheOp::GetFile),
            0x03 => Ok(CacheOp::GetDir),
            0x04 => Ok(CacheOp::SetFile),
            0x05 => Ok(CacheOp::SetDir),
            0x06 => Ok(CacheOp::RemoveFile),
            0x07 => Ok(CacheOp::RemoveDir),
            0x08 => Ok(CacheOp::Update),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl From<CacheOp> for u8 {
    fn from(op: CacheOp) -> u8 {
        op as u8
    }
}

/// Sub-operations carried by an UPDATE request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateOp {
    Chmod = 0x01,
    Chown = 0x02,
    Rename = 0x03,
}

impl TryFrom<u8> for UpdateOp {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(UpdateOp::Chmod),
            0x02 => Ok(UpdateOp::Chown),
            0x03 => Ok(UpdateOp::Rename),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

// ── Frame codec ───────────────────────────────────────────────────────────────

/// Field set shared by both packet families.
struct Envelope {
    id: u16,
    opcode: u8,
    result: u8,
    flags: u8,
    slot: u32,
    message: Bytes,
    key: Bytes,
    value: Bytes,
}

fn encode(id: u16, opcode: u8, result: u8, flags: u8, slot: u32, fields: [&[u8]; 3]) -> Vec<u8> {
    // message_len is 16 bits wide; longer messages are cut.
    let message = &fields[0][..fields[0].len().min(u16::MAX as usize)];
    let key = fields[1];
    let value = fields[2];

    let mut buf = ByteBuffer::with_capacity(HEADER_SIZE + message.len() + key.len() + value.len());
    buf.write_u16(id);
    buf.write_u8(opcode);
    buf.write_u8(result);
    buf.write_u8(flags);
    let message_len_pos = buf.position();
    buf.write_u16(0);
    buf.write_u8(0);
    buf.write_u32(slot);
    buf.write_u32(key.len() as u32);
    buf.write_u32(value.len() as u32);

    buf.write_bytes(message);
    buf.write_bytes(key);
    buf.write_bytes(value);

    // Backfill now that the message has been clamped and written. The
    // position is inside the header, so the patch cannot fail.
    let _ = buf.set_u16(message_len_pos, message.len() as u16);
    buf.into_inner()
}

fn decode(bytes: &[u8]) -> Result<Envelope, WireError> {
    let expected = packet_size(bytes)?;
    if bytes.len() < expected {
        return Err(WireError::Truncated {
            needed: expected,
            available: bytes.len(),
        });
    }

    let mut buf = ByteBuffer::from_vec(bytes[..expected].to_vec());
    let id = buf.read_u16()?;
    let opcode = buf.read_u8()?;
    let result = buf.read_u8()?;
    let flags = buf.read_u8()?;
    let message_len = buf.read_u16()? as usize;
    buf.step(1);
    let slot = buf.read_u32()?;
    let key_len = buf.read_u32()? as usize;
    let value_len = buf.read_u32()? as usize;

    let message = Bytes::copy_from_slice(buf.read_bytes(message_len)?);
    let key = Bytes::copy_from_slice(buf.read_bytes(key_len)?);
    let value = Bytes::copy_from_slice(buf.read_bytes(value_len)?);

    Ok(Envelope {
        id,
        opcode,
        result,
        flags,
        slot,
        message,
        key,
        value,
    })
}

fn errno_of(message: &[u8]) -> Option<i32> {
    let raw: [u8; 4] = message.try_into().ok()?;
    Some(i32::from_be_bytes(raw))
}

// ── Storage packet ────────────────────────────────────────────────────────────

/// Content request/response exchanged with the storage coordinator and
/// between the coordinator and its nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoragePacket {
    pub id: u16,
    pub opcode: u8,
    pub result: u8,
    pub flags: u8,
    /// Byte offset within the logical file.
    pub offset: u32,
    /// Error detail, usually a 4-byte big-endian errno.
    pub message: Bytes,
    pub path: Bytes,
    /// WRITE payload or READ result. A READ request carries the requested
    /// length here as a 4-byte big-endian integer.
    pub data: Bytes,
}

impl StoragePacket {
    /// Request with a fresh correlation id.
    pub fn request(op: StorageOp, path: impl Into<Bytes>, offset: u32) -> Self {
        Self {
            id: generate_id(),
            opcode: op.into(),
            path: path.into(),
            offset,
            ..Default::default()
        }
    }

    pub fn read_request(path: impl Into<Bytes>, offset: u32, len: u32) -> Self {
        Self::request(StorageOp::Read, path, offset).with_data(len.to_be_bytes().to_vec())
    }

    pub fn write_request(path: impl Into<Bytes>, offset: u32, data: impl Into<Bytes>) -> Self {
        Self::request(StorageOp::Write, path, offset).with_data(data)
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<Bytes>) -> Self {
        self.message = message.into();
        self
    }

    /// Successful, empty response matching this request.
    pub fn reply(&self) -> Self {
        Self {
            id: self.id,
            opcode: self.opcode,
            offset: self.offset,
            ..Default::default()
        }
    }

    /// Mark as failed with a numeric error code in `message`.
    pub fn fail_errno(mut self, errno: i32) -> Self {
        self.result = ResultCode::ErrorWithMessage.into();
        self.message = Bytes::copy_from_slice(&errno.to_be_bytes());
        self
    }

    /// Mark as failed with a free-form message.
    pub fn fail_message(mut self, message: impl Into<Bytes>) -> Self {
        self.result = ResultCode::ErrorWithMessage.into();
        self.message = message.into();
        self
    }

    pub fn op(&self) -> Result<StorageOp, WireError> {
        StorageOp::try_from(self.opcode)
    }

    pub fn is_success(&self) -> bool {
        self.result_code() == ResultCode::Success
    }

    /// The errno carried in `message`, if it is exactly four bytes long.
    pub fn errno(&self) -> Option<i32> {
        errno_of(&self.message)
    }

    /// Requested length of a READ request.
    pub fn requested_len(&self) -> Option<u32> {
        let raw: [u8; 4] = self.data.as_ref().try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }
}

impl Frame for StoragePacket {
    fn from_buffer(bytes: &[u8]) -> Result<Self, WireError> {
        let e = decode(bytes)?;
        Ok(Self {
            id: e.id,
            opcode: e.opcode,
            result: e.result,
            flags: e.flags,
            offset: e.slot,
            message: e.message,
            path: e.key,
            data: e.value,
        })
    }

    fn to_buffer(&self) -> Vec<u8> {
        encode(
            self.id,
            self.opcode,
            self.result,
            self.flags,
            self.offset,
            [&self.message[..], &self.path[..], &self.data[..]],
        )
    }

    fn id(&self) -> u16 {
        self.id
    }

    fn status(id: u16, result: ResultCode) -> Self {
        Self {
            id,
            result: result.into(),
            ..Default::default()
        }
    }

    fn result_code(&self) -> ResultCode {
        ResultCode::from(self.result)
    }
}

impl fmt::Display for StoragePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "storage[id={} op={} res={} off={} path={} data={}B msg={}B]",
            self.id,
            self.opcode,
            self.result_code(),
            self.offset,
            String::from_utf8_lossy(&self.path),
            self.data.len(),
            self.message.len(),
        )
    }
}

// ── Cache packet ──────────────────────────────────────────────────────────────

/// Metadata request/response exchanged with the cache service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePacket {
    pub id: u16,
    pub opcode: u8,
    pub result: u8,
    /// Passed through to the fast cache alongside the value.
    pub flags: u8,
    /// Entry TTL in seconds. 0 = no expiry.
    pub time: u32,
    pub message: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl CachePacket {
    pub fn request(op: CacheOp, key: impl Into<Bytes>) -> Self {
        Self {
            id: generate_id(),
            opcode: op.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_time(mut self, time: u32) -> Self {
        self.time = time;
        self
    }

    pub fn reply(&self) -> Self {
        Self {
            id: self.id,
            opcode: self.opcode,
            ..Default::default()
        }
    }

    pub fn fail_errno(mut self, errno: i32) -> Self {
        self.result = ResultCode::ErrorWithMessage.into();
        self.message = Bytes::copy_from_slice(&errno.to_be_bytes());
        self
    }

    pub fn fail_message(mut self, message: impl Into<Bytes>) -> Self {
        self.result = ResultCode::ErrorWithMessage.into();
        self.message = message.into();
        self
    }

    pub fn op(&self) -> Result<CacheOp, WireError> {
        CacheOp::try_from(self.opcode)
    }

    pub fn is_success(&self) -> bool {
        self.result_code() == ResultCode::Success
    }

    pub fn errno(&self) -> Option<i32> {
        errno_of(&self.message)
    }
}

impl Frame for CachePacket {
    fn from_buffer(bytes: &[u8]) -> Result<Self, WireError> {
        let e = decode(bytes)?;
        Ok(Self {
            id: e.id,
            opcode: e.opcode,
            result: e.result,
            flags: e.flags,
            time: e.slot,
            message: e.message,
            key: e.key,
            value: e.value,
        })
    }

    fn to_buffer(&self) -> Vec<u8> {
        encode(
            self.id,
            self.opcode,
            self.result,
            self.flags,
            self.time,
            [&self.message[..], &self.key[..], &self.value[..]],
        )
    }

    fn id(&self) -> u16 {
        self.id
    }

    fn status(id: u16, result: ResultCode) -> Self {
        Self {
            id,
            result: result.into(),
            ..Default::default()
        }
    }

    fn result_code(&self) -> ResultCode {
        ResultCode::from(self.result)
    }
}

impl fmt::Display for CachePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache[id={} op={} res={} time={} key={} value={}B msg={}B]",
            self.id,
            self.opcode,
            self.result_code(),
            self.time,
            String::from_utf8_lossy(&self.key),
            self.value.len(),
            self.message.len(),
        )
    }
}

// ── Update command ────────────────────────────────────────────────────────────

/// Nested command carried in the `value` of a cache UPDATE request.
///
/// Encoded as `opcode:u8, argc:u8` followed by `argc` arguments, each a
/// `u8` length and that many bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCommand {
    pub opcode: u8,
    pub argv: Vec<Bytes>,
}

impl UpdateCommand {
    pub fn chmod(mode: u32) -> Self {
        Self {
            opcode: UpdateOp::Chmod as u8,
            argv: vec![Bytes::copy_from_slice(&mode.to_be_bytes())],
        }
    }

    /// `u32::MAX` for either id leaves it unchanged.
    pub fn chown(uid: u32, gid: u32) -> Self {
        Self {
            opcode: UpdateOp::Chown as u8,
            argv: vec![
                Bytes::copy_from_slice(&uid.to_be_bytes()),
                Bytes::copy_from_slice(&gid.to_be_bytes()),
            ],
        }
    }

    pub fn rename(new_path: impl Into<Bytes>) -> Self {
        Self {
            opcode: UpdateOp::Rename as u8,
            argv: vec![new_path.into()],
        }
    }

    pub fn op(&self) -> Result<UpdateOp, WireError> {
        UpdateOp::try_from(self.opcode)
    }

    /// Argument `i` read as a big-endian u32.
    pub fn arg_u32(&self, i: usize) -> Option<u32> {
        let raw: [u8; 4] = self.argv.get(i)?.as_ref().try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let argc = u8::try_from(self.argv.len())
            .map_err(|_| WireError::TooManyArgs(self.argv.len()))?;
        let mut buf = ByteBuffer::new();
        buf.write_u8(self.opcode);
        buf.write_u8(argc);
        for arg in &self.argv {
            let len = u8::try_from(arg.len()).map_err(|_| WireError::ArgTooLong(arg.len()))?;
            buf.write_u8(len);
            buf.write_bytes(arg);
        }
        Ok(buf.into_inner())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = ByteBuffer::from_vec(bytes.to_vec());
        let opcode = buf.read_u8()?;
        let argc = buf.read_u8()?;
        let mut argv = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            let len = buf.read_u8()? as usize;
            argv.push(Bytes::copy_from_slice(buf.read_bytes(len)?));
        }
        Ok(Self { opcode, argv })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("declared frame length {0} exceeds maximum {}", MAX_FRAME_LEN)]
    FrameTooLarge(u64),

    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("update argument of {0} bytes exceeds 255")]
    ArgTooLong(usize),

    #[error("update command has {0} arguments, maximum is 255")]
    TooManyArgs(usize),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
