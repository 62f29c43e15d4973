//! Framed request/response exchange over TCP.
//!
//! Frames are self-describing: once `HEADER_SIZE` bytes have arrived the
//! reader knows the full frame length and keeps reading until it has all of
//! it. [`FrameReader`] does the accumulation; [`Connection`] is the client
//! side, `server` builds the accept loop on the same pieces.

use std::marker::PhantomData;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use stripefs_core::wire::{Frame, WireError, INVALID_ID};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    PrematureEof { buffered: usize },

    #[error("connection closed before a response arrived")]
    Closed,

    #[error("bad frame: {0}")]
    Frame(#[from] WireError),

    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: u16, got: u16 },

    #[error("no node at index {0}")]
    UnknownNode(usize),
}

// ── Reassembly ────────────────────────────────────────────────────────────────

/// Accumulates stream bytes and yields complete frames.
///
/// Bytes past the end of a frame stay buffered for the next one.
pub struct FrameReader<P> {
    buf: BytesMut,
    _packet: PhantomData<fn() -> P>,
}

impl<P: Frame> FrameReader<P> {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(P::MAX_PACKET_SIZE),
            _packet: PhantomData,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Buffered header bytes, for diagnostics.
    pub fn head(&self) -> &[u8] {
        &self.buf[..self.buf.len().min(P::HEADER_SIZE)]
    }

    /// Take the next complete frame, if one has fully arrived.
    pub fn try_frame(&mut self) -> Result<Option<P>, WireError> {
        if self.buf.len() < P::HEADER_SIZE {
            return Ok(None);
        }
        let total = P::packet_size(&self.buf)?;
        if self.buf.len() < total {
            // Reserve up front so large data frames don't regrow repeatedly.
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }
        let frame = self.buf.split_to(total);
        P::from_buffer(&frame).map(Some)
    }
}

impl<P: Frame> Default for FrameReader<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read until one full frame is available.
///
/// Returns `Ok(None)` if the peer closed cleanly between frames.
pub async fn read_frame<P, R>(
    reader: &mut R,
    frames: &mut FrameReader<P>,
) -> Result<Option<P>, TransportError>
where
    P: Frame,
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; P::MAX_PACKET_SIZE];
    loop {
        if let Some(frame) = frames.try_frame()? {
            return Ok(Some(frame));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return match frames.buffered() {
                0 => Ok(None),
                buffered => Err(TransportError::PrematureEof { buffered }),
            };
        }
        tracing::trace!(bytes = n, buffered = frames.buffered(), "read");
        frames.push(&chunk[..n]);
    }
}

pub async fn write_frame<P, W>(writer: &mut W, frame: &P) -> Result<(), TransportError>
where
    P: Frame,
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.to_buffer()).await?;
    writer.flush().await?;
    Ok(())
}

// ── Client connection ─────────────────────────────────────────────────────────

/// Whether a connection outlives a single exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Keep the socket open and serve/send any number of exchanges.
    Persistent,
    /// One request, one response, then close.
    SingleExchange,
}

/// Client side of a framed connection to one address.
///
/// Exchanges are strictly sequential. The socket is taken out of the
/// connection for the duration of an exchange and only put back if the
/// exchange succeeded and the mode is persistent, so a failed exchange
/// always leaves the connection closed.
pub struct Connection<P> {
    addr: String,
    mode: ConnectionMode,
    stream: Option<TcpStream>,
    frames: FrameReader<P>,
}

impl<P: Frame> Connection<P> {
    /// Nothing is dialled until the first exchange or [`Connection::connect`].
    pub fn new(addr: impl Into<String>, mode: ConnectionMode) -> Self {
        Self {
            addr: addr.into(),
            mode,
            stream: None,
            frames: FrameReader::new(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_none() {
            self.stream = Some(dial(&self.addr).await?);
        }
        Ok(())
    }

    /// Send `request` and wait for the matching response.
    pub async fn send_and_receive(&mut self, request: &P) -> Result<P, TransportError> {
        let mut stream = match self.stream.take() {
            Some(s) => s,
            None => dial(&self.addr).await?,
        };

        let result = exchange(&mut stream, &mut self.frames, request).await;
        match (&result, self.mode) {
            (Ok(_), ConnectionMode::Persistent) => self.stream = Some(stream),
            _ => self.frames.clear(),
        }
        if let Err(e) = &result {
            tracing::debug!(addr = %self.addr, error = %e, "exchange failed, connection dropped");
        }
        result
    }
}

async fn dial(addr: &str) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn exchange<P: Frame>(
    stream: &mut TcpStream,
    frames: &mut FrameReader<P>,
    request: &P,
) -> Result<P, TransportError> {
    write_frame(stream, request).await?;
    let response = read_frame(stream, frames)
        .await?
        .ok_or(TransportError::Closed)?;
    check_id(request.id(), response.id())?;
    Ok(response)
}

/// A response must echo the request id, and 0 is never a valid id.
pub fn check_id(expected: u16, got: u16) -> Result<(), TransportError> {
    if got == INVALID_ID || got != expected {
        return Err(TransportError::IdMismatch { expected, got });
    }
    Ok(())
}
