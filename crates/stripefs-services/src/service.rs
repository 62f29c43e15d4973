//! Request handler trait shared by every stripefs service.
//!
//! The connection layer reads frames and hands them to a handler; the
//! handler interprets them. The cache service, the storage coordinator and
//! the storage node are the three implementations.

use std::future::Future;

use stripefs_core::wire::{Frame, ResultCode, INVALID_ID};

/// Turns one request into one response.
///
/// Implementations map unknown opcodes to `INVALID_OP` and internal
/// failures to `ERROR_WITH_MESSAGE`; nothing they return is an error at the
/// transport level.
pub trait RequestHandler: Send + Sync + 'static {
    type Packet: Frame;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn handle_request(&self, request: Self::Packet) -> impl Future<Output = Self::Packet> + Send;
}

/// Entry point used by the server loop. Requests with the reserved id never
/// reach the handler.
pub async fn dispatch<H: RequestHandler>(handler: &H, request: H::Packet) -> H::Packet {
    if request.id() == INVALID_ID {
        tracing::debug!(service = handler.name(), "rejecting request with id 0");
        return H::Packet::status(INVALID_ID, ResultCode::InvalidPacket);
    }
    handler.handle_request(request).await
}
