//! Accept loop and per-connection read/dispatch/write loop.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use stripefs_core::wire::{Frame, ResultCode, INVALID_ID};

use crate::conn::{read_frame, write_frame, ConnectionMode, FrameReader, TransportError};
use crate::service::{dispatch, RequestHandler};

/// A bound listener serving one handler.
pub struct Server<H> {
    listener: TcpListener,
    handler: Arc<H>,
    mode: ConnectionMode,
}

impl<H: RequestHandler> Server<H> {
    pub async fn bind(addr: &str, handler: Arc<H>, mode: ConnectionMode) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self::from_listener(listener, handler, mode))
    }

    pub fn from_listener(listener: TcpListener, handler: Arc<H>, mode: ConnectionMode) -> Self {
        Self {
            listener,
            handler,
            mode,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `shutdown` fires. Each connection runs in its own task
    /// holding a clone of the handler.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let local = self.local_addr()?;
        tracing::info!(service = self.handler.name(), addr = %local, mode = ?self.mode, "listening");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(service = self.handler.name(), "listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let handler = self.handler.clone();
                    let mode = self.mode;
                    tokio::spawn(async move {
                        serve_connection(stream, peer, handler, mode).await;
                    });
                }
            }
        }
    }
}

async fn serve_connection<H: RequestHandler>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    mode: ConnectionMode,
) {
    tracing::debug!(service = handler.name(), %peer, "connection opened");
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "set_nodelay failed");
    }

    let mut frames = FrameReader::<H::Packet>::new();
    loop {
        let request = match read_frame(&mut stream, &mut frames).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(TransportError::Frame(e)) => {
                // The stream can't be resynchronised after a bad header.
                tracing::warn!(%peer, error = %e, header = %hex::encode(frames.head()), "undecodable frame");
                let reply = H::Packet::status(INVALID_ID, ResultCode::InvalidPacket);
                if let Err(e) = write_frame(&mut stream, &reply).await {
                    tracing::debug!(%peer, error = %e, "invalid-packet reply not sent");
                }
                break;
            }
            Err(e) => {
                tracing::debug!(%peer, error = %e, "read failed");
                break;
            }
        };

        let response = dispatch(handler.as_ref(), request).await;
        if response.result_code() != ResultCode::Success {
            tracing::debug!(service = handler.name(), %peer, result = %response.result_code(), "request failed");
        }

        if let Err(e) = write_frame(&mut stream, &response).await {
            tracing::debug!(%peer, error = %e, "write failed");
            break;
        }
        if mode == ConnectionMode::SingleExchange {
            break;
        }
    }
    tracing::debug!(service = handler.name(), %peer, "connection closed");
}
