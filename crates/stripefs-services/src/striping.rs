//! Storage coordinator: splits logical reads and writes into stripes,
//! sends them to the node ring concurrently and joins the results.
//!
//! Every stripe of an operation is in flight at once. Results are consumed
//! in completion order, so anything positional (where a READ payload lands)
//! is keyed by stripe index, never by arrival. The first failed stripe
//! decides the outcome; the remaining stripes are still awaited so no work
//! is left running behind a returned error.

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinSet;

use stripefs_core::stripe::{Stripe, StripeError, StripeLayout};
use stripefs_core::wire::{max_payload, Frame, ResultCode, StorageOp, StoragePacket};

use crate::conn::{check_id, TransportError};
use crate::error::ServiceError;
use crate::node_pool::NodeTransport;
use crate::service::RequestHandler;

// ── Read aggregation ──────────────────────────────────────────────────────────

/// Fan-in state for one striped READ.
///
/// Payloads are copied to `stripe.offset - base_offset` as they arrive.
/// [`ReadAggregate::finish`] then applies the contiguous-prefix rule: after
/// the first stripe that came back short, every later stripe must be empty.
#[derive(Debug)]
pub struct ReadAggregate {
    base_offset: u32,
    stripes: Vec<Stripe>,
    received: Vec<u32>,
    buf: Vec<u8>,
}

impl ReadAggregate {
    pub fn new(base_offset: u32, stripes: Vec<Stripe>) -> Self {
        let total: usize = stripes.iter().map(|s| s.length as usize).sum();
        let received = vec![0; stripes.len()];
        Self {
            base_offset,
            stripes,
            received,
            buf: vec![0; total],
        }
    }

    /// Record stripe `index`'s payload. Bytes beyond the stripe's planned
    /// length are ignored.
    pub fn record(&mut self, index: usize, payload: &[u8]) {
        let Some(stripe) = self.stripes.get(index) else {
            tracing::warn!(index, "payload for unplanned stripe dropped");
            return;
        };
        let n = payload.len().min(stripe.length as usize);
        let range = stripe.buffer_range(self.base_offset);
        self.buf[range.start..range.start + n].copy_from_slice(&payload[..n]);
        self.received[index] = n as u32;
    }

    /// Per-stripe byte counts in logical order.
    pub fn lengths(&self) -> &[u32] {
        &self.received
    }

    pub fn finish(mut self) -> Result<Bytes, ServiceError> {
        let total = contiguous_len(&self.stripes, &self.received)?;
        self.buf.truncate(total);
        Ok(Bytes::from(self.buf))
    }
}

/// Length of the readable prefix, or `Fragmented` if data follows a hole.
fn contiguous_len(stripes: &[Stripe], received: &[u32]) -> Result<usize, ServiceError> {
    let mut total = 0usize;
    let mut short = false;
    for (stripe, &got) in stripes.iter().zip(received) {
        if short {
            if got != 0 {
                tracing::warn!(index = stripe.index, got, "data after short stripe");
                return Err(ServiceError::Fragmented);
            }
            continue;
        }
        total += got as usize;
        short = got < stripe.length;
    }
    Ok(total)
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Outcome of one stripe RPC, tagged with where it was sent.
struct StripeReply {
    index: usize,
    node: usize,
    result: Result<StoragePacket, TransportError>,
}

impl StripeReply {
    fn into_result(self) -> Result<(usize, StoragePacket), ServiceError> {
        let StripeReply { index, node, result } = self;
        let packet = result.map_err(|source| ServiceError::Transport { index, node, source })?;
        match packet.result_code() {
            ResultCode::Success => Ok((index, packet)),
            result => Err(ServiceError::Node {
                index,
                node,
                result,
                message: packet.message,
            }),
        }
    }
}

pub struct StorageCoordinator<T> {
    layout: StripeLayout,
    transport: Arc<T>,
}

impl<T: NodeTransport> StorageCoordinator<T> {
    pub fn new(stripe_size: u32, transport: Arc<T>) -> Result<Self, StripeError> {
        let layout = StripeLayout::new(stripe_size, transport.node_count())?;
        Ok(Self { layout, transport })
    }

    pub fn layout(&self) -> StripeLayout {
        self.layout
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Push the stripe size to every node.
    pub async fn init_nodes(&self) -> Result<(), ServiceError> {
        let stripe_size = self.layout.stripe_size().to_be_bytes();
        let requests = (0..self.layout.node_count()).map(|node| {
            let req = StoragePacket::request(StorageOp::Init, Bytes::new(), 0)
                .with_message(stripe_size.to_vec());
            (node, node, req)
        });
        self.gather(self.scatter(requests), |_, _| {}).await
    }

    pub async fn read(&self, path: &Bytes, offset: u32, length: u32) -> Result<Bytes, ServiceError> {
        // The reply carries no path, only the data.
        if length as usize > max_payload(0) {
            return Err(ServiceError::InvalidArgument(format!(
                "READ of {length} bytes does not fit in one frame"
            )));
        }
        let plan = self.layout.plan(offset, length)?;
        if plan.is_empty() {
            return Ok(Bytes::new());
        }
        tracing::debug!(path = %String::from_utf8_lossy(path), offset, length, stripes = plan.len(), "striped read");

        let requests: Vec<_> = plan
            .iter()
            .map(|s| {
                let req = StoragePacket::read_request(path.clone(), s.offset, s.length);
                (s.index, s.node, req)
            })
            .collect();

        let mut aggregate = ReadAggregate::new(offset, plan);
        self.gather(self.scatter(requests), |index, packet| {
            aggregate.record(index, &packet.data);
        })
        .await?;
        aggregate.finish()
    }

    pub async fn write(&self, path: &Bytes, offset: u32, data: Bytes) -> Result<(), ServiceError> {
        if data.len() > max_payload(path.len()) {
            return Err(ServiceError::InvalidArgument(format!(
                "WRITE of {} bytes does not fit in one frame",
                data.len()
            )));
        }
        let length = u32::try_from(data.len()).map_err(|_| StripeError::OffsetOverflow {
            offset,
            length: data.len() as u64,
        })?;
        let plan = self.layout.plan(offset, length)?;
        tracing::debug!(path = %String::from_utf8_lossy(path), offset, length, stripes = plan.len(), "striped write");

        let requests: Vec<_> = plan
            .iter()
            .map(|s| {
                let slice = data.slice(s.buffer_range(offset));
                let req = StoragePacket::write_request(path.clone(), s.offset, slice);
                (s.index, s.node, req)
            })
            .collect();
        self.gather(self.scatter(requests), |_, _| {}).await
    }

    /// Remove every stripe of `path` from every node.
    pub async fn remove(&self, path: &Bytes) -> Result<(), ServiceError> {
        let requests: Vec<_> = (0..self.layout.node_count())
            .map(|node| {
                let req = StoragePacket::request(StorageOp::RemoveFile, path.clone(), 0);
                (node, node, req)
            })
            .collect();
        self.gather(self.scatter(requests), |_, _| {}).await
    }

    /// Start one task per `(stripe index, node, request)`.
    fn scatter(
        &self,
        requests: impl IntoIterator<Item = (usize, usize, StoragePacket)>,
    ) -> JoinSet<StripeReply> {
        let mut tasks = JoinSet::new();
        for (index, node, request) in requests {
            let transport = self.transport.clone();
            tasks.spawn(async move {
                let id = request.id;
                let result = transport
                    .call(node, request)
                    .await
                    .and_then(|resp| check_id(id, resp.id).map(|_| resp));
                StripeReply { index, node, result }
            });
        }
        tasks
    }

    /// Join every task. Successful replies go to `on_success` while no
    /// failure has been seen; the first failure is returned after the rest
    /// have drained.
    async fn gather<F>(&self, mut tasks: JoinSet<StripeReply>, mut on_success: F) -> Result<(), ServiceError>
    where
        F: FnMut(usize, StoragePacket),
    {
        let mut first_error: Option<ServiceError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| ServiceError::Task(e.to_string()))
                .and_then(StripeReply::into_result);
            match (outcome, &first_error) {
                (Ok((index, packet)), None) => on_success(index, packet),
                (Ok(_), Some(_)) => {}
                (Err(e), None) => {
                    tracing::warn!(error = %e, "stripe failed");
                    first_error = Some(e);
                }
                (Err(e), Some(_)) => {
                    tracing::debug!(error = %e, "additional stripe failure discarded");
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn execute(&self, op: StorageOp, request: &StoragePacket) -> Result<StoragePacket, ServiceError> {
        let reply = request.reply();
        match op {
            StorageOp::Nop | StorageOp::Init => Ok(reply),
            StorageOp::Read => {
                let length = request.requested_len().ok_or_else(|| {
                    ServiceError::InvalidArgument("READ must carry a 4-byte length".into())
                })?;
                let data = self.read(&request.path, request.offset, length).await?;
                Ok(reply.with_data(data))
            }
            StorageOp::Write => {
                self.write(&request.path, request.offset, request.data.clone())
                    .await?;
                Ok(reply)
            }
            StorageOp::RemoveFile => {
                self.remove(&request.path).await?;
                Ok(reply)
            }
        }
    }
}

impl<T: NodeTransport> RequestHandler for StorageCoordinator<T> {
    type Packet = StoragePacket;

    fn name(&self) -> &'static str {
        "storage"
    }

    async fn handle_request(&self, request: StoragePacket) -> StoragePacket {
        let Ok(op) = request.op() else {
            return StoragePacket::status(request.id, ResultCode::InvalidOp);
        };
        match self.execute(op, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(request = %request, error = %e, "storage request failed");
                request.reply().fail_message(e.wire_message())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
