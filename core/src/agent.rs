//! Per-connection agent: the only code that touches a client transport.
//!
//! The outbound loop owns the write half and is the only place the transport
//! is closed. The inbound loop owns the read half and only watches for the
//! peer going away. Whichever notices a failure first removes the connection
//! from the registry; the outbound loop then signals the inbound loop through
//! `done` so both halves finish.

use std::{fmt, sync::Arc, time::Duration};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{sync::mpsc, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, trace};

use crate::registry::{ConnectionId, LeaveReason, Registry};

/// One serialized event as written to the wire. Shared by every recipient.
pub type Frame = Arc<str>;

/// What the read half of a transport yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Any client payload. Content is ignored.
    Message,
    /// The peer asked to close the session.
    Close,
}

pub(crate) fn spawn<Tx, Rx, E>(
    tracker: &TaskTracker,
    id: ConnectionId,
    registry: Arc<Registry>,
    queue: mpsc::Receiver<Frame>,
    sink: Tx,
    stream: Rx,
    write_timeout: Duration,
) where
    Tx: Sink<Frame> + Send + Unpin + 'static,
    Tx::Error: fmt::Display + Send,
    Rx: Stream<Item = Result<Inbound, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send + 'static,
{
    let done = CancellationToken::new();
    tracker.spawn(outbound(
        id,
        queue,
        sink,
        registry.clone(),
        write_timeout,
        done.clone(),
    ));
    tracker.spawn(inbound(id, stream, registry, done));
}

/// Close a transport that never made it into the registry.
pub(crate) fn discard<Tx>(tracker: &TaskTracker, mut sink: Tx, write_timeout: Duration)
where
    Tx: Sink<Frame> + Send + Unpin + 'static,
{
    tracker.spawn(async move {
        let _ = timeout(write_timeout, sink.close()).await;
    });
}

async fn outbound<Tx>(
    id: ConnectionId,
    mut queue: mpsc::Receiver<Frame>,
    mut sink: Tx,
    registry: Arc<Registry>,
    write_timeout: Duration,
    done: CancellationToken,
) where
    Tx: Sink<Frame> + Unpin,
    Tx::Error: fmt::Display,
{
    while let Some(frame) = queue.recv().await {
        match timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn_id = %id, error = %e, "write failed");
                registry.remove(id, LeaveReason::WriteFailed);
                break;
            }
            Err(_) => {
                debug!(conn_id = %id, ?write_timeout, "write timed out");
                registry.remove(id, LeaveReason::WriteFailed);
                break;
            }
        }
    }
    if let Ok(Err(e)) = timeout(write_timeout, sink.close()).await {
        trace!(conn_id = %id, error = %e, "close failed");
    }
    done.cancel();
    trace!(conn_id = %id, "outbound loop stopped");
}

async fn inbound<Rx, E>(id: ConnectionId, mut stream: Rx, registry: Arc<Registry>, done: CancellationToken)
where
    Rx: Stream<Item = Result<Inbound, E>> + Unpin,
    E: fmt::Display,
{
    let reason = loop {
        tokio::select! {
            _ = done.cancelled() => break None,
            item = stream.next() => match item {
                Some(Ok(Inbound::Message)) => {}
                Some(Ok(Inbound::Close)) | None => break Some(LeaveReason::PeerClosed),
                Some(Err(e)) => {
                    debug!(conn_id = %id, error = %e, "read failed");
                    break Some(LeaveReason::ReadFailed);
                }
            },
        }
    };
    if let Some(reason) = reason {
        registry.remove(id, reason);
    }
    trace!(conn_id = %id, "inbound loop stopped");
}
