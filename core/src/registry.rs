use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use hub_api::Topic;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::{agent::Frame, filter};

/// Identity of one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    PeerClosed,
    ReadFailed,
    WriteFailed,
    Evicted,
    Requested,
    Shutdown,
}

impl LeaveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::PeerClosed => "peer_closed",
            LeaveReason::ReadFailed => "read_failed",
            LeaveReason::WriteFailed => "write_failed",
            LeaveReason::Evicted => "evicted",
            LeaveReason::Requested => "requested",
            LeaveReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Member {
    topic: Topic,
    /// Only long-lived sender of the connection's outbound queue. Dropping
    /// the member closes the queue.
    outbound: mpsc::Sender<Frame>,
    /// Set once an eviction has been queued for this member.
    evicting: AtomicBool,
}

/// Result of delivering one frame across the registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FanOut {
    /// Connections whose queue accepted the frame.
    pub recipients: usize,
    /// Matching connections whose queue was full.
    pub full: usize,
}

#[derive(Default)]
struct Members {
    map: HashMap<ConnectionId, Member>,
    closed: bool,
}

/// Live connections, guarded by one reader/writer lock.
///
/// Join, leave and shutdown take the write lock; fan-out takes the read lock.
/// The lock is never held across an await point.
#[derive(Default)]
pub(crate) struct Registry {
    members: RwLock<Members>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns false once the registry is closed, in
    /// which case `outbound` is dropped and the queue is closed.
    pub fn insert(&self, id: ConnectionId, topic: Topic, outbound: mpsc::Sender<Frame>) -> bool {
        let mut members = self.members.write();
        if members.closed {
            return false;
        }
        members.map.insert(
            id,
            Member {
                topic,
                outbound,
                evicting: AtomicBool::new(false),
            },
        );
        true
    }

    /// Remove a connection if present. Removing an absent connection is a no-op.
    pub fn remove(&self, id: ConnectionId, reason: LeaveReason) -> bool {
        let (removed, remaining) = {
            let mut members = self.members.write();
            let removed = members.map.remove(&id);
            (removed, members.map.len())
        };
        match removed {
            Some(member) => {
                debug!(conn_id = %id, topic = %member.topic, %reason, remaining, "connection left");
                true
            }
            None => false,
        }
    }

    /// Take the write lock and keep it until the returned guard drops.
    #[cfg(test)]
    pub fn hold(&self) -> impl Sized + '_ {
        self.members.write()
    }

    pub fn len(&self) -> usize {
        self.members.read().map.len()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().map.contains_key(&id)
    }

    /// Offer `frame` to every connection matching `target` without blocking.
    ///
    /// For a full queue `evict` is called at most once per connection until it
    /// reports failure, so a rejected request is retried on a later frame.
    pub fn fan_out(
        &self,
        target: &Topic,
        frame: &Frame,
        mut evict: impl FnMut(ConnectionId) -> bool,
    ) -> FanOut {
        let members = self.members.read();
        let mut out = FanOut::default();
        for (id, member) in members.map.iter() {
            if !filter::matches(&member.topic, target) {
                continue;
            }
            match member.outbound.try_send(frame.clone()) {
                Ok(()) => out.recipients += 1,
                Err(TrySendError::Full(_)) => {
                    out.full += 1;
                    if !member.evicting.swap(true, Ordering::AcqRel) && !evict(*id) {
                        member.evicting.store(false, Ordering::Release);
                    }
                }
                // agent already gone; its leave is in flight
                Err(TrySendError::Closed(_)) => {}
            }
        }
        out
    }

    /// Refuse further joins and remove every member. Returns how many were
    /// removed.
    pub fn close(&self) -> usize {
        let drained: Vec<(ConnectionId, Member)> = {
            let mut members = self.members.write();
            members.closed = true;
            members.map.drain().collect()
        };
        for (id, member) in &drained {
            debug!(conn_id = %id, topic = %member.topic, reason = %LeaveReason::Shutdown, "connection left");
        }
        drained.len()
    }
}
