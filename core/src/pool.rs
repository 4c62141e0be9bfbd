use std::sync::Arc;

use hub_api::{Event, Topic};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Mutex,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    agent::Frame,
    registry::{ConnectionId, LeaveReason, Registry},
};

/// An event encoded once and shared by every worker and recipient.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub kind: String,
    pub topic: Topic,
    pub frame: Frame,
}

impl Dispatch {
    pub fn encode(event: &Event) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(event)?;
        Ok(Self {
            kind: event.kind.clone(),
            topic: event.topic.clone(),
            frame: Arc::from(json),
        })
    }
}

/// Start `count` workers sharing one submission queue.
///
/// After `shutdown` fires, workers keep taking whatever is already queued and
/// exit once the queue is empty.
pub(crate) fn spawn(
    count: usize,
    queue: mpsc::Receiver<Arc<Dispatch>>,
    registry: Arc<Registry>,
    evictions: mpsc::Sender<ConnectionId>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let queue = Arc::new(Mutex::new(queue));
    (0..count)
        .map(|worker| {
            tokio::spawn(run_worker(
                worker,
                queue.clone(),
                registry.clone(),
                evictions.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn run_worker(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<Arc<Dispatch>>>>,
    registry: Arc<Registry>,
    evictions: mpsc::Sender<ConnectionId>,
    shutdown: CancellationToken,
) {
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                next = queue.recv() => next,
                _ = shutdown.cancelled() => queue.try_recv().ok(),
            }
        };
        let Some(dispatch) = next else { break };
        deliver(worker, &dispatch, &registry, &evictions);
    }
    trace!(worker, "fan-out worker stopped");
}

fn deliver(
    worker: usize,
    dispatch: &Dispatch,
    registry: &Registry,
    evictions: &mpsc::Sender<ConnectionId>,
) {
    let out = registry.fan_out(&dispatch.topic, &dispatch.frame, |id| {
        match evictions.try_send(id) {
            Ok(()) => {
                warn!(conn_id = %id, "evicting slow consumer");
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %id, "eviction queue full, retrying on next broadcast");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    });
    debug!(
        worker,
        kind = %dispatch.kind,
        topic = %dispatch.topic,
        recipients = out.recipients,
        full = out.full,
        "broadcast delivered"
    );
}

/// Drain eviction requests into the leave path until shutdown.
pub(crate) async fn run_evictions(
    mut requests: mpsc::Receiver<ConnectionId>,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            id = requests.recv() => match id {
                Some(id) => {
                    registry.remove(id, LeaveReason::Evicted);
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatch_encodes_wire_json_once() {
        let event = Event::new("SCORE_SUBMITTED", json!({"points": 5}), Topic::from("quiz1"));
        let dispatch = Dispatch::encode(&event).unwrap();
        assert_eq!(dispatch.kind, "SCORE_SUBMITTED");
        assert_eq!(dispatch.topic, Topic::from("quiz1"));
        let v: serde_json::Value = serde_json::from_str(&dispatch.frame).unwrap();
        assert_eq!(v["quiz_id"], "quiz1");
        assert_eq!(v["data"]["points"], 5);
    }

    #[tokio::test]
    async fn workers_drain_queue_then_exit_on_shutdown() {
        let registry = Arc::new(Registry::new());
        let (member_tx, mut member_rx) = mpsc::channel(16);
        let id = ConnectionId::new();
        assert!(registry.insert(id, Topic::global(), member_tx));

        let (submit, queue) = mpsc::channel(16);
        let (evict_tx, _evict_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        for n in 0..5 {
            let event = Event::global("TICK", json!(n));
            submit.send(Arc::new(Dispatch::encode(&event).unwrap())).await.unwrap();
        }
        shutdown.cancel();
        let handles = spawn(2, queue, registry.clone(), evict_tx, shutdown);
        for handle in handles {
            handle.await.unwrap();
        }

        let mut received = 0;
        while member_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
    }
}
