use std::{fmt, sync::Arc};

use futures::{Sink, Stream};
use hub_api::{Event, Topic};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    sync::mpsc::{self, error::SendTimeoutError},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    agent::{self, Frame, Inbound},
    pool::{self, Dispatch},
    registry::{ConnectionId, LeaveReason, Registry},
    HubConfig, HubError,
};

/// Supplies the snapshot a connection receives as soon as it joins.
pub trait WelcomeHook: Send + Sync {
    fn welcome(&self, _topic: &Topic) -> Option<Event> {
        None
    }
}

/// Hook that sends nothing on join.
#[derive(Clone, Default)]
pub struct NullWelcome;

impl WelcomeHook for NullWelcome {}

/// Handle to a running hub. Cheap to clone; all clones share one hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

struct Inner {
    config: HubConfig,
    registry: Arc<Registry>,
    submit: mpsc::Sender<Arc<Dispatch>>,
    welcome: Arc<dyn WelcomeHook>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Validate `config` and start the worker pool. Must run inside a tokio
    /// runtime.
    pub fn start(config: HubConfig, welcome: Arc<dyn WelcomeHook>) -> Result<Self, HubError> {
        config.validate()?;
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (submit, queue) = mpsc::channel(config.queue_capacity);
        let (evict_tx, evict_rx) = mpsc::channel(config.eviction_capacity);
        tracker.spawn(pool::run_evictions(
            evict_rx,
            registry.clone(),
            shutdown.clone(),
        ));
        let workers = pool::spawn(
            config.workers,
            queue,
            registry.clone(),
            evict_tx,
            shutdown.clone(),
        );
        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            client_buffer = config.client_buffer,
            "hub started"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                submit,
                welcome,
                shutdown,
                tracker,
                workers: Mutex::new(workers),
            }),
        })
    }

    /// Register an accepted transport under `topic` and start its agent.
    ///
    /// The welcome snapshot, if any, is queued before the connection becomes
    /// visible to fan-out, so it is always the first frame written. After
    /// shutdown the transport is closed and `HubError::Closed` is returned.
    pub fn join<Tx, Rx, E>(&self, sink: Tx, stream: Rx, topic: Topic) -> Result<ConnectionId, HubError>
    where
        Tx: Sink<Frame> + Send + Unpin + 'static,
        Tx::Error: fmt::Display + Send,
        Rx: Stream<Item = Result<Inbound, E>> + Send + Unpin + 'static,
        E: fmt::Display + Send + 'static,
    {
        let inner = &self.inner;
        let write_timeout = inner.config.write_timeout();
        if inner.shutdown.is_cancelled() {
            agent::discard(&inner.tracker, sink, write_timeout);
            return Err(HubError::Closed);
        }

        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(inner.config.client_buffer);
        if let Some(frame) = self.welcome_frame(&topic) {
            // fresh queue with non-zero capacity
            let _ = tx.try_send(frame);
        }
        if !inner.registry.insert(id, topic.clone(), tx) {
            agent::discard(&inner.tracker, sink, write_timeout);
            return Err(HubError::Closed);
        }
        agent::spawn(
            &inner.tracker,
            id,
            inner.registry.clone(),
            rx,
            sink,
            stream,
            write_timeout,
        );
        debug!(conn_id = %id, %topic, live = inner.registry.len(), "connection joined");
        Ok(id)
    }

    fn welcome_frame(&self, topic: &Topic) -> Option<Frame> {
        let event = self.inner.welcome.welcome(topic)?;
        match Dispatch::encode(&event) {
            Ok(dispatch) => Some(dispatch.frame),
            Err(e) => {
                warn!(kind = %event.kind, error = %e, "failed to encode welcome snapshot");
                None
            }
        }
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn leave(&self, id: ConnectionId) -> bool {
        self.inner.registry.remove(id, LeaveReason::Requested)
    }

    /// Queue an event for fan-out without waiting for delivery.
    ///
    /// Waits at most `submit_timeout` for room in the submission queue.
    pub async fn submit(&self, event: &Event) -> Result<(), HubError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(HubError::Closed);
        }
        let dispatch = Arc::new(Dispatch::encode(event)?);
        let wait = inner.config.submit_timeout();
        match inner.submit.send_timeout(dispatch, wait).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(HubError::Saturated(wait)),
            Err(SendTimeoutError::Closed(_)) => Err(HubError::Closed),
        }
    }

    /// Best-effort broadcast for producers. Drops are logged, never returned.
    pub async fn broadcast(&self, kind: impl Into<String>, data: Value, topic: Topic) {
        let event = Event::new(kind, data, topic);
        match self.submit(&event).await {
            Ok(()) => {}
            Err(HubError::Closed) => {
                debug!(kind = %event.kind, topic = %event.topic, "hub closed, broadcast dropped")
            }
            Err(e) => {
                warn!(kind = %event.kind, topic = %event.topic, error = %e, "broadcast dropped")
            }
        }
    }

    /// Number of registered connections.
    pub fn live_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.inner.registry.contains(id)
    }

    /// Stop accepting broadcasts, let workers drain the submission queue,
    /// remove every connection and wait for all transports to close.
    /// Calling it again is harmless.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        let workers = std::mem::take(&mut *inner.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "fan-out worker failed");
            }
        }
        let closed = inner.registry.close();
        inner.tracker.close();
        inner.tracker.wait().await;
        info!(connections = closed, "hub shut down");
    }
}
