use crate::error::ClientError;
use crate::types::events::Event;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot, watch};

/// Receives events for the paths it was subscribed to.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

enum Envelope {
    Event(Event),
    Flush(oneshot::Sender<()>),
}

type Subscriptions = RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>;

struct Inner {
    subscriptions: Arc<Subscriptions>,
    sender: mpsc::Sender<Envelope>,
    shutdown: watch::Sender<bool>,
}

/// Exact-path publish/subscribe with a bounded queue and a single ordered
/// dispatcher.
///
/// `publish` waits while the queue is full rather than dropping events.
/// The dispatcher runs every subscriber of a path in registration order,
/// synchronously, before taking the next event; a failing or panicking
/// subscriber is logged and skipped.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Creates the bus and spawns its dispatch task. Must be called from
    /// within a tokio runtime.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let subscriptions = Arc::new(RwLock::new(HashMap::new()));
        // The dispatcher holds no sender, so it ends once every bus handle is gone.
        tokio::spawn(dispatch_loop(subscriptions.clone(), receiver, shutdown_rx));
        Self {
            inner: Arc::new(Inner {
                subscriptions,
                sender,
                shutdown,
            }),
        }
    }

    pub fn subscribe<F>(&self, path: impl Into<String>, callback: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(path, Arc::new(callback));
    }

    pub fn subscribe_handler(&self, path: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let path = path.into();
        debug!(target: "EventBus", "Subscribing handler to {path}");
        match self.inner.subscriptions.write() {
            Ok(mut subs) => subs.entry(path).or_default().push(handler),
            Err(poisoned) => poisoned.into_inner().entry(path).or_default().push(handler),
        }
    }

    pub fn subscriber_count(&self, path: &str) -> usize {
        handlers_for(&self.inner.subscriptions, path).len()
    }

    /// Queues `event` for dispatch, waiting for room if the queue is full.
    pub async fn publish(&self, event: Event) -> Result<(), ClientError> {
        self.inner
            .sender
            .send(Envelope::Event(event))
            .await
            .map_err(|_| ClientError::Shutdown)
    }

    /// Resolves once every event published before this call was dispatched.
    pub async fn flush(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .sender
            .send(Envelope::Flush(tx))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    /// Stops the dispatcher and every timer attached to this bus.
    pub fn close(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Shutdown signal for background sources tied to this bus.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }
}

fn handlers_for(subscriptions: &Subscriptions, path: &str) -> Vec<Arc<dyn EventHandler>> {
    let subs = match subscriptions.read() {
        Ok(subs) => subs,
        Err(poisoned) => poisoned.into_inner(),
    };
    subs.get(path).cloned().unwrap_or_default()
}

fn dispatch(subscriptions: &Subscriptions, event: &Event) {
    // Handlers are cloned out so a callback may subscribe without deadlocking.
    let handlers = handlers_for(subscriptions, &event.path);
    if handlers.is_empty() {
        debug!(target: "EventBus", "No subscribers for {}", event.path);
        return;
    }
    for (index, handler) in handlers.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| handler.handle_event(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(target: "EventBus", "Subscriber #{index} for {} failed: {e:?}", event.path);
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(target: "EventBus", "Subscriber #{index} for {} panicked: {reason}", event.path);
            }
        }
    }
}

async fn dispatch_loop(
    subscriptions: Arc<Subscriptions>,
    mut receiver: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(target: "EventBus", "Dispatch loop started");
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(target: "EventBus", "Shutdown signaled, exiting dispatch loop.");
                    return;
                }
            }
            envelope = receiver.recv() => match envelope {
                Some(Envelope::Event(event)) => dispatch(&subscriptions, &event),
                Some(Envelope::Flush(done)) => {
                    let _ = done.send(());
                }
                None => {
                    warn!(target: "EventBus", "All publishers dropped, exiting dispatch loop.");
                    return;
                }
            }
        }
    }
}
