use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use super::domain::RunId;
use super::events::ProgressEvent;

/// How many finished runs keep their terminal event for late subscribers.
pub const RETAINED_TERMINAL_EVENTS: usize = 256;

pub type ListenerId = u64;

/// Identifier a persistent client picks for itself when it connects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a listener pulls from its queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(ProgressEvent),
    /// The queue overflowed and this many of the oldest events were dropped.
    Lagged { dropped: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The run is live; the listener will see every later event.
    Live,
    /// The run already finished; its terminal event was queued for the listener.
    Replayed,
    UnknownRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ListenerKind {
    /// One run, closed after that run's terminal event.
    SingleShot,
    /// Any number of runs, closed only when the client disconnects.
    Client(ClientId),
}

#[derive(Debug, Default)]
struct QueueState {
    buffer: VecDeque<ProgressEvent>,
    dropped: u64,
    closed: bool,
}

#[derive(Debug)]
struct ListenerQueue {
    id: ListenerId,
    kind: ListenerKind,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ListenerQueue {
    fn new(id: ListenerId, kind: ListenerKind, capacity: usize) -> Self {
        Self {
            id,
            kind,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Pushes without blocking. Returns false when the listener is gone.
    fn push(&self, event: &ProgressEvent) -> bool {
        {
            let mut state = self.state.lock().expect("listener queue mutex poisoned");
            if state.closed {
                return false;
            }
            if state.buffer.len() >= self.capacity {
                state.buffer.pop_front();
                state.dropped += 1;
            }
            state.buffer.push_back(event.clone());
            if self.kind == ListenerKind::SingleShot && event.is_terminal() {
                state.closed = true;
            }
        }
        self.notify.notify_one();
        true
    }

    fn close(&self) {
        self.state
            .lock()
            .expect("listener queue mutex poisoned")
            .closed = true;
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.state
            .lock()
            .expect("listener queue mutex poisoned")
            .closed
    }

    fn take(&self) -> Option<Option<Delivery>> {
        let mut state = self.state.lock().expect("listener queue mutex poisoned");
        if state.dropped > 0 {
            let dropped = std::mem::take(&mut state.dropped);
            return Some(Some(Delivery::Lagged { dropped }));
        }
        if let Some(event) = state.buffer.pop_front() {
            return Some(Some(Delivery::Event(event)));
        }
        if state.closed {
            return Some(None);
        }
        None
    }
}

/// Receiving end of a listener queue. Dropping it detaches the listener.
#[derive(Debug)]
pub struct Listener {
    queue: Arc<ListenerQueue>,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.queue.id
    }

    /// Next delivery, or `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if let Some(next) = self.queue.take() {
                return next;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`Listener::recv`]. `None` means nothing is buffered.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.queue.take().flatten()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.queue.close();
    }
}

#[derive(Debug, Default)]
struct Registry {
    runs: HashMap<RunId, Vec<Arc<ListenerQueue>>>,
    clients: HashMap<ClientId, Arc<ListenerQueue>>,
    finished: HashMap<RunId, ProgressEvent>,
    finished_order: VecDeque<RunId>,
}

impl Registry {
    fn retain_terminal(&mut self, event: &ProgressEvent) {
        if self
            .finished
            .insert(event.run_id.clone(), event.clone())
            .is_none()
        {
            self.finished_order.push_back(event.run_id.clone());
        }
        while self.finished_order.len() > RETAINED_TERMINAL_EVENTS {
            if let Some(evicted) = self.finished_order.pop_front() {
                self.finished.remove(&evicted);
            }
        }
    }
}

struct EmitterInner {
    capacity: usize,
    next_listener: AtomicU64,
    registry: Mutex<Registry>,
}

/// Fans progress events out to the listeners attached to each run.
///
/// Publishing never waits on a listener: each listener owns a bounded queue that
/// drops its oldest entries on overflow and reports the gap as [`Delivery::Lagged`].
#[derive(Clone)]
pub struct ProgressEmitter {
    inner: Arc<EmitterInner>,
}

impl ProgressEmitter {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                capacity: capacity.max(1),
                next_listener: AtomicU64::new(1),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .expect("emitter registry mutex poisoned")
    }

    fn queue(&self, kind: ListenerKind) -> Arc<ListenerQueue> {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        Arc::new(ListenerQueue::new(id, kind, self.inner.capacity))
    }

    /// Registers a run so listeners can attach before its first event.
    pub fn open_run(&self, run_id: &RunId) {
        self.registry().runs.entry(run_id.clone()).or_default();
    }

    pub fn is_known(&self, run_id: &RunId) -> bool {
        let registry = self.registry();
        registry.runs.contains_key(run_id) || registry.finished.contains_key(run_id)
    }

    /// A fresh single-shot listener, not yet attached to any run.
    pub fn listener(&self) -> Listener {
        Listener {
            queue: self.queue(ListenerKind::SingleShot),
        }
    }

    pub fn attach(&self, run_id: &RunId, listener: &Listener) -> AttachOutcome {
        self.attach_queue(run_id, Arc::clone(&listener.queue))
    }

    /// Creates a single-shot listener and attaches it to `run_id`.
    pub fn subscribe(&self, run_id: &RunId) -> (Listener, AttachOutcome) {
        let listener = self.listener();
        let outcome = self.attach(run_id, &listener);
        (listener, outcome)
    }

    fn attach_queue(&self, run_id: &RunId, queue: Arc<ListenerQueue>) -> AttachOutcome {
        let mut registry = self.registry();
        if let Some(terminal) = registry.finished.get(run_id) {
            queue.push(terminal);
            return AttachOutcome::Replayed;
        }
        match registry.runs.get_mut(run_id) {
            Some(listeners) => {
                if !listeners.iter().any(|existing| existing.id == queue.id) {
                    listeners.push(queue);
                }
                AttachOutcome::Live
            }
            None => AttachOutcome::UnknownRun,
        }
    }

    /// Removes a listener from a run. Returns whether it was attached.
    pub fn detach(&self, run_id: &RunId, listener_id: ListenerId) -> bool {
        let mut registry = self.registry();
        let Some(listeners) = registry.runs.get_mut(run_id) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|queue| queue.id != listener_id);
        before != listeners.len()
    }

    /// Delivers the event to every live listener of its run; returns how many
    /// accepted it. A terminal event also retires the run.
    pub fn publish(&self, event: &ProgressEvent) -> usize {
        let mut registry = self.registry();
        let delivered = match registry.runs.get_mut(&event.run_id) {
            Some(listeners) => {
                listeners.retain(|queue| {
                    let accepted = queue.push(event);
                    if !accepted {
                        debug!(run_id = %event.run_id, listener = queue.id, "listener gone; detaching");
                    }
                    accepted
                });
                listeners.len()
            }
            None => 0,
        };

        if event.is_terminal() {
            registry.runs.remove(&event.run_id);
            registry.retain_terminal(event);
        }
        delivered
    }

    pub fn listener_count(&self, run_id: &RunId) -> usize {
        self.registry()
            .runs
            .get(run_id)
            .map(|listeners| listeners.iter().filter(|queue| !queue.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn terminal_event(&self, run_id: &RunId) -> Option<ProgressEvent> {
        self.registry().finished.get(run_id).cloned()
    }

    /// Opens the persistent queue for a client, replacing any earlier connection
    /// that used the same id.
    pub fn connect_client(&self, client_id: ClientId) -> Listener {
        let queue = self.queue(ListenerKind::Client(client_id.clone()));
        let previous = self
            .registry()
            .clients
            .insert(client_id, Arc::clone(&queue));
        if let Some(previous) = previous {
            previous.close();
        }
        Listener { queue }
    }

    /// Routes a run's events to a connected client.
    pub fn attach_client(&self, run_id: &RunId, client_id: &ClientId) -> AttachOutcome {
        let queue = self.registry().clients.get(client_id).cloned();
        match queue {
            Some(queue) => self.attach_queue(run_id, queue),
            None => AttachOutcome::UnknownRun,
        }
    }

    /// Forgets a client; its queue is closed and dropped from every run.
    pub fn disconnect_client(&self, client_id: &ClientId, listener_id: ListenerId) {
        let mut registry = self.registry();
        let matches = registry
            .clients
            .get(client_id)
            .is_some_and(|queue| queue.id == listener_id);
        if matches {
            if let Some(queue) = registry.clients.remove(client_id) {
                queue.close();
            }
        }
        for listeners in registry.runs.values_mut() {
            listeners.retain(|queue| queue.id != listener_id);
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.registry().clients.len()
    }
}

impl fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}
