//! Event store: per-etype reducer chains and deferred subscriber fan-out.
//!
//! Architecture:
//! - `add_reducer()` registers `E -> E` transforms, run synchronously inside
//!   `publish()` in registration order (each output feeds the next reducer)
//! - `subscribe()` registers fire-and-forget handlers; `publish()` never calls
//!   them directly but schedules one task per handler on the [`Scheduler`]
//! - `"*"` is the multicast key: those subscribers see every event
//!
//! The scheduler plays the role of the event loop's task queue. Nothing a
//! subscriber does is visible until the owner drains it with
//! [`Scheduler::run_until_idle`].
//!
//! Handlers are captured when `publish()` runs. Unsubscribing afterwards does
//! not cancel an invocation that is already queued.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::{Receiver, Sender, unbounded};
use indexmap::IndexMap;
use log::{debug, error, trace};
use uuid::Uuid;

/// Registry key that matches every event type.
pub const MULTICAST: &str = "*";

/// Anything routed through a [`Store`] must expose its event type string.
pub trait EventType: Clone + Send + Sync + 'static {
    fn etype(&self) -> &str;
}

/// Transform applied to an event before delivery.
pub type Reducer<E> = Arc<dyn Fn(E) -> E + Send + Sync>;

/// Side-effect handler invoked with the final event.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// etype -> registration id -> callback, both levels in registration order.
pub(crate) type Registry<V> = IndexMap<String, IndexMap<String, V>>;

type Task = Box<dyn FnOnce() + Send + 'static>;

// ========== Scheduler ==========

/// Single-threaded deferred task queue shared by one or more stores.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Scheduler {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").field("pending", &self.pending()).finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Queue a task for the next drain.
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Both ends live in self, the channel cannot be disconnected here.
        let _ = self.tx.send(Box::new(task));
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Run queued tasks until the queue is empty, including tasks queued by
    /// the tasks themselves. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        if ran > 0 {
            trace!("Scheduler drained {} task(s)", ran);
        }
        ran
    }
}

// ========== Unsubscribe ==========

/// Handle returned by every registration call.
///
/// Calling it more than once is a no-op. Dropping it leaves the registration
/// in place.
pub struct Unsubscribe {
    remove: Mutex<Option<Box<dyn FnOnce() + Send + 'static>>>,
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.remove.lock().map(|r| r.is_some()).unwrap_or(false);
        f.debug_struct("Unsubscribe").field("active", &active).finish()
    }
}

impl Unsubscribe {
    fn new<F>(remove: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            remove: Mutex::new(Some(Box::new(remove))),
        }
    }

    /// Remove the registration (first call only).
    pub fn call(&self) {
        let remove = self.remove.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(remove) = remove {
            remove();
        }
    }

    /// Whether [`Unsubscribe::call`] has already run.
    pub fn is_done(&self) -> bool {
        self.remove
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

/// Insert `callback` and return a handle that removes exactly that callback.
///
/// A later registration reusing the same id is left alone.
fn register<F>(
    registry: &Arc<RwLock<Registry<Arc<F>>>>,
    etype: &str,
    id: String,
    callback: Arc<F>,
) -> Unsubscribe
where
    F: ?Sized + Send + Sync + 'static,
{
    registry
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .entry(etype.to_string())
        .or_default()
        .insert(id.clone(), Arc::clone(&callback));

    let registry = Arc::clone(registry);
    let etype = etype.to_string();
    Unsubscribe::new(move || {
        let mut map = registry.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = map.get_mut(&etype) {
            let ours = entries
                .get(&id)
                .map(|current| Arc::ptr_eq(current, &callback))
                .unwrap_or(false);
            if ours {
                entries.shift_remove(&id);
                debug!("Unregistered {} from '{}'", id, etype);
            }
        }
    })
}

// ========== Store ==========

/// Event store with reducer chains and deferred subscribers.
///
/// Cheap to clone: clones share registries and scheduler.
pub struct Store<E: EventType> {
    reducers: Arc<RwLock<Registry<Reducer<E>>>>,
    subscribers: Arc<RwLock<Registry<Handler<E>>>>,
    scheduler: Scheduler,
}

impl<E: EventType> Clone for Store<E> {
    fn clone(&self) -> Self {
        Self {
            reducers: Arc::clone(&self.reducers),
            subscribers: Arc::clone(&self.subscribers),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<E: EventType> Default for Store<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EventType> fmt::Debug for Store<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("reducer_types", &self.reducers.read().map(|r| r.len()).unwrap_or(0))
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl<E: EventType> Store<E> {
    /// Store with its own private scheduler.
    pub fn new() -> Self {
        Self::with_scheduler(&Scheduler::new())
    }

    /// Store that queues subscriber calls on an existing scheduler.
    pub fn with_scheduler(scheduler: &Scheduler) -> Self {
        Self::from_registries(Registry::new(), Registry::new(), scheduler)
    }

    pub(crate) fn from_registries(
        reducers: Registry<Reducer<E>>,
        subscribers: Registry<Handler<E>>,
        scheduler: &Scheduler,
    ) -> Self {
        Self {
            reducers: Arc::new(RwLock::new(reducers)),
            subscribers: Arc::new(RwLock::new(subscribers)),
            scheduler: scheduler.clone(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn reducers_snapshot(&self) -> Registry<Reducer<E>> {
        self.reducers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn subscribers_snapshot(&self) -> Registry<Handler<E>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // ========== Registration ==========

    /// Append a reducer to the chain for `etype` under a fresh id.
    pub fn add_reducer<F>(&self, etype: &str, reducer: F) -> Unsubscribe
    where
        F: Fn(E) -> E + Send + Sync + 'static,
    {
        self.add_reducer_with_id(etype, &Uuid::new_v4().to_string(), reducer)
    }

    /// Register a reducer under an explicit id. Reusing an id replaces the
    /// previous reducer but keeps its position in the chain.
    pub fn add_reducer_with_id<F>(&self, etype: &str, id: &str, reducer: F) -> Unsubscribe
    where
        F: Fn(E) -> E + Send + Sync + 'static,
    {
        debug!("Reducer {} added for '{}'", id, etype);
        let reducer: Reducer<E> = Arc::new(reducer);
        register(&self.reducers, etype, id.to_string(), reducer)
    }

    /// Register a subscriber for `etype` (or [`MULTICAST`]) under a fresh id.
    pub fn subscribe<F>(&self, etype: &str, handler: F) -> Unsubscribe
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_with_id(etype, &Uuid::new_v4().to_string(), handler)
    }

    /// Register a subscriber under an explicit id.
    pub fn subscribe_with_id<F>(&self, etype: &str, id: &str, handler: F) -> Unsubscribe
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        debug!("Subscriber {} added for '{}'", id, etype);
        let handler: Handler<E> = Arc::new(handler);
        register(&self.subscribers, etype, id.to_string(), handler)
    }

    pub fn reducer_count(&self, etype: &str) -> usize {
        self.reducers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(etype)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, etype: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(etype)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    // ========== Dispatch ==========

    /// Run the reducer chain, queue subscribers, return the reduced event.
    ///
    /// A panicking reducer unwinds into the caller. A panicking subscriber
    /// is caught and logged inside its own task.
    pub fn publish(&self, event: E) -> E {
        let etype = event.etype().to_string();

        // Snapshot so reducers may register/unregister without deadlocking.
        let chain: Vec<Reducer<E>> = self
            .reducers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&etype)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();

        let mut event = event;
        for reducer in chain {
            event = reducer(event);
        }

        let handlers: Vec<Handler<E>> = {
            let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            let direct = subs.get(&etype).into_iter().flat_map(|m| m.values());
            let multicast = if etype == MULTICAST {
                None
            } else {
                subs.get(MULTICAST)
            };
            direct
                .chain(multicast.into_iter().flat_map(|m| m.values()))
                .cloned()
                .collect()
        };

        trace!("publish '{}': {} subscriber(s) queued", etype, handlers.len());
        for handler in handlers {
            let delivered = event.clone();
            let etype = etype.clone();
            self.scheduler.schedule(move || {
                if catch_unwind(AssertUnwindSafe(|| handler(&delivered))).is_err() {
                    error!("Subscriber for '{}' panicked, continuing", etype);
                }
            });
        }
        event
    }

    /// Publish if there is an event; `None` is a silent no-op.
    pub fn publish_opt(&self, event: Option<E>) -> Option<E> {
        event.map(|e| self.publish(e))
    }
}
