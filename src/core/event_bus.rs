//! Typed signal bus for engine notifications.
//!
//! Architecture:
//! - Listeners subscribe to a concrete event type and are called immediately
//!   from `emit()`, in subscription order
//! - Every emitted event is also queued; `poll()` / `drain::<E>()` hand the
//!   queue to a host loop that prefers batch processing
//!
//! Unlike [`Store`](super::store::Store), nothing here is deferred: a
//! listener runs on the emitting thread, before `emit()` returns. Listeners
//! get owned snapshots and must not call back into whatever emitted them
//! while it is still locked.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::warn;

/// Queue bound; half of the oldest events are dropped when reached.
const MAX_QUEUE_SIZE: usize = 1000;

/// Anything `Send + Sync + 'static` can travel on the bus.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

pub type BoxedEvent = Box<dyn Event>;

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Returned by [`EventBus::subscribe`], pass to [`EventBus::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Shared {
    listeners: RwLock<HashMap<TypeId, Vec<(ListenerId, Callback)>>>,
    queue: Mutex<VecDeque<BoxedEvent>>,
    next_id: AtomicU64,
}

/// Cloneable handle; clones share listeners and queue.
#[derive(Clone, Default)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_types", &self.shared.listeners.read().map(|l| l.len()).unwrap_or(0))
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Listeners ==========

    /// Call `callback` for every future `E`.
    ///
    /// ```ignore
    /// bus.subscribe::<FrameBufferChanged, _>(|e| println!("{} frames", e.len));
    /// ```
    pub fn subscribe<E, F>(&self, callback: F) -> ListenerId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.shared
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push((id, wrapped));
        id
    }

    /// Remove one listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write().unwrap_or_else(|e| e.into_inner());
        for entries in listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|(lid, _)| *lid == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn has_listeners<E: Event>(&self) -> bool {
        self.shared
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .is_some_and(|v| !v.is_empty())
    }

    // ========== Emit ==========

    /// Invoke listeners of `E`, then queue the event.
    pub fn emit<E: Event>(&self, event: E) {
        // Copy the callbacks out so a listener may (un)subscribe.
        let callbacks: Vec<Callback> = self
            .shared
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(|v| v.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for cb in callbacks {
            cb(&event);
        }

        let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict = queue.len() / 2;
            warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict);
            queue.drain(..evict);
        }
        queue.push_back(Box::new(event));
    }

    // ========== Deferred ==========

    /// Take every queued event.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()))
            .into()
    }

    /// Take queued events of type `E` only, leave the rest queued.
    pub fn drain<E: Event>(&self) -> Vec<E> {
        let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(queue.len());
        for event in queue.drain(..) {
            if (*event).as_any().is::<E>() {
                if let Ok(e) = event.into_any().downcast::<E>() {
                    taken.push(*e);
                }
            } else {
                kept.push_back(event);
            }
        }
        *queue = kept;
        taken
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop all listeners and queued events.
    pub fn clear(&self) {
        self.shared.listeners.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Downcast a polled event.
///
/// Derefs to `dyn Event` first: calling `as_any()` on the `Box` itself would
/// hit the blanket impl for `Box<dyn Event>` and never match.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[derive(Clone, Debug, PartialEq)]
    struct Tick(i32);

    #[derive(Clone, Debug)]
    struct Note(&'static str);

    #[test]
    fn test_listeners_run_immediately() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe::<Tick, _>(move |t| {
            c.fetch_add(t.0, Ordering::SeqCst);
        });

        bus.emit(Tick(10));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        bus.emit(Note("ignored"));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_poll_and_drain() {
        let bus = EventBus::new();
        bus.emit(Tick(1));
        bus.emit(Note("a"));
        bus.emit(Tick(2));

        assert_eq!(bus.drain::<Tick>(), vec![Tick(1), Tick(2)]);
        let rest = bus.poll();
        assert_eq!(rest.len(), 1);
        assert_eq!(downcast_event::<Note>(&rest[0]).map(|n| n.0), Some("a"));
        assert_eq!(bus.queue_len(), 0);
    }

    #[test]
    fn test_unsubscribe_one() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c1 = Arc::clone(&counter);
        let first = bus.subscribe::<Tick, _>(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&counter);
        bus.subscribe::<Tick, _>(move |_| {
            c2.fetch_add(100, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        bus.emit(Tick(0));
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert!(bus.has_listeners::<Tick>());
    }

    #[test]
    fn test_listener_may_subscribe() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.subscribe::<Tick, _>(move |_| {
            inner.subscribe::<Note, _>(|_| {});
        });
        bus.emit(Tick(0));
        assert!(bus.has_listeners::<Note>());
    }

    #[test]
    fn test_clear_drops_listeners_and_queue() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe::<Tick, _>(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Tick(1));
        bus.emit(Note("queued"));
        assert_eq!(bus.queue_len(), 2);

        bus.clear();
        assert!(!bus.has_listeners::<Tick>());
        assert_eq!(bus.queue_len(), 0);

        bus.emit(Tick(2));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.drain::<Tick>(), vec![Tick(2)]);
    }

    #[test]
    fn test_queue_eviction() {
        let bus = EventBus::new();
        for i in 0..MAX_QUEUE_SIZE as i32 + 1 {
            bus.emit(Tick(i));
        }
        let ticks = bus.drain::<Tick>();
        assert_eq!(ticks.len(), MAX_QUEUE_SIZE / 2 + 1);
        assert_eq!(ticks.last(), Some(&Tick(MAX_QUEUE_SIZE as i32)));
    }
}
