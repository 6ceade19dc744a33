//! Store composition.
//!
//! Two ways to merge a pair of stores into one:
//!
//! - [`fuse`] copies both registries into a new store once. Registrations
//!   made later on the inputs are not seen, but the fused store can be
//!   extended with its own reducers.
//! - [`combine`] keeps separate registries and bridges live: it subscribes to
//!   `"*"` on both inputs and republishes everything it observes.
//!
//! Both results queue their subscribers on the first store's scheduler.

use log::debug;

use super::store::{EventType, MULTICAST, Registry, Store};

/// Merge `src` into `dst`. Same etype and same id: `src` wins.
fn fuse_registry<V: Clone>(dst: &mut Registry<V>, src: &Registry<V>) {
    for (etype, entries) in src {
        let slot = dst.entry(etype.clone()).or_default();
        for (id, callback) in entries {
            slot.insert(id.clone(), callback.clone());
        }
    }
}

/// Static merge of the registries of `s1` and `s2`.
pub fn fuse<E: EventType>(s1: &Store<E>, s2: &Store<E>) -> Store<E> {
    let mut reducers = Registry::new();
    fuse_registry(&mut reducers, &s1.reducers_snapshot());
    fuse_registry(&mut reducers, &s2.reducers_snapshot());

    let mut subscribers = Registry::new();
    fuse_registry(&mut subscribers, &s1.subscribers_snapshot());
    fuse_registry(&mut subscribers, &s2.subscribers_snapshot());

    debug!(
        "Fused stores: {} reducer type(s), {} subscriber type(s)",
        reducers.len(),
        subscribers.len()
    );
    Store::from_registries(reducers, subscribers, s1.scheduler())
}

/// Live bridge republishing every event of `s1` and `s2`.
///
/// The bridge subscriptions belong to the input stores; they stay active as
/// long as those stores do.
pub fn combine<E: EventType>(s1: &Store<E>, s2: &Store<E>) -> Store<E> {
    let combined = Store::with_scheduler(s1.scheduler());
    for source in [s1, s2] {
        let target = combined.clone();
        source.subscribe(MULTICAST, move |event: &E| {
            target.publish(event.clone());
        });
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug)]
    struct Ev {
        etype: &'static str,
        value: i32,
    }

    impl EventType for Ev {
        fn etype(&self) -> &str {
            self.etype
        }
    }

    fn add(store: &Store<Ev>, id: &str, n: i32) {
        store.add_reducer_with_id("X", id, move |mut e| {
            e.value += n;
            e
        });
    }

    #[test]
    fn test_fuse_copies_both_registries() {
        let s1 = Store::new();
        let s2 = Store::new();
        add(&s1, "one", 1);
        add(&s2, "two", 10);

        let fused = fuse(&s1, &s2);
        assert_eq!(fused.reducer_count("X"), 2);
        assert_eq!(fused.publish(Ev { etype: "X", value: 0 }).value, 11);
    }

    #[test]
    fn test_fuse_second_store_wins_on_collision() {
        let s1 = Store::new();
        let s2 = Store::new();
        add(&s1, "same", 1);
        add(&s2, "same", 100);

        let fused = fuse(&s1, &s2);
        assert_eq!(fused.reducer_count("X"), 1);
        assert_eq!(fused.publish(Ev { etype: "X", value: 0 }).value, 100);
    }

    #[test]
    fn test_fuse_is_a_snapshot() {
        let s1 = Store::new();
        let s2 = Store::new();
        let fused = fuse(&s1, &s2);

        // Registered on s1 after fusing: not part of the fused pipeline.
        add(&s1, "late", 5);
        assert_eq!(fused.publish(Ev { etype: "X", value: 0 }).value, 0);

        // The fused store accepts its own reducers.
        add(&fused, "own", 3);
        assert_eq!(fused.publish(Ev { etype: "X", value: 0 }).value, 3);
        assert_eq!(s1.reducer_count("X"), 1);
    }

    #[test]
    fn test_fuse_carries_subscribers() {
        let s1 = Store::new();
        let s2 = Store::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        s2.subscribe("X", move |e: &Ev| {
            c.fetch_add(e.value, Ordering::SeqCst);
        });

        let fused = fuse(&s1, &s2);
        fused.publish(Ev { etype: "X", value: 4 });
        fused.scheduler().run_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_combine_is_live() {
        let s1 = Store::new();
        let s2 = Store::with_scheduler(s1.scheduler());
        let combined = combine(&s1, &s2);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        combined.subscribe(MULTICAST, move |e: &Ev| {
            s.lock().unwrap().push(e.value);
        });

        s1.publish(Ev { etype: "A", value: 1 });
        s2.publish(Ev { etype: "B", value: 2 });
        s1.scheduler().run_until_idle();

        let mut got = seen.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, vec![1, 2]);
    }

    #[test]
    fn test_combine_does_not_merge_reducers() {
        let s1 = Store::new();
        let s2 = Store::new();
        add(&s1, "r", 1);
        let combined = combine(&s1, &s2);
        assert_eq!(combined.reducer_count("X"), 0);

        // Events arrive already reduced by s1.
        let got = Arc::new(AtomicI32::new(-1));
        let g = Arc::clone(&got);
        combined.subscribe("X", move |e: &Ev| {
            g.store(e.value, Ordering::SeqCst);
        });
        s1.publish(Ev { etype: "X", value: 0 });
        s1.scheduler().run_until_idle();
        assert_eq!(got.load(Ordering::SeqCst), 1);
    }
}
