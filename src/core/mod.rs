//! Core engine modules - event store, playback, persistence
//!
//! Nothing in here knows about rendering or transport.

pub mod deque;
pub mod event_bus;
pub mod player;
pub mod player_events;
pub mod storage;
pub mod store;
pub mod store_ops;

// Re-exports for convenience
pub use deque::Deque;
pub use event_bus::EventBus;
pub use player::{Playback, Range, RangeBound, RangeOption};
pub use storage::{PlaybackSettings, Storage, TimelineView};
pub use store::{EventType, MULTICAST, Scheduler, Store, Unsubscribe};
pub use store_ops::{combine, fuse};
