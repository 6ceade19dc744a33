//! Vuer core - scene graph event store and keyframe playback engine
//!
//! Re-exports all modules for use by the `vuer` binary and integration tests.

// Core engine (store, event bus, playback, storage)
pub mod core;

// Scene graph and wire events
pub mod entities;

// App modules
pub mod cli;
pub mod paths;
pub mod runner;
pub mod share;

// Re-export commonly used types from core
pub use core::event_bus::{BoxedEvent, EventBus, downcast_event};
pub use core::player::Playback;
pub use core::storage::{PlaybackSettings, Storage};
pub use core::store::{Store, Unsubscribe};

// Re-export entities
pub use entities::{ClientEvent, Frame, Node, SceneStore, ServerEvent};
