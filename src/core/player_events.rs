//! Playback notifications emitted on the playback's [`EventBus`](super::event_bus::EventBus).
//!
//! Payloads are snapshots, taken after the mutation finished.

use serde::{Deserialize, Serialize};

use super::storage::PlaybackSettings;

/// Cursor and window positions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineState {
    pub start: i64,
    pub end: i64,
    pub curr: i64,
    pub range_start: i64,
    pub range_end: i64,
}

// === Notifications ===

/// fps, speed, capacity or one of the flags changed.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackStateChanged(pub PlaybackSettings);

/// Cursor, buffer span or selected range moved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimelineChanged(pub TimelineState);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameBufferChanged {
    pub len: usize,
}
