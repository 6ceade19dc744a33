//! Playback engine: records event frames into a ring buffer and replays them
//!
//! # Positions
//!
//! Frames are addressed by absolute integer positions. The retained frames
//! occupy `[start, end]`, so `end - start == duration() - 1`. Recording
//! appends at `end + 1`; once the buffer is full the oldest frame is evicted
//! and `start` advances with it. A position survives eviction of older frames,
//! which keeps the cursor stable while recording continues.
//!
//! `range` is the selected playback window inside `[start, end]`. A range
//! bound equal to the matching buffer bound is "pinned" and follows it while
//! recording.
//!
//! # Timing Model
//!
//! `render(delta_ms)` is fed by the host's frame clock. Elapsed time
//! accumulates; each time it reaches `1000 / fps` the cursor moves by `speed`
//! and exactly one interval is subtracted, so leftover time carries over.
//! At most one step happens per `render` call.
//!
//! # Output
//!
//! Frames produced by stepping or seeking are published on [`Playback::store`].
//! State changes are announced on [`Playback::signals`] (see
//! [`player_events`](super::player_events)).

use std::sync::{Arc, Mutex};

use log::{debug, info, trace, warn};

use super::deque::Deque;
use super::event_bus::EventBus;
use super::player_events::{
    FrameBufferChanged, PlaybackStateChanged, TimelineChanged, TimelineState,
};
use super::storage::PlaybackSettings;
use super::store::{MULTICAST, Store, Unsubscribe};
use crate::entities::events::{Frame, ServerEvent};

/// Selected playback window, inclusive on both ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub end: i64,
}

/// New value for one bound of the range.
pub enum RangeBound {
    Value(i64),
    Update(Box<dyn FnOnce(i64) -> i64>),
}

impl RangeBound {
    /// Bound computed from its current value.
    pub fn update(f: impl FnOnce(i64) -> i64 + 'static) -> Self {
        RangeBound::Update(Box::new(f))
    }

    fn resolve(self, current: i64) -> i64 {
        match self {
            RangeBound::Value(v) => v,
            RangeBound::Update(f) => f(current),
        }
    }
}

impl From<i64> for RangeBound {
    fn from(value: i64) -> Self {
        RangeBound::Value(value)
    }
}

/// Argument of [`Playback::set_range`]; absent bounds are left alone.
#[derive(Default)]
pub struct RangeOption {
    pub start: Option<RangeBound>,
    pub end: Option<RangeBound>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Notify {
    State,
    Timeline,
    Buffer,
}

/// Recorder and player for a bounded sequence of frames.
pub struct Playback {
    key_frames: Deque<Frame>,
    fps: f64,
    speed: i64,
    start: i64,
    end: i64,
    curr: i64,
    range: Range,
    paused: bool,
    recording: bool,
    loop_enabled: bool,
    /// Render clock accumulator, milliseconds.
    elapsed_ms: f64,
    store: Store<Frame>,
    signals: EventBus,
}

impl std::fmt::Debug for Playback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playback")
            .field("len", &self.key_frames.len())
            .field("maxlen", &self.key_frames.maxlen())
            .field("timeline", &self.timeline())
            .field("fps", &self.fps)
            .field("speed", &self.speed)
            .field("paused", &self.paused)
            .field("recording", &self.recording)
            .field("loop", &self.loop_enabled)
            .finish()
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

impl Playback {
    /// Empty playback with default settings (100 frames, 60 fps, speed 1).
    pub fn new() -> Self {
        Self::with_settings(&PlaybackSettings::default())
    }

    pub fn with_settings(settings: &PlaybackSettings) -> Self {
        let fps = if settings.fps.is_finite() && settings.fps > 0.0 {
            settings.fps
        } else {
            warn!("Invalid fps {}, using default", settings.fps);
            PlaybackSettings::default().fps
        };
        info!(
            "Playback initialized: maxlen={}, fps={}, speed={}",
            settings.maxlen, fps, settings.speed
        );
        Self {
            key_frames: Deque::new(settings.maxlen),
            fps,
            speed: settings.speed,
            start: 0,
            end: 0,
            curr: 0,
            range: Range::default(),
            paused: settings.paused,
            recording: settings.recording,
            loop_enabled: settings.loop_enabled,
            elapsed_ms: 0.0,
            store: Store::new(),
            signals: EventBus::new(),
        }
    }

    /// Frames produced by playback are published here.
    pub fn store(&self) -> &Store<Frame> {
        &self.store
    }

    /// Notification bus.
    pub fn signals(&self) -> &EventBus {
        &self.signals
    }

    // ========== Accessors ==========

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn speed(&self) -> i64 {
        self.speed
    }

    pub fn maxlen(&self) -> usize {
        self.key_frames.maxlen()
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn curr(&self) -> i64 {
        self.curr
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_playing(&self) -> bool {
        !self.paused
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn key_frames(&self) -> &Deque<Frame> {
        &self.key_frames
    }

    /// Number of retained frames.
    pub fn duration(&self) -> usize {
        self.key_frames.len()
    }

    /// Cursor position inside the range, in percent. `None` for a
    /// zero-width range.
    pub fn progress(&self) -> Option<f64> {
        let width = self.range.end - self.range.start;
        if width == 0 {
            return None;
        }
        Some(100.0 * (self.curr - self.range.start) as f64 / width as f64)
    }

    pub fn timeline(&self) -> TimelineState {
        TimelineState {
            start: self.start,
            end: self.end,
            curr: self.curr,
            range_start: self.range.start,
            range_end: self.range.end,
        }
    }

    pub fn settings(&self) -> PlaybackSettings {
        PlaybackSettings::of(self)
    }

    fn frame_at(&self, pos: i64) -> Option<&Frame> {
        let index = usize::try_from(pos - self.start).ok()?;
        self.key_frames.get(index)
    }

    /// Frame under the cursor.
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frame_at(self.curr)
    }

    pub fn first_frame(&self) -> Option<&Frame> {
        self.key_frames.first()
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.key_frames.last()
    }

    // ========== Notifications ==========

    fn notify(&self, what: &[Notify]) {
        for kind in what {
            match kind {
                Notify::State => self.signals.emit(PlaybackStateChanged(self.settings())),
                Notify::Timeline => self.signals.emit(TimelineChanged(self.timeline())),
                Notify::Buffer => self.signals.emit(FrameBufferChanged {
                    len: self.key_frames.len(),
                }),
            }
        }
    }

    fn publish_current(&self) {
        self.store.publish_opt(self.current_frame().cloned());
    }

    // ========== Recording ==========

    /// Append a frame at `end + 1`. Ignored unless recording.
    ///
    /// A cursor or range end sitting on `end` follows the new frame.
    pub fn add_key_frame(&mut self, frame: Frame) {
        if !self.recording {
            return;
        }

        if !self.key_frames.is_empty() {
            if self.curr == self.end {
                self.curr += 1;
            }
            if self.range.end == self.end {
                self.range.end += 1;
            }
            self.end += 1;
        }

        self.key_frames.push(frame);
        if self.end - self.start >= self.key_frames.maxlen() as i64 {
            if self.range.start == self.start {
                self.range.start += 1;
            }
            self.start += 1;
            // The cursor never points at an evicted frame.
            self.curr = self.curr.max(self.start);
        }
        // A narrowed range may have been overtaken by the eviction.
        self.range.start = self.range.start.max(self.start).min(self.end);
        self.range.end = self.range.end.max(self.range.start).min(self.end);
        trace!("Recorded frame at {} ({} retained)", self.end, self.key_frames.len());
        self.notify(&[Notify::Buffer, Notify::Timeline]);
    }

    /// Replace the buffer with `frames` (oldest first). Positions restart at
    /// 0, the range covers everything and the cursor sits on the first frame.
    pub fn load_frames<I: IntoIterator<Item = Frame>>(&mut self, frames: I) {
        self.key_frames = Deque::from_iter_with_capacity(frames, self.key_frames.maxlen());
        let len = self.key_frames.len() as i64;
        self.start = 0;
        self.end = (len - 1).max(0);
        self.curr = 0;
        self.range = Range {
            start: self.start,
            end: self.end,
        };
        self.elapsed_ms = 0.0;
        debug!("Loaded {} frame(s)", len);
        self.notify(&[Notify::Buffer, Notify::Timeline]);
    }

    /// Drop every frame. All positions collapse onto `end`.
    pub fn clear(&mut self) {
        self.key_frames.clear();
        self.start = self.end;
        self.curr = self.end;
        self.range = Range {
            start: self.end,
            end: self.end,
        };
        debug!("Playback cleared at position {}", self.end);
        self.notify(&[Notify::Buffer, Notify::Timeline]);
    }

    /// Wildcard subscription recording every event of `stream` into `this`.
    pub fn record_from(this: &Arc<Mutex<Playback>>, stream: &Store<ServerEvent>) -> Unsubscribe {
        let playback = Arc::clone(this);
        stream.subscribe(MULTICAST, move |event: &ServerEvent| {
            playback
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .add_key_frame(event.clone());
        })
    }

    // ========== Stepping ==========

    /// Move the cursor by `delta` within the range.
    ///
    /// Overshooting wraps to the other end when looping, otherwise clamps and
    /// pauses. Returns the new current frame, or `None` if the cursor did not
    /// move or there are no frames.
    pub fn step(&mut self, delta: i64) -> Option<Frame> {
        let prev = self.curr;
        let was_paused = self.paused;
        let mut curr = prev.saturating_add(delta);

        if delta > 0 {
            if curr > self.range.end {
                if self.loop_enabled {
                    curr = self.range.start;
                } else {
                    curr = self.range.end;
                    if !self.key_frames.is_empty() {
                        self.paused = true;
                    }
                }
            }
            if curr < self.range.start {
                curr = self.range.start;
            }
        } else if delta < 0 {
            if curr < self.range.start {
                if self.loop_enabled {
                    curr = self.range.end;
                } else {
                    curr = self.range.start;
                    if !self.key_frames.is_empty() {
                        self.paused = true;
                    }
                }
            }
            if curr > self.range.end {
                curr = self.range.end;
            }
        }

        if self.paused != was_paused {
            trace!("Reached range boundary at {}, pausing", curr);
            self.notify(&[Notify::State]);
        }
        if prev == curr || self.key_frames.is_empty() {
            return None;
        }

        trace!("Step {} -> {}", prev, curr);
        self.curr = curr;
        self.notify(&[Notify::Timeline]);
        self.current_frame().cloned()
    }

    /// Advance the render clock by `delta_ms`. Publishes and returns the
    /// frame when a step produced one.
    pub fn render(&mut self, delta_ms: f64) -> Option<Frame> {
        if self.paused {
            return None;
        }

        self.elapsed_ms += delta_ms;
        let interval = 1000.0 / self.fps;
        if self.elapsed_ms < interval {
            return None;
        }

        let frame = self.step(self.speed);
        self.elapsed_ms -= interval;

        let frame = frame?;
        self.store.publish(frame.clone());
        Some(frame)
    }

    // ========== Seeking ==========
    //
    // Each seek publishes the frame under the cursor afterwards.

    pub fn seek_next(&mut self) {
        self.step(1);
        self.publish_current();
    }

    pub fn seek_previous(&mut self) {
        self.step(-1);
        self.publish_current();
    }

    /// Cursor to the start of the range.
    pub fn reset(&mut self) {
        self.curr = self.range.start;
        self.notify(&[Notify::Timeline]);
        self.publish_current();
    }

    /// Cursor to the end of the range.
    pub fn seek_end(&mut self) {
        self.curr = self.range.end;
        self.notify(&[Notify::Timeline]);
        self.publish_current();
    }

    /// Cursor to `pos`, clamped to the retained frames (not the range), so a
    /// scrubber may leave the selected window.
    pub fn emit_seek(&mut self, pos: i64) {
        self.curr = pos.max(self.start).min(self.end);
        self.notify(&[Notify::Timeline]);
        self.publish_current();
    }

    // ========== Settings ==========

    /// Change the capacity, keeping the newest frames.
    pub fn set_maxlen(&mut self, maxlen: usize) {
        let maxlen = if maxlen == 0 {
            warn!("Playback maxlen must be at least 1, clamping 0 -> 1");
            1
        } else {
            maxlen
        };
        self.key_frames = self.key_frames.resized(maxlen);

        if self.key_frames.is_empty() {
            self.start = self.end;
            self.curr = self.end;
            self.range = Range {
                start: self.end,
                end: self.end,
            };
        } else {
            self.start = self.end + 1 - self.key_frames.len() as i64;
            self.range.start = self.range.start.max(self.start);
            self.range.end = self.range.end.min(self.end);
            if self.range.end < self.range.start {
                self.range.end = self.range.start;
            }
            self.curr = self.curr.max(self.start).min(self.end);
        }
        debug!("Playback maxlen set to {}", maxlen);
        self.notify(&[Notify::State, Notify::Buffer, Notify::Timeline]);
    }

    /// Update either bound of the range, then clamp both into `[start, end]`.
    /// Bounds given in the wrong order are swapped.
    pub fn set_range(&mut self, option: RangeOption) {
        let mut start = match option.start {
            Some(bound) => bound.resolve(self.range.start),
            None => self.range.start,
        };
        let mut end = match option.end {
            Some(bound) => bound.resolve(self.range.end),
            None => self.range.end,
        };

        start = start.max(self.start).min(self.end);
        end = end.max(self.start).min(self.end);
        if end < start {
            std::mem::swap(&mut start, &mut end);
        }
        self.range = Range { start, end };
        trace!("Range set to [{}, {}]", start, end);
        self.notify(&[Notify::Timeline]);
    }

    /// Frame rate of the render clock. Non-positive or non-finite values are
    /// ignored.
    pub fn set_fps(&mut self, fps: f64) {
        if !fps.is_finite() || fps <= 0.0 {
            warn!("Ignoring invalid fps {}", fps);
            return;
        }
        self.fps = fps;
        self.notify(&[Notify::State]);
    }

    /// Positions advanced per render step; negative plays backwards.
    pub fn set_speed(&mut self, speed: i64) {
        self.speed = speed;
        self.notify(&[Notify::State]);
    }

    pub fn apply_settings(&mut self, settings: &PlaybackSettings) {
        self.set_fps(settings.fps);
        self.speed = settings.speed;
        self.recording = settings.recording;
        self.loop_enabled = settings.loop_enabled;
        self.paused = settings.paused;
        if settings.maxlen != self.key_frames.maxlen() {
            self.set_maxlen(settings.maxlen);
        }
        self.notify(&[Notify::State]);
    }

    // ========== Toggles ==========

    /// Play/pause. An empty buffer stays paused. Paused at the end of the
    /// range: rewind to its start, publish that frame and play.
    pub fn toggle_playback(&mut self) {
        if self.key_frames.is_empty() {
            self.paused = true;
        } else if self.paused && self.curr == self.range.end {
            self.curr = self.range.start;
            self.publish_current();
            self.paused = false;
        } else {
            self.paused = !self.paused;
        }
        trace!("Playback {}", if self.paused { "paused" } else { "playing" });
        self.notify(&[Notify::State, Notify::Timeline]);
    }

    /// Flip recording; playback always stops.
    pub fn toggle_recording(&mut self) {
        self.recording = !self.recording;
        self.paused = true;
        info!("Recording {}", if self.recording { "on" } else { "off" });
        self.notify(&[Notify::State]);
    }

    pub fn toggle_loop(&mut self) {
        self.loop_enabled = !self.loop_enabled;
        self.notify(&[Notify::State]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn frame(i: i64) -> Frame {
        ServerEvent::new("TICK", json!(i)).with_ts(i as f64)
    }

    fn recording(maxlen: usize, count: i64) -> Playback {
        let mut p = Playback::with_settings(&PlaybackSettings {
            maxlen,
            recording: true,
            ..Default::default()
        });
        for i in 0..count {
            p.add_key_frame(frame(i));
        }
        p
    }

    fn published(p: &Playback) -> Arc<Mutex<Vec<f64>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        p.store().subscribe(MULTICAST, move |f: &Frame| {
            s.lock().unwrap().push(f.ts);
        });
        seen
    }

    #[test]
    fn test_recording_evicts_and_tracks_range() {
        let mut p = Playback::with_settings(&PlaybackSettings {
            maxlen: 3,
            recording: true,
            ..Default::default()
        });
        for i in 0..5 {
            p.add_key_frame(frame(i));
            // Pinned range follows the buffer
            assert_eq!(p.range(), Range { start: p.start(), end: p.end() });
            assert_eq!(p.end() - p.start(), p.duration() as i64 - 1);
        }
        assert_eq!(p.duration(), 3);
        assert_eq!(p.end(), 4);
        assert_eq!(p.start(), p.end() - 2);
        assert_eq!(p.first_frame().map(|f| f.ts), Some(2.0));
        assert_eq!(p.last_frame().map(|f| f.ts), Some(4.0));
        // Cursor followed the newest frame
        assert_eq!(p.curr(), 4);
        assert_eq!(p.current_frame().map(|f| f.ts), Some(4.0));
    }

    #[test]
    fn test_eviction_clamps_narrowed_range() {
        let mut p = recording(3, 3);
        p.set_range(RangeOption {
            end: Some(0.into()),
            ..Default::default()
        });
        assert_eq!(p.range(), Range { start: 0, end: 0 });

        for i in 3..6 {
            p.add_key_frame(frame(i));
            let r = p.range();
            assert!(p.start() <= r.start && r.start <= r.end && r.end <= p.end());
        }
        assert_eq!((p.start(), p.end()), (3, 5));
        assert_eq!(p.range(), Range { start: 3, end: 3 });
    }

    #[test]
    fn test_not_recording_ignores_frames() {
        let mut p = Playback::new();
        p.add_key_frame(frame(0));
        assert_eq!(p.duration(), 0);
        assert_eq!(p.current_frame(), None);
    }

    #[test]
    fn test_step_clamps_and_pauses_without_loop() {
        let mut p = recording(10, 5);
        assert_eq!(p.range(), Range { start: 0, end: 4 });
        p.reset();
        assert_eq!(p.curr(), 0);

        assert_eq!(p.step(3).map(|f| f.ts), Some(3.0));
        assert!(p.is_playing());
        assert_eq!(p.step(3).map(|f| f.ts), Some(4.0));
        assert!(p.is_paused());
        // Already at the end: nothing moves
        assert_eq!(p.step(1), None);

        p.emit_seek(0);
        assert_eq!(p.step(-2), None);
        assert_eq!(p.curr(), 0);
    }

    #[test]
    fn test_step_wraps_with_loop() {
        let mut p = recording(10, 5);
        p.toggle_loop();
        assert_eq!(p.curr(), 4);
        assert_eq!(p.step(1).map(|f| f.ts), Some(0.0));
        assert_eq!(p.step(-1).map(|f| f.ts), Some(4.0));
        assert!(p.is_playing());
        assert_eq!(p.step(0), None);
    }

    #[test]
    fn test_single_steps_past_range_end() {
        let mut p = recording(10, 5);
        assert_eq!(p.range(), Range { start: 0, end: 4 });
        p.reset();
        assert_eq!(p.curr(), 0);
        assert!(p.is_playing());

        for i in 1..=4 {
            assert_eq!(p.step(1).map(|f| f.ts), Some(i as f64));
            assert_eq!(p.curr(), i);
            assert!(p.is_playing());
        }
        for _ in 5..=6 {
            assert_eq!(p.step(1), None);
            assert_eq!(p.curr(), 4);
            assert!(p.is_paused());
        }
    }

    #[test]
    fn test_single_steps_wrap_with_loop() {
        let mut p = recording(10, 5);
        p.toggle_loop();
        p.reset();
        assert_eq!(p.curr(), 0);

        let expected = [1, 2, 3, 4, 0, 1];
        for want in expected {
            assert_eq!(p.step(1).map(|f| f.ts), Some(want as f64));
            assert_eq!(p.curr(), want);
            assert!(p.is_playing());
        }
    }

    #[test]
    fn test_step_on_empty_buffer() {
        let mut p = Playback::new();
        assert_eq!(p.step(1), None);
        assert!(p.is_playing());
    }

    #[test]
    fn test_render_accumulates_and_carries_over() {
        let mut p = recording(10, 5);
        p.toggle_loop();
        p.set_fps(10.0);
        let seen = published(&p);

        assert!(p.render(60.0).is_none());
        assert_eq!(p.render(60.0).map(|f| f.ts), Some(0.0));
        // 20ms carried over, 80 more reaches the interval
        assert_eq!(p.render(80.0).map(|f| f.ts), Some(1.0));
        assert!(p.render(99.0).is_none());

        p.store().scheduler().run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_render_paused_is_noop() {
        let mut p = recording(10, 5);
        p.toggle_recording();
        assert!(p.is_paused());
        assert!(p.render(10_000.0).is_none());
    }

    #[test]
    fn test_set_maxlen_keeps_newest() {
        let mut p = recording(10, 5);
        p.set_maxlen(2);
        assert_eq!(p.duration(), 2);
        assert_eq!(p.start(), 3);
        assert_eq!(p.end(), 4);
        assert_eq!(p.range(), Range { start: 3, end: 4 });
        assert_eq!(p.first_frame().map(|f| f.ts), Some(3.0));

        p.set_maxlen(0);
        assert_eq!(p.maxlen(), 1);
        assert_eq!(p.start(), 4);
    }

    #[test]
    fn test_set_maxlen_empty() {
        let mut p = Playback::new();
        p.set_maxlen(5);
        assert_eq!(p.timeline(), TimelineState::default());
    }

    #[test]
    fn test_set_range_clamps() {
        let mut p = recording(10, 5);
        p.set_range(RangeOption {
            start: Some(1.into()),
            end: Some(RangeBound::update(|e| e - 1)),
        });
        assert_eq!(p.range(), Range { start: 1, end: 3 });

        p.set_range(RangeOption {
            start: Some((-10).into()),
            end: Some(99.into()),
        });
        assert_eq!(p.range(), Range { start: 0, end: 4 });

        p.set_range(RangeOption {
            start: Some(3.into()),
            end: Some(1.into()),
        });
        assert_eq!(p.range(), Range { start: 1, end: 3 });
        assert_eq!(p.progress(), Some(150.0));
    }

    #[test]
    fn test_progress() {
        let mut p = recording(10, 5);
        p.emit_seek(1);
        assert_eq!(p.progress(), Some(25.0));
        assert_eq!(Playback::new().progress(), None);
    }

    #[test]
    fn test_toggle_playback() {
        let mut empty = Playback::new();
        empty.toggle_playback();
        assert!(empty.is_paused());

        let mut p = recording(10, 5);
        let seen = published(&p);
        p.toggle_recording();
        assert!(p.is_paused() && !p.is_recording());

        // Paused at the end: rewind and play
        p.toggle_playback();
        assert!(p.is_playing());
        assert_eq!(p.curr(), 0);
        p.store().scheduler().run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![0.0]);

        p.toggle_playback();
        assert!(p.is_paused());
        assert_eq!(p.curr(), 0);
    }

    #[test]
    fn test_seek_helpers_publish() {
        let mut p = recording(10, 5);
        let seen = published(&p);
        p.reset();
        p.seek_next();
        p.seek_end();
        p.seek_previous();
        p.emit_seek(100);
        p.store().scheduler().run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 1.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn test_clear_collapses_positions() {
        let mut p = recording(10, 5);
        p.clear();
        assert_eq!(p.duration(), 0);
        assert_eq!(
            p.timeline(),
            TimelineState { start: 4, end: 4, curr: 4, range_start: 4, range_end: 4 }
        );
        p.add_key_frame(frame(9));
        assert_eq!(p.start(), 4);
        assert_eq!(p.current_frame().map(|f| f.ts), Some(9.0));
    }

    #[test]
    fn test_invalid_fps_rejected() {
        let mut p = Playback::new();
        p.set_fps(0.0);
        p.set_fps(f64::NAN);
        assert_eq!(p.fps(), 60.0);
        p.set_fps(24.0);
        assert_eq!(p.fps(), 24.0);
    }

    #[test]
    fn test_load_frames() {
        let mut p = Playback::new();
        p.load_frames((10..13).map(frame));
        assert_eq!(p.timeline(), TimelineState { start: 0, end: 2, curr: 0, range_start: 0, range_end: 2 });
        assert_eq!(p.current_frame().map(|f| f.ts), Some(10.0));
    }

    #[test]
    fn test_settings_round_trip() {
        let mut p = Playback::new();
        let settings = PlaybackSettings {
            fps: 24.0,
            speed: -2,
            maxlen: 8,
            recording: true,
            loop_enabled: true,
            paused: true,
        };
        p.apply_settings(&settings);
        assert_eq!(p.settings(), settings);
    }

    #[test]
    fn test_signals() {
        let mut p = recording(10, 0);
        let buffer = Arc::new(AtomicI32::new(0));
        let b = Arc::clone(&buffer);
        p.signals().subscribe::<FrameBufferChanged, _>(move |e| {
            b.store(e.len as i32, Ordering::SeqCst);
        });

        p.add_key_frame(frame(0));
        p.add_key_frame(frame(1));
        assert_eq!(buffer.load(Ordering::SeqCst), 2);

        p.signals().poll();
        p.toggle_loop();
        let states = p.signals().drain::<PlaybackStateChanged>();
        assert_eq!(states.len(), 1);
        assert!(states[0].0.loop_enabled);
    }

    #[test]
    fn test_record_from_stream() {
        let downlink = Store::<ServerEvent>::new();
        let playback = Arc::new(Mutex::new(recording(10, 0)));
        let unsub = Playback::record_from(&playback, &downlink);

        downlink.publish(frame(0));
        downlink.publish(frame(1));
        downlink.scheduler().run_until_idle();
        assert_eq!(playback.lock().unwrap().duration(), 2);

        unsub.call();
        downlink.publish(frame(2));
        downlink.scheduler().run_until_idle();
        assert_eq!(playback.lock().unwrap().duration(), 2);
    }
}
