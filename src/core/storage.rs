//! Persisted key-value state.
//!
//! One JSON object on disk (`vuer.json` in the config dir), keys namespaced
//! as `"{collection}-{id}"`. Values are written back only when their
//! serialized form changes, and the file only when something was written.
//!
//! Two values live here today:
//! - [`PlaybackSettings`] under `vuer-default-vuer-playback`
//! - [`TimelineView`] under `vuer-default-timeline-scale-offset`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::player::Playback;

pub const DEFAULT_COLLECTION: &str = "vuer-default";
pub const PLAYBACK_ID: &str = "vuer-playback";
pub const TIMELINE_ID: &str = "timeline-scale-offset";

/// `"{collection}-{id}"`, collection defaulting to `vuer-default`.
pub fn storage_key(collection: Option<&str>, id: &str) -> String {
    format!("{}-{}", collection.unwrap_or(DEFAULT_COLLECTION), id)
}

/// JSON-file backed key-value store.
#[derive(Debug, Default)]
pub struct Storage {
    path: Option<PathBuf>,
    values: Map<String, Value>,
    dirty: bool,
}

impl Storage {
    /// Not backed by a file; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read `path`. A missing file starts empty; a corrupt one is logged and
    /// replaced on the next flush.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Ignoring unreadable storage {}: {}", path.display(), e);
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No storage at {}, starting empty", path.display());
                Map::new()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        Ok(Self {
            path: Some(path),
            values,
            dirty: false,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Stored value for '{}' does not decode: {}", key, e);
                None
            }
        }
    }

    /// Store `value` under `key`. Returns false when the serialized value is
    /// unchanged (nothing written).
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<bool> {
        let value = serde_json::to_value(value).with_context(|| format!("Failed to encode '{}'", key))?;
        if self.values.get(key) == Some(&value) {
            return Ok(false);
        }
        self.values.insert(key.to_string(), value);
        self.dirty = true;
        Ok(true)
    }

    /// Value under the namespaced key, initialised with `initial` if missing
    /// or undecodable.
    pub fn use_storage<T>(&mut self, collection: Option<&str>, id: &str, initial: T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let key = storage_key(collection, id);
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }
        self.set(&key, &initial)?;
        Ok(initial)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write to disk if anything changed since load/flush.
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.values).context("Failed to encode storage")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        self.dirty = false;
        info!("Storage saved to {}", path.display());
        Ok(())
    }
}

// ========== Playback settings ==========

/// The persisted subset of playback state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub fps: f64,
    pub speed: i64,
    pub maxlen: usize,
    pub recording: bool,
    #[serde(rename = "loop")]
    pub loop_enabled: bool,
    pub paused: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            fps: 60.0,
            speed: 1,
            maxlen: 100,
            recording: false,
            loop_enabled: false,
            paused: false,
        }
    }
}

impl PlaybackSettings {
    pub fn of(playback: &Playback) -> Self {
        Self {
            fps: playback.fps(),
            speed: playback.speed(),
            maxlen: playback.maxlen(),
            recording: playback.is_recording(),
            loop_enabled: playback.loop_enabled(),
            paused: playback.is_paused(),
        }
    }

    pub fn load(storage: &mut Storage) -> Result<Self> {
        storage.use_storage(None, PLAYBACK_ID, Self::default())
    }

    pub fn save(&self, storage: &mut Storage) -> Result<bool> {
        storage.set(&storage_key(None, PLAYBACK_ID), self)
    }
}

// ========== Timeline view ==========

const ZOOM_SPEED: f64 = 0.000025;
const ZOOM_MIN: f64 = 0.05;
/// Lower bound on scale (zoomed out).
const MAX_SCALE: f64 = 0.5;
/// Pixels per frame at the deepest zoom.
const MIN_SCALE: f64 = 50.0;

/// Timeline zoom factor and horizontal scroll offset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineView {
    pub scale: f64,
    pub offset: f64,
}

impl TimelineView {
    /// Initial view for a track `width` pixels wide.
    pub fn initial(width: f64) -> Self {
        Self {
            scale: 1.0,
            offset: 0.5 * width,
        }
    }

    fn max_offset(&self, width: f64) -> f64 {
        (self.scale * width).max(0.0)
    }

    /// Scroll by `delta` pixels.
    pub fn pan(&mut self, delta: f64, width: f64) {
        self.offset = (self.offset + delta).clamp(0.0, self.max_offset(width));
    }

    /// Zoom around `pos` (pixels from the scroll origin). `span` is the
    /// number of frames on the timeline.
    pub fn zoom(&mut self, delta_y: f64, pos: f64, width: f64, span: i64) {
        if width <= 0.0 {
            return;
        }
        let magnitude = delta_y.abs().max(1.0);
        let sign = if delta_y == 0.0 { 0.0 } else { delta_y.signum() };
        let ratio = 1.0 - sign * (magnitude * ZOOM_SPEED).max(ZOOM_MIN);

        let mut scale = (ratio * self.scale).max(MAX_SCALE);
        scale = scale.min(MIN_SCALE * (span.max(1) as f64) / width);

        let left = self.offset + (scale - self.scale) / self.scale * pos;
        self.scale = scale;
        self.offset = left.clamp(0.0, self.max_offset(width));
    }

    pub fn load(storage: &mut Storage, width: f64) -> Result<Self> {
        storage.use_storage(None, TIMELINE_ID, Self::initial(width))
    }

    pub fn save(&self, storage: &mut Storage) -> Result<bool> {
        storage.set(&storage_key(None, TIMELINE_ID), self)
    }
}
