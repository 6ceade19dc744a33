//! Wire events and scene operation payloads.
//!
//! # Directions
//!
//! - [`ServerEvent`] (downlink): `{ts, etype, data}`, scene mutations arrive
//!   this way
//! - [`ClientEvent`] (uplink): `{ts, etype, key?, value?}`, local
//!   interactions leave this way
//!
//! A playback [`Frame`] has exactly the downlink shape, so recorded frames can
//! be replayed through the same scene handlers.
//!
//! # Scene operations
//!
//! | etype    | payload                    |
//! |----------|----------------------------|
//! | `SET`    | root node, `tag == Scene`  |
//! | `ADD`    | [`AddData`]                |
//! | `UPDATE` | [`UpdateData`]             |
//! | `UPSERT` | [`UpsertData`]             |
//! | `REMOVE` | [`RemoveData`]             |
//!
//! Use the `*_op` constructors rather than building the JSON by hand.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::node::{ChildrenKey, Node};
use crate::core::store::EventType;

pub const SET: &str = "SET";
pub const ADD: &str = "ADD";
pub const UPDATE: &str = "UPDATE";
pub const UPSERT: &str = "UPSERT";
pub const REMOVE: &str = "REMOVE";

/// The etypes consumed by the scene graph engine.
pub const SCENE_OPS: [&str; 5] = [SET, ADD, UPDATE, UPSERT, REMOVE];

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Downlink event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub ts: f64,
    pub etype: String,
    #[serde(default)]
    pub data: Value,
}

/// A recorded event in the playback buffer.
pub type Frame = ServerEvent;

impl ServerEvent {
    pub fn new(etype: impl Into<String>, data: Value) -> Self {
        Self {
            ts: now_ms(),
            etype: etype.into(),
            data,
        }
    }

    pub fn with_ts(mut self, ts: f64) -> Self {
        self.ts = ts;
        self
    }

    pub fn is_scene_op(&self) -> bool {
        SCENE_OPS.contains(&self.etype.as_str())
    }
}

impl EventType for ServerEvent {
    fn etype(&self) -> &str {
        &self.etype
    }
}

/// Uplink event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    pub ts: f64,
    pub etype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ClientEvent {
    pub fn new(etype: impl Into<String>, key: Option<String>, value: Option<Value>) -> Self {
        Self {
            ts: now_ms(),
            etype: etype.into(),
            key,
            value,
        }
    }
}

impl EventType for ClientEvent {
    fn etype(&self) -> &str {
        &self.etype
    }
}

/// Record an uplink event as a frame: `data = {key, value}`.
impl From<ClientEvent> for ServerEvent {
    fn from(event: ClientEvent) -> Self {
        Self {
            ts: event.ts,
            etype: event.etype,
            data: json!({ "key": event.key, "value": event.value }),
        }
    }
}

// ========== Payloads ==========

fn default_to() -> String {
    ChildrenKey::Children.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddData {
    pub nodes: Vec<Node>,
    /// Root collection name or parent node key.
    #[serde(default = "default_to", deserialize_with = "null_as_default_to")]
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateData {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertData {
    pub nodes: Vec<Node>,
    #[serde(default = "default_to", deserialize_with = "null_as_default_to")]
    pub to: String,
}

/// ADD and UPSERT senders may emit `"to": null` or `"to": ""`.
fn null_as_default_to<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|to| !to.is_empty())
        .unwrap_or_else(default_to))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveData {
    pub keys: Vec<String>,
}

// ========== Op constructors ==========

fn stamp(etype: &str, data: Value, ts: Option<f64>) -> ServerEvent {
    ServerEvent {
        ts: ts.unwrap_or_else(now_ms),
        etype: etype.to_string(),
        data,
    }
}

/// Replace the whole scene.
pub fn set_op(scene: &Node, ts: Option<f64>) -> ServerEvent {
    stamp(SET, json!(scene), ts)
}

/// Append nodes to a root collection or under a parent key.
pub fn add_op(nodes: Vec<Node>, to: Option<&str>, ts: Option<f64>) -> ServerEvent {
    let to = to.map(str::to_string).unwrap_or_else(default_to);
    let data = AddData { nodes, to };
    stamp(ADD, json!(data), ts)
}

/// Shallow-merge patches into existing nodes.
pub fn update_op(nodes: Vec<Node>, ts: Option<f64>) -> ServerEvent {
    let data = UpdateData { nodes };
    stamp(UPDATE, json!(data), ts)
}

/// Update in place or append under `to`.
pub fn upsert_op(nodes: Vec<Node>, to: Option<&str>, ts: Option<f64>) -> ServerEvent {
    let to = to.map(str::to_string).unwrap_or_else(default_to);
    let data = UpsertData { nodes, to };
    stamp(UPSERT, json!(data), ts)
}

pub fn remove_op(keys: Vec<String>, ts: Option<f64>) -> ServerEvent {
    let data = RemoveData { keys };
    stamp(REMOVE, json!(data), ts)
}
