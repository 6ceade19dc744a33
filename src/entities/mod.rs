//! Scene entities - node model, wire events, scene graph engine
//!
//! - [`node`]: the node tree and depth-first search helpers
//! - [`events`]: downlink/uplink event shapes and scene op payloads
//! - [`scene`]: applies SET/ADD/UPDATE/UPSERT/REMOVE to a committed tree

pub mod events;
pub mod node;
pub mod scene;

pub use events::{ClientEvent, Frame, ServerEvent};
pub use node::{Child, ChildrenKey, Node};
pub use scene::{ApplyReport, SceneError, SceneStore};
