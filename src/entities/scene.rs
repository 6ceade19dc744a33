//! Scene graph mutation engine.
//!
//! [`SceneStore`] owns the committed tree as an `Arc<Node>`. Each operation
//! checks the committed tree first and copies it (`Arc::make_mut`) only
//! before the first item that will change something. No-op batches copy
//! nothing and keep the previous `Arc`, so consumers can skip work with
//! `Arc::ptr_eq`.
//!
//! Errors inside a batch (unknown key, missing parent, wrong root tag) are
//! logged and skipped; the rest of the batch still applies.
//!
//! Wiring to the downlink:
//! ```ignore
//! let scene = SceneStore::new();
//! let handles = scene.bind(&downlink);
//! downlink.publish(add_op(vec![Node::keyed("a", "Box")], None, None));
//! downlink.scheduler().run_until_idle();
//! ```

use std::sync::{Arc, Mutex};

use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use super::events::{
    ADD, AddData, REMOVE, RemoveData, SCENE_OPS, SET, ServerEvent, UPDATE, UPSERT, UpdateData,
    UpsertData,
};
use super::node::{
    ChildrenKey, Node, SCENE_TAG, find_by_key, find_by_key_mut, find_in, find_in_mut,
    has_descendant, remove_by_key,
};
use crate::core::store::{Store, Unsubscribe};

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("the top level node of a SET must be <Scene/>, got <{0}/>")]
    NotSceneRoot(String),
    #[error("failed to add node {key:?} to {parent}: parent not found")]
    ParentNotFound { key: Option<String>, parent: String },
    #[error("node not found: {0}")]
    KeyNotFound(String),
    #[error("UPDATE patch without a key")]
    MissingKey,
    #[error("malformed {etype} payload: {source}")]
    Payload {
        etype: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("not a scene operation: {0}")]
    UnknownOp(String),
}

/// Outcome of one batch.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// A new tree was committed.
    pub dirty: bool,
    /// Items that were skipped, already logged.
    pub errors: Vec<SceneError>,
}

#[derive(Debug)]
struct SceneState {
    tree: Arc<Node>,
    revision: u64,
}

/// Root node the viewer starts with before any SET arrives.
pub fn default_scene() -> Node {
    let mut root = Node::new(SCENE_TAG)
        .with_attr("position", json!([0, 0, 0]))
        .with_attr("rotation", json!([0, 0, 0, "XYZ"]))
        .with_attr("scale", json!([1, 1, 1]))
        .with_attr("up", json!([0, 1, 0]))
        .with_attr("xrMode", "VR")
        .with_attr("frameloop", "demand");
    for which in ChildrenKey::ALL {
        root.collection_or_default(which);
    }
    root
}

/// Shared handle to the scene tree. Clones point at the same tree.
#[derive(Debug, Clone)]
pub struct SceneStore {
    state: Arc<Mutex<SceneState>>,
}

impl Default for SceneStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneStore {
    pub fn new() -> Self {
        Self::with_tree(default_scene())
    }

    pub fn with_tree(tree: Node) -> Self {
        Self {
            state: Arc::new(Mutex::new(SceneState {
                tree: Arc::new(tree),
                revision: 0,
            })),
        }
    }

    /// Current committed tree.
    pub fn snapshot(&self) -> Arc<Node> {
        Arc::clone(&self.state.lock().unwrap_or_else(|e| e.into_inner()).tree)
    }

    /// Number of commits so far.
    pub fn revision(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).revision
    }

    /// Run `op` on a shared handle to the tree, commit only if it reports a
    /// change. `op` must go through `Arc::make_mut` before mutating.
    fn commit<F>(&self, label: &str, op: F) -> ApplyReport
    where
        F: FnOnce(&mut Arc<Node>, &mut Vec<SceneError>) -> bool,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut working = Arc::clone(&state.tree);
        let mut errors = Vec::new();
        let dirty = op(&mut working, &mut errors);

        for err in &errors {
            match err {
                SceneError::KeyNotFound(_) => warn!("{}: {}", label, err),
                _ => error!("{}: {}", label, err),
            }
        }

        if dirty {
            state.tree = working;
            state.revision += 1;
            debug!("{} committed scene revision {}", label, state.revision);
        } else {
            debug!("{} changed nothing, keeping revision {}", label, state.revision);
        }
        ApplyReport { dirty, errors }
    }

    // ========== Operations ==========

    /// Replace the whole tree. The root key is dropped; a root whose tag is
    /// not `Scene` is reported but applied anyway.
    pub fn set(&self, mut scene: Node) -> ApplyReport {
        scene.key = None;
        self.commit(SET, move |root, errors| {
            if scene.tag != SCENE_TAG {
                errors.push(SceneError::NotSceneRoot(scene.tag.clone()));
            }
            *root = Arc::new(scene);
            true
        })
    }

    /// Append nodes to a root collection, or to the `children` of the node
    /// whose key is `to`.
    pub fn add(&self, data: AddData) -> ApplyReport {
        let AddData { nodes, to } = data;
        self.commit(ADD, move |root, errors| {
            let mut dirty = false;
            for node in nodes {
                if let Some(which) = ChildrenKey::parse(&to) {
                    Arc::make_mut(root).collection_or_default(which).push(node.into());
                    dirty = true;
                    continue;
                }
                if find_by_key(root, &to, &ChildrenKey::ALL).is_none() {
                    errors.push(SceneError::ParentNotFound {
                        key: node.key,
                        parent: to.clone(),
                    });
                    continue;
                }
                if let Some(parent) = find_by_key_mut(Arc::make_mut(root), &to, &ChildrenKey::ALL) {
                    parent.collection_or_default(ChildrenKey::Children).push(node.into());
                    dirty = true;
                }
            }
            dirty
        })
    }

    /// Shallow-merge each patch into the node with the same key.
    pub fn update(&self, data: UpdateData) -> ApplyReport {
        self.commit(UPDATE, move |root, errors| {
            let mut dirty = false;
            for patch in data.nodes {
                let Some(key) = patch.key.clone() else {
                    errors.push(SceneError::MissingKey);
                    continue;
                };
                let changes = match find_by_key(root, &key, &ChildrenKey::ALL) {
                    Some(node) => node.changed_by(&patch),
                    None => {
                        errors.push(SceneError::KeyNotFound(key));
                        continue;
                    }
                };
                if !changes {
                    continue;
                }
                if let Some(node) = find_by_key_mut(Arc::make_mut(root), &key, &ChildrenKey::ALL) {
                    dirty |= node.assign(patch);
                }
            }
            dirty
        })
    }

    /// Update nodes found under `to`, append the rest there.
    pub fn upsert(&self, data: UpsertData) -> ApplyReport {
        let UpsertData { nodes, to } = data;
        self.commit(UPSERT, move |root, errors| {
            let which = ChildrenKey::parse(&to);
            let current = match which {
                Some(which) => Some(root.collection(which).map_or(&[][..], Vec::as_slice)),
                None => find_by_key(root, &to, &ChildrenKey::ALL)
                    .map(|parent| parent.collection(ChildrenKey::Children).map_or(&[][..], Vec::as_slice)),
            };
            let Some(current) = current else {
                errors.push(SceneError::ParentNotFound { key: None, parent: to });
                return false;
            };
            // Items that change nothing leave the tree as it was, so checking
            // each against the committed tree is enough.
            let changes = nodes.iter().any(|node| {
                match node.key.as_deref().and_then(|key| find_in(current, key)) {
                    Some(old) => old.changed_by(node),
                    None => true,
                }
            });
            if !changes {
                return false;
            }

            let tree = Arc::make_mut(root);
            let items = match which {
                Some(which) => tree.collection_or_default(which),
                None => match find_by_key_mut(tree, &to, &ChildrenKey::ALL) {
                    Some(parent) => parent.collection_or_default(ChildrenKey::Children),
                    None => return false,
                },
            };

            let mut dirty = false;
            for node in nodes {
                let existing = match node.key.as_deref() {
                    Some(key) => find_in_mut(items, key),
                    None => None,
                };
                match existing {
                    Some(old) => dirty |= old.assign(node),
                    None => {
                        items.push(node.into());
                        dirty = true;
                    }
                }
            }
            dirty
        })
    }

    /// Splice each key out of whichever collection holds it.
    pub fn remove(&self, data: RemoveData) -> ApplyReport {
        self.commit(REMOVE, move |root, errors| {
            let mut dirty = false;
            for key in data.keys {
                if !has_descendant(root, &key) {
                    errors.push(SceneError::KeyNotFound(key));
                    continue;
                }
                dirty |= remove_by_key(Arc::make_mut(root), &key).is_some();
            }
            dirty
        })
    }

    /// Merge attributes (or whole collections) into the root.
    pub fn raw_update(&self, patch: Node) -> ApplyReport {
        self.commit("RAW_UPDATE", move |root, _| {
            root.changed_by(&patch) && Arc::make_mut(root).assign(patch)
        })
    }

    // ========== Event plumbing ==========

    /// Decode and apply one scene operation event.
    pub fn apply(&self, event: &ServerEvent) -> Result<ApplyReport, SceneError> {
        match event.etype.as_str() {
            SET => Ok(self.set(decode(event)?)),
            ADD => Ok(self.add(decode(event)?)),
            UPDATE => Ok(self.update(decode(event)?)),
            UPSERT => Ok(self.upsert(decode(event)?)),
            REMOVE => Ok(self.remove(decode(event)?)),
            other => Err(SceneError::UnknownOp(other.to_string())),
        }
    }

    /// Subscribe to the five scene operations on `stream`.
    pub fn bind(&self, stream: &Store<ServerEvent>) -> Vec<Unsubscribe> {
        SCENE_OPS
            .iter()
            .map(|etype| {
                let scene = self.clone();
                stream.subscribe(etype, move |event: &ServerEvent| {
                    if let Err(err) = scene.apply(event) {
                        error!("Dropping scene event: {}", err);
                    }
                })
            })
            .collect()
    }
}

fn decode<T: DeserializeOwned>(event: &ServerEvent) -> Result<T, SceneError> {
    serde_json::from_value(event.data.clone()).map_err(|source| SceneError::Payload {
        etype: event.etype.clone(),
        source,
    })
}
