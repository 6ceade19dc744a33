//! Scene graph node model and tree search.
//!
//! A [`Node`] carries the fields the engine inspects (`key`, `tag`, the four
//! child collections) plus an open attribute map that is passed through
//! untouched. On the wire the attributes are flattened into the node object,
//! so `{"key": "a", "tag": "Box", "color": "red"}` round-trips as-is.
//!
//! Keys are not validated for uniqueness. Every lookup is depth-first and
//! the first match wins: collections in [`ChildrenKey::ALL`] order, then
//! array order. Keeping keys unique is the caller's job.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tag required on the root of a SET payload.
pub const SCENE_TAG: &str = "Scene";

/// The named child collections a node may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildrenKey {
    Children,
    RawChildren,
    HtmlChildren,
    BgChildren,
}

impl ChildrenKey {
    /// Search order for lookups across all collections.
    pub const ALL: [ChildrenKey; 4] = [
        ChildrenKey::Children,
        ChildrenKey::RawChildren,
        ChildrenKey::HtmlChildren,
        ChildrenKey::BgChildren,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChildrenKey::Children => "children",
            ChildrenKey::RawChildren => "rawChildren",
            ChildrenKey::HtmlChildren => "htmlChildren",
            ChildrenKey::BgChildren => "bgChildren",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for ChildrenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry of a child collection: a nested node or raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Child {
    Node(Node),
    Text(String),
}

impl Child {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Child::Node(n) => Some(n),
            Child::Text(_) => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut Node> {
        match self {
            Child::Node(n) => Some(n),
            Child::Text(_) => None,
        }
    }

    fn has_key(&self, key: &str) -> bool {
        self.as_node().and_then(|n| n.key.as_deref()) == Some(key)
    }
}

impl From<Node> for Child {
    fn from(node: Node) -> Self {
        Child::Node(node)
    }
}

/// Scene graph node.
///
/// `tag` is empty when a patch (UPDATE payload) leaves it out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Child>>,
    #[serde(default, rename = "rawChildren", skip_serializing_if = "Option::is_none")]
    pub raw_children: Option<Vec<Child>>,
    #[serde(default, rename = "htmlChildren", skip_serializing_if = "Option::is_none")]
    pub html_children: Option<Vec<Child>>,
    #[serde(default, rename = "bgChildren", skip_serializing_if = "Option::is_none")]
    pub bg_children: Option<Vec<Child>>,
    /// Renderer-specific attributes, opaque to the engine.
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn keyed(key: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Builder-style child append into `children`.
    pub fn with_child(mut self, child: impl Into<Child>) -> Self {
        self.collection_or_default(ChildrenKey::Children).push(child.into());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn collection(&self, which: ChildrenKey) -> Option<&Vec<Child>> {
        match which {
            ChildrenKey::Children => self.children.as_ref(),
            ChildrenKey::RawChildren => self.raw_children.as_ref(),
            ChildrenKey::HtmlChildren => self.html_children.as_ref(),
            ChildrenKey::BgChildren => self.bg_children.as_ref(),
        }
    }

    pub fn collection_mut(&mut self, which: ChildrenKey) -> &mut Option<Vec<Child>> {
        match which {
            ChildrenKey::Children => &mut self.children,
            ChildrenKey::RawChildren => &mut self.raw_children,
            ChildrenKey::HtmlChildren => &mut self.html_children,
            ChildrenKey::BgChildren => &mut self.bg_children,
        }
    }

    /// Collection, created empty if absent.
    pub fn collection_or_default(&mut self, which: ChildrenKey) -> &mut Vec<Child> {
        self.collection_mut(which).get_or_insert_with(Vec::new)
    }

    /// Child nodes of one collection (text entries skipped).
    pub fn child_nodes(&self, which: ChildrenKey) -> impl Iterator<Item = &Node> {
        self.collection(which)
            .into_iter()
            .flatten()
            .filter_map(Child::as_node)
    }

    /// Whether [`Node::assign`] with `patch` would change anything.
    pub fn changed_by(&self, patch: &Node) -> bool {
        (!patch.tag.is_empty() && patch.tag != self.tag)
            || ChildrenKey::ALL
                .into_iter()
                .any(|which| patch.collection(which).is_some_and(|v| self.collection(which) != Some(v)))
            || patch.attrs.iter().any(|(name, value)| self.attrs.get(name) != Some(value))
    }

    /// Shallow merge of `patch` into `self`, returns whether anything changed.
    ///
    /// `key` is never touched; `tag` only when non-empty; collections present
    /// in the patch replace ours wholesale; attributes are inserted one by
    /// one (nested values replaced, not merged).
    pub fn assign(&mut self, patch: Node) -> bool {
        let mut dirty = false;

        if !patch.tag.is_empty() && patch.tag != self.tag {
            self.tag = patch.tag;
            dirty = true;
        }

        let Node {
            children,
            raw_children,
            html_children,
            bg_children,
            attrs,
            ..
        } = patch;
        let incoming = [
            (ChildrenKey::Children, children),
            (ChildrenKey::RawChildren, raw_children),
            (ChildrenKey::HtmlChildren, html_children),
            (ChildrenKey::BgChildren, bg_children),
        ];
        for (which, value) in incoming {
            if let Some(value) = value {
                let slot = self.collection_mut(which);
                if slot.as_ref() != Some(&value) {
                    *slot = Some(value);
                    dirty = true;
                }
            }
        }

        for (name, value) in attrs {
            if self.attrs.get(&name) != Some(&value) {
                self.attrs.insert(name, value);
                dirty = true;
            }
        }
        dirty
    }
}

// ========== Tree search ==========

/// Depth-first lookup of `key`, starting with `node` itself and descending
/// through `collections` at every level.
pub fn find_by_key<'a>(node: &'a Node, key: &str, collections: &[ChildrenKey]) -> Option<&'a Node> {
    if node.key.as_deref() == Some(key) {
        return Some(node);
    }
    for &which in collections {
        for child in node.child_nodes(which) {
            if let Some(found) = find_by_key(child, key, collections) {
                return Some(found);
            }
        }
    }
    None
}

/// Mutable variant of [`find_by_key`], same visiting order.
pub fn find_by_key_mut<'a>(
    node: &'a mut Node,
    key: &str,
    collections: &[ChildrenKey],
) -> Option<&'a mut Node> {
    if node.key.as_deref() == Some(key) {
        return Some(node);
    }
    // Locate first, then borrow mutably along the found path.
    let path = locate(node, key, collections)?;
    let mut current = node;
    for (which, index) in path {
        current = current
            .collection_mut(which)
            .as_mut()?
            .get_mut(index)?
            .as_node_mut()?;
    }
    Some(current)
}

/// Path (collection, index) pairs from `node` to the first descendant with
/// `key`. Empty when `node` itself matches.
fn locate(node: &Node, key: &str, collections: &[ChildrenKey]) -> Option<Vec<(ChildrenKey, usize)>> {
    if node.key.as_deref() == Some(key) {
        return Some(Vec::new());
    }
    for &which in collections {
        let Some(items) = node.collection(which) else {
            continue;
        };
        for (index, child) in items.iter().enumerate() {
            let Some(child) = child.as_node() else {
                continue;
            };
            if let Some(mut rest) = locate(child, key, collections) {
                rest.insert(0, (which, index));
                return Some(rest);
            }
        }
    }
    None
}

/// Search only inside `items` (and their descendants through all
/// collections). Used for UPSERT, which looks under one named parent.
pub fn find_in<'a>(items: &'a [Child], key: &str) -> Option<&'a Node> {
    items
        .iter()
        .filter_map(Child::as_node)
        .find_map(|n| find_by_key(n, key, &ChildrenKey::ALL))
}

/// Mutable variant of [`find_in`].
pub fn find_in_mut<'a>(items: &'a mut [Child], key: &str) -> Option<&'a mut Node> {
    let index = items.iter().position(|child| {
        child
            .as_node()
            .is_some_and(|n| find_by_key(n, key, &ChildrenKey::ALL).is_some())
    })?;
    let node = items[index].as_node_mut()?;
    find_by_key_mut(node, key, &ChildrenKey::ALL)
}

/// Whether [`remove_by_key`] would find something to splice out.
pub fn has_descendant(node: &Node, key: &str) -> bool {
    ChildrenKey::ALL.into_iter().any(|which| {
        node.child_nodes(which)
            .any(|child| find_by_key(child, key, &ChildrenKey::ALL).is_some())
    })
}

/// Splice the first descendant with `key` out of whichever collection holds
/// it. The root itself is never removed.
pub fn remove_by_key(node: &mut Node, key: &str) -> Option<Node> {
    for which in ChildrenKey::ALL {
        let Some(items) = node.collection_mut(which).as_mut() else {
            continue;
        };
        if let Some(index) = items.iter().position(|c| c.has_key(key)) {
            return match items.remove(index) {
                Child::Node(n) => Some(n),
                Child::Text(_) => None,
            };
        }
        for child in items.iter_mut() {
            if let Some(inner) = child.as_node_mut()
                && let Some(removed) = remove_by_key(inner, key)
            {
                return Some(removed);
            }
        }
    }
    None
}
