//! Share links and URL-query bootstrapping.
//!
//! A viewer URL may carry:
//! - `scene` - a `.json` / `.yml` / `.yaml` URL to fetch, or a base64
//!   msgpack payload holding the whole scene
//! - `xrMode` - `AR`, `VR` (default) or `hidden`
//! - `frameloop` - `demand` (default) or `always`
//!
//! Packed payloads use the share shape
//! `{children, rawChildren, bgChildren, htmlChildren, scene: {tag, ...attrs}}`.
//! Decoding also accepts a plain root node.
//!
//! Fetching is left to the caller, this module does no I/O.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use thiserror::Error;
use url::{Url, form_urlencoded};

use crate::entities::node::{ChildrenKey, Node, SCENE_TAG};
use crate::entities::scene::SceneStore;

/// Largest packed scene (msgpack bytes, before base64) a share link may carry.
pub const SHARE_LIMIT: usize = 10_000;

pub const DEFAULT_XR_MODE: &str = "VR";
pub const DEFAULT_FRAMELOOP: &str = "demand";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error(
        "scene is {len} bytes packed, over the {limit} byte share limit; replace geometry data with a URI"
    )]
    TooLarge { len: usize, limit: usize },
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to encode scene: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("invalid msgpack payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("invalid base URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid JSON scene: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML scene: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("scene payload must be an object, got {0}")]
    NotAnObject(&'static str),
}

// ========== Query ==========

/// Where the `scene` parameter points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneSource {
    Json(String),
    Yaml(String),
    Packed(String),
}

impl SceneSource {
    /// Dispatch on the lowercased value's extension.
    pub fn classify(value: &str) -> Self {
        let lower = value.to_lowercase();
        if lower.ends_with(".json") {
            SceneSource::Json(value.to_string())
        } else if lower.ends_with(".yml") || lower.ends_with(".yaml") {
            SceneSource::Yaml(value.to_string())
        } else {
            SceneSource::Packed(value.to_string())
        }
    }
}

/// The viewer's query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneQuery {
    pub scene: Option<String>,
    pub xr_mode: Option<String>,
    pub frameloop: Option<String>,
}

impl SceneQuery {
    /// Parse a full URL, `?a=b&c=d` or a bare `a=b&c=d`. Unknown keys are
    /// ignored; for repeated keys the last one wins.
    ///
    /// Values are form-decoded, so an unescaped `+` reads as a space.
    /// [`unpack_scene`] undoes that for base64 payloads.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        let query = match Url::parse(input) {
            Ok(url) => url.query().unwrap_or_default().to_string(),
            Err(_) => {
                let rest = input.split_once('?').map_or(input, |(_, q)| q);
                rest.split('#').next().unwrap_or_default().to_string()
            }
        };

        let mut out = SceneQuery::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "scene" => out.scene = Some(value.into_owned()),
                "xrMode" => out.xr_mode = Some(value.into_owned()),
                "frameloop" => out.frameloop = Some(value.into_owned()),
                other => debug!("Ignoring query parameter '{}'", other),
            }
        }
        out
    }

    pub fn source(&self) -> Option<SceneSource> {
        self.scene
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(SceneSource::classify)
    }

    pub fn xr_mode(&self) -> &str {
        non_empty(self.xr_mode.as_deref()).unwrap_or(DEFAULT_XR_MODE)
    }

    pub fn frameloop(&self) -> &str {
        non_empty(self.frameloop.as_deref()).unwrap_or(DEFAULT_FRAMELOOP)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

// ========== Packing ==========

/// Split a root into the share shape.
fn share_shape(root: &Node) -> Value {
    let mut out = Map::new();
    for which in [
        ChildrenKey::Children,
        ChildrenKey::RawChildren,
        ChildrenKey::BgChildren,
        ChildrenKey::HtmlChildren,
    ] {
        if let Some(items) = root.collection(which) {
            out.insert(which.as_str().to_string(), serde_json::json!(items));
        }
    }
    let mut scene = root.attrs.clone();
    scene.insert("tag".into(), Value::String(root.tag.clone()));
    out.insert("scene".into(), Value::Object(scene));
    Value::Object(out)
}

/// Pack `root` into a base64 share payload. With `limit`, payloads whose
/// msgpack form is larger are refused.
pub fn pack_scene(root: &Node, limit: Option<usize>) -> Result<String, ShareError> {
    let buf = rmp_serde::to_vec_named(&share_shape(root))?;
    if let Some(limit) = limit
        && buf.len() > limit
    {
        return Err(ShareError::TooLarge { len: buf.len(), limit });
    }
    debug!("Packed scene: {} bytes msgpack", buf.len());
    Ok(STANDARD.encode(&buf))
}

/// Decode a base64 msgpack payload into a root node.
///
/// Base64 has no spaces, so any space is a `+` lost to form decoding.
pub fn unpack_scene(payload: &str) -> Result<Node, ShareError> {
    let bytes = STANDARD.decode(payload.trim().replace(' ', "+"))?;
    let value: Value = rmp_serde::from_slice(&bytes)?;
    scene_from_value(value)
}

/// `base` with `scene=<payload>` appended to its query.
pub fn share_url(base: &str, payload: &str) -> Result<String, ShareError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut().append_pair("scene", payload);
    Ok(url.into())
}

/// Turn a decoded document into a root node: the `scene` sub-object of the
/// share shape is hoisted into the root, and `tag` defaults to `Scene`.
pub fn scene_from_value(value: Value) -> Result<Node, ShareError> {
    let mut map = match value {
        Value::Object(map) => map,
        Value::Null => return Err(ShareError::NotAnObject("null")),
        Value::Array(_) => return Err(ShareError::NotAnObject("an array")),
        _ => return Err(ShareError::NotAnObject("a scalar")),
    };

    if let Some(Value::Object(scene)) = map.remove("scene") {
        for (k, v) in scene {
            if ChildrenKey::parse(&k).is_none() {
                map.entry(k).or_insert(v);
            }
        }
    }
    map.entry("tag").or_insert_with(|| Value::String(SCENE_TAG.into()));
    Ok(serde_json::from_value(Value::Object(map))?)
}

// ========== Bootstrapping ==========

/// Resolve the `scene` parameter. `fetch` is called with the URL for the
/// `.json` / `.yaml` forms and must return the body.
pub fn load_scene<F>(query: &SceneQuery, fetch: F) -> Result<Option<Node>, ShareError>
where
    F: FnOnce(&str) -> anyhow::Result<String>,
{
    let Some(source) = query.source() else {
        return Ok(None);
    };
    let node = match source {
        SceneSource::Json(url) => {
            let body = fetch(&url).map_err(|source| ShareError::Fetch { url: url.clone(), source })?;
            scene_from_value(serde_json::from_str(&body)?)?
        }
        SceneSource::Yaml(url) => {
            let body = fetch(&url).map_err(|source| ShareError::Fetch { url: url.clone(), source })?;
            scene_from_value(serde_yaml::from_str(&body)?)?
        }
        SceneSource::Packed(payload) => unpack_scene(&payload)?,
    };
    Ok(Some(node))
}

/// SET the scene named by the query, if any, then apply `xrMode` /
/// `frameloop` to the root. A scene that fails to load is logged and
/// skipped. Returns whether a scene was set.
pub fn bootstrap<F>(scene: &SceneStore, query: &SceneQuery, fetch: F) -> bool
where
    F: FnOnce(&str) -> anyhow::Result<String>,
{
    let loaded = match load_scene(query, fetch) {
        Ok(Some(root)) => {
            info!(
                "Loaded scene from query ({} top-level children)",
                root.child_nodes(ChildrenKey::Children).count()
            );
            scene.set(root);
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!("Failed to parse scene: {}", e);
            false
        }
    };

    let attrs = Node::default()
        .with_attr("xrMode", query.xr_mode())
        .with_attr("frameloop", query.frameloop());
    scene.raw_update(attrs);
    loaded
}
