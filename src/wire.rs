//! JSON wire codec.
//!
//! JSON is canonical: every type carries a `"type"` discriminator and the
//! format round-trips, `decode(encode(x)) == x` for all valid values.
//! Decoding guards payload size before parsing and bounds after.

use crate::error::{Error, Result, ValidationError};
use crate::path::HexPath;
use crate::predictor::Hint;
use crate::validation::Limits;
use crate::vdom::{Patch, VNode};

pub fn encode_vnode(node: &VNode) -> Result<String> {
    serde_json::to_string(node).map_err(Error::from)
}

pub fn decode_vnode(json: &str, limits: &Limits) -> Result<VNode> {
    crate::validation::deserialize_vnode_safe(json, limits)
}

pub fn encode_patches(patches: &[Patch]) -> Result<String> {
    serde_json::to_string(patches).map_err(Error::from)
}

pub fn decode_patches(json: &str, limits: &Limits) -> Result<Vec<Patch>> {
    if json.len() > limits.max_json_size {
        return Err(Error::Validation(ValidationError::JsonTooLarge {
            size: json.len(),
            max: limits.max_json_size,
        }));
    }
    let patches: Vec<Patch> = serde_json::from_str(json)?;
    crate::patch_validator::validate_patches(&patches, limits)?;
    Ok(patches)
}

pub fn encode_hint(hint: &Hint) -> Result<String> {
    serde_json::to_string(hint).map_err(Error::from)
}

pub fn decode_hint(json: &str, limits: &Limits) -> Result<Hint> {
    if json.len() > limits.max_json_size {
        return Err(Error::Validation(ValidationError::JsonTooLarge {
            size: json.len(),
            max: limits.max_json_size,
        }));
    }
    let hint: Hint = serde_json::from_str(json)?;
    crate::patch_validator::validate_patches(&hint.patches, limits)?;
    Ok(hint)
}

/// Tagged wire error: `{"kind": "...", "message": "..."}`, with the
/// exceeded bound named for validation failures.
pub fn encode_error(err: &Error) -> String {
    let payload = match err {
        Error::Validation(v) => serde_json::json!({
            "kind": err.kind(),
            "message": err.to_string(),
            "bound": v.bound(),
        }),
        _ => serde_json::json!({
            "kind": err.kind(),
            "message": err.to_string(),
        }),
    };
    payload.to_string()
}

/// Convert a hex path into the DOM index path a client would walk.
///
/// Siblings are visited in ascending hex order and the index advances only
/// past non-Null siblings: a Null consumes a path slot but no DOM
/// position. Returns `None` for paths not in the tree and for Null
/// targets, which have no DOM position at all.
pub fn dom_index_path(root: &VNode, target: &HexPath) -> Option<Vec<usize>> {
    if root.path() == target {
        return if root.is_null() { None } else { Some(Vec::new()) };
    }

    let root_depth = root.path().depth();
    let target_segments: Vec<&str> = target.as_str().split('.').collect();
    if target_segments.len() <= root_depth
        || !target.as_str().starts_with(root.path().as_str())
    {
        return None;
    }

    let mut indices = Vec::with_capacity(target_segments.len() - root_depth);
    let mut current = root;

    for depth in root_depth + 1..=target_segments.len() {
        let prefix = target_segments[..depth].join(".");

        let mut siblings: Vec<&VNode> = current.children().iter().collect();
        siblings.sort_by(|a, b| a.path().cmp(b.path()));

        let mut dom_index = 0usize;
        let mut found = None;
        for sibling in siblings {
            if sibling.path().as_str() == prefix {
                found = Some(sibling);
                break;
            }
            if !sibling.is_null() {
                dom_index += 1;
            }
        }

        let node = found?;
        if node.is_null() {
            return None;
        }
        indices.push(dom_index);
        current = node;
    }

    Some(indices)
}
