use crate::path::HexPath;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A virtual DOM node submitted by the host runtime.
///
/// Every variant carries the hex path assigned upstream by the transpiler.
/// `Null` marks a conditional branch that rendered nothing: it occupies a
/// path slot but no DOM position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VNode {
    Element(VElement),
    Text(VText),
    Null(VNull),
}

/// An element node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VElement {
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub children: Vec<VNode>,
    /// Optional user-supplied identity for keyed reconciliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub path: HexPath,
}

/// A text node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VText {
    pub text: String,
    pub path: HexPath,
}

/// Placeholder for a conditional that rendered nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VNull {
    pub path: HexPath,
}

impl VNode {
    pub fn element(
        tag: impl Into<String>,
        attributes: HashMap<String, String>,
        children: Vec<VNode>,
        path: impl Into<HexPath>,
    ) -> Self {
        VNode::Element(VElement {
            tag: tag.into(),
            attributes,
            children,
            key: None,
            path: path.into(),
        })
    }

    pub fn keyed_element(
        tag: impl Into<String>,
        key: impl Into<String>,
        attributes: HashMap<String, String>,
        children: Vec<VNode>,
        path: impl Into<HexPath>,
    ) -> Self {
        VNode::Element(VElement {
            tag: tag.into(),
            attributes,
            children,
            key: Some(key.into()),
            path: path.into(),
        })
    }

    pub fn text(text: impl Into<String>, path: impl Into<HexPath>) -> Self {
        VNode::Text(VText {
            text: text.into(),
            path: path.into(),
        })
    }

    pub fn null(path: impl Into<HexPath>) -> Self {
        VNode::Null(VNull { path: path.into() })
    }

    pub fn path(&self) -> &HexPath {
        match self {
            VNode::Element(el) => &el.path,
            VNode::Text(t) => &t.path,
            VNode::Null(n) => &n.path,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            VNode::Element(el) => el.key.as_deref(),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, VNode::Text(_))
    }

    pub fn is_element(&self) -> bool {
        matches!(self, VNode::Element(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, VNode::Null(_))
    }

    /// Variant name for error messages.
    pub fn node_type(&self) -> &'static str {
        match self {
            VNode::Element(_) => "Element",
            VNode::Text(_) => "Text",
            VNode::Null(_) => "Null",
        }
    }

    pub fn children(&self) -> &[VNode] {
        match self {
            VNode::Element(el) => &el.children,
            _ => &[],
        }
    }

    /// Total node count, Null placeholders included.
    pub fn count_nodes(&self) -> usize {
        match self {
            VNode::Element(el) => 1 + el.children.iter().map(VNode::count_nodes).sum::<usize>(),
            VNode::Text(_) | VNode::Null(_) => 1,
        }
    }

    /// Approximate heap footprint, used for store accounting.
    pub fn estimate_size(&self) -> usize {
        match self {
            VNode::Text(t) => std::mem::size_of::<VText>() + t.text.capacity() + t.path.0.capacity(),
            VNode::Null(n) => std::mem::size_of::<VNull>() + n.path.0.capacity(),
            VNode::Element(el) => {
                let attrs: usize = el
                    .attributes
                    .iter()
                    .map(|(k, v)| k.capacity() + v.capacity())
                    .sum();
                let children: usize = el.children.iter().map(VNode::estimate_size).sum();
                std::mem::size_of::<VElement>()
                    + el.tag.capacity()
                    + el.path.0.capacity()
                    + el.key.as_ref().map_or(0, |k| k.capacity())
                    + attrs
                    + children
            }
        }
    }
}

/// An atomic mutation instruction the host applies to its materialized DOM.
///
/// Ordering inside a patch list is significant; see the reconciler for the
/// linearization the engine guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Patch {
    /// Swap the subtree at `path` wholesale.
    Replace { path: HexPath, node: VNode },
    /// Insert a subtree at a path the host does not yet materialize.
    Create { path: HexPath, node: VNode },
    /// Delete the subtree at `path`.
    Remove { path: HexPath },
    /// Change the content of a text node.
    UpdateText { path: HexPath, text: String },
    /// Set or overwrite one attribute.
    SetAttribute {
        path: HexPath,
        name: String,
        value: String,
    },
    /// Delete one attribute.
    RemoveAttribute { path: HexPath, name: String },
    /// Reorder a keyed sibling from one DOM index to another.
    Move {
        path: HexPath,
        from_index: usize,
        to_index: usize,
    },
}

impl Patch {
    pub fn path(&self) -> &HexPath {
        match self {
            Patch::Replace { path, .. }
            | Patch::Create { path, .. }
            | Patch::Remove { path }
            | Patch::UpdateText { path, .. }
            | Patch::SetAttribute { path, .. }
            | Patch::RemoveAttribute { path, .. }
            | Patch::Move { path, .. } => path,
        }
    }
}
