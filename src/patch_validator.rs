use crate::error::{Error, Result, ValidationError};
use crate::path::HexPath;
use crate::validation::Limits;
use crate::vdom::{Patch, VNode};

/// Bounds-check a patch list without a target tree: path shape and depth,
/// text and attribute sizes, and full validation of any embedded nodes.
/// The predictor runs this on everything it is about to emit.
pub fn validate_patches(patches: &[Patch], limits: &Limits) -> Result<()> {
    for patch in patches {
        validate_bounds(patch, limits)?;
    }
    Ok(())
}

fn validate_bounds(patch: &Patch, limits: &Limits) -> Result<()> {
    let path = patch.path();
    if !path.is_wellformed() {
        return Err(Error::Validation(ValidationError::MalformedPath {
            path: path.clone(),
        }));
    }
    if path.depth() > limits.max_depth {
        return Err(Error::Validation(ValidationError::DepthExceeded {
            depth: path.depth(),
            max: limits.max_depth,
        }));
    }

    match patch {
        Patch::UpdateText { text, .. } => {
            if text.len() > limits.max_text {
                return Err(Error::Validation(ValidationError::TextTooLong {
                    length: text.len(),
                    max: limits.max_text,
                    path: path.clone(),
                }));
            }
        }
        Patch::SetAttribute { name, value, .. } => {
            if name.is_empty() {
                return Err(Error::Validation(ValidationError::EmptyAttributeName {
                    path: path.clone(),
                }));
            }
            if name.len() > limits.max_attribute_name {
                return Err(Error::Validation(ValidationError::AttributeNameTooLong {
                    length: name.len(),
                    max: limits.max_attribute_name,
                    path: path.clone(),
                }));
            }
            if value.len() > limits.max_attribute_value {
                return Err(Error::Validation(ValidationError::AttributeValueTooLong {
                    name: name.clone(),
                    length: value.len(),
                    max: limits.max_attribute_value,
                    path: path.clone(),
                }));
            }
        }
        Patch::RemoveAttribute { name, .. } => {
            if name.is_empty() {
                return Err(Error::Validation(ValidationError::EmptyAttributeName {
                    path: path.clone(),
                }));
            }
        }
        Patch::Create { node, .. } | Patch::Replace { node, .. } => {
            node.validate(limits)?;
        }
        Patch::Move {
            from_index,
            to_index,
            ..
        } => {
            if *from_index > limits.max_children || *to_index > limits.max_children {
                return Err(Error::Validation(ValidationError::TooManyChildren {
                    count: (*from_index).max(*to_index),
                    max: limits.max_children,
                    path: path.clone(),
                }));
            }
        }
        Patch::Remove { .. } => {}
    }
    Ok(())
}

/// Applicability check: every patch must land on a node of the right kind
/// in `tree`. Hosts can run this before applying patches received from a
/// cache of unknown freshness.
pub fn validate_patches_against(patches: &[Patch], tree: &VNode, limits: &Limits) -> Result<()> {
    for patch in patches {
        validate_bounds(patch, limits)?;
        validate_applicability(patch, tree)?;
    }
    Ok(())
}

fn validate_applicability(patch: &Patch, tree: &VNode) -> Result<()> {
    let path = patch.path();
    match patch {
        Patch::UpdateText { .. } => {
            let node = node_at(tree, path)?;
            if !node.is_text() {
                return Err(Error::Internal(format!(
                    "UpdateText targets {} at {path}",
                    node.node_type()
                )));
            }
        }
        Patch::SetAttribute { .. } | Patch::RemoveAttribute { .. } => {
            let node = node_at(tree, path)?;
            if !node.is_element() {
                return Err(Error::Internal(format!(
                    "attribute patch targets {} at {path}",
                    node.node_type()
                )));
            }
        }
        Patch::Replace { .. } => {
            node_at(tree, path)?;
        }
        Patch::Remove { .. } => {
            let node = node_at(tree, path)?;
            if node.is_null() {
                return Err(Error::Internal(format!(
                    "Remove targets a Null placeholder at {path}"
                )));
            }
        }
        Patch::Create { .. } => {
            // The target path must not be materialized yet; its parent must
            // be an element that can hold it.
            match node_at(tree, path) {
                Ok(existing) if !existing.is_null() => {
                    return Err(Error::Internal(format!(
                        "Create targets an existing node at {path}"
                    )));
                }
                _ => {}
            }
            let parent_path = path
                .parent()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| Error::Internal(format!("Create at rootless path {path}")))?;
            let parent = node_at(tree, &parent_path)?;
            if !parent.is_element() {
                return Err(Error::Internal(format!(
                    "Create parent is {} at {parent_path}",
                    parent.node_type()
                )));
            }
        }
        Patch::Move { .. } => {
            let node = node_at(tree, path)?;
            if node.key().is_none() {
                return Err(Error::Internal(format!(
                    "Move targets an unkeyed node at {path}"
                )));
            }
        }
    }
    Ok(())
}

/// Locate a node by hex path: the root matches directly, descendants are
/// found by prefix descent through element children.
pub fn node_at<'a>(tree: &'a VNode, path: &HexPath) -> Result<&'a VNode> {
    if tree.path() == path {
        return Ok(tree);
    }
    let mut current = tree;
    'descend: while current.path() != path {
        if let VNode::Element(el) = current {
            for child in &el.children {
                let child_path = child.path();
                if path == child_path
                    || (path.as_str().starts_with(child_path.as_str())
                        && path.as_str().as_bytes().get(child_path.as_str().len())
                            == Some(&b'.'))
                {
                    current = child;
                    continue 'descend;
                }
            }
        }
        return Err(Error::NotFound(format!("no node at path {path}")));
    }
    Ok(current)
}
