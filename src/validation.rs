use crate::error::{Error, Result, ValidationError};
use crate::vdom::VNode;
use std::collections::HashSet;

/// Bounds enforced on every tree crossing the host boundary.
///
/// The engine is invoked from a host that may be fed attacker-controlled
/// input; a pathological tree must fail fast instead of exhausting memory
/// or stack.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum tree depth in levels.
    pub max_depth: usize,
    /// Maximum total node count, Null placeholders included.
    pub max_tree_size: usize,
    /// Maximum children under a single element.
    pub max_children: usize,
    /// Maximum attribute name length in bytes.
    pub max_attribute_name: usize,
    /// Maximum attribute value length in bytes.
    pub max_attribute_value: usize,
    /// Maximum text content length in bytes.
    pub max_text: usize,
    /// Maximum JSON payload size accepted for deserialization.
    pub max_json_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 100,
            max_tree_size: 100_000,
            max_children: 10_000,
            max_attribute_name: 256,
            max_attribute_value: 4_096,
            max_text: 1024 * 1024,
            max_json_size: 1024 * 1024,
        }
    }
}

impl VNode {
    /// Validate the whole tree in one pass.
    ///
    /// Checks run eagerly while walking so a violation deep in an oversized
    /// tree aborts before the rest of it is visited; nothing beyond the
    /// first offending level is allocated or traversed.
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        let mut seen_nodes = 0usize;
        validate_node(self, 1, limits, &mut seen_nodes)
    }
}

fn validate_node(
    node: &VNode,
    depth: usize,
    limits: &Limits,
    seen_nodes: &mut usize,
) -> Result<()> {
    if depth > limits.max_depth {
        return Err(Error::Validation(ValidationError::DepthExceeded {
            depth,
            max: limits.max_depth,
        }));
    }

    *seen_nodes += 1;
    if *seen_nodes > limits.max_tree_size {
        return Err(Error::Validation(ValidationError::TreeTooLarge {
            nodes: *seen_nodes,
            max: limits.max_tree_size,
        }));
    }

    let path = node.path();
    if !path.is_wellformed() {
        return Err(Error::Validation(ValidationError::MalformedPath {
            path: path.clone(),
        }));
    }

    match node {
        VNode::Text(t) => {
            if t.text.len() > limits.max_text {
                return Err(Error::Validation(ValidationError::TextTooLong {
                    length: t.text.len(),
                    max: limits.max_text,
                    path: t.path.clone(),
                }));
            }
        }
        VNode::Null(_) => {}
        VNode::Element(el) => {
            if el.children.len() > limits.max_children {
                return Err(Error::Validation(ValidationError::TooManyChildren {
                    count: el.children.len(),
                    max: limits.max_children,
                    path: el.path.clone(),
                }));
            }

            for (name, value) in &el.attributes {
                if name.is_empty() {
                    return Err(Error::Validation(ValidationError::EmptyAttributeName {
                        path: el.path.clone(),
                    }));
                }
                if name.len() > limits.max_attribute_name {
                    return Err(Error::Validation(ValidationError::AttributeNameTooLong {
                        length: name.len(),
                        max: limits.max_attribute_name,
                        path: el.path.clone(),
                    }));
                }
                if value.len() > limits.max_attribute_value {
                    return Err(Error::Validation(ValidationError::AttributeValueTooLong {
                        name: name.clone(),
                        length: value.len(),
                        max: limits.max_attribute_value,
                        path: el.path.clone(),
                    }));
                }
            }

            let mut sibling_paths: HashSet<&str> = HashSet::with_capacity(el.children.len());
            for child in &el.children {
                let child_path = child.path();
                if !child_path.extends(&el.path) {
                    return Err(Error::Validation(ValidationError::OrphanPath {
                        child: child_path.clone(),
                        parent: el.path.clone(),
                    }));
                }
                if !sibling_paths.insert(child_path.as_str()) {
                    return Err(Error::Validation(ValidationError::PathCollision {
                        path: child_path.clone(),
                    }));
                }
                validate_node(child, depth + 1, limits, seen_nodes)?;
            }
        }
    }

    Ok(())
}

/// Deserialize a VNode with a size guard ahead of parsing and a full
/// structural validation behind it.
pub fn deserialize_vnode_safe(json: &str, limits: &Limits) -> Result<VNode> {
    if json.len() > limits.max_json_size {
        return Err(Error::Validation(ValidationError::JsonTooLarge {
            size: json.len(),
            max: limits.max_json_size,
        }));
    }

    let node: VNode = serde_json::from_str(json)?;
    node.validate(limits)?;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::HexPath;
    use std::collections::HashMap;

    fn chain(depth: usize) -> VNode {
        // A single spine of nested divs, `depth` levels tall.
        let mut path = HexPath::from("10000000");
        let mut paths = vec![path.clone()];
        for _ in 1..depth {
            path = path.child(0);
            paths.push(path.clone());
        }
        let mut node = VNode::text("leaf", paths.pop().unwrap());
        while let Some(p) = paths.pop() {
            node = VNode::element("div", HashMap::new(), vec![node], p);
        }
        node
    }

    #[test]
    fn accepts_a_normal_tree() {
        let tree = VNode::element(
            "div",
            HashMap::new(),
            vec![
                VNode::text("a", "10000000.10000000"),
                VNode::null("10000000.20000000"),
            ],
            "10000000",
        );
        assert!(tree.validate(&Limits::default()).is_ok());
    }

    #[test]
    fn depth_violation_names_the_bound() {
        let tree = chain(101);
        let err = tree.validate(&Limits::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed: max_depth exceeded: 101>100"
        );
    }

    #[test]
    fn node_count_aborts_mid_walk() {
        let limits = Limits {
            max_tree_size: 3,
            ..Limits::default()
        };
        let tree = VNode::element(
            "ul",
            HashMap::new(),
            (0..5)
                .map(|i| VNode::text("x", HexPath::from("10000000").child(i)))
                .collect(),
            "10000000",
        );
        assert!(matches!(
            tree.validate(&limits),
            Err(Error::Validation(ValidationError::TreeTooLarge { nodes: 4, .. }))
        ));
    }

    #[test]
    fn rejects_empty_attribute_name() {
        let mut attrs = HashMap::new();
        attrs.insert(String::new(), "v".to_string());
        let tree = VNode::element("div", attrs, vec![], "10000000");
        assert!(matches!(
            tree.validate(&Limits::default()),
            Err(Error::Validation(ValidationError::EmptyAttributeName { .. }))
        ));
    }

    #[test]
    fn rejects_orphan_child_path() {
        let tree = VNode::element(
            "div",
            HashMap::new(),
            vec![VNode::text("x", "20000000.10000000")],
            "10000000",
        );
        assert!(matches!(
            tree.validate(&Limits::default()),
            Err(Error::Validation(ValidationError::OrphanPath { .. }))
        ));
    }

    #[test]
    fn rejects_sibling_path_collision() {
        let tree = VNode::element(
            "div",
            HashMap::new(),
            vec![
                VNode::text("a", "10000000.10000000"),
                VNode::text("b", "10000000.10000000"),
            ],
            "10000000",
        );
        assert!(matches!(
            tree.validate(&Limits::default()),
            Err(Error::Validation(ValidationError::PathCollision { .. }))
        ));
    }

    #[test]
    fn rejects_malformed_path() {
        let tree = VNode::text("x", "nothex!!");
        assert!(matches!(
            tree.validate(&Limits::default()),
            Err(Error::Validation(ValidationError::MalformedPath { .. }))
        ));
    }

    #[test]
    fn json_size_guard_precedes_parsing() {
        let limits = Limits {
            max_json_size: 8,
            ..Limits::default()
        };
        let err = deserialize_vnode_safe("{\"type\":\"Text\",...}", &limits).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::JsonTooLarge { .. })
        ));
    }

    #[test]
    fn safe_deserialize_validates_structure() {
        let json = serde_json::to_string(&VNode::element(
            "div",
            HashMap::new(),
            vec![VNode::text("far away", "20000000.10000000")],
            "10000000",
        ))
        .unwrap();
        assert!(deserialize_vnode_safe(&json, &Limits::default()).is_err());
    }
}
