use crate::error::Result;
use crate::path::HexPath;
use crate::validation::Limits;
use crate::vdom::{Patch, VElement, VNode};
use std::collections::HashMap;

/// Diff two validated trees and produce the ordered patch list.
///
/// Uses default limits; hosts with custom bounds go through
/// `reconcile_with_limits`.
pub fn reconcile(old: &VNode, new: &VNode) -> Result<Vec<Patch>> {
    reconcile_with_limits(old, new, &Limits::default())
}

pub fn reconcile_with_limits(old: &VNode, new: &VNode, limits: &Limits) -> Result<Vec<Patch>> {
    let start = std::time::Instant::now();
    crate::log_debug!("starting reconciliation");

    if let Err(e) = old.validate(limits) {
        crate::metrics::METRICS.record_validation_failure();
        crate::metrics::METRICS.record_reconcile(start.elapsed(), 0, true);
        return Err(e);
    }
    if let Err(e) = new.validate(limits) {
        crate::metrics::METRICS.record_validation_failure();
        crate::metrics::METRICS.record_reconcile(start.elapsed(), 0, true);
        return Err(e);
    }

    let mut set = PatchSet::default();
    match diff_node(old, new, &mut set) {
        Ok(()) => {
            let patches = set.linearize();
            crate::log_info!("reconciliation produced {} patches", patches.len());
            crate::metrics::METRICS.record_reconcile(start.elapsed(), patches.len(), false);
            Ok(patches)
        }
        Err(e) => {
            crate::metrics::METRICS.record_reconcile(start.elapsed(), 0, true);
            Err(e)
        }
    }
}

/// Patches bucketed by kind so the final list comes out in the stable
/// linearization: removes in reverse document order, then creates and
/// replaces in document order, then moves, then text/attribute updates.
/// A host applying the list front to back needs no extra bookkeeping.
#[derive(Default)]
struct PatchSet {
    removes: Vec<Patch>,
    creates: Vec<Patch>,
    moves: Vec<Patch>,
    updates: Vec<Patch>,
}

impl PatchSet {
    fn len(&self) -> usize {
        self.removes.len() + self.creates.len() + self.moves.len() + self.updates.len()
    }

    fn linearize(mut self) -> Vec<Patch> {
        self.removes
            .sort_by(|a, b| b.path().cmp(a.path()));
        self.creates.sort_by(|a, b| a.path().cmp(b.path()));
        // Moves keep emission order (new-list document order); updates are
        // grouped by path, attribute names already deterministic.
        self.updates.sort_by(|a, b| a.path().cmp(b.path()));

        let mut out = self.removes;
        out.append(&mut self.creates);
        out.append(&mut self.moves);
        out.append(&mut self.updates);
        out
    }
}

fn diff_node(old: &VNode, new: &VNode, set: &mut PatchSet) -> Result<()> {
    // The equality early-out must stay in a named local with a real read;
    // folding it into the branch has produced nondeterministic miss rates
    // under release optimization.
    let nodes_equal = old == new;
    if nodes_equal {
        return Ok(());
    }

    let path = new.path();

    // Different path heads mean the node at this position is a different
    // node entirely.
    if old.path() != path {
        set.creates.push(Patch::Replace {
            path: path.clone(),
            node: new.clone(),
        });
        return Ok(());
    }

    match (old, new) {
        (VNode::Text(old_text), VNode::Text(new_text)) => {
            if old_text.text != new_text.text {
                set.updates.push(Patch::UpdateText {
                    path: path.clone(),
                    text: new_text.text.clone(),
                });
            }
        }

        (VNode::Null(_), VNode::Null(_)) => {}

        // A Null position has no materialized DOM node, so content appearing
        // there is a Create and content vanishing is a Remove.
        (VNode::Null(_), _) => {
            set.creates.push(Patch::Create {
                path: path.clone(),
                node: new.clone(),
            });
        }
        (_, VNode::Null(_)) => {
            set.removes.push(Patch::Remove { path: path.clone() });
        }

        (VNode::Element(old_el), VNode::Element(new_el)) if old_el.tag == new_el.tag => {
            diff_element(old_el, new_el, new, set)?;
        }

        // Different tags or Text/Element flips swap the subtree.
        _ => {
            set.creates.push(Patch::Replace {
                path: path.clone(),
                node: new.clone(),
            });
        }
    }
    Ok(())
}

fn diff_element(
    old_el: &VElement,
    new_el: &VElement,
    new_node: &VNode,
    set: &mut PatchSet,
) -> Result<()> {
    let attr_patches = diff_attributes(old_el, new_el);

    let before = set.len();
    diff_children(old_el, new_el, set)?;
    let children_changed = set.len() != before;

    if !children_changed && !attr_patches.is_empty() {
        // Attribute-only change: emit the attribute patches unless a single
        // Replace of the element serializes smaller.
        let attr_bytes = serde_json::to_vec(&attr_patches)?.len();
        let replace = Patch::Replace {
            path: new_el.path.clone(),
            node: new_node.clone(),
        };
        let replace_bytes = serde_json::to_vec(&replace)?.len();
        if attr_bytes < replace_bytes {
            set.updates.extend(attr_patches);
        } else {
            set.creates.push(replace);
        }
    } else {
        set.updates.extend(attr_patches);
    }
    Ok(())
}

/// Attribute diff in deterministic (sorted) name order.
fn diff_attributes(old_el: &VElement, new_el: &VElement) -> Vec<Patch> {
    let mut names: Vec<&String> = old_el.attributes.keys().chain(new_el.attributes.keys()).collect();
    names.sort();
    names.dedup();

    let mut patches = Vec::new();
    for name in names {
        match (old_el.attributes.get(name), new_el.attributes.get(name)) {
            (Some(old_v), Some(new_v)) if old_v == new_v => {}
            (_, Some(new_v)) => patches.push(Patch::SetAttribute {
                path: new_el.path.clone(),
                name: name.clone(),
                value: new_v.clone(),
            }),
            (Some(_), None) => patches.push(Patch::RemoveAttribute {
                path: new_el.path.clone(),
                name: name.clone(),
            }),
            (None, None) => {}
        }
    }
    patches
}

fn diff_children(old_el: &VElement, new_el: &VElement, set: &mut PatchSet) -> Result<()> {
    let any_keys = old_el.children.iter().any(|c| c.key().is_some())
        || new_el.children.iter().any(|c| c.key().is_some());

    if any_keys {
        diff_keyed_children(old_el, new_el, set)
    } else {
        diff_children_by_path(&old_el.children, &new_el.children, set)
    }
}

/// Path-keyed matching: O(n_old + n_new), no index arithmetic. Null
/// children never produce Create/Remove of their own.
fn diff_children_by_path(
    old_children: &[VNode],
    new_children: &[VNode],
    set: &mut PatchSet,
) -> Result<()> {
    let old_by_path: HashMap<&HexPath, &VNode> =
        old_children.iter().map(|c| (c.path(), c)).collect();
    let new_by_path: HashMap<&HexPath, &VNode> =
        new_children.iter().map(|c| (c.path(), c)).collect();

    for new_child in new_children {
        if let Some(old_child) = old_by_path.get(new_child.path()) {
            diff_node(old_child, new_child, set)?;
        } else if !new_child.is_null() {
            set.creates.push(Patch::Create {
                path: new_child.path().clone(),
                node: new_child.clone(),
            });
        }
    }

    for old_child in old_children {
        if !new_by_path.contains_key(old_child.path()) && !old_child.is_null() {
            set.removes.push(Patch::Remove {
                path: old_child.path().clone(),
            });
        }
    }

    Ok(())
}

/// Keyed matching: children with user keys pair up by key across positions
/// and displaced ones get `Move` patches with their old and new DOM
/// indices. Unkeyed children fall back to path matching.
fn diff_keyed_children(old_el: &VElement, new_el: &VElement, set: &mut PatchSet) -> Result<()> {
    let old_indexed = dom_indexed(&old_el.children);
    let new_indexed = dom_indexed(&new_el.children);

    let old_keyed: HashMap<&str, (usize, &VNode)> = old_indexed
        .iter()
        .filter_map(|&(idx, node)| node.key().map(|k| (k, (idx, node))))
        .collect();
    let new_keys: std::collections::HashSet<&str> = new_indexed
        .iter()
        .filter_map(|&(_, node)| node.key())
        .collect();

    let mut old_unkeyed: Vec<&VNode> = Vec::new();
    let mut new_unkeyed: Vec<&VNode> = Vec::new();
    for &(_, node) in &old_indexed {
        if node.key().is_none() {
            old_unkeyed.push(node);
        }
    }

    for &(new_idx, new_child) in &new_indexed {
        match new_child.key() {
            Some(key) => {
                if let Some(&(old_idx, old_child)) = old_keyed.get(key) {
                    diff_node(old_child, new_child, set)?;
                    if old_idx != new_idx {
                        set.moves.push(Patch::Move {
                            path: new_child.path().clone(),
                            from_index: old_idx,
                            to_index: new_idx,
                        });
                    }
                } else {
                    set.creates.push(Patch::Create {
                        path: new_child.path().clone(),
                        node: new_child.clone(),
                    });
                }
            }
            None => new_unkeyed.push(new_child),
        }
    }

    for &(_, old_child) in &old_indexed {
        if let Some(key) = old_child.key() {
            if !new_keys.contains(key) {
                set.removes.push(Patch::Remove {
                    path: old_child.path().clone(),
                });
            }
        }
    }

    let old_unkeyed_owned: Vec<VNode> = old_unkeyed.into_iter().cloned().collect();
    let new_unkeyed_owned: Vec<VNode> = new_unkeyed.into_iter().cloned().collect();
    diff_children_by_path(&old_unkeyed_owned, &new_unkeyed_owned, set)
}

/// Children paired with their DOM index: Null siblings consume a path slot
/// but no DOM position.
fn dom_indexed(children: &[VNode]) -> Vec<(usize, &VNode)> {
    let mut out = Vec::with_capacity(children.len());
    let mut dom_idx = 0usize;
    for child in children {
        if child.is_null() {
            continue;
        }
        out.push((dom_idx, child));
        dom_idx += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;

    fn span_with_text(text: &str) -> VNode {
        VNode::element(
            "span",
            HashMap::new(),
            vec![VNode::text(text, "10000000.10000000")],
            "10000000",
        )
    }

    /// Test-side patch application. Works on trees whose Null placeholders
    /// have been stripped, since Nulls never materialize on a host.
    fn normalize(node: &VNode) -> VNode {
        match node {
            VNode::Element(el) => VNode::Element(VElement {
                tag: el.tag.clone(),
                attributes: el.attributes.clone(),
                children: el
                    .children
                    .iter()
                    .filter(|c| !c.is_null())
                    .map(normalize)
                    .collect(),
                key: el.key.clone(),
                path: el.path.clone(),
            }),
            other => other.clone(),
        }
    }

    fn apply(tree: &VNode, patches: &[Patch]) -> VNode {
        let mut current = normalize(tree);
        for patch in patches {
            apply_one(&mut current, patch);
        }
        current
    }

    fn apply_one(tree: &mut VNode, patch: &Patch) {
        let path = patch.path().clone();
        match patch {
            Patch::Replace { node, .. } => {
                if tree.path() == &path {
                    *tree = normalize(node);
                } else {
                    with_parent(tree, &path, |children| {
                        if let Some(slot) = children.iter_mut().find(|c| c.path() == &path) {
                            *slot = normalize(node);
                        }
                    });
                }
            }
            Patch::Create { node, .. } => {
                with_parent(tree, &path, |children| {
                    let insert_at = children
                        .iter()
                        .position(|c| c.path() > &path)
                        .unwrap_or(children.len());
                    children.insert(insert_at, normalize(node));
                });
            }
            Patch::Remove { .. } => {
                with_parent(tree, &path, |children| {
                    children.retain(|c| c.path() != &path);
                });
            }
            Patch::UpdateText { text, .. } => {
                if let Some(VNode::Text(t)) = node_mut(tree, &path) {
                    t.text = text.clone();
                }
            }
            Patch::SetAttribute { name, value, .. } => {
                if let Some(VNode::Element(el)) = node_mut(tree, &path) {
                    el.attributes.insert(name.clone(), value.clone());
                }
            }
            Patch::RemoveAttribute { name, .. } => {
                if let Some(VNode::Element(el)) = node_mut(tree, &path) {
                    el.attributes.remove(name);
                }
            }
            Patch::Move { to_index, .. } => {
                with_parent(tree, &path, |children| {
                    if let Some(pos) = children.iter().position(|c| c.path() == &path) {
                        let node = children.remove(pos);
                        let to = (*to_index).min(children.len());
                        children.insert(to, node);
                    }
                });
            }
        }
    }

    fn with_parent(tree: &mut VNode, child_path: &HexPath, f: impl FnOnce(&mut Vec<VNode>)) {
        let parent_path = child_path.parent().expect("patch path has a parent");
        if let Some(VNode::Element(el)) = node_mut(tree, &parent_path) {
            f(&mut el.children);
        }
    }

    fn node_mut<'a>(tree: &'a mut VNode, path: &HexPath) -> Option<&'a mut VNode> {
        if tree.path() == path {
            return Some(tree);
        }
        if let VNode::Element(el) = tree {
            for child in &mut el.children {
                if path.as_str().starts_with(child.path().as_str()) {
                    if let Some(found) = node_mut(child, path) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    #[test]
    fn counter_text_update() {
        let old = span_with_text("Count: 0");
        let new = span_with_text("Count: 1");

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(
            patches,
            vec![Patch::UpdateText {
                path: "10000000.10000000".into(),
                text: "Count: 1".to_string(),
            }]
        );
        assert_eq!(apply(&old, &patches), normalize(&new));
    }

    #[test]
    fn identical_trees_yield_no_patches() {
        let tree = span_with_text("same");
        assert!(reconcile(&tree, &tree.clone()).unwrap().is_empty());
    }

    #[test]
    fn conditional_reveal_creates_instead_of_replacing() {
        let old = VNode::element(
            "div",
            HashMap::new(),
            vec![VNode::null("10000000.10000000")],
            "10000000",
        );
        let new = VNode::element(
            "div",
            HashMap::new(),
            vec![VNode::element(
                "nav",
                HashMap::new(),
                vec![],
                "10000000.10000000",
            )],
            "10000000",
        );

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(patches.len(), 1);
        assert!(
            matches!(&patches[0], Patch::Create { path, .. } if path.as_str() == "10000000.10000000")
        );
        assert_eq!(apply(&old, &patches), normalize(&new));
    }

    #[test]
    fn conditional_hide_removes() {
        let old = VNode::element(
            "div",
            HashMap::new(),
            vec![VNode::element(
                "nav",
                HashMap::new(),
                vec![],
                "10000000.10000000",
            )],
            "10000000",
        );
        let new = VNode::element(
            "div",
            HashMap::new(),
            vec![VNode::null("10000000.10000000")],
            "10000000",
        );

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(
            patches,
            vec![Patch::Remove {
                path: "10000000.10000000".into()
            }]
        );
        assert_eq!(apply(&old, &patches), normalize(&new));
    }

    #[test]
    fn attribute_diff_is_name_ordered() {
        let mut old_attrs = HashMap::new();
        old_attrs.insert("b".to_string(), "1".to_string());
        old_attrs.insert("a".to_string(), "1".to_string());
        old_attrs.insert("gone".to_string(), "x".to_string());
        let mut new_attrs = HashMap::new();
        new_attrs.insert("b".to_string(), "2".to_string());
        new_attrs.insert("a".to_string(), "2".to_string());

        // A child keeps the change from collapsing into a Replace.
        let old = VNode::element(
            "div",
            old_attrs,
            vec![VNode::text("x", "10000000.10000000")],
            "10000000",
        );
        let new = VNode::element(
            "div",
            new_attrs,
            vec![VNode::text("y", "10000000.10000000")],
            "10000000",
        );

        let patches = reconcile(&old, &new).unwrap();
        let names: Vec<&str> = patches
            .iter()
            .filter_map(|p| match p {
                Patch::SetAttribute { name, .. } | Patch::RemoveAttribute { name, .. } => {
                    Some(name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["a", "b", "gone"]);
        assert_eq!(apply(&old, &patches), normalize(&new));
    }

    #[test]
    fn attribute_change_prefers_smaller_encoding() {
        // One short attribute change on a big element: attribute form wins.
        let mut old_attrs = HashMap::new();
        old_attrs.insert("class".to_string(), "off".to_string());
        let mut new_attrs = HashMap::new();
        new_attrs.insert("class".to_string(), "on".to_string());

        let big_children: Vec<VNode> = (0..10)
            .map(|i| VNode::text(format!("row {i}"), HexPath::from("10000000").child(i)))
            .collect();
        let old = VNode::element("div", old_attrs, big_children.clone(), "10000000");
        let new = VNode::element("div", new_attrs, big_children, "10000000");

        let patches = reconcile(&old, &new).unwrap();
        assert!(matches!(patches.as_slice(), [Patch::SetAttribute { .. }]));

        // Many long attribute changes on an empty element: Replace wins.
        let mut old_attrs = HashMap::new();
        let mut new_attrs = HashMap::new();
        for i in 0..12 {
            old_attrs.insert(format!("data-attr-number-{i}"), "old-value".repeat(8));
            new_attrs.insert(format!("data-attr-number-{i}"), "new-value".repeat(8));
        }
        let old = VNode::element("i", old_attrs, vec![], "10000000");
        let new = VNode::element("i", new_attrs, vec![], "10000000");
        let patches = reconcile(&old, &new).unwrap();
        assert!(matches!(patches.as_slice(), [Patch::Replace { .. }]));
    }

    #[test]
    fn keyed_reorder_emits_moves_only() {
        let make = |keys: &[&str], paths: &[&str]| {
            VNode::element(
                "ul",
                HashMap::new(),
                keys.iter()
                    .zip(paths)
                    .map(|(k, p)| {
                        VNode::keyed_element("li", *k, HashMap::new(), vec![], *p)
                    })
                    .collect(),
                "10000000",
            )
        };
        let old = make(
            &["A", "B", "C"],
            &["10000000.10000000", "10000000.20000000", "10000000.30000000"],
        );
        let new = make(
            &["C", "A", "B"],
            &["10000000.30000000", "10000000.10000000", "10000000.20000000"],
        );

        let patches = reconcile(&old, &new).unwrap();
        let moves: Vec<(usize, usize)> = patches
            .iter()
            .filter_map(|p| match p {
                Patch::Move {
                    from_index,
                    to_index,
                    ..
                } => Some((*from_index, *to_index)),
                _ => None,
            })
            .collect();
        assert_eq!(moves, vec![(2, 0), (0, 1), (1, 2)]);
        assert!(!patches
            .iter()
            .any(|p| matches!(p, Patch::Create { .. } | Patch::Remove { .. })));
    }

    #[test]
    fn keyed_insert_and_remove() {
        let old = VNode::element(
            "ul",
            HashMap::new(),
            vec![
                VNode::keyed_element("li", "A", HashMap::new(), vec![], "10000000.10000000"),
                VNode::keyed_element("li", "B", HashMap::new(), vec![], "10000000.20000000"),
            ],
            "10000000",
        );
        let new = VNode::element(
            "ul",
            HashMap::new(),
            vec![
                VNode::keyed_element("li", "B", HashMap::new(), vec![], "10000000.20000000"),
                VNode::keyed_element("li", "C", HashMap::new(), vec![], "10000000.30000000"),
            ],
            "10000000",
        );

        let patches = reconcile(&old, &new).unwrap();
        assert!(patches.iter().any(
            |p| matches!(p, Patch::Remove { path } if path.as_str() == "10000000.10000000")
        ));
        assert!(patches.iter().any(
            |p| matches!(p, Patch::Create { path, .. } if path.as_str() == "10000000.30000000")
        ));
    }

    #[test]
    fn removes_come_first_in_reverse_document_order() {
        let old = VNode::element(
            "div",
            HashMap::new(),
            vec![
                VNode::text("a", "10000000.10000000"),
                VNode::text("b", "10000000.20000000"),
                VNode::text("c", "10000000.30000000"),
            ],
            "10000000",
        );
        let new = VNode::element(
            "div",
            HashMap::new(),
            vec![VNode::text("d", "10000000.40000000")],
            "10000000",
        );

        let patches = reconcile(&old, &new).unwrap();
        let removed: Vec<&str> = patches
            .iter()
            .filter_map(|p| match p {
                Patch::Remove { path } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            removed,
            vec![
                "10000000.30000000",
                "10000000.20000000",
                "10000000.10000000"
            ]
        );
        // Removes precede the create.
        let create_pos = patches
            .iter()
            .position(|p| matches!(p, Patch::Create { .. }))
            .unwrap();
        assert_eq!(create_pos, 3);
        assert_eq!(apply(&old, &patches), normalize(&new));
    }

    #[test]
    fn nested_structural_change_round_trips() {
        let old = VNode::element(
            "div",
            HashMap::new(),
            vec![
                VNode::element(
                    "p",
                    HashMap::new(),
                    vec![VNode::text("old", "10000000.10000000.10000000")],
                    "10000000.10000000",
                ),
                VNode::text("tail", "10000000.20000000"),
            ],
            "10000000",
        );
        let new = VNode::element(
            "div",
            HashMap::new(),
            vec![
                VNode::element(
                    "section",
                    HashMap::new(),
                    vec![VNode::text("fresh", "10000000.10000000.10000000")],
                    "10000000.10000000",
                ),
                VNode::text("tail!", "10000000.20000000"),
            ],
            "10000000",
        );

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(apply(&old, &patches), normalize(&new));
    }

    #[test]
    fn validation_failure_surfaces_and_counts() {
        let limits = Limits {
            max_depth: 1,
            ..Limits::default()
        };
        let old = VNode::text("x", "10000000");
        let deep = VNode::element(
            "div",
            HashMap::new(),
            vec![VNode::text("y", "10000000.10000000")],
            "10000000",
        );
        let before = crate::metrics::METRICS.snapshot().validation_failures;
        let err = reconcile_with_limits(&old, &deep, &limits).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let after = crate::metrics::METRICS.snapshot().validation_failures;
        assert_eq!(after, before + 1);
    }

    #[test]
    fn text_to_element_replaces() {
        let old = VNode::text("plain", "10000000");
        let new = VNode::element("div", HashMap::new(), vec![], "10000000");
        let patches = reconcile(&old, &new).unwrap();
        assert!(matches!(patches.as_slice(), [Patch::Replace { .. }]));
    }
}
