use crate::error::{Error, Result};
use crate::path::HexPath;
use crate::state_paths::{display_scalar, find_slots_in_text, lookup_path, StateMap};
use crate::transform::{Transform, TRANSFORM_WHITELIST_VERSION};
use crate::vdom::{Patch, VElement, VNode, VText};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Stable identity of a template: hash of its patch path, structural shape,
/// and bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Kind of list mutation, used in loop operation-hint sets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ListOperationKind {
    Append,
    Prepend,
    InsertAt,
    RemoveAt,
    UpdateAt,
    Reorder,
    ReplaceAll,
}

/// A concrete list mutation, either supplied by the host as a semantic hint
/// or inferred from the old/new list values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ListOperation {
    Append,
    Prepend,
    InsertAt { index: usize },
    RemoveAt { index: usize },
    UpdateAt { index: usize },
    Reorder,
    ReplaceAll,
}

impl ListOperation {
    pub fn kind(&self) -> ListOperationKind {
        match self {
            ListOperation::Append => ListOperationKind::Append,
            ListOperation::Prepend => ListOperationKind::Prepend,
            ListOperation::InsertAt { .. } => ListOperationKind::InsertAt,
            ListOperation::RemoveAt { .. } => ListOperationKind::RemoveAt,
            ListOperation::UpdateAt { .. } => ListOperationKind::UpdateAt,
            ListOperation::Reorder => ListOperationKind::Reorder,
            ListOperation::ReplaceAll => ListOperationKind::ReplaceAll,
        }
    }
}

/// A text fragment with `{0}`-style placeholders and the dotted state paths
/// that fill them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub format: String,
    pub bindings: Vec<String>,
}

impl Slot {
    pub fn literal(text: impl Into<String>) -> Self {
        Slot {
            format: text.into(),
            bindings: Vec::new(),
        }
    }

    /// Parameterize a rendered string against a scope: every scope value
    /// found in the text becomes a placeholder.
    pub fn from_text(text: &str, scope: &StateMap) -> Self {
        let matches = find_slots_in_text(scope, text);
        if matches.is_empty() {
            return Slot::literal(text);
        }

        let mut format = String::with_capacity(text.len());
        let mut bindings = Vec::with_capacity(matches.len());
        let mut cursor = 0usize;
        for m in matches {
            format.push_str(&text[cursor..m.position]);
            format.push_str(&format!("{{{}}}", bindings.len()));
            bindings.push(m.path);
            cursor = m.position + m.value_str.len();
        }
        format.push_str(&text[cursor..]);
        Slot { format, bindings }
    }

    pub fn render(&self, scope: &StateMap) -> Result<String> {
        let values = resolve_bindings(&self.bindings, scope)?;
        Ok(fill_format(&self.format, &values))
    }

    pub fn is_literal(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Substitute `{i}` placeholders. Placeholders without a matching value and
/// non-numeric braces stay literal.
pub fn fill_format(format: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];
        match rest.find('}') {
            Some(close) => {
                let inner = &rest[1..close];
                match inner.parse::<usize>() {
                    Ok(i) if i < values.len() => out.push_str(&values[i]),
                    _ => out.push_str(&rest[..=close]),
                }
                rest = &rest[close + 1..];
            }
            None => {
                out.push_str(rest);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_bindings(bindings: &[String], scope: &StateMap) -> Result<Vec<String>> {
    bindings
        .iter()
        .map(|b| {
            lookup_path(scope, b)
                .and_then(display_scalar)
                .ok_or_else(|| Error::NotFound(format!("state binding '{b}'")))
        })
        .collect()
}

/// A parameterized subtree: the shape that loop items and structural
/// branches stamp out. Patch-level templates cannot synthesize whole nodes,
/// so these positions carry a node skeleton with slots instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeTemplate {
    Element {
        tag: String,
        attributes: BTreeMap<String, Slot>,
        children: Vec<NodeTemplate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key_binding: Option<String>,
    },
    Text {
        slot: Slot,
    },
    Null,
}

impl NodeTemplate {
    /// Parameterize a concrete node against a scope.
    pub fn from_node(node: &VNode, scope: &StateMap) -> Self {
        match node {
            VNode::Text(t) => NodeTemplate::Text {
                slot: Slot::from_text(&t.text, scope),
            },
            VNode::Null(_) => NodeTemplate::Null,
            VNode::Element(el) => {
                let key_binding = el.key.as_deref().and_then(|key| {
                    let scalars = crate::state_paths::collect_scalars(scope);
                    scalars.get(key).and_then(|paths| paths.first().cloned())
                });
                NodeTemplate::Element {
                    tag: el.tag.clone(),
                    attributes: el
                        .attributes
                        .iter()
                        .map(|(name, value)| (name.clone(), Slot::from_text(value, scope)))
                        .collect(),
                    children: el
                        .children
                        .iter()
                        .map(|c| NodeTemplate::from_node(c, scope))
                        .collect(),
                    key_binding,
                }
            }
        }
    }

    /// Stamp out a concrete node at `path`; children get gap-aligned paths
    /// beneath it.
    pub fn instantiate(&self, path: &HexPath, scope: &StateMap) -> Result<VNode> {
        match self {
            NodeTemplate::Null => Ok(VNode::null(path.clone())),
            NodeTemplate::Text { slot } => Ok(VNode::Text(VText {
                text: slot.render(scope)?,
                path: path.clone(),
            })),
            NodeTemplate::Element {
                tag,
                attributes,
                children,
                key_binding,
            } => {
                let mut attrs = HashMap::with_capacity(attributes.len());
                for (name, slot) in attributes {
                    attrs.insert(name.clone(), slot.render(scope)?);
                }
                let rendered_children = children
                    .iter()
                    .enumerate()
                    .map(|(i, c)| c.instantiate(&path.child(i), scope))
                    .collect::<Result<Vec<_>>>()?;
                let key = match key_binding {
                    Some(binding) => lookup_path(scope, binding).and_then(display_scalar),
                    None => None,
                };
                Ok(VNode::Element(VElement {
                    tag: tag.clone(),
                    attributes: attrs,
                    children: rendered_children,
                    key,
                    path: path.clone(),
                }))
            }
        }
    }

    fn shape(&self, out: &mut String) {
        match self {
            NodeTemplate::Null => out.push('n'),
            NodeTemplate::Text { slot } => {
                out.push('t');
                out.push_str(&slot.format);
            }
            NodeTemplate::Element {
                tag,
                attributes,
                children,
                ..
            } => {
                out.push('e');
                out.push_str(tag);
                for name in attributes.keys() {
                    out.push(',');
                    out.push_str(name);
                }
                out.push('[');
                for child in children {
                    child.shape(out);
                }
                out.push(']');
            }
        }
    }

    fn collect_bindings(&self, out: &mut BTreeSet<String>) {
        match self {
            NodeTemplate::Null => {}
            NodeTemplate::Text { slot } => out.extend(slot.bindings.iter().cloned()),
            NodeTemplate::Element {
                attributes,
                children,
                key_binding,
                ..
            } => {
                for slot in attributes.values() {
                    out.extend(slot.bindings.iter().cloned());
                }
                if let Some(b) = key_binding {
                    out.insert(b.clone());
                }
                for child in children {
                    child.collect_bindings(out);
                }
            }
        }
    }
}

/// A parameterized family of patch lists, indexed by state keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Template {
    /// `UpdateText` whose new text is an affine function of scalar state
    /// values: `prefix{0}infix{1}suffix`.
    ScalarSubstitution {
        path: HexPath,
        format: String,
        bindings: Vec<String>,
    },
    /// Branch on a boolean state key.
    Conditional {
        path: HexPath,
        predicate_key: String,
        true_template: Box<Template>,
        false_template: Box<Template>,
    },
    /// Element-wise mapped list under a container.
    Loop {
        container_path: HexPath,
        source_key: String,
        item_template: NodeTemplate,
        operation_hints: BTreeSet<ListOperationKind>,
    },
    /// Whole-subtree swap keyed by a discriminator value.
    Structural {
        path: HexPath,
        discriminator_key: String,
        branches: BTreeMap<String, NodeTemplate>,
    },
    /// Text produced by a whitelisted pure transform of state values.
    Expression {
        path: HexPath,
        transform: String,
        format: String,
        bindings: Vec<String>,
    },
    /// Single dotted binding into nested state.
    DeepPath {
        path: HexPath,
        format: String,
        binding: String,
    },
}

impl Template {
    /// All dotted bindings referenced anywhere in the template.
    pub fn bindings(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        match self {
            Template::ScalarSubstitution { bindings, .. }
            | Template::Expression { bindings, .. } => {
                out.extend(bindings.iter().cloned());
            }
            Template::DeepPath { binding, .. } => {
                out.insert(binding.clone());
            }
            Template::Conditional {
                predicate_key,
                true_template,
                false_template,
                ..
            } => {
                out.insert(predicate_key.clone());
                out.extend(true_template.bindings());
                out.extend(false_template.bindings());
            }
            Template::Loop {
                source_key,
                item_template,
                ..
            } => {
                out.insert(source_key.clone());
                let mut item = BTreeSet::new();
                item_template.collect_bindings(&mut item);
                // `item.*` and `index` are scoped to each element, not the
                // component state.
                out.extend(
                    item.into_iter()
                        .filter(|b| !matches!(root_key(b), "item" | "index")),
                );
            }
            Template::Structural {
                discriminator_key, ..
            } => {
                out.insert(discriminator_key.clone());
            }
        }
        out
    }

    /// Top-level state keys this template depends on: the part of each
    /// binding before any `.` or `[`.
    pub fn root_keys(&self) -> BTreeSet<String> {
        self.bindings()
            .iter()
            .map(|b| root_key(b).to_string())
            .collect()
    }

    /// Canonical shape descriptor; two templates with equal descriptors and
    /// equal paths are mergeable.
    pub fn shape(&self) -> String {
        let mut out = String::new();
        match self {
            Template::ScalarSubstitution { path, format, .. } => {
                out.push_str("scalar|");
                out.push_str(path.as_str());
                out.push('|');
                out.push_str(format);
            }
            Template::Conditional {
                path,
                predicate_key,
                ..
            } => {
                out.push_str("cond|");
                out.push_str(path.as_str());
                out.push('|');
                out.push_str(predicate_key);
            }
            Template::Loop {
                container_path,
                source_key,
                item_template,
                ..
            } => {
                out.push_str("loop|");
                out.push_str(container_path.as_str());
                out.push('|');
                out.push_str(source_key);
                out.push('|');
                item_template.shape(&mut out);
            }
            Template::Structural {
                path,
                discriminator_key,
                ..
            } => {
                out.push_str("struct|");
                out.push_str(path.as_str());
                out.push('|');
                out.push_str(discriminator_key);
            }
            Template::Expression {
                path,
                transform,
                format,
                ..
            } => {
                out.push_str("expr|");
                out.push_str(path.as_str());
                out.push('|');
                out.push_str(transform);
                out.push('|');
                out.push_str(format);
            }
            Template::DeepPath { path, format, .. } => {
                out.push_str("deep|");
                out.push_str(path.as_str());
                out.push('|');
                out.push_str(format);
            }
        }
        out
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut descriptor = self.shape();
        for binding in self.bindings() {
            descriptor.push('|');
            descriptor.push_str(&binding);
        }
        Fingerprint(fnv1a64(descriptor.as_bytes()))
    }

    /// Mergeable templates describe the same patch paths and structural
    /// shape; merging unions what varies between observations.
    pub fn mergeable(&self, other: &Template) -> bool {
        self.shape() == other.shape()
    }

    pub fn merge(&mut self, other: Template) {
        match (self, other) {
            (
                Template::Structural { branches, .. },
                Template::Structural {
                    branches: other_branches,
                    ..
                },
            ) => {
                for (value, branch) in other_branches {
                    branches.entry(value).or_insert(branch);
                }
            }
            (
                Template::Loop {
                    operation_hints, ..
                },
                Template::Loop {
                    operation_hints: other_hints,
                    ..
                },
            ) => {
                operation_hints.extend(other_hints);
            }
            // Shape agreement means the remaining variants are already
            // identical; nothing to union.
            _ => {}
        }
    }

    /// Substitute state values into the template and produce the concrete
    /// patch list.
    pub fn instantiate(&self, state: &StateMap) -> Result<Vec<Patch>> {
        match self {
            Template::ScalarSubstitution {
                path,
                format,
                bindings,
            } => {
                let values = resolve_bindings(bindings, state)?;
                Ok(vec![Patch::UpdateText {
                    path: path.clone(),
                    text: fill_format(format, &values),
                }])
            }

            Template::DeepPath {
                path,
                format,
                binding,
            } => {
                let values = resolve_bindings(std::slice::from_ref(binding), state)?;
                Ok(vec![Patch::UpdateText {
                    path: path.clone(),
                    text: fill_format(format, &values),
                }])
            }

            Template::Expression {
                path,
                transform,
                format,
                bindings,
            } => {
                let t = Transform::lookup(transform).ok_or_else(|| Error::VersionSkew {
                    transform: transform.clone(),
                    version: TRANSFORM_WHITELIST_VERSION,
                })?;
                let values = bindings
                    .iter()
                    .map(|b| {
                        lookup_path(state, b)
                            .and_then(|v| t.apply(v))
                            .ok_or_else(|| Error::NotFound(format!("state binding '{b}'")))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(vec![Patch::UpdateText {
                    path: path.clone(),
                    text: fill_format(format, &values),
                }])
            }

            Template::Conditional {
                predicate_key,
                true_template,
                false_template,
                ..
            } => {
                let flag = lookup_path(state, predicate_key)
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| Error::NotFound(format!("predicate '{predicate_key}'")))?;
                if flag {
                    true_template.instantiate(state)
                } else {
                    false_template.instantiate(state)
                }
            }

            Template::Structural {
                path,
                discriminator_key,
                branches,
            } => {
                let value = lookup_path(state, discriminator_key)
                    .and_then(display_scalar)
                    .ok_or_else(|| {
                        Error::NotFound(format!("discriminator '{discriminator_key}'"))
                    })?;
                let branch = branches
                    .get(&value)
                    .ok_or_else(|| Error::NotFound(format!("branch '{value}'")))?;
                let node = branch.instantiate(path, state)?;
                Ok(vec![Patch::Replace {
                    path: path.clone(),
                    node,
                }])
            }

            Template::Loop {
                container_path,
                source_key,
                item_template,
                operation_hints,
            } => {
                let items = lookup_path(state, source_key)
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| Error::NotFound(format!("list '{source_key}'")))?;
                // Gap-aligned segments run out after u32::MAX / HEX_GAP
                // siblings; past that the engine would mint colliding
                // paths, so it refuses and the host reconciles instead.
                let max_slots = (u32::MAX / crate::path::HEX_GAP) as usize;
                if items.len() > max_slots {
                    return Err(Error::Oversized(format!(
                        "loop of {} items exceeds {max_slots} gap-aligned slots",
                        items.len()
                    )));
                }
                // An append hint pins the incremental form: only the last
                // element is new, so one Create at its gap slot reproduces
                // the observed patch. Other operations cannot be located
                // from the new list alone and fall back to materializing
                // the whole mapped list.
                if operation_hints.contains(&ListOperationKind::Append) {
                    if let Some(item) = items.last() {
                        let index = items.len() - 1;
                        let scope = item_scope(item, index);
                        let node =
                            item_template.instantiate(&container_path.child(index), &scope)?;
                        return Ok(vec![Patch::Create {
                            path: container_path.child(index),
                            node,
                        }]);
                    }
                }
                let mut patches = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let scope = item_scope(item, i);
                    let node = item_template.instantiate(&container_path.child(i), &scope)?;
                    patches.push(Patch::Create {
                        path: container_path.child(i),
                        node,
                    });
                }
                Ok(patches)
            }
        }
    }

    /// Approximate footprint for store byte accounting.
    pub fn estimate_size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(256)
    }
}

/// Scope used to instantiate one loop item: the element under `item`, its
/// position under `index`.
pub fn item_scope(item: &serde_json::Value, index: usize) -> StateMap {
    let mut scope = StateMap::with_capacity(2);
    scope.insert("item".to_string(), item.clone());
    scope.insert("index".to_string(), serde_json::json!(index));
    scope
}

pub fn root_key(binding: &str) -> &str {
    let end = binding
        .find(['.', '['])
        .unwrap_or(binding.len());
    &binding[..end]
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_of(pairs: &[(&str, serde_json::Value)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn scalar_substitution_renders_update_text() {
        let template = Template::ScalarSubstitution {
            path: "10000000.10000000".into(),
            format: "Count: {0}".to_string(),
            bindings: vec!["count".to_string()],
        };
        let patches = template
            .instantiate(&state_of(&[("count", json!(3))]))
            .unwrap();
        assert_eq!(
            patches,
            vec![Patch::UpdateText {
                path: "10000000.10000000".into(),
                text: "Count: 3".to_string(),
            }]
        );
    }

    #[test]
    fn missing_binding_refuses() {
        let template = Template::ScalarSubstitution {
            path: "10000000".into(),
            format: "{0}".to_string(),
            bindings: vec!["count".to_string()],
        };
        assert!(matches!(
            template.instantiate(&StateMap::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn expression_applies_whitelisted_transform() {
        let template = Template::Expression {
            path: "10000000".into(),
            transform: "fixed2".to_string(),
            format: "Total: {0}".to_string(),
            bindings: vec!["price".to_string()],
        };
        let patches = template
            .instantiate(&state_of(&[("price", json!(9.999))]))
            .unwrap();
        assert_eq!(
            patches,
            vec![Patch::UpdateText {
                path: "10000000".into(),
                text: "Total: 10.00".to_string(),
            }]
        );
    }

    #[test]
    fn unknown_transform_is_version_skew() {
        let template = Template::Expression {
            path: "10000000".into(),
            transform: "bitwise_xor".to_string(),
            format: "{0}".to_string(),
            bindings: vec!["x".to_string()],
        };
        assert!(matches!(
            template.instantiate(&state_of(&[("x", json!(1))])),
            Err(Error::VersionSkew { .. })
        ));
    }

    #[test]
    fn conditional_picks_branch_by_predicate() {
        let template = Template::Conditional {
            path: "10000000".into(),
            predicate_key: "visible".to_string(),
            true_template: Box::new(Template::ScalarSubstitution {
                path: "10000000".into(),
                format: "shown".to_string(),
                bindings: vec![],
            }),
            false_template: Box::new(Template::ScalarSubstitution {
                path: "10000000".into(),
                format: "hidden".to_string(),
                bindings: vec![],
            }),
        };
        let on = template
            .instantiate(&state_of(&[("visible", json!(true))]))
            .unwrap();
        assert!(matches!(&on[0], Patch::UpdateText { text, .. } if text == "shown"));
        let off = template
            .instantiate(&state_of(&[("visible", json!(false))]))
            .unwrap();
        assert!(matches!(&off[0], Patch::UpdateText { text, .. } if text == "hidden"));
    }

    #[test]
    fn structural_stamps_the_matching_branch() {
        let mut branches = BTreeMap::new();
        branches.insert(
            "loading".to_string(),
            NodeTemplate::Text {
                slot: Slot::literal("Loading..."),
            },
        );
        branches.insert(
            "ready".to_string(),
            NodeTemplate::Text {
                slot: Slot::literal("Done"),
            },
        );
        let template = Template::Structural {
            path: "10000000".into(),
            discriminator_key: "phase".to_string(),
            branches,
        };

        let patches = template
            .instantiate(&state_of(&[("phase", json!("ready"))]))
            .unwrap();
        assert!(matches!(
            &patches[0],
            Patch::Replace { node: VNode::Text(t), .. } if t.text == "Done"
        ));
        assert!(template
            .instantiate(&state_of(&[("phase", json!("unseen"))]))
            .is_err());
    }

    fn todo_item_template() -> NodeTemplate {
        NodeTemplate::Element {
            tag: "li".to_string(),
            attributes: BTreeMap::new(),
            children: vec![NodeTemplate::Text {
                slot: Slot {
                    format: "{0}".to_string(),
                    bindings: vec!["item.t".to_string()],
                },
            }],
            key_binding: Some("item.id".to_string()),
        }
    }

    #[test]
    fn loop_materializes_each_item_without_append_hint() {
        let template = Template::Loop {
            container_path: "10000000".into(),
            source_key: "todos".to_string(),
            item_template: todo_item_template(),
            operation_hints: BTreeSet::from([ListOperationKind::ReplaceAll]),
        };

        let patches = template
            .instantiate(&state_of(&[(
                "todos",
                json!([{"id": 1, "t": "a"}, {"id": 2, "t": "b"}]),
            )]))
            .unwrap();
        assert_eq!(patches.len(), 2);
        match &patches[1] {
            Patch::Create { path, node } => {
                assert_eq!(path.as_str(), "10000000.20000000");
                assert_eq!(node.key(), Some("2"));
                assert!(
                    matches!(&node.children()[0], VNode::Text(t) if t.text == "b")
                );
            }
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn append_hint_emits_a_single_create_for_the_last_item() {
        let template = Template::Loop {
            container_path: "10000000".into(),
            source_key: "todos".to_string(),
            item_template: todo_item_template(),
            operation_hints: BTreeSet::from([ListOperationKind::Append]),
        };

        let patches = template
            .instantiate(&state_of(&[(
                "todos",
                json!([{"id": 1, "t": "a"}, {"id": 2, "t": "b"}, {"id": 3, "t": "c"}]),
            )]))
            .unwrap();
        assert_eq!(patches.len(), 1);
        match &patches[0] {
            Patch::Create { path, node } => {
                assert_eq!(path.as_str(), "10000000.30000000");
                assert_eq!(node.key(), Some("3"));
                assert!(
                    matches!(&node.children()[0], VNode::Text(t) if t.text == "c")
                );
            }
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn loop_refuses_when_gap_slots_run_out() {
        let template = Template::Loop {
            container_path: "10000000".into(),
            source_key: "items".to_string(),
            item_template: NodeTemplate::Text {
                slot: Slot {
                    format: "{0}".to_string(),
                    bindings: vec!["item".to_string()],
                },
            },
            operation_hints: BTreeSet::new(),
        };
        let oversized: Vec<serde_json::Value> = (0..20).map(|i| json!(i.to_string())).collect();
        let result = template.instantiate(&state_of(&[("items", json!(oversized))]));
        assert!(matches!(result, Err(Error::Oversized(_))));
    }

    #[test]
    fn slot_from_text_parameterizes_scope_values() {
        let scope = state_of(&[("item", json!({"t": "buy milk", "id": 7}))]);
        let slot = Slot::from_text("7: buy milk", &scope);
        assert_eq!(slot.format, "{0}: {1}");
        assert_eq!(slot.bindings, vec!["item.id", "item.t"]);
        assert_eq!(slot.render(&scope).unwrap(), "7: buy milk");
    }

    #[test]
    fn fingerprint_is_stable_and_binding_sensitive() {
        let a = Template::ScalarSubstitution {
            path: "10000000".into(),
            format: "n={0}".to_string(),
            bindings: vec!["n".to_string()],
        };
        assert_eq!(a.fingerprint(), a.clone().fingerprint());

        let b = Template::ScalarSubstitution {
            path: "10000000".into(),
            format: "n={0}".to_string(),
            bindings: vec!["m".to_string()],
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn merge_unions_structural_branches() {
        let branch = |s: &str| NodeTemplate::Text {
            slot: Slot::literal(s),
        };
        let mut a = Template::Structural {
            path: "10000000".into(),
            discriminator_key: "phase".to_string(),
            branches: BTreeMap::from([("loading".to_string(), branch("Loading"))]),
        };
        let b = Template::Structural {
            path: "10000000".into(),
            discriminator_key: "phase".to_string(),
            branches: BTreeMap::from([("ready".to_string(), branch("Done"))]),
        };
        assert!(a.mergeable(&b));
        a.merge(b);
        if let Template::Structural { branches, .. } = &a {
            assert_eq!(branches.len(), 2);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn template_json_round_trip() {
        let template = Template::Loop {
            container_path: "10000000".into(),
            source_key: "items".to_string(),
            item_template: NodeTemplate::Element {
                tag: "li".to_string(),
                attributes: BTreeMap::from([(
                    "class".to_string(),
                    Slot::literal("row"),
                )]),
                children: vec![NodeTemplate::Text {
                    slot: Slot {
                        format: "{0}".to_string(),
                        bindings: vec!["item.label".to_string()],
                    },
                }],
                key_binding: Some("item.id".to_string()),
            },
            operation_hints: BTreeSet::from([
                ListOperationKind::Append,
                ListOperationKind::RemoveAt,
            ]),
        };
        let json = serde_json::to_string(&template).unwrap();
        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(template, back);
        assert_eq!(template.fingerprint(), back.fingerprint());
    }

    #[test]
    fn root_keys_strip_nesting() {
        let template = Template::DeepPath {
            path: "10000000".into(),
            format: "{0}".to_string(),
            binding: "user.address.city".to_string(),
        };
        assert_eq!(
            template.root_keys(),
            BTreeSet::from(["user".to_string()])
        );
    }
}
