use crate::path::HexPath;
use crate::state_paths::{display_scalar, StateMap};
use crate::store::{PendingConditional, TemplateDelta, TemplateStore};
use crate::template::{
    item_scope, ListOperation, ListOperationKind, NodeTemplate, Slot, Template,
};
use crate::transform::WHITELIST;
use crate::vdom::Patch;
use serde_json::Value;
use std::collections::BTreeMap;

/// Derive templates from one observed render transition.
///
/// The learning discipline is verify-then-reinforce: stored templates whose
/// bindings are covered by the delta are replayed against the new state
/// first. An exact match reinforces (and may confirm); a mismatch weakens
/// and eventually evicts. Only when no stored template explains the
/// observation does fresh extraction run.
pub fn extract(
    store: &mut TemplateStore,
    old_state: &StateMap,
    new_state: &StateMap,
    patches: &[Patch],
    op_hint: Option<ListOperation>,
) -> Vec<TemplateDelta> {
    if patches.is_empty() {
        return Vec::new();
    }

    let delta = state_delta(old_state, new_state);
    if delta.is_empty() {
        return Vec::new();
    }

    let mut deltas = Vec::new();
    if replay_stored(store, old_state, new_state, &delta, patches, &mut deltas) {
        crate::metrics::METRICS.record_extraction(true);
        return deltas;
    }

    let learned = learn(store, old_state, &delta, patches, op_hint, &mut deltas);
    crate::metrics::METRICS.record_extraction(learned);
    deltas
}

/// Map of changed keys to their new values.
fn state_delta(old_state: &StateMap, new_state: &StateMap) -> StateMap {
    new_state
        .iter()
        .filter(|&(k, v)| old_state.get(k) != Some(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Replay stored templates against the observation. Returns true when one
/// of them reproduced the patches exactly.
fn replay_stored(
    store: &mut TemplateStore,
    old_state: &StateMap,
    new_state: &StateMap,
    delta: &StateMap,
    patches: &[Patch],
    deltas: &mut Vec<TemplateDelta>,
) -> bool {
    let candidates: Vec<_> = store
        .iter()
        .filter(|(_, e)| {
            !e.inert
                && e.template
                    .root_keys()
                    .iter()
                    .all(|k| delta.contains_key(k))
        })
        .map(|(fp, e)| (*fp, e.template.clone()))
        .collect();

    for (fingerprint, template) in candidates {
        match template.instantiate(new_state) {
            Ok(predicted) if predicted == patches => {
                if let Some(d) = store.reinforce(&fingerprint) {
                    crate::metrics::METRICS.record_template_confirmed();
                    deltas.push(d);
                } else {
                    store.touch(&fingerprint);
                }
                crate::log_debug!("template {fingerprint} reproduced the observed patches");
                return true;
            }
            Ok(_) => {
                // A loop template only models one operation shape; a list
                // transition it does not model is not a misprediction, the
                // learning pass widens its hints instead.
                if loop_mismatch_is_neutral(&template, old_state, new_state) {
                    continue;
                }
                crate::log_debug!("template {fingerprint} mispredicted; weakening");
                if let Some(d) = store.weaken(&fingerprint) {
                    deltas.push(d);
                }
            }
            Err(crate::error::Error::VersionSkew { .. }) => {
                store.mark_inert(&fingerprint);
            }
            // A binding the delta covers but the full state cannot resolve
            // (or a missing branch) is neither a hit nor a miss.
            Err(_) => {}
        }
    }
    false
}

/// True when `template` is a loop and the observed list transition is a
/// different operation than the one its instantiation models (the minimal
/// append form when the hints carry `append`, replace-all otherwise).
fn loop_mismatch_is_neutral(
    template: &Template,
    old_state: &StateMap,
    new_state: &StateMap,
) -> bool {
    let (source_key, operation_hints) = match template {
        Template::Loop {
            source_key,
            operation_hints,
            ..
        } => (source_key, operation_hints),
        _ => return false,
    };

    let empty = Vec::new();
    let old_items = old_state
        .get(source_key)
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);
    let new_items = match new_state.get(source_key).and_then(|v| v.as_array()) {
        Some(items) => items,
        None => return false,
    };
    let observed = match infer_list_operation(old_items, new_items) {
        Some(op) => op.kind(),
        None => return false,
    };

    let modeled = if operation_hints.contains(&ListOperationKind::Append) {
        ListOperationKind::Append
    } else {
        ListOperationKind::ReplaceAll
    };
    observed != modeled
}

fn learn(
    store: &mut TemplateStore,
    old_state: &StateMap,
    delta: &StateMap,
    patches: &[Patch],
    op_hint: Option<ListOperation>,
    deltas: &mut Vec<TemplateDelta>,
) -> bool {
    // Exactly one changed list-typed key: a keyed loop.
    if delta.len() == 1 {
        if let Some((key, new_value)) = delta.iter().next() {
            if new_value.is_array() {
                return learn_loop(store, old_state, key, new_value, patches, op_hint, deltas);
            }
        }
    }

    if patches.iter().all(|p| matches!(p, Patch::UpdateText { .. })) {
        return learn_text(store, old_state, delta, patches, deltas);
    }

    // A lone subtree swap driven by one scalar key: structural branches.
    if let ([Patch::Replace { path, node }], true) = (patches, delta.len() == 1) {
        let discriminator = delta
            .iter()
            .next()
            .and_then(|(key, value)| display_scalar(value).map(|d| (key, d)));
        if let Some((key, discriminator)) = discriminator {
            let branch = NodeTemplate::from_node(node, &StateMap::new());
            let template = Template::Structural {
                path: path.clone(),
                discriminator_key: key.clone(),
                branches: BTreeMap::from([(discriminator, branch)]),
            };
            let (_, d) = store.observe(template, false);
            deltas.push(d);
            return true;
        }
    }

    false
}

/// Text-only patch lists: scalar substitution, deep-path bindings,
/// expression transforms, or the two-example conditional protocol.
fn learn_text(
    store: &mut TemplateStore,
    old_state: &StateMap,
    delta: &StateMap,
    patches: &[Patch],
    deltas: &mut Vec<TemplateDelta>,
) -> bool {
    let mut learned = false;

    for patch in patches {
        let (path, text) = match patch {
            Patch::UpdateText { path, text } => (path, text),
            _ => unreachable!("caller filtered to UpdateText"),
        };

        // Parameterize against the changed keys only; unchanged state must
        // not become a slot.
        let slot = Slot::from_text(text, delta);
        if !slot.is_literal() {
            let template = match slot.bindings.as_slice() {
                [binding] if binding.contains('.') || binding.contains('[') => {
                    Template::DeepPath {
                        path: path.clone(),
                        format: slot.format,
                        binding: binding.clone(),
                    }
                }
                _ => Template::ScalarSubstitution {
                    path: path.clone(),
                    format: slot.format,
                    bindings: slot.bindings,
                },
            };
            let (_, d) = store.observe(template, false);
            deltas.push(d);
            learned = true;
            continue;
        }

        // A boolean flip with a literal text swap: record one branch and
        // assemble the conditional when the opposite value shows up.
        if let Some((key, truth)) = single_bool_change(delta) {
            let pending_key = format!("{}|{}", path, key);
            match store.take_pending_conditional(&pending_key, truth) {
                Some(pending) => {
                    let branch = |text: String| {
                        Box::new(Template::ScalarSubstitution {
                            path: path.clone(),
                            format: text,
                            bindings: Vec::new(),
                        })
                    };
                    let (true_text, false_text) = if truth {
                        (text.clone(), pending.text)
                    } else {
                        (pending.text, text.clone())
                    };
                    let template = Template::Conditional {
                        path: path.clone(),
                        predicate_key: key,
                        true_template: branch(true_text),
                        false_template: branch(false_text),
                    };
                    // Both truth values have now been seen.
                    let (_, d) = store.observe(template, true);
                    crate::metrics::METRICS.record_template_confirmed();
                    deltas.push(d);
                    learned = true;
                }
                None => {
                    store.put_pending_conditional(
                        pending_key,
                        PendingConditional {
                            truth,
                            text: text.clone(),
                        },
                    );
                }
            }
            continue;
        }

        // Last resort: a whitelisted transform of the changed value.
        if let Some(template) = match_expression(path, text, delta, old_state) {
            let (_, d) = store.observe(template, false);
            deltas.push(d);
            learned = true;
        }
    }

    learned
}

fn single_bool_change(delta: &StateMap) -> Option<(String, bool)> {
    if delta.len() != 1 {
        return None;
    }
    let (key, value) = delta.iter().next()?;
    value.as_bool().map(|b| (key.clone(), b))
}

/// Try each whitelisted transform against each changed scalar; among the
/// outputs that appear in the text, the longest rendering wins (`fixed2`'s
/// "10.00" beats `fixed1`'s "10.0"). Never synthesizes transforms.
fn match_expression(
    path: &HexPath,
    text: &str,
    delta: &StateMap,
    old_state: &StateMap,
) -> Option<Template> {
    let mut best: Option<(&str, String, usize, String)> = None;

    for (key, value) in delta {
        for transform in WHITELIST {
            let rendered = match transform.apply(value) {
                Some(r) if !r.is_empty() => r,
                _ => continue,
            };
            // The raw value rendering would have been caught by the slot
            // pass; skip transforms that change nothing.
            if Some(rendered.clone()) == display_scalar(value) {
                continue;
            }
            let pos = match text.find(&rendered) {
                Some(pos) => pos,
                None => continue,
            };
            // The old value must not render to the same substring,
            // otherwise a coincidental leftover would stick.
            if let Some(old_value) = old_state.get(key) {
                if transform.apply(old_value).as_deref() == Some(rendered.as_str()) {
                    continue;
                }
            }
            let better = best
                .as_ref()
                .map_or(true, |(_, r, _, _)| rendered.len() > r.len());
            if better {
                best = Some((transform.name(), rendered, pos, key.clone()));
            }
        }
    }

    best.map(|(name, rendered, pos, key)| {
        let format = format!("{}{{0}}{}", &text[..pos], &text[pos + rendered.len()..]);
        Template::Expression {
            path: path.clone(),
            transform: name.to_string(),
            format,
            bindings: vec![key],
        }
    })
}

fn learn_loop(
    store: &mut TemplateStore,
    old_state: &StateMap,
    key: &str,
    new_value: &Value,
    patches: &[Patch],
    op_hint: Option<ListOperation>,
    deltas: &mut Vec<TemplateDelta>,
) -> bool {
    let new_items = match new_value.as_array() {
        Some(items) => items,
        None => return false,
    };
    let empty = Vec::new();
    let old_items = old_state
        .get(key)
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let hinted = op_hint.is_some();
    let operation = match op_hint.or_else(|| infer_list_operation(old_items, new_items)) {
        Some(op) => op,
        None => return false,
    };

    // The item template needs a created node to learn from.
    let (item_index, created) = match operation {
        ListOperation::Append => (new_items.len().saturating_sub(1), first_create(patches)),
        ListOperation::Prepend => (0, first_create(patches)),
        ListOperation::InsertAt { index } => (index, first_create(patches)),
        ListOperation::ReplaceAll => (0, first_create(patches)),
        // Removals, in-place updates and reorders carry no fresh node;
        // they only widen an existing loop's operation hints.
        ListOperation::RemoveAt { .. }
        | ListOperation::UpdateAt { .. }
        | ListOperation::Reorder => (0, None),
    };

    let template = match created {
        Some((create_path, node)) => {
            let container = match create_path.parent() {
                Some(p) if !p.is_empty() => p,
                _ => return false,
            };
            let item = match new_items.get(item_index) {
                Some(item) => item,
                None => return false,
            };
            let scope = item_scope(item, item_index);
            Template::Loop {
                container_path: container,
                source_key: key.to_string(),
                item_template: NodeTemplate::from_node(node, &scope),
                operation_hints: std::iter::once(operation.kind()).collect(),
            }
        }
        None => {
            // Widen an already-learned loop for this source key.
            let existing = store
                .iter()
                .find(|(_, e)| {
                    matches!(&e.template, Template::Loop { source_key, .. } if source_key.as_str() == key)
                })
                .map(|(_, e)| e.template.clone());
            match existing {
                Some(Template::Loop {
                    container_path,
                    source_key,
                    item_template,
                    ..
                }) => Template::Loop {
                    container_path,
                    source_key,
                    item_template,
                    operation_hints: std::iter::once(operation.kind()).collect(),
                },
                _ => return false,
            }
        }
    };

    // A semantic hint disambiguates the operation, so a single example is
    // enough; inferred operations confirm on the second.
    let (_, d) = store.observe(template, hinted);
    if hinted {
        crate::metrics::METRICS.record_template_confirmed();
    }
    deltas.push(d);
    true
}

fn first_create(patches: &[Patch]) -> Option<(&HexPath, &crate::vdom::VNode)> {
    patches.iter().find_map(|p| match p {
        Patch::Create { path, node } => Some((path, node)),
        _ => None,
    })
}

/// Structural comparison of two list values, in the shape of the host's
/// semantic hints.
pub fn infer_list_operation(old_items: &[Value], new_items: &[Value]) -> Option<ListOperation> {
    if old_items == new_items {
        return None;
    }

    if new_items.len() == old_items.len() + 1 {
        if new_items[..old_items.len()] == *old_items {
            return Some(ListOperation::Append);
        }
        if new_items[1..] == *old_items {
            return Some(ListOperation::Prepend);
        }
        for i in 0..new_items.len() {
            let mut without = new_items.to_vec();
            without.remove(i);
            if without == old_items {
                return Some(ListOperation::InsertAt { index: i });
            }
        }
        return Some(ListOperation::ReplaceAll);
    }

    if old_items.len() == new_items.len() + 1 {
        for i in 0..old_items.len() {
            let mut without = old_items.to_vec();
            without.remove(i);
            if without == new_items {
                return Some(ListOperation::RemoveAt { index: i });
            }
        }
        return Some(ListOperation::ReplaceAll);
    }

    if old_items.len() == new_items.len() {
        let differing: Vec<usize> = (0..old_items.len())
            .filter(|&i| old_items[i] != new_items[i])
            .collect();
        if differing.len() == 1 {
            return Some(ListOperation::UpdateAt {
                index: differing[0],
            });
        }
        let mut old_sorted: Vec<String> = old_items.iter().map(|v| v.to_string()).collect();
        let mut new_sorted: Vec<String> = new_items.iter().map(|v| v.to_string()).collect();
        old_sorted.sort();
        new_sorted.sort();
        if old_sorted == new_sorted {
            return Some(ListOperation::Reorder);
        }
    }

    Some(ListOperation::ReplaceAll)
}
