use crate::error::Error;
use crate::state_paths::StateMap;
use crate::store::TemplateStore;
use crate::template::Fingerprint;
use crate::validation::Limits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A predicted patch list plus the metadata a client needs to apply it
/// speculatively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    pub component_id: String,
    pub hint_id: String,
    pub predicted_state_delta: StateMap,
    pub patches: Vec<crate::vdom::Patch>,
    /// Scaled confidence in `[0, 1]`.
    pub confidence: f32,
    pub template_fingerprint: Fingerprint,
}

/// Result of one prediction attempt. Templates found to reference a
/// transform outside the current whitelist are reported back so the caller
/// can mark them inert under the write lock.
#[derive(Debug, Default)]
pub struct PredictOutcome {
    pub hint: Option<Hint>,
    pub skewed: Vec<Fingerprint>,
}

/// Predict the patches for a future state delta from the component's
/// stored templates.
///
/// Selection is most-specific-first: the template covering the most delta
/// keys wins, confidence breaks ties, fingerprint order settles the rest.
/// Refusals (uncovered keys, whitelist skew, out-of-bounds output) produce
/// no hint; prediction errors never propagate to the caller.
pub fn predict(
    store: &TemplateStore,
    component_id: &str,
    delta: &StateMap,
    limits: &Limits,
    allow_unconfirmed: bool,
) -> PredictOutcome {
    let start = std::time::Instant::now();
    let mut outcome = PredictOutcome::default();

    let mut candidates: Vec<(&Fingerprint, &crate::store::TemplateEntry, usize)> = store
        .iter()
        .filter(|(_, entry)| {
            let eligible = entry.is_confirmed() || (allow_unconfirmed && entry.confidence >= 1);
            eligible && !entry.inert
        })
        .filter_map(|(fp, entry)| {
            let roots = entry.template.root_keys();
            if roots.is_empty() || !roots.iter().all(|k| delta.contains_key(k)) {
                return None;
            }
            Some((fp, entry, roots.len()))
        })
        .collect();

    if candidates.is_empty() {
        crate::log_debug!("no template covers the delta for {component_id}");
        crate::metrics::METRICS.record_prediction(start.elapsed(), false);
        return outcome;
    }

    candidates.sort_by(|a, b| {
        b.2.cmp(&a.2)
            .then(b.1.confidence.cmp(&a.1.confidence))
            .then(a.0.cmp(b.0))
    });

    for (fingerprint, entry, _) in candidates {
        match entry.template.instantiate(delta) {
            Ok(patches) => {
                if let Err(e) = crate::patch_validator::validate_patches(&patches, limits) {
                    crate::log_warn!(
                        "template {fingerprint} produced out-of-bounds patches: {e}"
                    );
                    crate::metrics::METRICS.record_prediction(start.elapsed(), false);
                    return outcome;
                }
                let confidence =
                    entry.confidence as f32 / store.confidence_cap().max(1) as f32;
                let patch_count = patches.len();
                outcome.hint = Some(Hint {
                    component_id: component_id.to_string(),
                    hint_id: hint_id(delta, fingerprint),
                    predicted_state_delta: delta.clone(),
                    patches,
                    confidence,
                    template_fingerprint: *fingerprint,
                });
                crate::log_info!(
                    "predicted {patch_count} patches for {component_id} at confidence {confidence:.2}"
                );
                crate::metrics::METRICS.record_prediction(start.elapsed(), true);
                return outcome;
            }
            Err(Error::VersionSkew { transform, .. }) => {
                crate::log_warn!(
                    "template {fingerprint} references off-whitelist transform '{transform}'"
                );
                outcome.skewed.push(*fingerprint);
            }
            // Missing branch or unresolved binding: this candidate cannot
            // serve the delta, try the next.
            Err(_) => {}
        }
    }

    crate::metrics::METRICS.record_prediction(start.elapsed(), false);
    outcome
}

/// Deterministic hint id from the delta contents and the template identity.
fn hint_id(delta: &StateMap, fingerprint: &Fingerprint) -> String {
    let ordered: BTreeMap<&String, &serde_json::Value> = delta.iter().collect();
    let payload = serde_json::to_string(&ordered).unwrap_or_default();
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in payload.as_bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{fingerprint}-{hash:016x}")
}
