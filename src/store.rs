use crate::error::{Error, Result};
use crate::template::{Fingerprint, Template};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Caps for one component's template store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    /// Upper bound of the integer confidence counter.
    pub confidence_cap: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            max_bytes: 1024 * 1024,
            confidence_cap: 5,
        }
    }
}

/// Confidence counter at which an observed template counts as confirmed.
pub const CONFIRMATION_THRESHOLD: u8 = 2;

/// One stored template with its learning state.
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    pub template: Template,
    /// Integer confidence in `[0, confidence_cap]`; incremented on match,
    /// decremented on miss.
    pub confidence: u8,
    /// Set when the template's transform fell off the whitelist; inert
    /// entries never predict and only invalidation clears them.
    pub inert: bool,
    bytes: usize,
    last_used: Instant,
}

impl TemplateEntry {
    pub fn is_confirmed(&self) -> bool {
        self.confidence >= CONFIRMATION_THRESHOLD && !self.inert
    }
}

/// Mutation the extractor reports back for one `extract` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateDelta {
    Observed { fingerprint: Fingerprint },
    Confirmed { fingerprint: Fingerprint },
    Merged { fingerprint: Fingerprint },
    Weakened { fingerprint: Fingerprint },
    Evicted { fingerprint: Fingerprint },
}

/// Per-component-class template store.
///
/// Created on first render, mutated only by the extractor (behind the
/// component's write lock), destroyed with the component class. Bounded by
/// entry count and approximate byte size with LRU eviction.
pub struct TemplateStore {
    entries: HashMap<Fingerprint, TemplateEntry>,
    config: StoreConfig,
    total_bytes: usize,
    /// First halves of two-example conditional learning, keyed by
    /// `"{path}|{predicate_key}"`. Ephemeral: not part of snapshots.
    pending_conditionals: HashMap<String, PendingConditional>,
}

/// One observed branch of a boolean text swap, waiting for the opposite
/// truth value to show up.
#[derive(Debug, Clone)]
pub struct PendingConditional {
    pub truth: bool,
    pub text: String,
}

impl TemplateStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            total_bytes: 0,
            pending_conditionals: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn confidence_cap(&self) -> u8 {
        self.config.confidence_cap
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&TemplateEntry> {
        self.entries.get(fingerprint)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &TemplateEntry)> {
        self.entries.iter()
    }

    /// Record an observation. A mergeable entry absorbs it and gains
    /// confidence; otherwise the template is inserted fresh. `promote`
    /// starts a new entry at the confirmation threshold (semantic-hint
    /// fast path).
    pub fn observe(&mut self, template: Template, promote: bool) -> (Fingerprint, TemplateDelta) {
        let mergeable_fp = self
            .entries
            .iter()
            .find(|(_, e)| e.template.mergeable(&template))
            .map(|(fp, _)| *fp);
        if let Some(mut entry) = mergeable_fp.and_then(|fp| self.entries.remove(&fp)) {
            self.total_bytes -= entry.bytes;

            let was_confirmed = entry.is_confirmed();
            entry.template.merge(template);
            entry.confidence = entry
                .confidence
                .saturating_add(1)
                .min(self.config.confidence_cap);
            entry.bytes = entry.template.estimate_size();
            entry.last_used = Instant::now();

            let new_fp = entry.template.fingerprint();
            let delta = if !was_confirmed && entry.is_confirmed() {
                TemplateDelta::Confirmed { fingerprint: new_fp }
            } else {
                TemplateDelta::Merged { fingerprint: new_fp }
            };
            self.total_bytes += entry.bytes;
            self.entries.insert(new_fp, entry);
            self.enforce_caps();
            return (new_fp, delta);
        }

        let fingerprint = template.fingerprint();
        let confidence = if promote {
            CONFIRMATION_THRESHOLD.min(self.config.confidence_cap)
        } else {
            1
        };
        let bytes = template.estimate_size();
        self.total_bytes += bytes;
        self.entries.insert(
            fingerprint,
            TemplateEntry {
                template,
                confidence,
                inert: false,
                bytes,
                last_used: Instant::now(),
            },
        );
        self.enforce_caps();

        let delta = if promote {
            TemplateDelta::Confirmed { fingerprint }
        } else {
            TemplateDelta::Observed { fingerprint }
        };
        (fingerprint, delta)
    }

    /// A stored template predicted the observed patches correctly.
    pub fn reinforce(&mut self, fingerprint: &Fingerprint) -> Option<TemplateDelta> {
        let cap = self.config.confidence_cap;
        let entry = self.entries.get_mut(fingerprint)?;
        let was_confirmed = entry.is_confirmed();
        entry.confidence = entry.confidence.saturating_add(1).min(cap);
        entry.last_used = Instant::now();
        if !was_confirmed && entry.is_confirmed() {
            Some(TemplateDelta::Confirmed {
                fingerprint: *fingerprint,
            })
        } else {
            None
        }
    }

    /// A stored template's prediction disagreed with reality. At zero
    /// confidence the entry is evicted.
    pub fn weaken(&mut self, fingerprint: &Fingerprint) -> Option<TemplateDelta> {
        let entry = self.entries.get_mut(fingerprint)?;
        entry.confidence = entry.confidence.saturating_sub(1);
        if entry.confidence > 0 {
            return Some(TemplateDelta::Weakened {
                fingerprint: *fingerprint,
            });
        }
        if let Some(removed) = self.entries.remove(fingerprint) {
            self.total_bytes -= removed.bytes;
            crate::metrics::METRICS.record_store_eviction();
        }
        Some(TemplateDelta::Evicted {
            fingerprint: *fingerprint,
        })
    }

    /// Mark a template inert (whitelist skew). Cleared only by store
    /// invalidation.
    pub fn mark_inert(&mut self, fingerprint: &Fingerprint) {
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            entry.inert = true;
        }
    }

    pub fn put_pending_conditional(&mut self, key: String, pending: PendingConditional) {
        // Bounded alongside the entry cap; a flood of half-observed
        // conditionals must not grow without limit.
        if self.pending_conditionals.len() >= self.config.max_entries {
            self.pending_conditionals.clear();
        }
        self.pending_conditionals.insert(key, pending);
    }

    /// Remove and return the pending branch for `key` if it recorded the
    /// opposite truth value.
    pub fn take_pending_conditional(
        &mut self,
        key: &str,
        current_truth: bool,
    ) -> Option<PendingConditional> {
        match self.pending_conditionals.get(key) {
            Some(p) if p.truth != current_truth => self.pending_conditionals.remove(key),
            _ => None,
        }
    }

    pub fn touch(&mut self, fingerprint: &Fingerprint) {
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            entry.last_used = Instant::now();
        }
    }

    fn enforce_caps(&mut self) {
        while self.entries.len() > self.config.max_entries
            || self.total_bytes > self.config.max_bytes
        {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(fp, _)| *fp);
            match oldest {
                Some(fp) => {
                    if let Some(removed) = self.entries.remove(&fp) {
                        self.total_bytes -= removed.bytes;
                        crate::metrics::METRICS.record_store_eviction();
                        crate::log_debug!("evicted template {fp} under cap pressure");
                    }
                }
                None => break,
            }
        }
    }

    /// Persist the learned templates. Confidence travels; recency does not.
    pub fn save_to_json(&self) -> Result<String> {
        let snapshot = StoreSnapshot {
            entries: self
                .entries
                .iter()
                .map(|(fp, e)| SnapshotEntry {
                    fingerprint: *fp,
                    template: e.template.clone(),
                    confidence: e.confidence,
                    inert: e.inert,
                })
                .collect(),
        };
        serde_json::to_string(&snapshot).map_err(Error::from)
    }

    pub fn load_from_json(json: &str, config: StoreConfig) -> Result<Self> {
        let snapshot: StoreSnapshot = serde_json::from_str(json)?;
        let mut store = TemplateStore::new(config);
        let now = Instant::now();
        for entry in snapshot.entries {
            let bytes = entry.template.estimate_size();
            store.total_bytes += bytes;
            store.entries.insert(
                entry.fingerprint,
                TemplateEntry {
                    template: entry.template,
                    confidence: entry.confidence.min(store.config.confidence_cap),
                    inert: entry.inert,
                    bytes,
                    last_used: now,
                },
            );
        }
        store.enforce_caps();
        Ok(store)
    }
}

#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    fingerprint: Fingerprint,
    template: Template,
    confidence: u8,
    inert: bool,
}
