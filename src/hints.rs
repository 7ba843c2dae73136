use crate::predictor::Hint;
use crate::state_paths::StateMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Caps for one connection's hint cache.
#[derive(Debug, Clone)]
pub struct HintCacheConfig {
    pub max_entries: usize,
    /// Hints older than this never match and are dropped on the next
    /// cache operation.
    pub ttl: Duration,
}

impl Default for HintCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 64,
            ttl: Duration::from_secs(30),
        }
    }
}

struct CachedHint {
    hint: Hint,
    inserted_at: Instant,
    sequence: u64,
}

struct CacheInner {
    entries: HashMap<String, CachedHint>,
    next_sequence: u64,
}

/// Per-client-connection store of predicted patch lists, keyed by
/// `"{component_id}:{hint_id}"`.
///
/// Hints are ephemeral: consumed on exact state-delta match, evicted on TTL
/// or cap pressure. Staleness is harmless by construction; a hint whose
/// delta never arrives simply ages out.
pub struct HintCache {
    inner: Mutex<CacheInner>,
    config: HintCacheConfig,
}

impl HintCache {
    pub fn new(config: HintCacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                next_sequence: 0,
            }),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a hint, evicting by age on cap pressure.
    pub fn queue(&self, hint: Hint) {
        let mut inner = self.inner.lock().unwrap();
        purge_expired(&mut inner, self.config.ttl);

        let key = format!("{}:{}", hint.component_id, hint.hint_id);
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.insert(
            key,
            CachedHint {
                hint,
                inserted_at: Instant::now(),
                sequence,
            },
        );

        while inner.entries.len() > self.config.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, c)| c.sequence)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    inner.entries.remove(&key);
                    crate::log_debug!("hint cache evicted {key} under cap pressure");
                }
                None => break,
            }
        }
    }

    /// Consume the hint whose predicted delta equals the observed one.
    /// Highest confidence wins among several matches; insertion order
    /// breaks remaining ties.
    pub fn match_hint(&self, component_id: &str, observed_delta: &StateMap) -> Option<Hint> {
        let mut inner = self.inner.lock().unwrap();
        purge_expired(&mut inner, self.config.ttl);

        let best_key = inner
            .entries
            .iter()
            .filter(|(_, c)| {
                c.hint.component_id == component_id
                    && &c.hint.predicted_state_delta == observed_delta
            })
            .max_by(|(_, a), (_, b)| {
                a.hint
                    .confidence
                    .partial_cmp(&b.hint.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.sequence.cmp(&a.sequence))
            })
            .map(|(k, _)| k.clone());

        let hit = best_key.and_then(|k| inner.entries.remove(&k)).map(|c| c.hint);
        crate::metrics::METRICS.record_hint_cache(hit.is_some());
        hit
    }

    /// Drop every hint for a component. Called when the host learns the
    /// component's template store changed.
    pub fn invalidate(&self, component_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entries
            .retain(|_, c| c.hint.component_id != component_id);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }
}

impl Default for HintCache {
    fn default() -> Self {
        Self::new(HintCacheConfig::default())
    }
}

fn purge_expired(inner: &mut CacheInner, ttl: Duration) {
    let now = Instant::now();
    inner
        .entries
        .retain(|_, c| now.duration_since(c.inserted_at) <= ttl);
}
