use crate::error::{Error, Result};
use crate::extractor;
use crate::hints::HintCacheConfig;
use crate::predictor::{self, Hint};
use crate::state_paths::StateMap;
use crate::store::{StoreConfig, TemplateDelta, TemplateStore};
use crate::template::ListOperation;
use crate::validation::Limits;
use crate::vdom::{Patch, VNode};
use dashmap::DashMap;
use std::sync::{Arc, RwLock};

/// Host-supplied configuration, passed once at engine construction. The
/// core carries no CLI and reads no environment.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub limits: Limits,
    pub store: StoreConfig,
    pub hint_cache: HintCacheConfig,
    /// Emit predictions from observed-once templates as well; off by
    /// default, where only confirmed templates predict.
    pub allow_unconfirmed_predictions: bool,
}

/// The engine handle. Template stores live inside it, one per component
/// class; there is no global registry.
///
/// Reconciliation is pure and runs in parallel freely. Extraction takes a
/// component's write lock, prediction its read lock, so within one
/// component the extract/predict sequence is serialized while distinct
/// components never contend.
pub struct Engine {
    config: EngineConfig,
    stores: DashMap<String, Arc<RwLock<TemplateStore>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            stores: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.config.limits
    }

    /// Build a hint cache for one client connection, sized per this
    /// engine's configuration. The cache is per-connection; the template
    /// stores are shared across connections.
    pub fn new_hint_cache(&self) -> crate::hints::HintCache {
        crate::hints::HintCache::new(self.config.hint_cache.clone())
    }

    /// Diff two trees under this engine's limits.
    pub fn reconcile(&self, old: &VNode, new: &VNode) -> Result<Vec<Patch>> {
        crate::reconciler::reconcile_with_limits(old, new, &self.config.limits)
    }

    /// Feed one observed transition into the component's template store.
    pub fn extract(
        &self,
        component_id: &str,
        old_state: &StateMap,
        new_state: &StateMap,
        patches: &[Patch],
        op_hint: Option<ListOperation>,
    ) -> Result<Vec<TemplateDelta>> {
        crate::patch_validator::validate_patches(patches, &self.config.limits)?;

        let store = self.store_for(component_id);
        let deltas = {
            let mut guard = store.write().unwrap();
            extractor::extract(&mut guard, old_state, new_state, patches, op_hint)
        };
        self.refresh_store_gauges();
        Ok(deltas)
    }

    /// Predict the patches a future delta would produce, if a stored
    /// template covers it. Errors are absorbed; the host simply gets no
    /// hint.
    pub fn predict(&self, component_id: &str, delta: &StateMap) -> Option<Hint> {
        let store = match self.stores.get(component_id) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                crate::log_debug!("predict for unknown component {component_id}");
                return None;
            }
        };

        let outcome = {
            let guard = store.read().unwrap();
            predictor::predict(
                &guard,
                component_id,
                delta,
                &self.config.limits,
                self.config.allow_unconfirmed_predictions,
            )
        };

        if !outcome.skewed.is_empty() {
            let mut guard = store.write().unwrap();
            for fingerprint in &outcome.skewed {
                guard.mark_inert(fingerprint);
            }
        }

        outcome.hint
    }

    /// Drop a component's template store. The host pairs this with hint
    /// cache invalidation on every connection.
    pub fn invalidate(&self, component_id: &str) -> bool {
        let removed = self.stores.remove(component_id).is_some();
        if removed {
            crate::log_info!("invalidated template store for {component_id}");
            self.refresh_store_gauges();
        }
        removed
    }

    /// Number of component stores currently held.
    pub fn component_count(&self) -> usize {
        self.stores.len()
    }

    /// Serialize one component's learned templates.
    pub fn save_component(&self, component_id: &str) -> Result<String> {
        let store = self
            .stores
            .get(component_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::NotFound(format!("component '{component_id}'")))?;
        let guard = store.read().unwrap();
        guard.save_to_json()
    }

    /// Restore a component's templates from a snapshot taken with the same
    /// schema version.
    pub fn load_component(&self, component_id: &str, json: &str) -> Result<()> {
        let store = TemplateStore::load_from_json(json, self.config.store.clone())?;
        self.stores
            .insert(component_id.to_string(), Arc::new(RwLock::new(store)));
        self.refresh_store_gauges();
        Ok(())
    }

    fn store_for(&self, component_id: &str) -> Arc<RwLock<TemplateStore>> {
        let entry = self
            .stores
            .entry(component_id.to_string())
            .or_insert_with(|| {
                Arc::new(RwLock::new(TemplateStore::new(self.config.store.clone())))
            });
        Arc::clone(entry.value())
    }

    fn refresh_store_gauges(&self) {
        let mut entries = 0usize;
        let mut bytes = 0usize;
        for store in self.stores.iter() {
            let guard = store.value().read().unwrap();
            entries += guard.len();
            bytes += guard.total_bytes();
        }
        crate::metrics::METRICS.set_store_totals(entries, bytes);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
