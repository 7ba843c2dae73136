use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Patch-list length histogram bucket upper bounds (last bucket is open).
const PATCH_LEN_BUCKETS: [usize; 7] = [0, 1, 3, 7, 15, 31, 63];

/// Global metrics collector. Counters are relaxed atomics; the recent
/// timing buffers sit behind a mutex and feed the percentile fields of the
/// snapshot.
pub struct Metrics {
    // Reconciliation
    reconcile_calls: AtomicU64,
    reconcile_errors: AtomicU64,
    total_patches_generated: AtomicU64,
    patch_len_histogram: [AtomicU64; 8],

    // Extraction
    extractions: AtomicU64,
    extractions_noop: AtomicU64,
    templates_confirmed: AtomicU64,

    // Prediction
    predictions: AtomicU64,
    predictions_emitted: AtomicU64,
    predictions_refused: AtomicU64,

    // Hint cache
    hint_cache_hits: AtomicU64,
    hint_cache_misses: AtomicU64,

    // Stores
    store_evictions: AtomicU64,
    template_store_entries: AtomicUsize,
    template_store_bytes: AtomicUsize,

    // Validation
    validation_failures: AtomicU64,

    start_time: Instant,
    recent_reconcile_us: Mutex<Vec<u64>>,
    recent_prediction_us: Mutex<Vec<u64>>,
    max_recent_samples: usize,
}

lazy_static::lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

impl Metrics {
    fn new() -> Self {
        Self {
            reconcile_calls: AtomicU64::new(0),
            reconcile_errors: AtomicU64::new(0),
            total_patches_generated: AtomicU64::new(0),
            patch_len_histogram: Default::default(),

            extractions: AtomicU64::new(0),
            extractions_noop: AtomicU64::new(0),
            templates_confirmed: AtomicU64::new(0),

            predictions: AtomicU64::new(0),
            predictions_emitted: AtomicU64::new(0),
            predictions_refused: AtomicU64::new(0),

            hint_cache_hits: AtomicU64::new(0),
            hint_cache_misses: AtomicU64::new(0),

            store_evictions: AtomicU64::new(0),
            template_store_entries: AtomicUsize::new(0),
            template_store_bytes: AtomicUsize::new(0),

            validation_failures: AtomicU64::new(0),

            start_time: Instant::now(),
            recent_reconcile_us: Mutex::new(Vec::new()),
            recent_prediction_us: Mutex::new(Vec::new()),
            max_recent_samples: 1000,
        }
    }

    pub fn record_reconcile(&self, duration: Duration, patch_count: usize, error: bool) {
        self.reconcile_calls.fetch_add(1, Ordering::Relaxed);
        if error {
            self.reconcile_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_patches_generated
                .fetch_add(patch_count as u64, Ordering::Relaxed);
            let bucket = PATCH_LEN_BUCKETS
                .iter()
                .position(|&max| patch_count <= max)
                .unwrap_or(PATCH_LEN_BUCKETS.len());
            self.patch_len_histogram[bucket].fetch_add(1, Ordering::Relaxed);
        }
        self.push_sample(&self.recent_reconcile_us, duration);
    }

    pub fn record_extraction(&self, learned: bool) {
        self.extractions.fetch_add(1, Ordering::Relaxed);
        if !learned {
            self.extractions_noop.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_template_confirmed(&self) {
        self.templates_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prediction(&self, duration: Duration, emitted: bool) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        if emitted {
            self.predictions_emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.predictions_refused.fetch_add(1, Ordering::Relaxed);
        }
        self.push_sample(&self.recent_prediction_us, duration);
    }

    pub fn record_hint_cache(&self, hit: bool) {
        if hit {
            self.hint_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hint_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_store_eviction(&self) {
        self.store_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Gauges refreshed by the engine after each store mutation.
    pub fn set_store_totals(&self, entries: usize, bytes: usize) {
        self.template_store_entries.store(entries, Ordering::Relaxed);
        self.template_store_bytes.store(bytes, Ordering::Relaxed);
    }

    fn push_sample(&self, buffer: &Mutex<Vec<u64>>, duration: Duration) {
        let mut samples = buffer.lock().unwrap();
        if samples.len() >= self.max_recent_samples {
            samples.remove(0);
        }
        samples.push(duration.as_micros() as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let reconcile_samples = self.recent_reconcile_us.lock().unwrap();
        let prediction_samples = self.recent_prediction_us.lock().unwrap();

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),

            reconcile_calls: self.reconcile_calls.load(Ordering::Relaxed),
            reconcile_errors: self.reconcile_errors.load(Ordering::Relaxed),
            total_patches_generated: self.total_patches_generated.load(Ordering::Relaxed),
            patch_len_histogram: self
                .patch_len_histogram
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            avg_reconcile_time_us: average(&reconcile_samples),
            p50_reconcile_time_us: percentile(&reconcile_samples, 0.50),
            p95_reconcile_time_us: percentile(&reconcile_samples, 0.95),

            extractions: self.extractions.load(Ordering::Relaxed),
            extractions_noop: self.extractions_noop.load(Ordering::Relaxed),
            templates_confirmed: self.templates_confirmed.load(Ordering::Relaxed),

            predictions: self.predictions.load(Ordering::Relaxed),
            predictions_emitted: self.predictions_emitted.load(Ordering::Relaxed),
            predictions_refused: self.predictions_refused.load(Ordering::Relaxed),
            avg_prediction_time_us: average(&prediction_samples),
            p95_prediction_time_us: percentile(&prediction_samples, 0.95),

            hint_cache_hits: self.hint_cache_hits.load(Ordering::Relaxed),
            hint_cache_misses: self.hint_cache_misses.load(Ordering::Relaxed),

            store_evictions: self.store_evictions.load(Ordering::Relaxed),
            template_store_entries: self.template_store_entries.load(Ordering::Relaxed),
            template_store_bytes: self.template_store_bytes.load(Ordering::Relaxed),

            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.reconcile_calls.store(0, Ordering::Relaxed);
        self.reconcile_errors.store(0, Ordering::Relaxed);
        self.total_patches_generated.store(0, Ordering::Relaxed);
        for bucket in &self.patch_len_histogram {
            bucket.store(0, Ordering::Relaxed);
        }

        self.extractions.store(0, Ordering::Relaxed);
        self.extractions_noop.store(0, Ordering::Relaxed);
        self.templates_confirmed.store(0, Ordering::Relaxed);

        self.predictions.store(0, Ordering::Relaxed);
        self.predictions_emitted.store(0, Ordering::Relaxed);
        self.predictions_refused.store(0, Ordering::Relaxed);

        self.hint_cache_hits.store(0, Ordering::Relaxed);
        self.hint_cache_misses.store(0, Ordering::Relaxed);

        self.store_evictions.store(0, Ordering::Relaxed);
        self.validation_failures.store(0, Ordering::Relaxed);

        self.recent_reconcile_us.lock().unwrap().clear();
        self.recent_prediction_us.lock().unwrap().clear();
    }
}

fn average(samples: &[u64]) -> u64 {
    if samples.is_empty() {
        0
    } else {
        samples.iter().sum::<u64>() / samples.len() as u64
    }
}

fn percentile(samples: &[u64], p: f64) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let index = ((sorted.len() as f64) * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Point-in-time view of every counter, serialized over the wire as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,

    pub reconcile_calls: u64,
    pub reconcile_errors: u64,
    pub total_patches_generated: u64,
    pub patch_len_histogram: Vec<u64>,
    pub avg_reconcile_time_us: u64,
    pub p50_reconcile_time_us: u64,
    pub p95_reconcile_time_us: u64,

    pub extractions: u64,
    pub extractions_noop: u64,
    pub templates_confirmed: u64,

    pub predictions: u64,
    pub predictions_emitted: u64,
    pub predictions_refused: u64,
    pub avg_prediction_time_us: u64,
    pub p95_prediction_time_us: u64,

    pub hint_cache_hits: u64,
    pub hint_cache_misses: u64,

    pub store_evictions: u64,
    pub template_store_entries: usize,
    pub template_store_bytes: usize,

    pub validation_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_reconcile(Duration::from_micros(100), 5, false);
        metrics.record_reconcile(Duration::from_micros(200), 2, false);
        metrics.record_reconcile(Duration::from_micros(150), 0, true);

        let snap = metrics.snapshot();
        assert_eq!(snap.reconcile_calls, 3);
        assert_eq!(snap.reconcile_errors, 1);
        assert_eq!(snap.total_patches_generated, 7);
    }

    #[test]
    fn patch_lengths_land_in_buckets() {
        let metrics = Metrics::new();
        metrics.record_reconcile(Duration::ZERO, 0, false);
        metrics.record_reconcile(Duration::ZERO, 1, false);
        metrics.record_reconcile(Duration::ZERO, 2, false);
        metrics.record_reconcile(Duration::ZERO, 100, false);

        let snap = metrics.snapshot();
        assert_eq!(snap.patch_len_histogram[0], 1);
        assert_eq!(snap.patch_len_histogram[1], 1);
        assert_eq!(snap.patch_len_histogram[2], 1);
        assert_eq!(snap.patch_len_histogram[7], 1);
    }

    #[test]
    fn prediction_split_tracks_refusals() {
        let metrics = Metrics::new();
        metrics.record_prediction(Duration::from_micros(10), true);
        metrics.record_prediction(Duration::from_micros(20), false);
        metrics.record_prediction(Duration::from_micros(30), false);

        let snap = metrics.snapshot();
        assert_eq!(snap.predictions, 3);
        assert_eq!(snap.predictions_emitted, 1);
        assert_eq!(snap.predictions_refused, 2);
    }

    #[test]
    fn percentile_on_sorted_samples() {
        let values: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&values, 0.5), 51);
        assert_eq!(percentile(&values, 0.95), 96);
        assert_eq!(percentile(&[], 0.95), 0);
    }

    #[test]
    fn reset_clears_everything() {
        let metrics = Metrics::new();
        metrics.record_reconcile(Duration::from_micros(10), 4, false);
        metrics.record_hint_cache(true);
        metrics.reset();

        let snap = metrics.snapshot();
        assert_eq!(snap.reconcile_calls, 0);
        assert_eq!(snap.hint_cache_hits, 0);
        assert!(snap.patch_len_histogram.iter().all(|&b| b == 0));
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.record_extraction(true);
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"extractions\":1"));
    }
}
