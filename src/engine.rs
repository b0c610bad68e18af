//! The per-packet pipeline: one engine owning every hot-loop structure.
//!
//! Processing one packet runs, in order: sketch update → burst accounting →
//! table lookup or admission → counter updates → path selection → simulated
//! work → history/credit/type updates → burst promotion → validation sample →
//! prediction-cache write → periodic maintenance (aging cycles, classifier
//! adaptation, lifecycle sweep).
//!
//! The engine is single-threaded and forward-only: no operation blocks, no
//! packet is retried, and the only external input besides the key stream is
//! the monotonic clock, passed in explicitly as `now_s`.

use thiserror::Error;

use crate::select::{execute_path, select_path};
use crate::{
    apply_type_transitions, AgingManager, CachedPrediction, CountMinSketch, DatasetEcho,
    FlowKey, FlowRecord, FlowTable, FlowType, PathClassifier, PredictionCache, ProcessingPath,
    RunReport, BURSTY_FLOW_SLOTS, FAST_CACHE_SLOTS, HASH_BUCKETS, LARGE_FLOW_SLOTS,
    MICRO_FLOW_SLOTS, PREDICTION_CACHE_SLOTS,
};

/// Configuration for a [`FlowEngine`].
///
/// Defaults reproduce the stock geometry; the index structures must stay
/// powers of two because every slot computation is a bitmask.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Pool slots reserved for large flows.
    pub large_flow_slots: usize,
    /// Pool slots reserved for bursty flows.
    pub bursty_flow_slots: usize,
    /// Pool slots reserved for micro flows.
    pub micro_flow_slots: usize,
    /// Hash-index buckets (power of two).
    pub hash_buckets: usize,
    /// Fast-cache slots (power of two).
    pub fast_cache_slots: usize,
    /// Prediction-cache slots (power of two).
    pub prediction_cache_slots: usize,
    /// Packets between aging-cycle attempts.
    pub aging_check_interval: u64,
    /// Minimum wall-clock seconds between aging cycles.
    pub aging_min_period_s: f64,
    /// Packets between classifier adaptations.
    pub adapt_interval: u64,
    /// Packets between lifecycle sweeps.
    pub lifecycle_interval: u64,
    /// Pool prefix inspected by each lifecycle sweep. The stock bound only
    /// visits the first thousand slots; raise it to sweep a larger prefix.
    pub lifecycle_scan_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            large_flow_slots: LARGE_FLOW_SLOTS,
            bursty_flow_slots: BURSTY_FLOW_SLOTS,
            micro_flow_slots: MICRO_FLOW_SLOTS,
            hash_buckets: HASH_BUCKETS,
            fast_cache_slots: FAST_CACHE_SLOTS,
            prediction_cache_slots: PREDICTION_CACHE_SLOTS,
            aging_check_interval: 25_000,
            aging_min_period_s: 30.0,
            adapt_interval: 50_000,
            lifecycle_interval: 100_000,
            lifecycle_scan_limit: 1_000,
        }
    }
}

impl EngineConfig {
    /// Total flow-pool capacity.
    #[must_use]
    pub fn pool_slots(&self) -> usize {
        self.large_flow_slots + self.bursty_flow_slots + self.micro_flow_slots
    }

    /// Override the lifecycle sweep bound.
    #[must_use]
    pub fn with_lifecycle_scan_limit(mut self, limit: usize) -> Self {
        self.lifecycle_scan_limit = limit;
        self
    }

    /// Shrink the table geometry, e.g. for tests that exercise exhaustion.
    #[must_use]
    pub fn with_pool_slots(mut self, large: usize, bursty: usize, micro: usize) -> Self {
        self.large_flow_slots = large;
        self.bursty_flow_slots = bursty;
        self.micro_flow_slots = micro;
        self
    }

    fn validate(&self) -> Result<(), EngineError> {
        for (field, value) in [
            ("hash_buckets", self.hash_buckets),
            ("fast_cache_slots", self.fast_cache_slots),
            ("prediction_cache_slots", self.prediction_cache_slots),
        ] {
            if !value.is_power_of_two() {
                return Err(EngineError::NotPowerOfTwo { field, value });
            }
        }
        if self.pool_slots() == 0 {
            return Err(EngineError::EmptyPool);
        }
        for (field, value) in [
            ("aging_check_interval", self.aging_check_interval),
            ("adapt_interval", self.adapt_interval),
            ("lifecycle_interval", self.lifecycle_interval),
        ] {
            if value == 0 {
                return Err(EngineError::ZeroInterval { field });
            }
        }
        Ok(())
    }
}

/// Construction-time configuration failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An index structure was not sized to a power of two.
    #[error("{field} must be a power of two (got {value})")]
    NotPowerOfTwo { field: &'static str, value: usize },
    /// The flow pool has no capacity at all.
    #[error("flow pool capacity must be at least 1")]
    EmptyPool,
    /// A periodic interval was zero.
    #[error("{field} must be at least 1 packet")]
    ZeroInterval { field: &'static str },
}

/// Outcome of processing one packet.
#[derive(Debug, Clone, Copy)]
pub struct PacketDecision {
    /// The path the packet was processed on.
    pub path: ProcessingPath,
    /// Classifier output backing the choice, when one was consulted.
    pub prediction: Option<f64>,
    /// Whether the prediction was served from the cache.
    pub from_cache: bool,
    /// Whether a burst was declared while this packet was accounted.
    pub burst: bool,
    /// Whether this packet caused a new flow record to be admitted.
    pub admitted: bool,
}

/// The adaptive flow classification and path-selection engine.
pub struct FlowEngine {
    cfg: EngineConfig,
    table: FlowTable,
    sketch: CountMinSketch,
    model: PathClassifier,
    predictions: PredictionCache,
    aging: AgingManager,
    path_counts: [u64; 6],
    total_processed: u64,
    last_now_s: f64,
}

impl FlowEngine {
    /// Build an engine, validating the configured geometry.
    pub fn new(cfg: EngineConfig) -> Result<Self, EngineError> {
        cfg.validate()?;
        Ok(Self {
            table: FlowTable::new(cfg.pool_slots(), cfg.hash_buckets, cfg.fast_cache_slots),
            sketch: CountMinSketch::new(),
            model: PathClassifier::new(),
            predictions: PredictionCache::new(cfg.prediction_cache_slots),
            aging: AgingManager::new(),
            path_counts: [0; 6],
            total_processed: 0,
            last_now_s: 0.0,
            cfg,
        })
    }

    /// Pre-populate a known flow before the packet stream starts. Returns
    /// `false` when the key is already present or the pool is exhausted.
    pub fn admit_known_flow(&mut self, key: FlowKey, now_s: f64) -> bool {
        if self.table.peek(key).is_some() {
            return false;
        }
        self.table.create(FlowRecord::known(key, now_s)).is_some()
    }

    /// Process one packet observed at monotonic time `now_s`.
    pub fn process_at(&mut self, key: FlowKey, now_s: f64) -> PacketDecision {
        self.total_processed += 1;
        self.last_now_s = self.last_now_s.max(now_s);

        self.sketch.update(key);
        let burst = self.aging.observe_packet(now_s);

        let mut admitted = false;
        let idx = match self.table.lookup(key) {
            Some(idx) => {
                self.table.record_mut(idx).touch(now_s);
                Some(idx)
            }
            None => {
                // Admission refusal is silent: the key keeps falling to the
                // no-record rules and misses keep accumulating.
                let created = self.table.create(FlowRecord::fresh(key, now_s));
                admitted = created.is_some();
                created
            }
        };

        let choice = select_path(
            key,
            idx.map(|i| self.table.record(i)),
            &self.sketch,
            &mut self.predictions,
            &mut self.model,
            now_s,
        );

        execute_path(
            choice.path,
            key,
            idx.map(|i| self.table.record(i)),
            &mut self.model,
            now_s,
        );

        self.path_counts[choice.path.index()] += 1;

        if let Some(idx) = idx {
            let rec = self.table.record_mut(idx);
            rec.pattern.record(choice.path);
            rec.credit_path(choice.path);
            apply_type_transitions(rec);

            if burst {
                let ml = match choice.prediction {
                    Some(p) => p,
                    None => self.model.predict(rec, now_s),
                };
                if ml >= 0.75 && rec.pattern.consecutive_fast_paths() >= 3 {
                    rec.confidence = rec.confidence.max(85);
                    if rec.transition_to(FlowType::Promoted) {
                        self.aging.note_promotion();
                    }
                } else if ml >= 0.55 && rec.pattern.consecutive_fast_paths() >= 2 {
                    rec.confidence = rec.confidence.max(60);
                    if rec.transition_to(FlowType::Bursty) {
                        self.aging.note_promotion();
                    }
                }
            }

            if rec.hits >= 5 {
                if let Some(p) = choice.prediction {
                    self.model.record_validation(p, choice.path);
                }
            }

            if rec.hits > 2 && !choice.from_cache {
                if let Some(p) = choice.prediction {
                    self.predictions.store(CachedPrediction {
                        key,
                        score: p,
                        path: choice.path,
                        stored_s: now_s,
                        confidence: rec.confidence,
                    });
                }
            }
        }

        let n = self.total_processed;
        if n % self.cfg.aging_check_interval == 0 {
            self.aging.maybe_cycle(
                &mut self.table,
                &self.model,
                now_s,
                n,
                self.cfg.aging_min_period_s,
            );
        }
        if n % self.cfg.adapt_interval == 0 {
            self.model.adapt();
        }
        if n % self.cfg.lifecycle_interval == 0 {
            self.run_lifecycle(now_s);
        }

        PacketDecision {
            path: choice.path,
            prediction: choice.prediction,
            from_cache: choice.from_cache,
            burst,
            admitted,
        }
    }

    /// Lifecycle sweep over the configured pool prefix: promote flows the
    /// model consistently likes, demote promoted flows that lost their edge
    /// (rolling back to the pre-promotion type), and finish off long-idle
    /// dying records.
    fn run_lifecycle(&mut self, now_s: f64) {
        let scan = self.cfg.lifecycle_scan_limit.min(self.table.len());
        for i in 0..scan {
            let idx = i as u32;
            if self.table.record(idx).is_reclaimed() {
                continue;
            }
            let ml = self.model.score(self.table.record(idx), now_s);
            let rec = self.table.record_mut(idx);
            match rec.flow_type {
                FlowType::Normal
                    if ml > 0.75 && rec.promotion_score > 700 && rec.hits > 8 =>
                {
                    rec.transition_to(FlowType::Promoted);
                    self.aging.note_promotion();
                }
                FlowType::Promoted
                    if ml < 0.4 || rec.idle_s(now_s) > 300.0 || rec.promotion_score < 200 =>
                {
                    let rollback = rec.previous_type;
                    rec.transition_to(rollback);
                    rec.confidence = rec.confidence.saturating_sub(15).max(10);
                    self.aging.note_demotion();
                }
                FlowType::Dying if rec.idle_s(now_s) > 900.0 => {
                    rec.confidence = 0;
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Packets processed so far.
    #[must_use]
    pub fn total_processed(&self) -> u64 {
        self.total_processed
    }

    /// Per-path packet counts, indexed by [`ProcessingPath::index`].
    #[must_use]
    pub fn path_counts(&self) -> [u64; 6] {
        self.path_counts
    }

    /// The flow table.
    #[must_use]
    pub fn table(&self) -> &FlowTable {
        &self.table
    }

    /// Mutable table access, for harnesses that stage or adjust records
    /// outside the packet path.
    #[must_use]
    pub fn table_mut(&mut self) -> &mut FlowTable {
        &mut self.table
    }

    /// The frequency sketch.
    #[must_use]
    pub fn sketch(&self) -> &CountMinSketch {
        &self.sketch
    }

    /// The classifier.
    #[must_use]
    pub fn model(&self) -> &PathClassifier {
        &self.model
    }

    /// The prediction cache.
    #[must_use]
    pub fn predictions(&self) -> &PredictionCache {
        &self.predictions
    }

    /// The aging manager.
    #[must_use]
    pub fn aging(&self) -> &AgingManager {
        &self.aging
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Assemble the end-of-run report.
    #[must_use]
    pub fn report(&self, echo: DatasetEcho, elapsed_s: f64) -> RunReport {
        RunReport::collect(self, echo, elapsed_s)
    }

    /// Latest observed monotonic stamp; report scans evaluate the model here.
    #[must_use]
    pub(crate) fn last_now_s(&self) -> f64 {
        self.last_now_s
    }
}
