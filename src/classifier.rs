//! On-line linear path classifier and its prediction cache.
//!
//! The model is deliberately small: eight features, fixed normalisation
//! ranges, one weighted sum, a sigmoid. What makes it "on-line" is the
//! validation loop: every established flow's packet contributes a sample
//! comparing the model's opinion against the path the pipeline actually took,
//! and the learning rate anneals or re-heats on the resulting accuracy.
//!
//! Known measurement flaw, preserved on purpose: validation is circular. The
//! "actual" path was itself chosen using the model's prediction, so agreement
//! is partly self-fulfilling and reported accuracy is biased upward. The
//! number is a regime-change signal, not ground truth.
//!
//! Classifier pathologies are contained structurally: normalisation clamps
//! every feature to `[0,1]` before the linear combination and the sigmoid
//! bounds the output, so degenerate inputs cannot surface NaN.

use crate::{FlowKey, FlowRecord, ProcessingPath};
use crate::hash::{mix32, slot};

/// Features per record.
pub const FEATURE_COUNT: usize = 8;

/// Learning-rate bounds.
pub const LEARNING_RATE_MIN: f64 = 5e-4;
pub const LEARNING_RATE_MAX: f64 = 1e-2;

const INITIAL_LEARNING_RATE: f64 = 0.002;
const INITIAL_BIAS: f64 = 0.2;
const INITIAL_WEIGHTS: [f64; FEATURE_COUNT] = [0.35, 0.20, 0.15, 0.10, 0.08, 0.05, 0.04, 0.03];

// Fixed normalisation ranges; hits and packet counts get wider span.
const FEATURE_MIN: [f64; FEATURE_COUNT] = [0.0; FEATURE_COUNT];
const FEATURE_MAX: [f64; FEATURE_COUNT] =
    [100.0, 1000.0, 10_000.0, 100.0, 100.0, 100.0, 100.0, 100.0];

// A prediction above this is a "fast" vote for validation purposes.
const PREDICTED_FAST_THRESHOLD: f64 = 0.6;

/// Single-layer on-line linear model over flow-record features.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PathClassifier {
    weights: [f64; FEATURE_COUNT],
    bias: f64,
    learning_rate: f64,
    feature_min: [f64; FEATURE_COUNT],
    feature_max: [f64; FEATURE_COUNT],
    validation_samples: u64,
    validation_correct: u64,
    last_accuracy: f64,
    last_window_samples: u64,
    total_predictions: u64,
}

impl Default for PathClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PathClassifier {
    /// Model with the stock weights and learning rate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            weights: INITIAL_WEIGHTS,
            bias: INITIAL_BIAS,
            learning_rate: INITIAL_LEARNING_RATE,
            feature_min: FEATURE_MIN,
            feature_max: FEATURE_MAX,
            validation_samples: 0,
            validation_correct: 0,
            last_accuracy: 0.0,
            last_window_samples: 0,
            total_predictions: 0,
        }
    }

    /// Raw feature vector for a record at time `now_s`.
    #[must_use]
    pub fn features(rec: &FlowRecord, now_s: f64) -> [f64; FEATURE_COUNT] {
        let hits = rec.hits.max(1) as f64;
        [
            f64::from(rec.confidence),
            rec.hits as f64,
            rec.packet_count as f64,
            100.0 / (rec.age_s(now_s) + 1.0),
            100.0 * rec.pattern.path_consistency(),
            100.0 * rec.pattern.burst_score(),
            100.0 * rec.cache_hits as f64 / hits,
            10.0 * f64::from(rec.flow_type.ordinal()),
        ]
    }

    fn normalise(&self, i: usize, value: f64) -> f64 {
        let span = self.feature_max[i] - self.feature_min[i];
        if span <= 0.0 {
            return 0.0;
        }
        ((value - self.feature_min[i]) / span).clamp(0.0, 1.0)
    }

    /// Model output for a record, in `(0,1)`. Does not count as a served
    /// prediction; use [`predict`](Self::predict) on the packet path.
    #[must_use]
    pub fn score(&self, rec: &FlowRecord, now_s: f64) -> f64 {
        let raw = Self::features(rec, now_s);
        let mut z = self.bias;
        for (i, w) in self.weights.iter().enumerate() {
            z += w * self.normalise(i, raw[i]);
        }
        sigmoid(z)
    }

    /// Serve a prediction, counting it in the run statistics.
    pub fn predict(&mut self, rec: &FlowRecord, now_s: f64) -> f64 {
        self.total_predictions += 1;
        self.score(rec, now_s)
    }

    /// Record one validation sample: did the model's vote agree with the
    /// path the pipeline took?
    pub fn record_validation(&mut self, prediction: f64, path: ProcessingPath) {
        let predicted_fast = prediction > PREDICTED_FAST_THRESHOLD;
        let actual_fast = path <= ProcessingPath::Fast;
        self.validation_samples += 1;
        if predicted_fast == actual_fast {
            self.validation_correct += 1;
        }
    }

    /// Close the current validation window and adapt the learning rate:
    /// anneal when the model tracks the pipeline well, re-heat when it has
    /// drifted. Weights are untouched; the learning rate is the regime-change
    /// proxy. Returns the window's accuracy.
    pub fn adapt(&mut self) -> f64 {
        if self.validation_samples == 0 {
            return self.last_accuracy;
        }
        let accuracy = self.validation_correct as f64 / self.validation_samples as f64;
        if accuracy > 0.85 {
            self.learning_rate *= 0.98;
        } else if accuracy < 0.70 {
            self.learning_rate *= 1.05;
        }
        self.learning_rate = self.learning_rate.clamp(LEARNING_RATE_MIN, LEARNING_RATE_MAX);
        self.last_accuracy = accuracy;
        self.last_window_samples = self.validation_samples;
        self.validation_samples = 0;
        self.validation_correct = 0;
        accuracy
    }

    /// Current learning rate.
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Accuracy of the last closed validation window.
    #[must_use]
    pub fn last_accuracy(&self) -> f64 {
        self.last_accuracy
    }

    /// Samples accumulated in the open validation window.
    #[must_use]
    pub fn validation_samples(&self) -> u64 {
        self.validation_samples
    }

    /// `(accuracy, samples)` for reporting: the last closed window, or the
    /// open window when none has closed yet.
    #[must_use]
    pub fn validation_snapshot(&self) -> (f64, u64) {
        if self.last_window_samples > 0 {
            (self.last_accuracy, self.last_window_samples)
        } else if self.validation_samples > 0 {
            (
                self.validation_correct as f64 / self.validation_samples as f64,
                self.validation_samples,
            )
        } else {
            (0.0, 0)
        }
    }

    /// Predictions served since creation.
    #[must_use]
    pub fn total_predictions(&self) -> u64 {
        self.total_predictions
    }
}

#[inline]
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

// ============================================================================
// Prediction cache
// ============================================================================

/// Direct-mapped prediction-cache slots. Power of two.
pub const PREDICTION_CACHE_SLOTS: usize = 1024;

/// Seconds a cached prediction stays fresh.
pub const PREDICTION_TTL_S: f64 = 30.0;

/// One memoised classifier output.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CachedPrediction {
    /// Key the prediction was computed for.
    pub key: FlowKey,
    /// Model output at store time.
    pub score: f64,
    /// Path the pipeline selected at store time.
    pub path: ProcessingPath,
    /// Monotonic store stamp, seconds.
    pub stored_s: f64,
    /// Record confidence at store time.
    pub confidence: u8,
}

/// Short-TTL memo of classifier output, direct-mapped on the key hash.
///
/// A fresh hit short-circuits both feature extraction and the sigmoid on the
/// packet path. Collisions simply overwrite: correctness only requires that a
/// slot never answers for a different key.
#[derive(Debug, Clone)]
pub struct PredictionCache {
    slots: Vec<Option<CachedPrediction>>,
    lookups: u64,
    hits: u64,
}

impl PredictionCache {
    /// Cache with `slots` entries (power of two, validated by the engine
    /// config).
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![None; slots],
            lookups: 0,
            hits: 0,
        }
    }

    /// Fresh entry for `key`, if one exists. Stale or mismatched entries
    /// count as misses; stale entries are left in place to be overwritten.
    pub fn fresh(&mut self, key: FlowKey, now_s: f64) -> Option<CachedPrediction> {
        self.lookups += 1;
        let s = slot(mix32(key), self.slots.len());
        match self.slots[s] {
            Some(e) if e.key == key && (now_s - e.stored_s) < PREDICTION_TTL_S => {
                self.hits += 1;
                Some(e)
            }
            _ => None,
        }
    }

    /// Memoise a prediction, evicting whatever occupied the slot.
    pub fn store(&mut self, entry: CachedPrediction) {
        let s = slot(mix32(entry.key), self.slots.len());
        self.slots[s] = Some(entry);
    }

    /// Fraction of consults answered fresh.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }

    /// Consults since creation.
    #[must_use]
    pub fn lookups(&self) -> u64 {
        self.lookups
    }
}
