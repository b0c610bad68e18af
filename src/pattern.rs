//! Per-flow history of recent path decisions.
//!
//! Each flow record carries a small ring of the last few paths the pipeline
//! chose for it, plus three derived signals:
//!
//! - **path consistency**: the fraction of retained decisions equal to the
//!   modal decision. A flow that keeps landing on the same path is smooth and
//!   a good promotion candidate.
//! - **burst score**: the fraction of adjacent decision pairs that disagree.
//!   A flow that flaps between paths looks bursty or adversarial.
//! - **consecutive fast paths**: the length of the current run of fast-ish
//!   decisions, consumed by the burst-promotion rules.

use crate::ProcessingPath;

/// Retained decisions per flow.
pub const PATH_HISTORY_LEN: usize = 8;

// Consistency is meaningless on one or two samples; wait for a few.
const MIN_SAMPLES_FOR_CONSISTENCY: usize = 4;

/// Ring buffer of the last [`PATH_HISTORY_LEN`] path decisions with derived
/// consistency / burstiness scores.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PathHistory {
    slots: [ProcessingPath; PATH_HISTORY_LEN],
    cursor: usize,
    len: usize,
    consistency: f64,
    burst_score: f64,
    consecutive_fast: u32,
}

impl Default for PathHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl PathHistory {
    /// Empty history. Consistency starts optimistic (1.0) and burstiness
    /// starts calm (0.0); both hold until enough samples arrive to compute
    /// the real values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: [ProcessingPath::Accelerated; PATH_HISTORY_LEN],
            cursor: 0,
            len: 0,
            consistency: 1.0,
            burst_score: 0.0,
            consecutive_fast: 0,
        }
    }

    /// History pre-seeded with prior scores, for flows admitted from a known
    /// set rather than observed from scratch.
    #[must_use]
    pub fn with_priors(consistency: f64, burst_score: f64, consecutive_fast: u32) -> Self {
        Self {
            consistency: consistency.clamp(0.0, 1.0),
            burst_score: burst_score.clamp(0.0, 1.0),
            consecutive_fast,
            ..Self::new()
        }
    }

    /// Record a path decision and refresh the derived scores.
    pub fn record(&mut self, path: ProcessingPath) {
        self.slots[self.cursor] = path;
        self.cursor = (self.cursor + 1) % PATH_HISTORY_LEN;
        if self.len < PATH_HISTORY_LEN {
            self.len += 1;
        }

        if path.is_fast() {
            self.consecutive_fast += 1;
        } else {
            self.consecutive_fast = 0;
        }

        if self.len >= MIN_SAMPLES_FOR_CONSISTENCY {
            self.consistency = self.modal_fraction();
        }
        if self.is_full() {
            self.burst_score = self.adjacent_disagreement();
        }
    }

    /// Entries in chronological order (oldest first).
    fn chronological(&self) -> impl Iterator<Item = ProcessingPath> + '_ {
        let start = if self.is_full() { self.cursor } else { 0 };
        (0..self.len).map(move |i| self.slots[(start + i) % PATH_HISTORY_LEN])
    }

    fn modal_fraction(&self) -> f64 {
        let mut counts = [0usize; 6];
        for p in self.chronological() {
            counts[p.index()] += 1;
        }
        let modal = counts.iter().copied().max().unwrap_or(0);
        modal as f64 / self.len as f64
    }

    fn adjacent_disagreement(&self) -> f64 {
        let entries: Vec<ProcessingPath> = self.chronological().collect();
        let disagreements = entries.windows(2).filter(|w| w[0] != w[1]).count();
        disagreements as f64 / (PATH_HISTORY_LEN - 1) as f64
    }

    /// Fraction of retained decisions equal to the modal decision, in `[0,1]`.
    #[must_use]
    pub fn path_consistency(&self) -> f64 {
        self.consistency
    }

    /// Fraction of adjacent decision pairs that differ, in `[0,1]`.
    #[must_use]
    pub fn burst_score(&self) -> f64 {
        self.burst_score
    }

    /// Length of the current run of fast-ish decisions.
    #[must_use]
    pub fn consecutive_fast_paths(&self) -> u32 {
        self.consecutive_fast
    }

    /// Number of decisions retained so far (saturates at the ring size).
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no decision has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the ring has wrapped at least once.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == PATH_HISTORY_LEN
    }

    /// Whether enough samples exist for `path_consistency` to be measured
    /// rather than assumed.
    #[must_use]
    pub fn has_measured_consistency(&self) -> bool {
        self.len >= MIN_SAMPLES_FOR_CONSISTENCY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessingPath::*;

    #[test]
    fn fresh_history_has_optimistic_priors() {
        let h = PathHistory::new();
        assert_eq!(h.path_consistency(), 1.0);
        assert_eq!(h.burst_score(), 0.0);
        assert_eq!(h.consecutive_fast_paths(), 0);
        assert!(h.is_empty());
    }

    #[test]
    fn consistency_waits_for_four_samples() {
        let mut h = PathHistory::new();
        h.record(Slow);
        h.record(Fast);
        h.record(Slow);
        // Three mixed samples: still the optimistic prior.
        assert_eq!(h.path_consistency(), 1.0);
        h.record(Fast);
        // Four samples, modal count 2 of 4.
        assert!((h.path_consistency() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn uniform_history_is_fully_consistent() {
        let mut h = PathHistory::new();
        for _ in 0..PATH_HISTORY_LEN {
            h.record(Fast);
        }
        assert_eq!(h.path_consistency(), 1.0);
        assert_eq!(h.burst_score(), 0.0);
    }

    #[test]
    fn alternating_history_maxes_burst_score() {
        let mut h = PathHistory::new();
        for i in 0..PATH_HISTORY_LEN {
            h.record(if i % 2 == 0 { Fast } else { Slow });
        }
        assert_eq!(h.burst_score(), 1.0);
        assert!((h.path_consistency() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn burst_score_waits_for_full_ring() {
        let mut h = PathHistory::new();
        for i in 0..PATH_HISTORY_LEN - 1 {
            h.record(if i % 2 == 0 { Fast } else { Slow });
        }
        assert_eq!(h.burst_score(), 0.0, "prior holds until the ring fills");
    }

    #[test]
    fn consecutive_fast_counts_runs_and_resets() {
        let mut h = PathHistory::new();
        h.record(UltraFast);
        h.record(Fast);
        h.record(Fast);
        assert_eq!(h.consecutive_fast_paths(), 3);
        h.record(Accelerated);
        assert_eq!(h.consecutive_fast_paths(), 0);
        h.record(UltraFast);
        assert_eq!(h.consecutive_fast_paths(), 1);
    }

    #[test]
    fn ring_evicts_oldest() {
        let mut h = PathHistory::new();
        for _ in 0..PATH_HISTORY_LEN {
            h.record(Slow);
        }
        // Overwrite the whole ring with Fast; consistency must recover fully.
        for _ in 0..PATH_HISTORY_LEN {
            h.record(Fast);
        }
        assert_eq!(h.path_consistency(), 1.0);
        assert_eq!(h.burst_score(), 0.0);
    }

    #[test]
    fn priors_are_clamped() {
        let h = PathHistory::with_priors(1.7, -0.2, 5);
        assert_eq!(h.path_consistency(), 1.0);
        assert_eq!(h.burst_score(), 0.0);
        assert_eq!(h.consecutive_fast_paths(), 5);
    }
}
