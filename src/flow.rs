//! Flow records: per-key state, lifecycle classes, and type transitions.

use crate::{FlowKey, PathHistory, ProcessingPath};

/// Upper bound for a record's confidence score.
pub const MAX_CONFIDENCE: u8 = 100;

/// Per-packet confidence credit for an observed flow.
pub const CONFIDENCE_INCREMENT: u8 = 5;

/// Confidence assigned to a flow admitted from the live stream.
pub const INITIAL_CONFIDENCE: u8 = 35;

/// Confidence assigned to a pre-populated known flow.
pub const KNOWN_FLOW_CONFIDENCE: u8 = 75;

/// Upper bound for a record's promotion score.
pub const MAX_PROMOTION_SCORE: u16 = 1000;

/// Behavioural class of a flow. Transitions follow the ordered rules in
/// [`apply_type_transitions`] plus the burst/lifecycle promotion paths in the
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlowType {
    /// Default class for freshly admitted flows.
    Normal,
    /// Long-lived, high-volume flow.
    Large,
    /// Intermittent high-rate flow.
    Bursty,
    /// Short, small flow.
    Micro,
    /// Logically reclaimed: keeps its pool slot but is skipped by active
    /// iteration once its confidence reaches zero.
    Dying,
    /// Promoted by the burst or lifecycle machinery; demotion rolls back to
    /// the previous type.
    Promoted,
    /// Path decisions are too erratic to trust.
    Suspected,
}

impl FlowType {
    /// All types, in ordinal order (the order reports enumerate them in).
    pub const ALL: [FlowType; 7] = [
        FlowType::Normal,
        FlowType::Large,
        FlowType::Bursty,
        FlowType::Micro,
        FlowType::Dying,
        FlowType::Promoted,
        FlowType::Suspected,
    ];

    /// Dense ordinal, also used as a classifier feature (scaled by 10).
    #[must_use]
    pub fn ordinal(self) -> u8 {
        match self {
            FlowType::Normal => 0,
            FlowType::Large => 1,
            FlowType::Bursty => 2,
            FlowType::Micro => 3,
            FlowType::Dying => 4,
            FlowType::Promoted => 5,
            FlowType::Suspected => 6,
        }
    }

    /// Label used by the run report.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            FlowType::Normal => "normal",
            FlowType::Large => "large",
            FlowType::Bursty => "bursty",
            FlowType::Micro => "micro",
            FlowType::Dying => "dying",
            FlowType::Promoted => "promoted",
            FlowType::Suspected => "suspected",
        }
    }
}

/// How idle time erodes a flow's confidence. Every flow carries its own
/// strategy; transitions reassign it alongside the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AgingStrategy {
    /// Fixed decrement after a generous idle threshold.
    Linear,
    /// Multiplicative decay growing with idle time.
    Exponential,
    /// Decay damped by the classifier's opinion of the flow.
    Adaptive,
    /// Steep decrement and early hand-off to `Dying`.
    Aggressive,
}

/// Aging bookkeeping carried by each record.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AgingState {
    /// Monotonic creation stamp, seconds.
    pub created_s: f64,
    /// Monotonic stamp of the last observation, seconds.
    pub touched_s: f64,
    /// Decay rule applied by aging cycles.
    pub strategy: AgingStrategy,
    /// Per-flow scale on decay amounts. 1.0 for everything the engine
    /// creates; kept as a field so operators can dampen or sharpen decay for
    /// individual flows.
    pub multiplier: f64,
}

impl AgingState {
    fn new(now_s: f64, strategy: AgingStrategy) -> Self {
        Self {
            created_s: now_s,
            touched_s: now_s,
            strategy,
            multiplier: 1.0,
        }
    }

    /// Seconds since the last observation. Clock regressions read as zero.
    #[must_use]
    pub fn idle_s(&self, now_s: f64) -> f64 {
        (now_s - self.touched_s).max(0.0)
    }
}

/// One live entry in the flow table.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowRecord {
    /// Immutable identity; unique across live records.
    pub key: FlowKey,
    /// Trust score in `0..=100`. Grows with observations, shrinks only via
    /// aging and demotion.
    pub confidence: u8,
    /// Observations since creation.
    pub hits: u64,
    /// Packet count. A synonym of `hits` in this simulation; kept separate to
    /// leave room for multi-event flows.
    pub packet_count: u64,
    /// Monotonic stamp of the first observation, seconds.
    pub first_seen: f64,
    /// Monotonic stamp of the latest observation, seconds.
    pub last_seen: f64,
    /// Current behavioural class.
    pub flow_type: FlowType,
    /// Class held immediately before the last transition; demotion rolls
    /// back to it.
    pub previous_type: FlowType,
    /// Recent path decisions and derived scores.
    pub pattern: PathHistory,
    /// Aging bookkeeping.
    pub aging: AgingState,
    /// Times this record was located via the fast cache.
    pub cache_hits: u64,
    /// Recent path quality in `0..=1000`: cheap paths add credit, expensive
    /// paths subtract it.
    pub promotion_score: u16,
    /// Hash-chain link (pool index of the next record in this bucket).
    pub(crate) next: Option<u32>,
}

impl FlowRecord {
    /// A flow admitted from the live stream (first packet just observed).
    #[must_use]
    pub fn fresh(key: FlowKey, now_s: f64) -> Self {
        Self {
            key,
            confidence: INITIAL_CONFIDENCE,
            hits: 1,
            packet_count: 1,
            first_seen: now_s,
            last_seen: now_s,
            flow_type: FlowType::Normal,
            previous_type: FlowType::Normal,
            pattern: PathHistory::new(),
            aging: AgingState::new(now_s, AgingStrategy::Exponential),
            cache_hits: 0,
            promotion_score: 100,
            next: None,
        }
    }

    /// A flow pre-populated from a known set before the packet stream starts.
    /// Arrives warm: elevated confidence, history priors, adaptive aging.
    #[must_use]
    pub fn known(key: FlowKey, now_s: f64) -> Self {
        Self {
            key,
            confidence: KNOWN_FLOW_CONFIDENCE,
            hits: 12,
            packet_count: 15,
            first_seen: now_s,
            last_seen: now_s,
            flow_type: FlowType::Large,
            previous_type: FlowType::Large,
            pattern: PathHistory::with_priors(0.85, 0.15, 5),
            aging: AgingState::new(now_s, AgingStrategy::Adaptive),
            cache_hits: 0,
            promotion_score: 800,
            next: None,
        }
    }

    /// Record one observation: counters, stamps, and the per-packet
    /// confidence credit.
    pub fn touch(&mut self, now_s: f64) {
        self.hits += 1;
        self.packet_count += 1;
        self.last_seen = self.last_seen.max(now_s);
        self.aging.touched_s = self.aging.touched_s.max(now_s);
        self.confidence = (self.confidence + CONFIDENCE_INCREMENT).min(MAX_CONFIDENCE);
    }

    /// Apply path credit to the promotion score: cheap paths earn +10,
    /// expensive paths pay 5, clamped to `0..=1000`.
    pub fn credit_path(&mut self, path: ProcessingPath) {
        if path < ProcessingPath::Slow {
            self.promotion_score = (self.promotion_score + 10).min(MAX_PROMOTION_SCORE);
        } else {
            self.promotion_score = self.promotion_score.saturating_sub(5);
        }
    }

    /// Move to `ty`, remembering the outgoing type for demotion rollback.
    /// No-op when the record already has that type.
    pub fn transition_to(&mut self, ty: FlowType) -> bool {
        if self.flow_type == ty {
            return false;
        }
        self.previous_type = self.flow_type;
        self.flow_type = ty;
        true
    }

    /// Seconds since the first observation.
    #[must_use]
    pub fn age_s(&self, now_s: f64) -> f64 {
        (now_s - self.first_seen).max(0.0)
    }

    /// Seconds since the latest observation.
    #[must_use]
    pub fn idle_s(&self, now_s: f64) -> f64 {
        self.aging.idle_s(now_s)
    }

    /// Whether the record is logically dead and skipped by active iteration.
    #[must_use]
    pub fn is_reclaimed(&self) -> bool {
        self.flow_type == FlowType::Dying && self.confidence == 0
    }
}

/// Re-classify a record after its counters were updated. Rules apply in
/// order; the first match wins:
///
/// 1. very high packet count ⇒ `Large` (adaptive aging);
/// 2. erratic recent paths on an established flow ⇒ `Bursty` (linear aging),
///    unless already bursty or promoted;
/// 3. barely-seen flow ⇒ `Micro` (aggressive aging);
/// 4. full history with very low consistency ⇒ `Suspected`.
pub fn apply_type_transitions(rec: &mut FlowRecord) {
    let verdict = if rec.packet_count > 800 && rec.flow_type != FlowType::Large {
        Some((FlowType::Large, Some(AgingStrategy::Adaptive)))
    } else if rec.pattern.burst_score() > 0.6
        && rec.hits > 10
        && !matches!(rec.flow_type, FlowType::Bursty | FlowType::Promoted)
    {
        Some((FlowType::Bursty, Some(AgingStrategy::Linear)))
    } else if rec.packet_count < 10 && rec.hits < 5 {
        Some((FlowType::Micro, Some(AgingStrategy::Aggressive)))
    } else if rec.pattern.is_full()
        && rec.pattern.path_consistency() < 0.3
        && rec.hits > 8
        && rec.flow_type != FlowType::Suspected
    {
        Some((FlowType::Suspected, None))
    } else {
        None
    };

    if let Some((ty, strategy)) = verdict {
        if rec.transition_to(ty) {
            if let Some(s) = strategy {
                rec.aging.strategy = s;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcessingPath;

    #[test]
    fn fresh_record_initial_state() {
        let r = FlowRecord::fresh(42, 10.0);
        assert_eq!(r.confidence, 35);
        assert_eq!(r.hits, 1);
        assert_eq!(r.packet_count, 1);
        assert_eq!(r.flow_type, FlowType::Normal);
        assert_eq!(r.aging.strategy, AgingStrategy::Exponential);
        assert_eq!(r.promotion_score, 100);
        assert_eq!(r.pattern.path_consistency(), 1.0);
    }

    #[test]
    fn known_record_initial_state() {
        let r = FlowRecord::known(7, 0.0);
        assert_eq!(r.confidence, 75);
        assert_eq!(r.hits, 12);
        assert_eq!(r.packet_count, 15);
        assert_eq!(r.flow_type, FlowType::Large);
        assert_eq!(r.aging.strategy, AgingStrategy::Adaptive);
        assert_eq!(r.promotion_score, 800);
        assert_eq!(r.pattern.consecutive_fast_paths(), 5);
    }

    #[test]
    fn touch_updates_counters_and_caps_confidence() {
        let mut r = FlowRecord::fresh(1, 0.0);
        for i in 0..30 {
            r.touch(i as f64);
        }
        assert_eq!(r.hits, 31);
        assert_eq!(r.confidence, MAX_CONFIDENCE);
        assert!(r.first_seen <= r.last_seen);
    }

    #[test]
    fn touch_tolerates_clock_regression() {
        let mut r = FlowRecord::fresh(1, 100.0);
        r.touch(50.0);
        assert_eq!(r.last_seen, 100.0);
        assert_eq!(r.idle_s(50.0), 0.0);
    }

    #[test]
    fn path_credit_is_clamped_both_ways() {
        let mut r = FlowRecord::fresh(1, 0.0);
        for _ in 0..200 {
            r.credit_path(ProcessingPath::Fast);
        }
        assert_eq!(r.promotion_score, MAX_PROMOTION_SCORE);
        for _ in 0..500 {
            r.credit_path(ProcessingPath::Slow);
        }
        assert_eq!(r.promotion_score, 0);
    }

    #[test]
    fn adaptive_path_earns_credit() {
        let mut r = FlowRecord::fresh(1, 0.0);
        r.credit_path(ProcessingPath::Adaptive);
        assert_eq!(r.promotion_score, 110);
    }

    #[test]
    fn large_transition_fires_first() {
        let mut r = FlowRecord::fresh(1, 0.0);
        r.packet_count = 801;
        r.hits = 801;
        apply_type_transitions(&mut r);
        assert_eq!(r.flow_type, FlowType::Large);
        assert_eq!(r.aging.strategy, AgingStrategy::Adaptive);
        assert_eq!(r.previous_type, FlowType::Normal);
    }

    #[test]
    fn bursty_transition_requires_establishment() {
        let mut r = FlowRecord::fresh(1, 0.0);
        for i in 0..2 * crate::PATH_HISTORY_LEN {
            r.pattern.record(if i % 2 == 0 {
                ProcessingPath::Fast
            } else {
                ProcessingPath::Slow
            });
        }
        r.hits = 11;
        r.packet_count = 11;
        apply_type_transitions(&mut r);
        assert_eq!(r.flow_type, FlowType::Bursty);
        assert_eq!(r.aging.strategy, AgingStrategy::Linear);
    }

    #[test]
    fn micro_transition_for_barely_seen_flows() {
        let mut r = FlowRecord::fresh(1, 0.0);
        apply_type_transitions(&mut r);
        assert_eq!(r.flow_type, FlowType::Micro);
        assert_eq!(r.aging.strategy, AgingStrategy::Aggressive);
    }

    #[test]
    fn suspected_transition_on_low_consistency() {
        let mut r = FlowRecord::fresh(1, 0.0);
        // Cycle through four paths so no single mode dominates.
        let cycle = [
            ProcessingPath::UltraFast,
            ProcessingPath::Fast,
            ProcessingPath::Accelerated,
            ProcessingPath::Slow,
        ];
        for i in 0..crate::PATH_HISTORY_LEN {
            r.pattern.record(cycle[i % 4]);
        }
        assert!(r.pattern.path_consistency() < 0.3);
        r.hits = 9;
        r.packet_count = 20; // keep the micro rule quiet
        apply_type_transitions(&mut r);
        assert_eq!(r.flow_type, FlowType::Suspected);
    }

    #[test]
    fn repeat_classification_does_not_churn_previous_type() {
        let mut r = FlowRecord::fresh(1, 0.0);
        apply_type_transitions(&mut r);
        assert_eq!(r.flow_type, FlowType::Micro);
        assert_eq!(r.previous_type, FlowType::Normal);
        apply_type_transitions(&mut r);
        // Still micro; rollback target is untouched.
        assert_eq!(r.previous_type, FlowType::Normal);
    }

    #[test]
    fn promoted_flows_resist_bursty_reclassification() {
        let mut r = FlowRecord::fresh(1, 0.0);
        for i in 0..crate::PATH_HISTORY_LEN {
            r.pattern.record(if i % 2 == 0 {
                ProcessingPath::Fast
            } else {
                ProcessingPath::Slow
            });
        }
        r.hits = 50;
        r.packet_count = 50;
        r.flow_type = FlowType::Promoted;
        apply_type_transitions(&mut r);
        assert_eq!(r.flow_type, FlowType::Promoted);
    }
}
