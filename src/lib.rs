//! `flowmux`: adaptive flow classification and processing-path selection.
//!
//! This crate simulates the data plane of a router or middlebox that sorts
//! per-packet work onto processing paths of increasing cost: well-understood
//! flows ride the cheap paths, unknown or misbehaving flows pay for full
//! inspection. The interesting part is the machinery that moves flows between
//! paths as traffic is observed:
//!
//! - a bump-allocated flow table with a hash index and a direct-mapped fast
//!   cache ([`FlowTable`]);
//! - a Count–Min sketch for frequency hints on not-yet-admitted keys
//!   ([`CountMinSketch`]);
//! - a per-flow ring of recent path decisions with derived consistency and
//!   burstiness scores ([`PathHistory`]);
//! - an on-line linear classifier with clamped feature normalisation, a
//!   short-TTL prediction cache, and learning-rate self-validation
//!   ([`PathClassifier`], [`PredictionCache`]);
//! - a multi-strategy aging engine and burst detector ([`AgingManager`]);
//! - the per-packet pipeline tying it all together ([`FlowEngine`]).
//!
//! Goals:
//! - **Deterministic by default**: the engine takes the clock as an explicit
//!   parameter; same key stream + same timestamps → same decisions and the
//!   same end-of-run report.
//! - **Predictable per packet**: no allocation on the hot path after table
//!   construction; all index structures are power-of-two and bitmasked.
//! - **Single-threaded**: the engine is exclusively owned by its caller; no
//!   locks, no I/O, no suspension inside a packet.
//!
//! Non-goals:
//! - Real packet I/O, protocol parsing, or IPv6. A flow is identified by an
//!   opaque 32-bit key whose only required operation is a 32-bit mix hash.
//! - Training beyond a single-layer on-line linear model. Reported accuracy
//!   is self-validation, not ground truth.

#![forbid(unsafe_code)]

mod hash;
pub use hash::*;

mod sketch;
pub use sketch::*;

mod pattern;
pub use pattern::*;

mod flow;
pub use flow::*;

mod table;
pub use table::*;

mod classifier;
pub use classifier::*;

mod aging;
pub use aging::*;

mod select;
pub use select::*;

mod engine;
pub use engine::*;

mod report;
pub use report::*;

mod dataset;
pub use dataset::*;

/// Opaque flow identity. The simulation uses a bare 32-bit key; a deployment
/// would widen this to a 5-tuple digest without touching any algorithm.
pub type FlowKey = u32;

/// Processing paths, cheapest first.
///
/// The derived ordering is the cost ordering: `UltraFast < Fast <
/// Accelerated < Adaptive < Slow < DeepAnalysis`. Several rules compare
/// paths directly (e.g. "fast-ish" means `<= Fast`), so the variant order is
/// load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessingPath {
    /// Hardware-offload stand-in: no per-packet work.
    UltraFast,
    /// Software fast path: a single arithmetic touch.
    Fast,
    /// Partial inspection.
    Accelerated,
    /// Classifier-guided processing; re-consults the model internally.
    Adaptive,
    /// Full inspection.
    Slow,
    /// Security / anomaly inspection. Reserved: the selection tree never
    /// chooses it, but lifecycle extensions may route here.
    DeepAnalysis,
}

impl ProcessingPath {
    /// All paths in cost order (the order reports enumerate them in).
    pub const ALL: [ProcessingPath; 6] = [
        ProcessingPath::UltraFast,
        ProcessingPath::Fast,
        ProcessingPath::Accelerated,
        ProcessingPath::Adaptive,
        ProcessingPath::Slow,
        ProcessingPath::DeepAnalysis,
    ];

    /// Dense index for per-path counters.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            ProcessingPath::UltraFast => 0,
            ProcessingPath::Fast => 1,
            ProcessingPath::Accelerated => 2,
            ProcessingPath::Adaptive => 3,
            ProcessingPath::Slow => 4,
            ProcessingPath::DeepAnalysis => 5,
        }
    }

    /// Human-readable label used by the run report.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ProcessingPath::UltraFast => "ultra-fast",
            ProcessingPath::Fast => "fast",
            ProcessingPath::Accelerated => "accelerated",
            ProcessingPath::Adaptive => "adaptive",
            ProcessingPath::Slow => "slow",
            ProcessingPath::DeepAnalysis => "deep-analysis",
        }
    }

    /// Whether this path counts as cheap for history/credit purposes.
    #[must_use]
    pub fn is_fast(self) -> bool {
        self <= ProcessingPath::Fast
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_order_is_cost_order() {
        let mut prev = ProcessingPath::UltraFast;
        for p in ProcessingPath::ALL.into_iter().skip(1) {
            assert!(prev < p, "{prev:?} must be cheaper than {p:?}");
            prev = p;
        }
    }

    #[test]
    fn path_index_is_dense() {
        for (i, p) in ProcessingPath::ALL.into_iter().enumerate() {
            assert_eq!(p.index(), i);
        }
    }

    #[test]
    fn fast_ish_paths() {
        assert!(ProcessingPath::UltraFast.is_fast());
        assert!(ProcessingPath::Fast.is_fast());
        assert!(!ProcessingPath::Accelerated.is_fast());
        assert!(!ProcessingPath::Slow.is_fast());
    }
}
