//! End-of-run reporting: typed summary rows plus a text rendering.
//!
//! The rows are plain data so harnesses can serialise them (enable the
//! `serde` feature) or assert on them directly; `Display` renders the
//! human-readable report the CLI prints.

use std::fmt;

use crate::{FlowEngine, FlowType, ProcessingPath};

/// Echo of the dataset header, repeated at the top of the report.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DatasetEcho {
    /// Known flows declared by the prelude.
    pub known_count: usize,
    /// Packets declared by the header.
    pub packet_count: usize,
    /// Key range declared by the header.
    pub key_range: u32,
}

/// Packets routed to one path.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PathRow {
    pub path: ProcessingPath,
    pub packets: u64,
    /// Fraction of all processed packets, in `[0,1]`.
    pub share: f64,
}

/// Classifier state at end of run.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassifierRow {
    /// Self-validation accuracy (biased upward; see the classifier docs).
    pub accuracy: f64,
    /// Samples behind `accuracy`.
    pub samples: u64,
    pub learning_rate: f64,
    /// Predictions served on the packet path.
    pub predictions: u64,
    pub prediction_cache_hit_rate: f64,
}

/// Aging-manager state at end of run.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AgingRow {
    pub memory_utilization: f64,
    pub aging_pressure: f64,
    pub promotions: u64,
    pub demotions: u64,
    pub aged_out: u64,
    /// Mean per-second arrival rate over the retained window.
    pub arrival_rate: f64,
}

/// Aggregate over the live flows of one type.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowTypeRow {
    pub flow_type: FlowType,
    pub flows: u64,
    pub mean_confidence: f64,
    pub mean_score: f64,
    pub mean_promotion_score: f64,
}

/// Aggregate over flows with a measured decision history.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatternRow {
    /// Flows with enough history for a measured consistency.
    pub tracked_flows: u64,
    pub mean_consistency: f64,
    /// Flows whose consistency exceeds 0.8.
    pub high_consistency_flows: u64,
    pub mean_burst_score: f64,
}

/// The complete end-of-run report.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunReport {
    pub echo: DatasetEcho,
    /// Wall-clock processing time, seconds.
    pub elapsed_s: f64,
    pub total_packets: u64,
    /// One row per path, cheapest first.
    pub paths: Vec<PathRow>,
    pub fast_cache_hit_rate: f64,
    pub chain_collision_rate: f64,
    pub classifier: ClassifierRow,
    pub aging: AgingRow,
    /// One row per flow type with at least one live flow.
    pub flow_types: Vec<FlowTypeRow>,
    pub patterns: PatternRow,
}

impl RunReport {
    /// Scan the engine's structures into report rows.
    pub(crate) fn collect(engine: &FlowEngine, echo: DatasetEcho, elapsed_s: f64) -> Self {
        let total = engine.total_processed();
        let counts = engine.path_counts();
        let paths = ProcessingPath::ALL
            .into_iter()
            .map(|p| PathRow {
                path: p,
                packets: counts[p.index()],
                share: if total == 0 {
                    0.0
                } else {
                    counts[p.index()] as f64 / total as f64
                },
            })
            .collect();

        let now = engine.last_now_s();
        let model = engine.model();
        let mut flows = [0u64; 7];
        let mut conf_sum = [0f64; 7];
        let mut score_sum = [0f64; 7];
        let mut promo_sum = [0f64; 7];
        let mut tracked = 0u64;
        let mut consistency_sum = 0.0;
        let mut high_consistency = 0u64;
        let mut burst_sum = 0.0;

        for rec in engine.table().active_records() {
            let o = usize::from(rec.flow_type.ordinal());
            flows[o] += 1;
            conf_sum[o] += f64::from(rec.confidence);
            score_sum[o] += model.score(rec, now);
            promo_sum[o] += f64::from(rec.promotion_score);

            if rec.pattern.has_measured_consistency() {
                tracked += 1;
                let c = rec.pattern.path_consistency();
                consistency_sum += c;
                if c > 0.8 {
                    high_consistency += 1;
                }
                burst_sum += rec.pattern.burst_score();
            }
        }

        let flow_types = FlowType::ALL
            .into_iter()
            .filter(|t| flows[usize::from(t.ordinal())] > 0)
            .map(|t| {
                let o = usize::from(t.ordinal());
                let n = flows[o] as f64;
                FlowTypeRow {
                    flow_type: t,
                    flows: flows[o],
                    mean_confidence: conf_sum[o] / n,
                    mean_score: score_sum[o] / n,
                    mean_promotion_score: promo_sum[o] / n,
                }
            })
            .collect();

        let (accuracy, samples) = model.validation_snapshot();
        let aging = engine.aging();

        Self {
            echo,
            elapsed_s,
            total_packets: total,
            paths,
            fast_cache_hit_rate: engine.table().stats().cache_hit_rate(),
            chain_collision_rate: engine.table().stats().chain_collision_rate(),
            classifier: ClassifierRow {
                accuracy,
                samples,
                learning_rate: model.learning_rate(),
                predictions: model.total_predictions(),
                prediction_cache_hit_rate: engine.predictions().hit_rate(),
            },
            aging: AgingRow {
                memory_utilization: aging.memory_utilization(),
                aging_pressure: aging.aging_pressure(),
                promotions: aging.promotions(),
                demotions: aging.demotions(),
                aged_out: aging.aged_out(),
                arrival_rate: aging.current_rate(),
            },
            flow_types,
            patterns: PatternRow {
                tracked_flows: tracked,
                mean_consistency: if tracked == 0 {
                    0.0
                } else {
                    consistency_sum / tracked as f64
                },
                high_consistency_flows: high_consistency,
                mean_burst_score: if tracked == 0 {
                    0.0
                } else {
                    burst_sum / tracked as f64
                },
            },
        }
    }

    /// Throughput in packets per second.
    #[must_use]
    pub fn packets_per_second(&self) -> f64 {
        if self.elapsed_s <= 0.0 {
            0.0
        } else {
            self.total_packets as f64 / self.elapsed_s
        }
    }

    /// Throughput in millions of packets per second.
    #[must_use]
    pub fn mpps(&self) -> f64 {
        self.packets_per_second() / 1e6
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== flowmux run report ===")?;
        writeln!(
            f,
            "dataset: {} known flows, {} packets, key range {}",
            self.echo.known_count, self.echo.packet_count, self.echo.key_range
        )?;
        writeln!(
            f,
            "total time: {:.3} s  ({:.1} pps, {:.3} Mpps)",
            self.elapsed_s,
            self.packets_per_second(),
            self.mpps()
        )?;

        writeln!(f, "\npath distribution:")?;
        for row in &self.paths {
            writeln!(
                f,
                "  {:<14} {:>10}  ({:>6.2}%)",
                row.path.label(),
                row.packets,
                100.0 * row.share
            )?;
        }

        writeln!(f, "\nflow table:")?;
        writeln!(
            f,
            "  fast-cache hit rate {:.2}%, hash-chain collision rate {:.2}%",
            100.0 * self.fast_cache_hit_rate,
            100.0 * self.chain_collision_rate
        )?;

        writeln!(f, "\nclassifier:")?;
        writeln!(
            f,
            "  validation accuracy {:.2}% over {} samples",
            100.0 * self.classifier.accuracy,
            self.classifier.samples
        )?;
        writeln!(
            f,
            "  learning rate {:.2e}, {} predictions served, prediction-cache hit rate {:.2}%",
            self.classifier.learning_rate,
            self.classifier.predictions,
            100.0 * self.classifier.prediction_cache_hit_rate
        )?;

        writeln!(f, "\naging:")?;
        writeln!(
            f,
            "  memory utilization {:.2}, pressure {:.2}",
            self.aging.memory_utilization, self.aging.aging_pressure
        )?;
        writeln!(
            f,
            "  promotions {}, demotions {}, aged out {}",
            self.aging.promotions, self.aging.demotions, self.aging.aged_out
        )?;
        writeln!(f, "  arrival rate {:.1} pkt/s", self.aging.arrival_rate)?;

        writeln!(f, "\nflow types:")?;
        for row in &self.flow_types {
            writeln!(
                f,
                "  {:<10} {:>8} flows  conf {:>5.1}  score {:.3}  promotion {:>6.1}",
                row.flow_type.label(),
                row.flows,
                row.mean_confidence,
                row.mean_score,
                row.mean_promotion_score
            )?;
        }

        writeln!(f, "\npath history:")?;
        write!(
            f,
            "  {} flows with measured history; mean consistency {:.3} ({} above 0.8); mean burst score {:.3}",
            self.patterns.tracked_flows,
            self.patterns.mean_consistency,
            self.patterns.high_consistency_flows,
            self.patterns.mean_burst_score
        )
    }
}
