//! Count–Min sketch: approximate per-key packet frequency in bounded memory.
//!
//! The pipeline updates the sketch on **every** packet, whether or not a flow
//! record exists, and queries it only when deciding the path for a key with no
//! record (a frequent key that has not been admitted yet deserves better than
//! the slow path). Counters are monotone and never cleared during a run, so
//! estimates are one-sided: they may overestimate, never underestimate.

use crate::hash::{mix32_seeded, slot};
use crate::FlowKey;

/// Number of independent counter rows.
pub const SKETCH_ROWS: usize = 3;

/// Counters per row. Power of two; reduction is a bitmask.
pub const SKETCH_WIDTH: usize = 4096;

// Fixed odd mixing seeds, one per row. Constants rather than startup
// randomness: runs must be restartable and bit-for-bit repeatable.
const ROW_SEEDS: [u32; SKETCH_ROWS] = [0x9e37_79b9, 0x7f4a_7c15, 0x1656_67b1];

/// A `SKETCH_ROWS × SKETCH_WIDTH` Count–Min sketch over 32-bit flow keys.
#[derive(Debug, Clone)]
pub struct CountMinSketch {
    counters: Vec<u32>,
}

impl Default for CountMinSketch {
    fn default() -> Self {
        Self::new()
    }
}

impl CountMinSketch {
    /// Create an empty sketch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: vec![0; SKETCH_ROWS * SKETCH_WIDTH],
        }
    }

    #[inline]
    fn cell(key: FlowKey, row: usize) -> usize {
        row * SKETCH_WIDTH + slot(mix32_seeded(key, ROW_SEEDS[row]), SKETCH_WIDTH)
    }

    /// Record one observation of `key` in every row.
    #[inline]
    pub fn update(&mut self, key: FlowKey) {
        for row in 0..SKETCH_ROWS {
            let c = &mut self.counters[Self::cell(key, row)];
            *c = c.saturating_add(1);
        }
    }

    /// Point estimate for `key`: the minimum across rows.
    #[inline]
    #[must_use]
    pub fn estimate(&self, key: FlowKey) -> u32 {
        let mut min = u32::MAX;
        for row in 0..SKETCH_ROWS {
            min = min.min(self.counters[Self::cell(key, row)]);
        }
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sketch_estimates_zero() {
        let s = CountMinSketch::new();
        for key in [0u32, 1, 42, u32::MAX] {
            assert_eq!(s.estimate(key), 0);
        }
    }

    #[test]
    fn estimate_never_underestimates() {
        let mut s = CountMinSketch::new();
        for _ in 0..17 {
            s.update(99);
        }
        assert!(s.estimate(99) >= 17);
    }

    #[test]
    fn unrelated_keys_stay_low() {
        let mut s = CountMinSketch::new();
        for _ in 0..1000 {
            s.update(7);
        }
        // With 3 rows of 4096 cells, a single other key colliding in all
        // three rows is effectively impossible.
        assert_eq!(s.estimate(123_456), 0);
    }

    #[test]
    fn counters_are_monotone() {
        let mut s = CountMinSketch::new();
        let mut last = 0;
        for _ in 0..50 {
            s.update(5);
            let e = s.estimate(5);
            assert!(e >= last);
            last = e;
        }
    }

    #[test]
    fn update_is_per_key_independent_of_order() {
        let mut a = CountMinSketch::new();
        let mut b = CountMinSketch::new();
        for k in 0..100u32 {
            a.update(k);
        }
        for k in (0..100u32).rev() {
            b.update(k);
        }
        for k in 0..100u32 {
            assert_eq!(a.estimate(k), b.estimate(k));
        }
    }
}
