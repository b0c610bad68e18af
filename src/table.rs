//! Flow storage: bump-allocated pool, hash index, and direct-mapped fast cache.
//!
//! The pool owns every [`FlowRecord`]; the index and cache hold pool indices,
//! never references, so the whole structure stays borrow-checker friendly and
//! allocation-free on the hot path. Allocation is bump-only: `pool_index`
//! never decreases, and reclamation is logical (records transition to
//! [`crate::FlowType::Dying`] and are skipped by active iteration once their
//! confidence reaches zero).
//!
//! Lookup order:
//! 1. the fast-cache slot at `mix32(key) & (cache_len - 1)`: a hit advances
//!    only cache-hit counters;
//! 2. the hash-bucket chain at `mix32(key) & (buckets - 1)`: a hit promotes
//!    the record into its fast-cache slot, evicting any prior occupant.

use crate::hash::{mix32, slot};
use crate::{FlowKey, FlowRecord};

/// Pool slots reserved for large flows.
pub const LARGE_FLOW_SLOTS: usize = 50_000;

/// Pool slots reserved for bursty flows.
pub const BURSTY_FLOW_SLOTS: usize = 500;

/// Pool slots reserved for micro flows.
pub const MICRO_FLOW_SLOTS: usize = 1_000;

/// Total pool capacity.
pub const FLOW_POOL_SLOTS: usize = LARGE_FLOW_SLOTS + BURSTY_FLOW_SLOTS + MICRO_FLOW_SLOTS;

/// Hash-index buckets. Power of two.
pub const HASH_BUCKETS: usize = 65_536;

/// Direct-mapped fast-cache slots. Power of two.
pub const FAST_CACHE_SLOTS: usize = 8_192;

/// Lookup and chain statistics.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableStats {
    /// Lookups answered by the fast cache.
    pub cache_hits: u64,
    /// Lookups that found no record at all.
    pub cache_misses: u64,
    /// Lookups answered by a chain walk.
    pub chain_hits: u64,
    /// Lookups whose chain walk skipped at least one non-matching record.
    pub chain_collisions: u64,
    /// Total lookups.
    pub lookups: u64,
}

impl TableStats {
    /// Fraction of lookups answered by the fast cache, against resolved and
    /// missed lookups alike.
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let denom = self.cache_hits + self.cache_misses + self.chain_hits;
        if denom == 0 {
            0.0
        } else {
            self.cache_hits as f64 / denom as f64
        }
    }

    /// Fraction of lookups that had to step past a colliding chain entry.
    #[must_use]
    pub fn chain_collision_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.chain_collisions as f64 / self.lookups as f64
        }
    }
}

/// Flow-record storage with a hash index and a fast cache.
#[derive(Debug, Clone)]
pub struct FlowTable {
    pool: Vec<FlowRecord>,
    pool_cap: usize,
    buckets: Vec<Option<u32>>,
    cache: Vec<Option<u32>>,
    stats: TableStats,
}

impl FlowTable {
    /// Create an empty table with the given geometry. `buckets` and
    /// `cache_slots` must be powers of two (validated by the engine config).
    #[must_use]
    pub fn new(pool_cap: usize, buckets: usize, cache_slots: usize) -> Self {
        Self {
            pool: Vec::with_capacity(pool_cap),
            pool_cap,
            buckets: vec![None; buckets],
            cache: vec![None; cache_slots],
            stats: TableStats::default(),
        }
    }

    /// Table sized per the default geometry.
    #[must_use]
    pub fn with_default_geometry() -> Self {
        Self::new(FLOW_POOL_SLOTS, HASH_BUCKETS, FAST_CACHE_SLOTS)
    }

    /// Number of pool slots ever allocated (the bump index).
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Whether no record has been admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Total pool capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool_cap
    }

    /// Whether the pool has no free slots left.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pool.len() == self.pool_cap
    }

    /// Allocated fraction of the pool, in `[0,1]`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.pool_cap == 0 {
            0.0
        } else {
            self.pool.len() as f64 / self.pool_cap as f64
        }
    }

    /// Lookup and chain statistics.
    #[must_use]
    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    fn bucket_of(&self, key: FlowKey) -> usize {
        slot(mix32(key), self.buckets.len())
    }

    fn cache_slot_of(&self, key: FlowKey) -> usize {
        slot(mix32(key), self.cache.len())
    }

    /// Find the record for `key` without touching any counter or cache
    /// slot. For admission checks and tests; the packet path uses
    /// [`lookup`](Self::lookup).
    #[must_use]
    pub fn peek(&self, key: FlowKey) -> Option<u32> {
        let mut cursor = self.buckets[self.bucket_of(key)];
        while let Some(idx) = cursor {
            let rec = &self.pool[idx as usize];
            if rec.key == key {
                return Some(idx);
            }
            cursor = rec.next;
        }
        None
    }

    /// Find the record for `key`.
    ///
    /// A fast-cache hit advances the record's `cache_hits` and the table's
    /// cache-hit counter, nothing else; two back-to-back lookups of the same
    /// key return the same record. A chain hit promotes the record into its
    /// fast-cache slot.
    pub fn lookup(&mut self, key: FlowKey) -> Option<u32> {
        self.stats.lookups += 1;

        let cslot = self.cache_slot_of(key);
        if let Some(idx) = self.cache[cslot] {
            if self.pool[idx as usize].key == key {
                self.stats.cache_hits += 1;
                self.pool[idx as usize].cache_hits += 1;
                return Some(idx);
            }
        }

        let mut cursor = self.buckets[self.bucket_of(key)];
        let mut skipped = false;
        while let Some(idx) = cursor {
            let rec = &self.pool[idx as usize];
            if rec.key == key {
                if skipped {
                    self.stats.chain_collisions += 1;
                }
                self.stats.chain_hits += 1;
                self.cache[cslot] = Some(idx);
                return Some(idx);
            }
            skipped = true;
            cursor = rec.next;
        }

        if skipped {
            self.stats.chain_collisions += 1;
        }
        self.stats.cache_misses += 1;
        None
    }

    /// Admit a record. Returns its pool index, or `None` when the pool is
    /// exhausted. Refusal is silent; the key keeps falling to the no-record
    /// path rules.
    pub fn create(&mut self, rec: FlowRecord) -> Option<u32> {
        if self.is_full() {
            return None;
        }
        let idx = self.pool.len() as u32;
        let bucket = self.bucket_of(rec.key);
        let mut rec = rec;
        rec.next = self.buckets[bucket];
        self.buckets[bucket] = Some(idx);
        self.pool.push(rec);
        Some(idx)
    }

    /// Borrow a record by pool index.
    #[must_use]
    pub fn record(&self, idx: u32) -> &FlowRecord {
        &self.pool[idx as usize]
    }

    /// Mutably borrow a record by pool index.
    #[must_use]
    pub fn record_mut(&mut self, idx: u32) -> &mut FlowRecord {
        &mut self.pool[idx as usize]
    }

    /// Iterate live records, skipping logically reclaimed ones.
    pub fn active_records(&self) -> impl Iterator<Item = &FlowRecord> {
        self.pool.iter().filter(|r| !r.is_reclaimed())
    }

    /// Iterate every allocated record, reclaimed or not.
    pub fn all_records(&self) -> impl Iterator<Item = &FlowRecord> {
        self.pool.iter()
    }

    /// Check that every chained record actually hashes to its bucket.
    /// Cheap enough for tests; not called on the hot path.
    #[must_use]
    pub fn chains_are_consistent(&self) -> bool {
        for (b, head) in self.buckets.iter().enumerate() {
            let mut cursor = *head;
            while let Some(idx) = cursor {
                let rec = &self.pool[idx as usize];
                if self.bucket_of(rec.key) != b {
                    return false;
                }
                cursor = rec.next;
            }
        }
        true
    }
}
