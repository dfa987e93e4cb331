//! Page statistics table: a bucketed chained map from page address to
//! [`PageRecord`], behind a single reader/writer lock that guards chain
//! structure only. Record fields are independently atomic so a reader
//! holding the read lock never blocks the fault handler's counter updates.
//!
//! Grounded on the bucket/chain shape of a concurrent hash map, with the
//! classic double-check-after-upgrade pattern on insert: look up under a
//! read lock first, and only take the write lock (then re-check) on a miss,
//! so the common case of incrementing an existing page's counters never
//! contends with other readers at all.

use crate::clock::now_ns;
use crate::stats::record::PageRecord;
use parking_lot::RwLock;
use std::sync::Arc;

const HASH_MULTIPLIER: u64 = 0x9E3779B97F4A7C15;

fn hash_addr(addr: u64, bucket_count: usize) -> usize {
    let pfn = addr >> 12;
    ((pfn.wrapping_mul(HASH_MULTIPLIER)) % bucket_count as u64) as usize
}

pub struct PageStatsTable {
    buckets: RwLock<Vec<Vec<Arc<PageRecord>>>>,
    bucket_count: usize,
    tracked_pages: std::sync::atomic::AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StatsSummary {
    pub page_count: usize,
    pub hot_pages: usize,
    pub cold_pages: usize,
    pub mean_heat: f64,
}

impl PageStatsTable {
    pub fn new(bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            buckets: RwLock::new(vec![Vec::new(); bucket_count]),
            bucket_count,
            tracked_pages: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    fn bucket_index(&self, addr: u64) -> usize {
        hash_addr(addr, self.bucket_count)
    }

    /// Returns a clone of the shared record handle, if present. Cloning the
    /// `Arc` (rather than returning a borrow) lets the caller release the
    /// table lock immediately, which matters because callers then touch the
    /// record's atomics without needing the table lock held at all.
    pub fn lookup(&self, addr: u64) -> Option<Arc<PageRecord>> {
        let idx = self.bucket_index(addr);
        let buckets = self.buckets.read();
        buckets[idx].iter().find(|r| r.addr == addr).cloned()
    }

    /// Looks up `addr`, creating a fresh record on miss. Double-checks after
    /// acquiring the write lock so two racing faulters on the same address
    /// don't create two records.
    pub fn lookup_or_create(&self, addr: u64) -> Arc<PageRecord> {
        if let Some(rec) = self.lookup(addr) {
            return rec;
        }
        let idx = self.bucket_index(addr);
        let mut buckets = self.buckets.write();
        if let Some(rec) = buckets[idx].iter().find(|r| r.addr == addr) {
            return rec.clone();
        }
        let rec = Arc::new(PageRecord::new(addr));
        buckets[idx].push(rec.clone());
        self.tracked_pages
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        rec
    }

    /// Recomputes derived features for every tracked record. Holds the read
    /// lock across the whole sweep: this is safe because record-field
    /// updates made by the fault handler don't need the table lock at all,
    /// only chain insertion does.
    pub fn update_all_features(&self) {
        let now = now_ns();
        let buckets = self.buckets.read();
        for chain in buckets.iter() {
            for rec in chain {
                rec.compute_features(now);
            }
        }
    }

    /// Calls `f` for every tracked record under the read lock. Used by the
    /// policy loop to scan candidates; migrations themselves must not be
    /// executed while holding this lock (see `manager::Manager::run_policy_cycle`).
    pub fn for_each<F: FnMut(&Arc<PageRecord>)>(&self, mut f: F) {
        let buckets = self.buckets.read();
        for chain in buckets.iter() {
            for rec in chain {
                f(rec);
            }
        }
    }

    pub fn summary(&self) -> StatsSummary {
        let buckets = self.buckets.read();
        let mut summary = StatsSummary::default();
        let mut heat_sum = 0.0;
        for chain in buckets.iter() {
            for rec in chain {
                summary.page_count += 1;
                let heat = rec.features().heat_score;
                heat_sum += heat;
                if heat > 0.5 {
                    summary.hot_pages += 1;
                } else {
                    summary.cold_pages += 1;
                }
            }
        }
        summary.mean_heat = if summary.page_count > 0 {
            heat_sum / summary.page_count as f64
        } else {
            0.0
        };
        summary
    }

    pub fn len(&self) -> usize {
        self.tracked_pages.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cleanup(&self) {
        let mut buckets = self.buckets.write();
        for chain in buckets.iter_mut() {
            chain.clear();
        }
        self.tracked_pages
            .store(0, std::sync::atomic::Ordering::Relaxed);
    }
}
