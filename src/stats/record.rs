//! Per-page access record and its derived heat-score features.

use crate::clock::now_ns;
use crate::tier::TierKind;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A single page's access history and placement. Counters and timestamps
/// are independent atomics rather than fields behind one lock: the table's
/// `RwLock` only guards bucket-chain structure (see `stats::table`), so a
/// reader walking a chain under a read lock must be able to observe a
/// record's fields without taking any further lock.
#[derive(Debug)]
pub struct PageRecord {
    pub addr: u64,
    pub access_count: AtomicU64,
    pub read_count: AtomicU64,
    pub write_count: AtomicU64,
    pub first_access_ns: u64,
    pub allocation_ns: u64,
    pub last_access_ns: AtomicU64,
    pub last_migration_ns: AtomicU64,
    pub migration_count: AtomicU64,
    current_tier: AtomicUsize,
    /// `heat_score` and `access_rate` are written exclusively by the policy
    /// loop's `update_all_features` sweep (single-writer), so a plain lock
    /// without contention concerns is simpler than trying to pack two f64s
    /// into an atomic.
    features: RwLock<Features>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub access_rate: f64,
    pub heat_score: f64,
}

fn tier_to_tag(kind: TierKind) -> usize {
    match kind {
        TierKind::Unknown => 0,
        TierKind::Fast => 1,
        TierKind::Slow => 2,
    }
}

fn tag_to_tier(tag: usize) -> TierKind {
    match tag {
        1 => TierKind::Fast,
        2 => TierKind::Slow,
        _ => TierKind::Unknown,
    }
}

impl PageRecord {
    pub fn new(addr: u64) -> Self {
        let now = now_ns();
        Self {
            addr,
            access_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            first_access_ns: now,
            allocation_ns: now,
            last_access_ns: AtomicU64::new(now),
            last_migration_ns: AtomicU64::new(0),
            migration_count: AtomicU64::new(0),
            current_tier: AtomicUsize::new(tier_to_tag(TierKind::Unknown)),
            features: RwLock::new(Features::default()),
        }
    }

    pub fn current_tier(&self) -> TierKind {
        tag_to_tier(self.current_tier.load(Ordering::Acquire))
    }

    pub fn set_current_tier(&self, kind: TierKind) {
        self.current_tier.store(tier_to_tag(kind), Ordering::Release);
    }

    pub fn features(&self) -> Features {
        *self.features.read()
    }

    /// Records one access. Ordering between the three atomics is relaxed;
    /// a concurrent reader may observe them out of sync by the width of one
    /// in-flight call, which is the eventual-consistency tradeoff the
    /// record format accepts in exchange for a lock-free hot path.
    pub fn record_access(&self, is_write: bool) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        if is_write {
            self.write_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.read_count.fetch_add(1, Ordering::Relaxed);
        }
        self.last_access_ns.store(now_ns(), Ordering::Relaxed);
    }

    pub fn record_migration(&self, now: u64) {
        self.last_migration_ns.store(now, Ordering::Relaxed);
        self.migration_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Recomputes `access_rate` and `heat_score` against the current clock.
    /// Formula fixed by the heat-score definition: recency decays with a
    /// half-life of about 10 seconds, frequency saturates at 1000
    /// accesses/sec, and the two blend 60/40.
    pub fn compute_features(&self, now: u64) {
        let lifetime_ns = now.saturating_sub(self.allocation_ns);
        let access_count = self.access_count.load(Ordering::Relaxed) as f64;
        let mut access_rate = self.features().access_rate;
        if lifetime_ns > 0 {
            access_rate = access_count * 1e9 / lifetime_ns as f64;
        }

        let last_access = self.last_access_ns.load(Ordering::Relaxed);
        let age_s = now.saturating_sub(last_access) as f64 / 1e9;
        let recency = (-0.07 * age_s).exp();
        let frequency = (access_rate / 1000.0).min(1.0);
        let heat_score = (0.6 * recency + 0.4 * frequency).clamp(0.0, 1.0);

        *self.features.write() = Features {
            access_rate,
            heat_score,
        };
    }

    /// A stable, owned copy of this record's state, safe to return outside
    /// any lock that guards the table's chain structure.
    pub fn snapshot(&self) -> PageStatsSnapshot {
        let features = self.features();
        PageStatsSnapshot {
            addr: self.addr,
            access_count: self.access_count.load(Ordering::Relaxed),
            read_count: self.read_count.load(Ordering::Relaxed),
            write_count: self.write_count.load(Ordering::Relaxed),
            first_access_ns: self.first_access_ns,
            allocation_ns: self.allocation_ns,
            last_access_ns: self.last_access_ns.load(Ordering::Relaxed),
            last_migration_ns: self.last_migration_ns.load(Ordering::Relaxed),
            migration_count: self.migration_count.load(Ordering::Relaxed),
            current_tier: self.current_tier(),
            access_rate: features.access_rate,
            heat_score: features.heat_score,
        }
    }
}

/// Immutable snapshot of a [`PageRecord`] returned from outside the table's
/// lock, e.g. by `Manager::get_page_stats`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PageStatsSnapshot {
    pub addr: u64,
    pub access_count: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub first_access_ns: u64,
    pub allocation_ns: u64,
    pub last_access_ns: u64,
    pub last_migration_ns: u64,
    pub migration_count: u64,
    pub current_tier: TierKind,
    pub access_rate: f64,
    pub heat_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_access_updates_counts_and_invariant_holds() {
        let rec = PageRecord::new(0x1000);
        rec.record_access(false);
        rec.record_access(true);
        rec.record_access(false);
        assert_eq!(rec.access_count.load(Ordering::Relaxed), 3);
        assert_eq!(
            rec.access_count.load(Ordering::Relaxed),
            rec.read_count.load(Ordering::Relaxed) + rec.write_count.load(Ordering::Relaxed)
        );
    }

    #[test]
    fn heat_score_stays_in_unit_range() {
        let rec = PageRecord::new(0x2000);
        rec.record_access(false);
        rec.compute_features(now_ns() + 1_000_000);
        let f = rec.features();
        assert!(f.heat_score >= 0.0 && f.heat_score <= 1.0);
    }

    #[test]
    fn hot_recent_high_rate_page_is_hot() {
        let rec = PageRecord::new(0);
        for _ in 0..2000 {
            rec.record_access(false);
        }
        // lifetime ~0, but force a tiny lifetime via explicit `now` 1ms later
        let now = rec.allocation_ns + 1_000_000;
        rec.compute_features(now);
        let f = rec.features();
        assert!(f.access_rate >= 1000.0);
        assert!(f.heat_score >= 0.6);
    }

    #[test]
    fn tier_round_trips() {
        let rec = PageRecord::new(0);
        assert_eq!(rec.current_tier(), TierKind::Unknown);
        rec.set_current_tier(TierKind::Fast);
        assert_eq!(rec.current_tier(), TierKind::Fast);
    }
}
