//! Tier identity and capacity/usage accounting.
//!
//! `used` is a plain `u64`, not atomic: both writers that touch it (the
//! fault handler on initial placement, the policy loop on migration) take
//! the shared migration mutex around their read-modify-write, so the pair
//! of updates a migration performs (decrement source, increment
//! destination) stays atomic together. An atomic counter cannot give that
//! without its own lock anyway, so the mutex-guarded plain field is
//! simpler and just as correct. Modeled on the pressure/usage accounting in
//! resource-pool managers that track pooled capacity under one lock rather
//! than per-field atomics.

use crate::config::TierConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TierKind {
    Unknown,
    Fast,
    Slow,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Unknown => "unknown",
            TierKind::Fast => "fast",
            TierKind::Slow => "slow",
        }
    }
}

#[derive(Debug)]
pub struct Tier {
    pub kind: TierKind,
    pub capacity: u64,
    pub used: u64,
    pub read_latency: Duration,
    pub write_latency: Duration,
}

impl Tier {
    fn new(kind: TierKind, cfg: TierConfig) -> Self {
        Self {
            kind,
            capacity: cfg.capacity_bytes,
            used: 0,
            read_latency: cfg.read_latency,
            write_latency: cfg.write_latency,
        }
    }

    pub fn has_room_for(&self, bytes: u64) -> bool {
        self.used + bytes <= self.capacity
    }
}

/// The two managed tiers plus the accounting that spans both. All mutation
/// goes through `TierSet` methods so the migration-mutex discipline lives
/// in one place.
#[derive(Debug)]
pub struct TierSet {
    pub fast: Tier,
    pub slow: Tier,
}

impl TierSet {
    pub fn new(fast_cfg: TierConfig, slow_cfg: TierConfig) -> Self {
        Self {
            fast: Tier::new(TierKind::Fast, fast_cfg),
            slow: Tier::new(TierKind::Slow, slow_cfg),
        }
    }

    pub fn tier(&self, kind: TierKind) -> &Tier {
        match kind {
            TierKind::Fast => &self.fast,
            TierKind::Slow => &self.slow,
            TierKind::Unknown => panic!("no accounting tier for TierKind::Unknown"),
        }
    }

    fn tier_mut(&mut self, kind: TierKind) -> &mut Tier {
        match kind {
            TierKind::Fast => &mut self.fast,
            TierKind::Slow => &mut self.slow,
            TierKind::Unknown => panic!("no accounting tier for TierKind::Unknown"),
        }
    }

    /// Decides where a freshly faulted page should land: prefer Fast if it
    /// has room, else Slow if it has room, else fall back to Fast and let
    /// the caller log the capacity exhaustion. There is no eviction path in
    /// this core (see the Design Notes' open question on this), so the
    /// fallback is the only option.
    pub fn decide_initial_placement(&self, page_size: u64) -> (TierKind, bool) {
        if self.fast.has_room_for(page_size) {
            (TierKind::Fast, true)
        } else if self.slow.has_room_for(page_size) {
            (TierKind::Slow, true)
        } else {
            (TierKind::Fast, false)
        }
    }

    pub fn account_placement(&mut self, kind: TierKind, page_size: u64) {
        self.tier_mut(kind).used += page_size;
    }

    /// Moves `page_size` bytes of accounting from `from` to `to`. Returns
    /// `false` without mutating anything if `to` lacks room.
    pub fn account_migration(&mut self, from: TierKind, to: TierKind, page_size: u64) -> bool {
        if !self.tier(to).has_room_for(page_size) {
            return false;
        }
        self.tier_mut(from).used = self.tier(from).used.saturating_sub(page_size);
        self.tier_mut(to).used += page_size;
        true
    }
}
