//! Pluggable migration policy and the periodic policy loop.
//!
//! `PolicyFn` is a trait object rather than a bare function pointer so a
//! research policy can carry its own state (e.g. loaded model weights)
//! across calls, the same trait-object seam used for pluggable detectors
//! elsewhere in this codebase. Swapping the active policy is a publish of
//! a fresh `Arc` under a lock; readers clone the `Arc` once per cycle
//! rather than holding the lock across the whole sweep.

use crate::config::PolicyThresholds;
use crate::stats::record::PageStatsSnapshot;
use crate::tier::TierKind;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Decision {
    pub page_addr: u64,
    pub from_tier: TierKind,
    pub to_tier: TierKind,
    pub confidence: f64,
    pub reason: &'static str,
}

impl Decision {
    /// A decision is usable only if it targets the tier the record is
    /// actually in, proposes moving to a real, distinct tier, and reports a
    /// confidence in range; anything else is treated as no decision per the
    /// error taxonomy. Rejecting `to_tier == Unknown` here (rather than
    /// inside `TierSet::account_migration`) keeps a malformed decision from
    /// a custom policy from ever reaching the tier accessors, which panic on
    /// `TierKind::Unknown`.
    pub fn is_valid_for(&self, record: &PageStatsSnapshot) -> bool {
        self.from_tier == record.current_tier
            && self.to_tier != TierKind::Unknown
            && self.to_tier != self.from_tier
            && (0.0..=1.0).contains(&self.confidence)
    }
}

pub trait PolicyFn: Send + Sync {
    fn decide(&self, record: &PageStatsSnapshot) -> Option<Decision>;
}

/// The default heuristic: promote hot pages out of Slow, demote cold pages
/// out of Fast, reject anything that migrated too recently.
pub struct DefaultHeuristic {
    thresholds: PolicyThresholds,
}

impl DefaultHeuristic {
    pub fn new(thresholds: PolicyThresholds) -> Self {
        Self { thresholds }
    }
}

impl PolicyFn for DefaultHeuristic {
    fn decide(&self, record: &PageStatsSnapshot) -> Option<Decision> {
        let now = crate::clock::now_ns();
        let since_migration = now.saturating_sub(record.last_migration_ns);
        if record.last_migration_ns != 0
            && since_migration < self.thresholds.min_residence.as_nanos() as u64
        {
            return None;
        }

        match record.current_tier {
            TierKind::Slow if record.heat_score > self.thresholds.hot_threshold => Some(Decision {
                page_addr: record.addr,
                from_tier: TierKind::Slow,
                to_tier: TierKind::Fast,
                confidence: record.heat_score,
                reason: "hot promotion",
            }),
            TierKind::Fast if record.heat_score < self.thresholds.cold_threshold => Some(Decision {
                page_addr: record.addr,
                from_tier: TierKind::Fast,
                to_tier: TierKind::Slow,
                confidence: 1.0 - record.heat_score,
                reason: "cold demotion",
            }),
            _ => None,
        }
    }
}

/// Never proposes a migration. Useful as a baseline in tests and when
/// contrasting a research policy against "do nothing".
pub struct NoopPolicy;

impl PolicyFn for NoopPolicy {
    fn decide(&self, _record: &PageStatsSnapshot) -> Option<Decision> {
        None
    }
}

/// Proposes a migration for a random subset of candidate pages, ignoring
/// heat entirely. Useful for stress-testing rate limiting and anti-thrashing
/// independent of the default heuristic's thresholds.
pub struct RandomPolicy {
    probability: f64,
}

impl RandomPolicy {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

impl PolicyFn for RandomPolicy {
    fn decide(&self, record: &PageStatsSnapshot) -> Option<Decision> {
        if record.current_tier == TierKind::Unknown {
            return None;
        }
        if rand::random::<f64>() > self.probability {
            return None;
        }
        let to_tier = match record.current_tier {
            TierKind::Fast => TierKind::Slow,
            _ => TierKind::Fast,
        };
        Some(Decision {
            page_addr: record.addr,
            from_tier: record.current_tier,
            to_tier,
            confidence: 1.0,
            reason: "random policy",
        })
    }
}

/// Holder for the active policy, swappable at runtime. Matches the
/// publish/acquire discipline spec'd for the policy seam: `set` installs a
/// fresh `Arc`, `get` clones the current one.
pub struct PolicySlot {
    current: RwLock<Arc<dyn PolicyFn>>,
    default_thresholds: PolicyThresholds,
}

impl PolicySlot {
    pub fn new(thresholds: PolicyThresholds) -> Self {
        Self {
            current: RwLock::new(Arc::new(DefaultHeuristic::new(thresholds))),
            default_thresholds: thresholds,
        }
    }

    pub fn get(&self) -> Arc<dyn PolicyFn> {
        self.current.read().clone()
    }

    /// Installs `policy`, or resets to the default heuristic when `None`.
    pub fn set(&self, policy: Option<Arc<dyn PolicyFn>>) {
        let next: Arc<dyn PolicyFn> = match policy {
            Some(p) => p,
            None => Arc::new(DefaultHeuristic::new(self.default_thresholds)),
        };
        *self.current.write() = next;
    }
}
