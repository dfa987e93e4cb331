//! Top-level coordinator composing every subsystem. Grounded on the
//! `Arc`-wrapped subsystem composition used by resource coordinators
//! elsewhere in this codebase: one owned value threaded by `Arc` to every
//! background task, rather than a free-floating process-wide singleton.
//! Lifetime stays explicit so shutdown can statically guarantee no task
//! outlives the state.

use crate::clock::now_ns;
use crate::config::Config;
use crate::error::Result;
use crate::fault::{FaultHandler, FaultSource, ResolvedFault};
use crate::policy::{Decision, PolicyFn, PolicySlot};
use crate::region::{RegionRegistry, RegionSnapshot};
use crate::sampler::Sampler;
use crate::stats::record::PageStatsSnapshot;
use crate::stats::table::{PageStatsTable, StatsSummary};
use crate::tier::{TierKind, TierSet};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

pub struct Manager {
    config: Config,
    stats: Arc<PageStatsTable>,
    regions: Arc<RegionRegistry>,
    tiers: Arc<Mutex<TierSet>>,
    policy: Arc<PolicySlot>,
    fault_source: Arc<dyn FaultSource>,
    sampler: Option<Arc<Sampler>>,
    running: Arc<AtomicBool>,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
    total_faults: AtomicU64,
    total_migrations: AtomicU64,
    policy_cycles: AtomicU64,
    initialized: AtomicBool,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ManagerStatus {
    pub total_faults: u64,
    pub total_migrations: u64,
    pub policy_cycles: u64,
    pub active_regions: usize,
    pub tracked_pages: usize,
    pub fast_used: u64,
    pub fast_capacity: u64,
    pub slow_used: u64,
    pub slow_capacity: u64,
}

impl fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "faults={} migrations={} cycles={} regions={} pages={} fast={}/{} slow={}/{}",
            self.total_faults,
            self.total_migrations,
            self.policy_cycles,
            self.active_regions,
            self.tracked_pages,
            self.fast_used,
            self.fast_capacity,
            self.slow_used,
            self.slow_capacity
        )
    }
}

impl Manager {
    /// Builds an un-started manager. Call [`Manager::init`] to spawn its
    /// background tasks.
    pub fn new(config: Config, fault_source: Arc<dyn FaultSource>) -> Arc<Self> {
        let sampler = if config.sampler.enabled {
            Some(Arc::new(Sampler::new(
                config.page_stats_hash_size,
                config.sampler.ring_capacity,
                config.sampler.sample_period,
            )))
        } else {
            None
        };
        Arc::new(Self {
            stats: Arc::new(PageStatsTable::new(config.page_stats_hash_size)),
            regions: Arc::new(RegionRegistry::new(config.max_managed_regions)),
            tiers: Arc::new(Mutex::new(TierSet::new(config.fast_tier, config.slow_tier))),
            policy: Arc::new(PolicySlot::new(config.policy)),
            fault_source,
            sampler,
            running: Arc::new(AtomicBool::new(false)),
            tasks: AsyncMutex::new(Vec::new()),
            total_faults: AtomicU64::new(0),
            total_migrations: AtomicU64::new(0),
            policy_cycles: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            config,
        })
    }

    /// Idempotent: a second call while already initialized is a no-op that
    /// returns `Ok(())`.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.config.validate() {
            self.initialized.store(false, Ordering::Release);
            return Err(e);
        }
        self.running.store(true, Ordering::Release);

        if let Some(sampler) = &self.sampler {
            sampler.init();
            sampler.start();
        }

        // Pushed in shutdown-join order: policy loop, then fault handler,
        // then sampler, matching the documented shutdown sequence.
        let mut tasks = self.tasks.lock().await;
        tasks.push(self.clone().spawn_policy_loop());
        tasks.push(self.clone().spawn_fault_handler());
        if self.sampler.is_some() {
            tasks.push(self.clone().spawn_sampler_drain());
        }
        Ok(())
    }

    fn spawn_fault_handler(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let handler = FaultHandler::new(self.fault_source.clone(), std::time::Duration::from_millis(100));
            let page_size = self.config.page_size as u64;
            let stats = self.stats.clone();
            let tiers = self.tiers.clone();
            let regions = self.regions.clone();
            let manager = self.clone();

            let select_tiers = tiers.clone();
            let select_tier = move |page_addr: u64| -> TierKind {
                let (kind, had_room) = select_tiers.lock().decide_initial_placement(page_size);
                if !had_room {
                    tracing::error!(addr = page_addr, "both tiers exhausted, placing in fast tier anyway");
                }
                kind
            };

            let commit = move |page_addr: u64, kind: TierKind| -> ResolvedFault {
                tiers.lock().account_placement(kind, page_size);
                let rec = stats.lookup_or_create(page_addr);
                rec.set_current_tier(kind);
                rec.record_access(false);
                if let Some(slot) = regions.find_slot_containing(page_addr) {
                    regions.record_fault(slot, kind == TierKind::Fast);
                }
                ResolvedFault {
                    page_addr,
                    landed_in_fast: kind == TierKind::Fast,
                }
            };

            let on_resolved = move |_resolved: ResolvedFault| {
                manager.total_faults.fetch_add(1, Ordering::Relaxed);
            };

            handler
                .run(self.running.clone(), page_size, select_tier, commit, on_resolved)
                .await;
        })
    }

    fn spawn_policy_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.policy_interval);
            loop {
                interval.tick().await;
                if !self.running.load(Ordering::Acquire) {
                    break;
                }
                self.run_policy_cycle();
                let cycle = self.policy_cycles.fetch_add(1, Ordering::Relaxed) + 1;
                if cycle % 100 == 0 {
                    tracing::info!(status = %self.status(), "policy loop status");
                }
            }
        })
    }

    fn spawn_sampler_drain(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(sampler) = self.sampler.clone() else {
                return;
            };
            let mut interval = tokio::time::interval(self.config.sampler.drain_interval);
            loop {
                interval.tick().await;
                if !self.running.load(Ordering::Acquire) {
                    break;
                }
                sampler.drain_available();
            }
        })
    }

    /// One policy-loop sweep: merge samples, recompute features, scan for
    /// decisions, execute up to `max_migrations_per_cycle` migrations.
    fn run_policy_cycle(&self) {
        if let Some(sampler) = &self.sampler {
            sampler.merge_into_page_stats(&self.stats);
        }
        self.stats.update_all_features();

        let policy = self.policy.get();
        let mut candidates = Vec::new();
        self.stats.for_each(|rec| candidates.push(rec.snapshot()));

        let mut executed = 0usize;
        for snapshot in candidates {
            if executed >= self.config.policy.max_migrations_per_cycle {
                break;
            }
            let Some(decision) = policy.decide(&snapshot) else {
                continue;
            };
            if decision.confidence < self.config.policy.confidence_min {
                continue;
            }
            if !decision.is_valid_for(&snapshot) {
                continue;
            }
            if self.execute_migration(&decision) {
                executed += 1;
            }
        }
    }

    /// Moves a page's accounting between tiers. Does not move physical
    /// bytes: residency here is metadata only. A concrete deployment that
    /// backs each tier with a distinct mapping would extend this function
    /// to copy the page into the destination mapping and remap it before
    /// updating `current_tier`, and would need to specify how concurrent
    /// readers observe that transition atomically.
    fn execute_migration(&self, decision: &Decision) -> bool {
        let Some(rec) = self.stats.lookup(decision.page_addr) else {
            return false;
        };
        let page_size = self.config.page_size as u64;
        let moved = {
            let mut tiers = self.tiers.lock();
            tiers.account_migration(decision.from_tier, decision.to_tier, page_size)
        };
        if !moved {
            return false;
        }
        rec.set_current_tier(decision.to_tier);
        rec.record_migration(now_ns());
        self.total_migrations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            addr = decision.page_addr,
            reason = decision.reason,
            confidence = decision.confidence,
            "migrated page"
        );
        true
    }

    /// Joins every background task. Idempotent.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut tasks = self.tasks.lock().await;
        // Policy loop before fault handler before sampler, per the
        // ordering documented for shutdown.
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        if let Some(sampler) = &self.sampler {
            sampler.shutdown();
        }
        self.initialized.store(false, Ordering::Release);
    }

    pub fn status(&self) -> ManagerStatus {
        let tiers = self.tiers.lock();
        ManagerStatus {
            total_faults: self.total_faults.load(Ordering::Relaxed),
            total_migrations: self.total_migrations.load(Ordering::Relaxed),
            policy_cycles: self.policy_cycles.load(Ordering::Relaxed),
            active_regions: self.regions.active_count(),
            tracked_pages: self.stats.len(),
            fast_used: tiers.fast.used,
            fast_capacity: tiers.fast.capacity,
            slow_used: tiers.slow.used,
            slow_capacity: tiers.slow.capacity,
        }
    }

    pub async fn register_region(&self, addr: u64, length: u64) -> Result<()> {
        let page_addr = crate::clock::page_align(addr, self.config.page_size);
        self.regions.register(page_addr, length)?;
        if let Err(e) = self.fault_source.arm_region(page_addr, length).await {
            self.regions.unregister(page_addr);
            return Err(e);
        }
        Ok(())
    }

    pub async fn unregister_region(&self, addr: u64) -> Result<()> {
        let page_addr = crate::clock::page_align(addr, self.config.page_size);
        self.regions.unregister(page_addr);
        self.fault_source.disarm_region(page_addr).await
    }

    pub fn set_policy(&self, policy: Option<Arc<dyn PolicyFn>>) {
        self.policy.set(policy);
    }

    pub fn get_page_stats(&self, addr: u64) -> Option<PageStatsSnapshot> {
        let page_addr = crate::clock::page_align(addr, self.config.page_size);
        self.stats.lookup(page_addr).map(|r| r.snapshot())
    }

    /// Records an access outside the fault path, e.g. from an explicit
    /// access-tracking shim that doesn't go through page faults.
    pub fn record_access(&self, addr: u64, is_write: bool) {
        let page_addr = crate::clock::page_align(addr, self.config.page_size);
        let rec = self.stats.lookup_or_create(page_addr);
        rec.record_access(is_write);
    }

    pub fn stats_summary(&self) -> StatsSummary {
        self.stats.summary()
    }

    pub fn region_snapshots(&self) -> Vec<RegionSnapshot> {
        self.regions.snapshot_all()
    }

    pub fn sampler(&self) -> Option<&Arc<Sampler>> {
        self.sampler.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::SimulatedFaultSource;

    fn small_config() -> Config {
        Config::default()
            .with_page_size(4096)
            .with_max_managed_regions(4)
            .with_policy_interval(std::time::Duration::from_millis(5))
    }

    #[tokio::test]
    async fn init_rejects_non_power_of_two_page_size() {
        let source = SimulatedFaultSource::new();
        let manager = Manager::new(small_config().with_page_size(4097), source);
        let err = manager.init().await.unwrap_err();
        assert!(matches!(err, crate::error::TierError::Configuration(_)));
        // no tasks were spawned, so shutdown is a harmless no-op
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let source = SimulatedFaultSource::new();
        let manager = Manager::new(small_config(), source);
        manager.init().await.unwrap();
        manager.init().await.unwrap();
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn cold_fault_lands_in_fast_tier() {
        let source = SimulatedFaultSource::new();
        let manager = Manager::new(small_config(), source.clone());
        manager.register_region(0x20000, 16 * 4096).await.unwrap();
        manager.init().await.unwrap();

        source.inject_fault(0x20000);
        // give the fault handler a moment to observe and resolve it
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let status = manager.status();
        assert_eq!(status.total_faults, 1);
        let rec = manager.get_page_stats(0x20000).unwrap();
        assert_eq!(rec.current_tier, TierKind::Fast);
        assert_eq!(status.fast_used, 4096);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn unregister_stops_further_fault_counting_via_region() {
        let source = SimulatedFaultSource::new();
        let manager = Manager::new(small_config(), source.clone());
        manager.register_region(0x30000, 4096).await.unwrap();
        manager.init().await.unwrap();
        manager.unregister_region(0x30000).await.unwrap();

        assert_eq!(manager.region_snapshots().len(), 0);
        manager.shutdown().await;
    }
}
