//! Optional hardware sample ingestor: drains a ring of sampled
//! `(addr, is_write, latency_weight)` records and merges them into the
//! page statistics table. Modeled as metadata only, like the rest of this
//! crate. No real performance-counter backend is wired up; `crossbeam`'s
//! bounded channel stands in for the ring buffer a concrete backend would
//! expose.

use crate::clock::now_ns;
use crate::stats::table::PageStatsTable;
use crossbeam::channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct HwSample {
    pub addr: u64,
    pub is_write: bool,
    pub latency_weight: u64,
}

#[derive(Debug)]
pub struct HwSampleRecord {
    pub addr: u64,
    pub read_samples: AtomicU64,
    pub write_samples: AtomicU64,
    pub latency_sum: AtomicU64,
    pub last_sample_ns: AtomicU64,
}

impl HwSampleRecord {
    fn new(addr: u64) -> Self {
        Self {
            addr,
            read_samples: AtomicU64::new(0),
            write_samples: AtomicU64::new(0),
            latency_sum: AtomicU64::new(0),
            last_sample_ns: AtomicU64::new(0),
        }
    }
}

/// Side table keyed the same way as `PageStatsTable`, but separate: sample
/// counts accrue independently of fault-path counts until a merge pass
/// reconciles them.
pub struct SamplerTable {
    buckets: RwLock<Vec<Vec<Arc<HwSampleRecord>>>>,
    bucket_count: usize,
}

impl SamplerTable {
    pub fn new(bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            buckets: RwLock::new(vec![Vec::new(); bucket_count]),
            bucket_count,
        }
    }

    fn index(&self, addr: u64) -> usize {
        let pfn = addr >> 12;
        ((pfn.wrapping_mul(0x9E3779B97F4A7C15)) % self.bucket_count as u64) as usize
    }

    fn lookup_or_create(&self, addr: u64) -> Arc<HwSampleRecord> {
        let idx = self.index(addr);
        {
            let buckets = self.buckets.read();
            if let Some(rec) = buckets[idx].iter().find(|r| r.addr == addr) {
                return rec.clone();
            }
        }
        let mut buckets = self.buckets.write();
        if let Some(rec) = buckets[idx].iter().find(|r| r.addr == addr) {
            return rec.clone();
        }
        let rec = Arc::new(HwSampleRecord::new(addr));
        buckets[idx].push(rec.clone());
        rec
    }

    fn for_each<F: FnMut(&Arc<HwSampleRecord>)>(&self, mut f: F) {
        let buckets = self.buckets.read();
        for chain in buckets.iter() {
            for rec in chain {
                f(rec);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Shutdown,
}

/// Drives the sample drain loop and owns the merge step. `sample_period`
/// is the assumed ratio of real accesses per observed sample.
pub struct Sampler {
    table: SamplerTable,
    state: RwLock<SamplerState>,
    sender: Sender<HwSample>,
    receiver: RwLock<Option<Receiver<HwSample>>>,
    sample_period: u64,
    pub total_samples: AtomicU64,
    pub throttle_events: AtomicU64,
}

impl Sampler {
    pub fn new(bucket_count: usize, ring_capacity: usize, sample_period: u64) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(ring_capacity);
        Self {
            table: SamplerTable::new(bucket_count),
            state: RwLock::new(SamplerState::Uninitialized),
            sender,
            receiver: RwLock::new(Some(receiver)),
            sample_period,
            total_samples: AtomicU64::new(0),
            throttle_events: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SamplerState {
        *self.state.read()
    }

    /// Idempotent: repeated calls while already initialized are a no-op.
    pub fn init(&self) {
        let mut state = self.state.write();
        if *state == SamplerState::Uninitialized {
            *state = SamplerState::Initialized;
        }
    }

    /// Idempotent: repeated calls while already running are a no-op.
    pub fn start(&self) {
        let mut state = self.state.write();
        if *state == SamplerState::Initialized || *state == SamplerState::Stopped {
            *state = SamplerState::Running;
        }
    }

    pub fn stop(&self) {
        let mut state = self.state.write();
        if *state == SamplerState::Running {
            *state = SamplerState::Stopped;
        }
    }

    pub fn shutdown(&self) {
        *self.state.write() = SamplerState::Shutdown;
        *self.receiver.write() = None;
    }

    /// Test/demo helper: emit a sample as if the hardware facility had.
    /// Returns an error (counted by the caller as a throttle event) if the
    /// ring is full, matching the non-fatal drop-on-overrun semantics a
    /// real ring buffer would have.
    pub fn emit_sample(&self, sample: HwSample) -> std::result::Result<(), HwSample> {
        match self.sender.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(s)) => {
                self.throttle_events.fetch_add(1, Ordering::Relaxed);
                Err(s)
            }
            Err(TrySendError::Disconnected(s)) => Err(s),
        }
    }

    /// Drains everything currently queued into the sampler's own table.
    /// Called from the drain loop on a short cadence; never blocks.
    pub fn drain_available(&self) {
        let receiver = self.receiver.read();
        let Some(rx) = receiver.as_ref() else {
            return;
        };
        while let Ok(sample) = rx.try_recv() {
            let rec = self.table.lookup_or_create(sample.addr);
            if sample.is_write {
                rec.write_samples.fetch_add(1, Ordering::Relaxed);
            } else {
                rec.read_samples.fetch_add(1, Ordering::Relaxed);
            }
            rec.latency_sum
                .fetch_add(sample.latency_weight, Ordering::Relaxed);
            rec.last_sample_ns.store(now_ns(), Ordering::Relaxed);
            self.total_samples.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reconciles sampled estimates into the page statistics table.
    /// Estimates only overwrite fault-path counts when they're larger,
    /// since sampling dominates once it has accrued enough data but
    /// shouldn't erase real observations it hasn't caught up to yet.
    pub fn merge_into_page_stats(&self, stats: &PageStatsTable) {
        self.table.for_each(|sample_rec| {
            let page = stats.lookup_or_create(sample_rec.addr);
            let read_samples = sample_rec.read_samples.load(Ordering::Relaxed);
            let write_samples = sample_rec.write_samples.load(Ordering::Relaxed);
            let estimated_reads = read_samples.saturating_mul(self.sample_period);
            let estimated_writes = write_samples.saturating_mul(self.sample_period);

            if estimated_reads > page.read_count.load(Ordering::Relaxed) {
                page.read_count.store(estimated_reads, Ordering::Relaxed);
            }
            if estimated_writes > page.write_count.load(Ordering::Relaxed) {
                page.write_count.store(estimated_writes, Ordering::Relaxed);
            }
            page.access_count.store(
                page.read_count.load(Ordering::Relaxed) + page.write_count.load(Ordering::Relaxed),
                Ordering::Relaxed,
            );

            let sample_ts = sample_rec.last_sample_ns.load(Ordering::Relaxed);
            if sample_ts > page.last_access_ns.load(Ordering::Relaxed) {
                page.last_access_ns.store(sample_ts, Ordering::Relaxed);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions_are_idempotent() {
        let sampler = Sampler::new(16, 8, 100);
        assert_eq!(sampler.state(), SamplerState::Uninitialized);
        sampler.init();
        sampler.init();
        assert_eq!(sampler.state(), SamplerState::Initialized);
        sampler.start();
        sampler.start();
        assert_eq!(sampler.state(), SamplerState::Running);
        sampler.stop();
        assert_eq!(sampler.state(), SamplerState::Stopped);
        sampler.shutdown();
        assert_eq!(sampler.state(), SamplerState::Shutdown);
    }

    #[test]
    fn drain_and_merge_scales_counts_by_sample_period() {
        let sampler = Sampler::new(16, 64, 100_000);
        for _ in 0..10 {
            sampler
                .emit_sample(HwSample {
                    addr: 0x5000,
                    is_write: false,
                    latency_weight: 1,
                })
                .unwrap();
        }
        sampler.drain_available();

        let stats = PageStatsTable::new(16);
        sampler.merge_into_page_stats(&stats);

        let rec = stats.lookup(0x5000).unwrap();
        assert!(rec.read_count.load(Ordering::Relaxed) >= 1_000_000);
    }

    #[test]
    fn full_ring_counts_a_throttle_event() {
        let sampler = Sampler::new(16, 1, 1);
        sampler
            .emit_sample(HwSample {
                addr: 1,
                is_write: false,
                latency_weight: 0,
            })
            .unwrap();
        let result = sampler.emit_sample(HwSample {
            addr: 2,
            is_write: false,
            latency_weight: 0,
        });
        assert!(result.is_err());
        assert_eq!(sampler.throttle_events.load(Ordering::Relaxed), 1);
    }
}
