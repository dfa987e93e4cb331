//! Fixed-slot region registry: which virtual ranges are under management.

use crate::error::{Result, TierError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct Region {
    pub base_addr: u64,
    pub length: u64,
    pub active: bool,
    pub total_faults: AtomicU64,
    pub pages_in_fast: AtomicU64,
    pub pages_in_slow: AtomicU64,
}

impl Region {
    fn new(base_addr: u64, length: u64) -> Self {
        Self {
            base_addr,
            length,
            active: true,
            total_faults: AtomicU64::new(0),
            pages_in_fast: AtomicU64::new(0),
            pages_in_slow: AtomicU64::new(0),
        }
    }

    fn contains(&self, addr: u64) -> bool {
        self.active && addr >= self.base_addr && addr < self.base_addr + self.length
    }

    fn overlaps(&self, base_addr: u64, length: u64) -> bool {
        self.active && base_addr < self.base_addr + self.length && self.base_addr < base_addr + length
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RegionSnapshot {
    pub slot: usize,
    pub base_addr: u64,
    pub length: u64,
    pub total_faults: u64,
    pub pages_in_fast: u64,
    pub pages_in_slow: u64,
}

/// Fixed-capacity array of region slots, matching the bounded-registration
/// idiom used for consumer-group/pool tables elsewhere in this codebase:
/// a `Vec<Option<T>>` of fixed length, with inactive slots reused by
/// `register_region` rather than the array growing unbounded.
pub struct RegionRegistry {
    slots: Mutex<Vec<Option<Region>>>,
    capacity: usize,
}

impl RegionRegistry {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Mutex::new(slots),
            capacity,
        }
    }

    pub fn register(&self, base_addr: u64, length: u64) -> Result<usize> {
        let mut slots = self.slots.lock();
        for slot in slots.iter().flatten() {
            if slot.overlaps(base_addr, length) {
                return Err(TierError::RegionOverlap {
                    addr: base_addr,
                    end: base_addr + length,
                });
            }
        }
        let idx = slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(TierError::RegistryFull {
                capacity: self.capacity,
            })?;
        slots[idx] = Some(Region::new(base_addr, length));
        Ok(idx)
    }

    /// Silently no-ops if no active region has this base address, per spec.
    pub fn unregister(&self, base_addr: u64) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if let Some(region) = slot {
                if region.active && region.base_addr == base_addr {
                    *slot = None;
                    return;
                }
            }
        }
    }

    pub fn find_slot_containing(&self, page_addr: u64) -> Option<usize> {
        let slots = self.slots.lock();
        slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|r| r.contains(page_addr)))
    }

    pub fn record_fault(&self, slot: usize, landed_in_fast: bool) {
        let slots = self.slots.lock();
        if let Some(Some(region)) = slots.get(slot) {
            region.total_faults.fetch_add(1, Ordering::Relaxed);
            if landed_in_fast {
                region.pages_in_fast.fetch_add(1, Ordering::Relaxed);
            } else {
                region.pages_in_slow.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn snapshot_all(&self) -> Vec<RegionSnapshot> {
        let slots = self.slots.lock();
        slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref().map(|r| RegionSnapshot {
                    slot: idx,
                    base_addr: r.base_addr,
                    length: r.length,
                    total_faults: r.total_faults.load(Ordering::Relaxed),
                    pages_in_fast: r.pages_in_fast.load(Ordering::Relaxed),
                    pages_in_slow: r.pages_in_slow.load(Ordering::Relaxed),
                })
            })
            .collect()
    }
}
