//! Fault source abstraction and the fault handler task.
//!
//! `FaultSource` is the seam that lets the dataplane run against a real
//! facility (e.g. `userfaultfd` on Linux, not implemented here but named as
//! the production backend this trait exists for) or, in tests, against
//! [`SimulatedFaultSource`], a channel-backed stand-in. Keeping it as a
//! trait object rather than hard-wiring a syscall layer is what lets the
//! task loop below be exercised without a kernel fault handler at all.

use crate::error::{Result, TierError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

#[derive(Debug, Clone, Copy)]
pub struct FaultEvent {
    pub fault_addr: u64,
}

#[async_trait]
pub trait FaultSource: Send + Sync {
    /// Registers `[addr, addr+length)` to report missing pages.
    async fn arm_region(&self, addr: u64, length: u64) -> Result<()>;

    /// Unregisters a previously armed range.
    async fn disarm_region(&self, addr: u64) -> Result<()>;

    /// Waits up to `timeout` for the next fault. `Ok(None)` on timeout with
    /// nothing pending; errors distinguish transient from fatal via
    /// [`TierError::is_fatal`].
    async fn poll_fault(&self, timeout: Duration) -> Result<Option<FaultEvent>>;

    /// Installs a zero-filled page at `page_addr`, satisfying the fault.
    /// An "already mapped" condition is treated as success by the caller,
    /// not by this trait.
    async fn satisfy(&self, page_addr: u64) -> Result<()>;
}

/// Channel-backed fault source for tests and demos: `inject_fault` stands
/// in for a kernel delivering a missing-page notification.
pub struct SimulatedFaultSource {
    armed: AsyncMutex<HashSet<u64>>,
    sender: mpsc::UnboundedSender<FaultEvent>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<FaultEvent>>,
    already_mapped: AsyncMutex<HashSet<u64>>,
}

impl SimulatedFaultSource {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            armed: AsyncMutex::new(HashSet::new()),
            sender,
            receiver: AsyncMutex::new(receiver),
            already_mapped: AsyncMutex::new(HashSet::new()),
        })
    }

    /// Test/demo helper: deliver a fault for `addr` as if the kernel had.
    pub fn inject_fault(&self, addr: u64) {
        let _ = self.sender.send(FaultEvent { fault_addr: addr });
    }

    /// Test helper: make the next `satisfy` for `page_addr` look like a
    /// benign already-mapped race instead of installing a fresh page.
    pub async fn mark_already_mapped(&self, page_addr: u64) {
        self.already_mapped.lock().await.insert(page_addr);
    }
}

#[async_trait]
impl FaultSource for SimulatedFaultSource {
    async fn arm_region(&self, addr: u64, _length: u64) -> Result<()> {
        self.armed.lock().await.insert(addr);
        Ok(())
    }

    async fn disarm_region(&self, addr: u64) -> Result<()> {
        self.armed.lock().await.remove(&addr);
        Ok(())
    }

    async fn poll_fault(&self, timeout: Duration) -> Result<Option<FaultEvent>> {
        let mut rx = self.receiver.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(TierError::FaultSourceFatal(
                "fault channel closed".to_string(),
            )),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn satisfy(&self, page_addr: u64) -> Result<()> {
        let mut already_mapped = self.already_mapped.lock().await;
        if already_mapped.remove(&page_addr) {
            return Ok(());
        }
        Ok(())
    }
}

/// Outcome of resolving a single fault, reported up to the manager so it
/// can update region/tier/global counters without `FaultHandler` needing a
/// back-reference to the whole manager.
pub struct ResolvedFault {
    pub page_addr: u64,
    pub landed_in_fast: bool,
}

/// Runs the fault-intercepted demand-paging loop described in the
/// component design: poll with a bounded timeout so the shutdown flag is
/// observed promptly, on each event decide placement, satisfy it, and hand
/// the outcome back to the caller via `on_resolved`.
pub struct FaultHandler {
    source: Arc<dyn FaultSource>,
    poll_timeout: Duration,
}

impl FaultHandler {
    pub fn new(source: Arc<dyn FaultSource>, poll_timeout: Duration) -> Self {
        Self {
            source,
            poll_timeout,
        }
    }

    /// Drives the loop until `running` is cleared. `select_tier` is a pure
    /// decision (no accounting mutation) run before the fault is satisfied;
    /// `commit` performs the accounting mutation and is only called once
    /// the fault source confirms the page is actually installed, matching
    /// the component design's ordering: satisfy first, reflect it in the
    /// stats/region/tier accounting only on success.
    pub async fn run(
        &self,
        running: Arc<std::sync::atomic::AtomicBool>,
        page_size: u64,
        mut select_tier: impl FnMut(u64) -> crate::tier::TierKind + Send,
        mut commit: impl FnMut(u64, crate::tier::TierKind) -> ResolvedFault + Send,
        mut on_resolved: impl FnMut(ResolvedFault) + Send,
    ) {
        while running.load(std::sync::atomic::Ordering::Acquire) {
            match self.source.poll_fault(self.poll_timeout).await {
                Ok(Some(event)) => {
                    let page_addr = crate::clock::page_align(event.fault_addr, page_size as usize);
                    let kind = select_tier(page_addr);
                    match self.source.satisfy(page_addr).await {
                        Ok(()) => on_resolved(commit(page_addr, kind)),
                        Err(e) if !e.is_fatal() => {
                            tracing::warn!(error = %e, addr = page_addr, "fault satisfy failed, will re-fault");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "fault source failed fatally, stopping fault handler");
                            break;
                        }
                    }
                }
                Ok(None) => continue,
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(error = %e, "transient fault source error, retrying");
                }
                Err(e) => {
                    tracing::error!(error = %e, "fault source failed fatally, stopping fault handler");
                    break;
                }
            }
        }
    }
}
