//! Crate-wide error type.
//!
//! Hot-path code (the fault handler, the stats table) never turns one of
//! these into a panic; it logs and falls back per the taxonomy spelled out
//! alongside each variant. Administrative entry points (`register_region`,
//! `Manager::init`) propagate them synchronously to the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TierError>;

#[derive(Debug, Error, Clone)]
pub enum TierError {
    #[error("tier {tier} is at capacity ({used}/{capacity} bytes)")]
    TierFull {
        tier: &'static str,
        used: u64,
        capacity: u64,
    },

    #[error("region [{addr:#x}, {end:#x}) overlaps an existing region")]
    RegionOverlap { addr: u64, end: u64 },

    #[error("region registry is full ({capacity} slots)")]
    RegistryFull { capacity: usize },

    #[error("no active region contains address {addr:#x}")]
    RegionNotFound { addr: u64 },

    #[error("fault source error: {0}")]
    FaultSourceTransient(String),

    #[error("fault source failed fatally: {0}")]
    FaultSourceFatal(String),

    #[error("page statistics table allocation failed")]
    StatsAllocationFailed,

    #[error("policy decision rejected: {0}")]
    InvalidDecision(String),

    #[error("manager is already initialized")]
    AlreadyInitialized,

    #[error("manager is not initialized")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TierError {
    /// Transient fault-source errors are retried by the caller; fatal ones
    /// end the fault handler's loop. Everything else is not a fault-source
    /// error at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TierError::FaultSourceFatal(_))
    }
}
