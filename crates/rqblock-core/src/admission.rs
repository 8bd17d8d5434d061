//! Resource admission for block operations.
//!
//! Two cooperative gates guard every block operation:
//! - [`BlockAdmission`] bounds how many block operations are in flight
//! - [`MemoryBudget`] bounds the estimated memory those operations hold
//!
//! Both hand out RAII guards that release on drop. Neither blocks: when a
//! gate is full the caller gets a retriable error instead of being queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{EngineError, Result};

/// Concurrency gate for block operations
#[derive(Debug, Clone)]
pub struct BlockAdmission {
    /// Maximum simultaneous block operations
    limit: usize,
    /// Operations currently holding a permit
    active: Arc<AtomicUsize>,
    /// Highest `active` value observed
    peak: Arc<AtomicUsize>,
}

impl BlockAdmission {
    /// Create a gate admitting at most `limit` operations
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Try to acquire a slot
    ///
    /// Returns `None` if `limit` operations are already in flight.
    #[must_use]
    pub fn try_acquire(&self) -> Option<BlockPermit> {
        let mut current = self.active.load(Ordering::SeqCst);
        loop {
            if current >= self.limit {
                return None;
            }
            match self.active.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.peak.fetch_max(current + 1, Ordering::SeqCst);

        Some(BlockPermit {
            active: Arc::clone(&self.active),
        })
    }

    /// Acquire a slot, returning an error if none is free
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConcurrencyLimitExceeded`] if the gate is full.
    pub fn acquire(&self) -> Result<BlockPermit> {
        self.try_acquire()
            .ok_or(EngineError::ConcurrencyLimitExceeded { limit: self.limit })
    }

    /// Number of operations currently in flight
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous operations ever admitted
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// RAII slot in a [`BlockAdmission`]
///
/// Releases the slot when dropped.
#[derive(Debug)]
pub struct BlockPermit {
    active: Arc<AtomicUsize>,
}

impl Drop for BlockPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Memory gate for block operations
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    budget: u64,
    reserved: Arc<AtomicU64>,
}

impl MemoryBudget {
    /// Create a gate allowing `budget` bytes of reservations
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            reserved: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Reserve `bytes` against the budget
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MemoryBudgetExceeded`] if the reservation would
    /// push the total above the budget.
    pub fn try_reserve(&self, bytes: u64) -> Result<MemoryReservation> {
        let mut current = self.reserved.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.budget {
                return Err(EngineError::MemoryBudgetExceeded {
                    requested: bytes,
                    in_use: current,
                    budget: self.budget,
                });
            }
            match self.reserved.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        Ok(MemoryReservation {
            reserved: Arc::clone(&self.reserved),
            bytes,
        })
    }

    /// Bytes currently reserved
    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.reserved.load(Ordering::SeqCst)
    }
}

/// RAII reservation in a [`MemoryBudget`]
#[derive(Debug)]
pub struct MemoryReservation {
    reserved: Arc<AtomicU64>,
    bytes: u64,
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.reserved.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}
