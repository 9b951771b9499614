//! Reader leases that keep generations on disk.
//!
//! Cursors hold a [`GenerationLease`] for the generation they read. Pruning
//! skips every generation with a live lease, so a reader that resolved a
//! generation keeps seeing all of its records however many syncs commit in
//! the meantime.

use super::traits::Generation;
use crate::error::{MasterDataError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub(crate) type LeaseCounts = HashMap<Generation, usize>;

/// Shared lease counts of one store.
#[derive(Debug, Clone, Default)]
pub struct LeaseTable {
    counts: Arc<Mutex<LeaseCounts>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the table. Holding the guard blocks new leases and releases.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, LeaseCounts>> {
        self.counts
            .lock()
            .map_err(|e| MasterDataError::Other(format!("Lease table lock poisoned: {}", e)))
    }

    /// Register a lease on `generation` while the table is locked.
    pub(crate) fn grant(&self, counts: &mut LeaseCounts, generation: Generation) -> GenerationLease {
        *counts.entry(generation.clone()).or_default() += 1;
        GenerationLease {
            counts: self.counts.clone(),
            generation,
        }
    }

    /// Number of live leases on `generation`.
    pub fn holders(&self, generation: &Generation) -> usize {
        self.lock()
            .map(|counts| counts.get(generation).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Keeps one generation from being pruned until dropped.
#[derive(Debug)]
pub struct GenerationLease {
    counts: Arc<Mutex<LeaseCounts>>,
    generation: Generation,
}

impl GenerationLease {
    pub fn generation(&self) -> &Generation {
        &self.generation
    }
}

impl Drop for GenerationLease {
    fn drop(&mut self) {
        let Ok(mut counts) = self.counts.lock() else {
            return;
        };
        if let Some(count) = counts.get_mut(&self.generation) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.generation);
                debug!("Released last lease on {}", self.generation);
            }
        }
    }
}
