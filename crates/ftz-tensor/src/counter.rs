use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, TensorError};

/// Per-worker tally of flush events.
///
/// Holds one slot per worker of the pool it is paired with. Parallel tasks
/// count locally and commit their total into their own slot with
/// [`FlushCounter::record`], so slots never see contention. Reading sums the
/// slots; resetting needs `&mut self`, which keeps it from overlapping with
/// any in-flight counting.
#[derive(Debug)]
pub struct FlushCounter {
    slots: Vec<AtomicU64>,
}

impl FlushCounter {
    /// Create a counter with `capacity` worker slots.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "flush counter needs at least one slot");
        FlushCounter {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Number of worker slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Fails unless a pool of `workers` threads fits into this counter.
    pub fn check_workers(&self, workers: usize) -> Result<()> {
        if workers > self.slots.len() {
            return Err(TensorError::WorkerCapacity {
                workers,
                slots: self.slots.len(),
            });
        }
        Ok(())
    }

    /// Add `n` flush events to `slot`.
    pub fn record(&self, slot: usize, n: u64) -> Result<()> {
        let cell = self.slots.get(slot).ok_or(TensorError::SlotOutOfRange {
            slot,
            slots: self.slots.len(),
        })?;
        if n > 0 {
            cell.fetch_add(n, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Record `n` events against the slot of the calling pool worker.
    ///
    /// Outside of a rayon pool the caller is treated as worker 0.
    pub fn record_current(&self, n: u64) -> Result<()> {
        self.record(rayon::current_thread_index().unwrap_or(0), n)
    }

    /// Count recorded in a single slot.
    pub fn slot(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).map(|c| c.load(Ordering::Relaxed))
    }

    /// Sum over all slots.
    pub fn total(&self) -> u64 {
        self.slots.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Zero every slot.
    pub fn reset(&mut self) {
        for cell in self.slots.iter_mut() {
            *cell.get_mut() = 0;
        }
    }

    /// Read the total, optionally zeroing the counter afterwards.
    pub fn get_flush_count(&mut self, reset: bool) -> u64 {
        let total = self.total();
        if reset {
            self.reset();
        }
        total
    }
}
