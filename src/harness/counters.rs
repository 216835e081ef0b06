//! Per-client message counters.
//!
//! One atomic slot per session index, so concurrent deliveries to the same
//! session never lose an increment and sessions never contend with each other.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct CounterTable {
    slots: Vec<AtomicU64>,
}

impl CounterTable {
    /// Creates `clients` counters, all zero.
    pub fn new(clients: usize) -> Self {
        Self {
            slots: (0..clients).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Adds one to `index` and returns the new count, or `None` for an unknown index.
    pub fn increment(&self, index: usize) -> Option<u64> {
        self.slots
            .get(index)
            .map(|slot| slot.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Sets `index` back to zero and returns what it held.
    pub fn reset(&self, index: usize) -> Option<u64> {
        self.slots
            .get(index)
            .map(|slot| slot.swap(0, Ordering::AcqRel))
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.slots.get(index).map(|slot| slot.load(Ordering::Acquire))
    }

    /// Current value of every counter, in index order.
    pub fn snapshot(&self) -> Vec<u64> {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.snapshot().iter().sum()
    }
}
