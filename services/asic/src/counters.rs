//! # Event Counter Bank
//!
//! One atomic counter per interrupt vector. The interrupt handler is the
//! only writer; sessions read. Counters wrap on overflow.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// Fixed-size bank of per-vector counters.
#[derive(Debug)]
pub struct EventCounterBank {
    counters: Vec<AtomicU32>,
}

impl EventCounterBank {
    /// Creates `slots` zeroed counters.
    pub fn new(slots: usize) -> Self {
        let mut counters = Vec::with_capacity(slots);
        counters.resize_with(slots, || AtomicU32::new(0));
        Self { counters }
    }

    /// Number of counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// True for a bank with no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Records one occurrence on `vector`. Returns false for an unknown vector.
    ///
    /// Safe from interrupt context.
    #[inline]
    pub fn increment(&self, vector: usize) -> bool {
        match self.counters.get(vector) {
            Some(counter) => {
                counter.fetch_add(1, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Current value of `vector`.
    #[inline]
    pub fn load(&self, vector: usize) -> Option<u32> {
        self.counters.get(vector).map(|c| c.load(Ordering::Acquire))
    }

    /// Copies every counter into a new vector.
    pub fn snapshot(&self) -> Vec<u32> {
        self.counters
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .collect()
    }
}
