use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;

/// A reading together with its position in the cell's write sequence.
#[derive(Debug)]
pub struct Sample<T> {
    pub seq: u64,
    pub taken_at: Instant,
    pub reading: T,
}

/// Wait-free single-slot holder of the most recent reading.
///
/// Writers replace the whole sample with one pointer swap, so readers see
/// either the previous or the new reading in full.
#[derive(Debug)]
pub struct LatestCell<T> {
    slot: ArcSwapOption<Sample<T>>,
    writes: AtomicU64,
}

impl<T> LatestCell<T> {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            writes: AtomicU64::new(0),
        }
    }

    /// Publish a reading and return its sequence number (starting at 1).
    pub fn store(&self, reading: T) -> u64 {
        let seq = self.writes.fetch_add(1, Ordering::AcqRel) + 1;
        self.slot.store(Some(Arc::new(Sample {
            seq,
            taken_at: Instant::now(),
            reading,
        })));
        seq
    }

    pub fn load(&self) -> Option<Arc<Sample<T>>> {
        self.slot.load_full()
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.load().is_some()
    }

    /// Sequence number of the latest write, 0 when never written.
    pub fn seq(&self) -> u64 {
        self.slot.load().as_ref().map(|s| s.seq).unwrap_or(0)
    }
}

impl<T: Clone + Default> LatestCell<T> {
    /// The current reading, or the empty value when nothing was stored yet.
    pub fn get_or_default(&self) -> T {
        self.slot
            .load()
            .as_ref()
            .map(|s| s.reading.clone())
            .unwrap_or_default()
    }
}

impl<T> Default for LatestCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
