//! Round-robin target selection.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks indices into a set of healthy targets, wrapping at the set size.
///
/// The size may change between calls as targets enter or leave rotation;
/// the counter keeps advancing and is reduced modulo the current size.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next index in `0..count`, or `None` when nothing is in rotation.
    pub fn next(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % count)
    }

    /// Number of selections made so far.
    pub fn selections(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}
