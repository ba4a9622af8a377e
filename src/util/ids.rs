//! Monotonic identifier source
//!
//! Entity ids and path job ids are drawn from an `IdGenerator` that is passed
//! into whatever needs one, so separate worlds (and tests) never share a
//! counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Entity identifier
pub type EntityId = u64;

/// Path job identifier
pub type JobId = u64;

/// Thread-safe monotonic id generator. The first id handed out is 1, so 0 is
/// free to mean "nothing yet".
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Take the next id
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Peek at the id the next call will return
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
