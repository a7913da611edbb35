//! Generation tracking for background work.
//!
//! Every navigation advances a shared [`GenerationClock`]. Background tasks
//! carry the [`GenerationToken`] they were issued under and check
//! [`GenerationToken::is_stale`] before doing expensive work, so a burst of
//! key presses never leaves a backlog of obsolete prefetches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic generation number.
pub type Generation = u64;

/// Shared counter advanced on every navigation.
///
/// Clone this clock to share it across threads.
#[derive(Debug, Clone, Default)]
pub struct GenerationClock {
    current: Arc<AtomicU64>,
}

impl GenerationClock {
    /// Create a new clock starting at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current generation.
    #[inline]
    pub fn current(&self) -> Generation {
        self.current.load(Ordering::Acquire)
    }

    /// Advance to a new generation, invalidating all earlier tokens.
    pub fn advance(&self) -> GenerationToken {
        let issued = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        GenerationToken {
            clock: self.current.clone(),
            issued,
        }
    }

    /// Get a token for the current generation without advancing.
    pub fn token(&self) -> GenerationToken {
        GenerationToken {
            clock: self.current.clone(),
            issued: self.current(),
        }
    }
}

/// Token tied to the generation it was issued under.
#[derive(Debug, Clone)]
pub struct GenerationToken {
    clock: Arc<AtomicU64>,
    issued: Generation,
}

impl GenerationToken {
    /// Get the generation this token was issued under.
    pub fn generation(&self) -> Generation {
        self.issued
    }

    /// Check whether the clock has moved past this token.
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.clock.load(Ordering::Acquire) != self.issued
    }
}
