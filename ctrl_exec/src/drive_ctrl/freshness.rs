//! Freshness tracking of input sequence counters

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Records the last sequence counter an axis was updated for.
///
/// No counter has been seen at start, so the first sample is always fresh, including one whose
/// counter is zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessTracker<C> {
    last_seen: Option<C>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<C> Default for FreshnessTracker<C> {
    fn default() -> Self {
        Self { last_seen: None }
    }
}

impl<C: Copy + PartialEq> FreshnessTracker<C> {
    /// Returns true if `counter` differs from the last one marked as seen.
    ///
    /// Counters are only compared for equality, so wrap around is fresh data like any other
    /// change.
    pub fn is_fresh(&self, counter: C) -> bool {
        self.last_seen != Some(counter)
    }

    pub fn mark_seen(&mut self, counter: C) {
        self.last_seen = Some(counter);
    }

    pub fn last_seen(&self) -> Option<C> {
        self.last_seen
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
