//! Replicated log application results.

use tracing::{debug, warn};

use crate::wire::{Conflict, ConflictKind};

/// What happened to one binary log segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Rows the engine changed.
    pub applied_rows: i64,
    /// Records the engine skipped.
    pub conflicts: Vec<Conflict>,
}

impl ApplyOutcome {
    /// Returns true if every record was applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Returns the number of skipped records.
    #[must_use]
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Returns the number of conflicts of one kind.
    #[must_use]
    pub fn count_of(&self, kind: ConflictKind) -> usize {
        self.conflicts.iter().filter(|c| c.kind == kind).count()
    }
}

/// Running totals for replicated log application on one handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationApplier {
    segments: u64,
    applied_rows: i64,
    conflicts: u64,
}

impl ReplicationApplier {
    /// Creates an applier with zeroed totals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one segment's outcome into the totals.
    pub fn record(&mut self, outcome: &ApplyOutcome) {
        self.segments += 1;
        self.applied_rows = self.applied_rows.saturating_add(outcome.applied_rows);
        self.conflicts += outcome.conflict_count() as u64;
        if outcome.is_clean() {
            debug!(rows = outcome.applied_rows, "Applied binary log segment");
        } else {
            warn!(
                rows = outcome.applied_rows,
                conflicts = outcome.conflict_count(),
                "Applied binary log segment with conflicts"
            );
        }
    }

    /// Returns the number of segments applied.
    #[must_use]
    pub const fn segments(&self) -> u64 {
        self.segments
    }

    /// Returns the total rows applied.
    #[must_use]
    pub const fn applied_rows(&self) -> i64 {
        self.applied_rows
    }

    /// Returns the total records skipped.
    #[must_use]
    pub const fn conflicts(&self) -> u64 {
        self.conflicts
    }
}
