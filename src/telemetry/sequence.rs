//! # Sequence Accounting
//!
//! Derives received/lost totals from the remote packet counter.
//!
//! A positive gap of `n` counts `n - 1` lost packets. A zero or negative
//! step (duplicate, wrap, or remote reset) counts as received only.

/// Running delivery totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceStats {
    /// Frames accounted since the last clear
    pub received: u64,
    /// Frames inferred missing from counter gaps
    pub lost: u64,
    /// Last packet counter seen, `None` before the first frame or after a clear
    pub last_packet_count: Option<i64>,
}

/// Stateful packet-counter tracker
///
/// Only an explicit [`SequenceTracker::clear`] resets the totals; reconnects
/// and live/simulated mode switches keep the baseline.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    stats: SequenceStats,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one packet counter and return the updated totals
    ///
    /// # Examples
    ///
    /// ```
    /// use ddl_ground::telemetry::sequence::SequenceTracker;
    ///
    /// let mut tracker = SequenceTracker::new();
    /// for count in [5, 6, 6, 9, 3] {
    ///     tracker.observe(count);
    /// }
    /// let stats = tracker.stats();
    /// assert_eq!((stats.received, stats.lost), (5, 2));
    /// ```
    pub fn observe(&mut self, packet_count: i64) -> SequenceStats {
        match self.stats.last_packet_count {
            None => {
                self.stats.received = 1;
            }
            Some(last) => {
                let step = packet_count.saturating_sub(last);
                if step > 0 {
                    self.stats.lost = self.stats.lost.saturating_add((step - 1) as u64);
                }
                self.stats.received = self.stats.received.saturating_add(1);
            }
        }
        self.stats.last_packet_count = Some(packet_count);
        self.stats
    }

    /// Account an optional counter; `None` leaves the totals untouched
    pub fn observe_opt(&mut self, packet_count: Option<i64>) -> SequenceStats {
        match packet_count {
            Some(count) => self.observe(count),
            None => self.stats,
        }
    }

    /// Reset to `(0, 0, unset)`
    pub fn clear(&mut self) {
        self.stats = SequenceStats::default();
    }

    /// Snapshot of the current totals
    pub fn stats(&self) -> SequenceStats {
        self.stats
    }

    pub fn last_packet_count(&self) -> Option<i64> {
        self.stats.last_packet_count
    }
}
