//! Countdown / progress reporting.
//!
//! Pure derivation from dispatch counters — recomputed after every row
//! status transition rather than ticked by an independent timer, so the
//! figures track the absolute-schedule pacing model instead of drifting
//! on their own. Presentation only; no side effects on shared state.

/// Human-facing progress figures for one dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    /// Whole-number percent complete (0 when total is 0).
    pub percent: u8,
    /// Rows still scheduled for this run.
    pub remaining_rows: usize,
    /// Estimated seconds until the last scheduled row fires.
    pub remaining_seconds: u64,
}

impl Progress {
    /// Derive progress from dispatch counters.
    ///
    /// Each remaining row occupies one delay-length slot on the absolute
    /// schedule, so the ETA is `remaining_scheduled * delay`.
    pub fn compute(
        processed: usize,
        total: usize,
        remaining_scheduled: usize,
        delay_seconds: u64,
    ) -> Self {
        let percent = if total == 0 {
            0
        } else {
            ((processed * 100) / total).min(100) as u8
        };
        Self {
            processed,
            total,
            percent,
            remaining_rows: remaining_scheduled,
            remaining_seconds: (remaining_scheduled as u64).saturating_mul(delay_seconds),
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} ({}%), ~{}m{:02}s remaining",
            self.processed,
            self.total,
            self.percent,
            self.remaining_seconds / 60,
            self.remaining_seconds % 60
        )
    }
}
