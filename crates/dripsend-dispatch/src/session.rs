//! Per-client dispatch session — the transient local state a UI caller
//! reads for progress display. Owned by one running client; dropped when
//! dispatch stops.

use std::sync::{Arc, Mutex};

use crate::progress::Progress;

/// Snapshot of one dispatch run's local state.
#[derive(Debug, Clone, Default)]
pub struct DispatchSession {
    pub session_id: String,
    /// True while this client holds the dispatch lease.
    pub owner_claim: bool,
    pub delay_seconds: u64,
    /// Last processed row index, if any row has been processed yet.
    pub cursor: Option<usize>,
    pub processed: usize,
    pub total: usize,
    pub remaining_seconds: u64,
}

impl DispatchSession {
    pub fn new(session_id: &str, delay_seconds: u64) -> Self {
        Self {
            session_id: session_id.to_string(),
            delay_seconds,
            ..Self::default()
        }
    }

    pub fn progress(&self) -> Progress {
        Progress::compute(
            self.processed,
            self.total,
            self.total.saturating_sub(self.processed),
            self.delay_seconds,
        )
    }
}

/// Shared handle: the dispatcher and pollers write, the UI caller reads.
pub type SharedSession = Arc<Mutex<DispatchSession>>;

pub fn shared(session: DispatchSession) -> SharedSession {
    Arc::new(Mutex::new(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_derives_from_counters() {
        let mut s = DispatchSession::new("tester", 120);
        s.total = 5;
        s.processed = 2;
        let p = s.progress();
        assert_eq!(p.percent, 40);
        assert_eq!(p.remaining_rows, 3);
        assert_eq!(p.remaining_seconds, 360);
    }
}
