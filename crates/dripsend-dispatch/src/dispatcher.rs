//! The batch dispatcher — a resumable, rate-paced walk over the contact
//! sheet.
//!
//! Rows are processed strictly in sheet order starting at the first row
//! without a terminal status. Each row is re-checked against the store
//! right before it is claimed, gets a durable `Processing` claim before
//! the notifier call, and a terminal `Success`/`Fail` after it. Pacing is
//! absolute: row `i` fires at `processStart + (i - startIndex) * delay`,
//! so one slow send never compounds into drift across the rest of the
//! batch. Stopping is cooperative and only happens at row boundaries; an
//! in-flight send always completes.

use std::sync::Arc;
use std::time::Duration;

use dripsend_core::config::DispatchConfig;
use dripsend_core::error::{DripsendError, Result};
use dripsend_core::traits::{Notifier, RowStore};
use dripsend_core::types::RowStatus;

use crate::lease::LeaseMachine;
use crate::pollers::{PollerSet, pending_rows};
use crate::progress::Progress;
use crate::session::SharedSession;

/// Outcome summary for one dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub total: usize,
    /// First row this run considered, if any row needed work.
    pub start_index: Option<usize>,
    pub sent_ok: usize,
    pub sent_fail: usize,
    /// Rows passed over without a send (already terminal, or a store
    /// error blocked the claim).
    pub skipped: usize,
    /// True when the run ended on a cooperative stop rather than the end
    /// of the sheet.
    pub stopped_early: bool,
}

impl std::fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sent, {} failed, {} skipped of {} rows{}",
            self.sent_ok,
            self.sent_fail,
            self.skipped,
            self.total,
            if self.stopped_early { " (stopped early)" } else { "" }
        )
    }
}

/// The dispatch loop and its collaborators.
pub struct Dispatcher {
    rows: Arc<dyn RowStore>,
    notifier: Arc<dyn Notifier>,
    machine: Arc<LeaseMachine>,
    session: SharedSession,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        rows: Arc<dyn RowStore>,
        notifier: Arc<dyn Notifier>,
        machine: Arc<LeaseMachine>,
        session: SharedSession,
        config: DispatchConfig,
    ) -> Self {
        Self {
            rows,
            notifier,
            machine,
            session,
            config,
        }
    }

    /// Run the batch to completion, cooperative stop, or unrecoverable
    /// error. Whatever happens, the lease is released, the poller group
    /// is cancelled, and the row view is reconciled once more before
    /// returning.
    pub async fn run(&self, pollers: PollerSet) -> Result<DispatchReport> {
        if !self.machine.is_owner() {
            pollers.shutdown().await;
            return Err(DripsendError::Lease(
                "dispatch requires the Owner state".into(),
            ));
        }

        let outcome = self.run_loop().await;

        let release_result = self.machine.release().await;
        pollers.shutdown().await;
        self.reconcile_rows().await;
        {
            let mut s = self.session.lock().expect("session poisoned");
            s.owner_claim = false;
        }

        match (outcome, release_result) {
            (Ok(report), Ok(())) => {
                tracing::info!("🏁 Dispatch finished: {report}");
                Ok(report)
            }
            // A run that worked but could not release is surfaced: the
            // operator must know the shared lease may be stale.
            (Ok(_), Err(e)) => Err(e),
            (Err(e), release) => {
                if let Err(re) = release {
                    tracing::warn!("⚠️ Lease release also failed: {re}");
                }
                Err(e)
            }
        }
    }

    async fn run_loop(&self) -> Result<DispatchReport> {
        // Never trust a snapshot older than the claim.
        let rows = self.rows.list_rows().await?;
        let total = rows.len();

        let mut report = DispatchReport {
            total,
            ..DispatchReport::default()
        };

        let Some(start) = rows.iter().position(|r| !r.status.is_terminal()) else {
            tracing::info!("📭 Nothing to do: all {total} rows already have an outcome");
            return Ok(report);
        };
        report.start_index = Some(start);

        {
            let mut s = self.session.lock().expect("session poisoned");
            s.owner_claim = true;
            s.total = total;
            s.remaining_seconds = Progress::compute(
                0,
                total,
                pending_rows(&rows),
                self.config.delay_seconds,
            )
            .remaining_seconds;
        }

        tracing::info!(
            "🚀 Dispatching rows {start}..{total} every {}s",
            self.config.delay_seconds
        );

        let delay = Duration::from_secs(self.config.delay_seconds.max(1));
        let process_start = tokio::time::Instant::now();

        for (i, row) in rows.iter().enumerate().skip(start) {
            // Each row has a fixed slot on the absolute schedule; lost
            // time is not paid back, but it never compounds either.
            let slot = process_start + delay * (i - start) as u32;

            if !self.machine.is_owner() {
                report.stopped_early = true;
                break;
            }
            tokio::time::sleep_until(slot).await;
            if !self.machine.is_owner() {
                report.stopped_early = true;
                break;
            }

            // The snapshot may be stale by now; the store decides whether
            // this row still needs work.
            let status = match self.rows.row_status(i).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!("⚠️ Row {i}: status check failed, leaving for next run: {e}");
                    report.skipped += 1;
                    continue;
                }
            };
            if status.is_terminal() {
                tracing::debug!("⏭️ Row {i} already '{status}', skipping");
                report.skipped += 1;
                continue;
            }

            // The Processing write is the durable claim. If it does not
            // land, the row stays effectively Pending and the next run
            // picks it up; sending without the claim could double-send.
            if let Err(e) = self.rows.set_row_status(i, RowStatus::Processing).await {
                tracing::warn!("⚠️ Row {i}: claim write failed, leaving for next run: {e}");
                report.skipped += 1;
                continue;
            }

            let outcome = match self.notifier.send(row).await {
                Ok(()) => {
                    report.sent_ok += 1;
                    RowStatus::Success
                }
                Err(e) => {
                    tracing::warn!("⚠️ Row {i} ({}): send failed: {e}", row.email);
                    report.sent_fail += 1;
                    RowStatus::Fail
                }
            };
            if let Err(e) = self.rows.set_row_status(i, outcome).await {
                // The outcome write not landing means this row re-reads as
                // Processing, which resumes as Pending. Logged, not fatal.
                tracing::warn!("⚠️ Row {i}: outcome write failed: {e}");
            }

            self.note_row_done(i, total);
        }

        Ok(report)
    }

    /// Update the shared session after a row reaches its outcome.
    fn note_row_done(&self, index: usize, total: usize) {
        let mut s = self.session.lock().expect("session poisoned");
        s.cursor = Some(index);
        s.processed += 1;
        let remaining = total.saturating_sub(index + 1);
        s.remaining_seconds =
            Progress::compute(s.processed, total, remaining, s.delay_seconds).remaining_seconds;
    }

    /// One final row fetch so the local view reflects where the sheet
    /// actually ended up.
    async fn reconcile_rows(&self) {
        match self.rows.list_rows().await {
            Ok(rows) => {
                let pending = pending_rows(&rows);
                let mut s = self.session.lock().expect("session poisoned");
                s.total = rows.len();
                s.remaining_seconds =
                    Progress::compute(rows.len() - pending, rows.len(), pending, s.delay_seconds)
                        .remaining_seconds;
            }
            Err(e) => tracing::warn!("⚠️ Final row refresh failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use dripsend_core::traits::LeaseStore;
    use dripsend_core::types::{LeasePatch, Row};
    use dripsend_store::{MemoryLeaseStore, MemoryRowStore, sample_rows};

    use crate::lease::{LeaseState, StartDecision};
    use crate::session::{self, DispatchSession};

    /// Notifier double: records send times (relative to construction),
    /// optionally simulates latency, optionally fails given recipients,
    /// optionally runs a hook after the n-th send.
    struct TestNotifier {
        start: Instant,
        latency: Duration,
        fail_for: Vec<String>,
        sends: StdMutex<Vec<(String, Duration)>>,
        after_send: StdMutex<Option<(usize, Box<dyn FnOnce() + Send>)>>,
    }

    impl TestNotifier {
        fn build(latency: Duration, fail_for: Vec<String>) -> Arc<Self> {
            Arc::new(Self {
                start: Instant::now(),
                latency,
                fail_for,
                sends: StdMutex::new(Vec::new()),
                after_send: StdMutex::new(None),
            })
        }

        fn new() -> Arc<Self> {
            Self::build(Duration::ZERO, Vec::new())
        }

        fn with_latency(latency: Duration) -> Arc<Self> {
            Self::build(latency, Vec::new())
        }

        fn failing_for(email: &str) -> Arc<Self> {
            Self::build(Duration::ZERO, vec![email.to_string()])
        }

        fn sent(&self) -> Vec<(String, Duration)> {
            self.sends.lock().unwrap().clone()
        }

        fn sent_emails(&self) -> Vec<String> {
            self.sent().into_iter().map(|(email, _)| email).collect()
        }

        fn send_offsets(&self) -> Vec<Duration> {
            self.sent().into_iter().map(|(_, at)| at).collect()
        }

        fn set_after_send(&self, nth: usize, hook: Box<dyn FnOnce() + Send>) {
            *self.after_send.lock().unwrap() = Some((nth, hook));
        }
    }

    #[async_trait]
    impl Notifier for TestNotifier {
        async fn send(&self, row: &Row) -> dripsend_core::error::Result<()> {
            let at = self.start.elapsed();
            self.sends.lock().unwrap().push((row.email.clone(), at));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let count = self.sends.lock().unwrap().len();
            let hook = {
                let mut slot = self.after_send.lock().unwrap();
                match slot.take() {
                    Some((nth, hook)) if nth == count => Some(hook),
                    other => {
                        *slot = other;
                        None
                    }
                }
            };
            if let Some(hook) = hook {
                hook();
            }
            if self.fail_for.contains(&row.email) {
                return Err(DripsendError::Notify("mailbox rejected".into()));
            }
            Ok(())
        }
    }

    struct Fixture {
        rows: MemoryRowStore,
        lease: MemoryLeaseStore,
        machine: Arc<LeaseMachine>,
        session: SharedSession,
        config: DispatchConfig,
    }

    async fn fixture(rows: Vec<Row>, delay_seconds: u64) -> Fixture {
        let rows = MemoryRowStore::new(rows);
        let lease = MemoryLeaseStore::new();
        let config = DispatchConfig {
            delay_seconds,
            ..DispatchConfig::default()
        };
        let machine = Arc::new(LeaseMachine::with_session_id(
            Arc::new(lease.clone()),
            config.clone(),
            "tester".into(),
        ));
        assert_eq!(
            machine.request_start().await.unwrap(),
            StartDecision::Started
        );
        let session = session::shared(DispatchSession::new("tester", delay_seconds));
        Fixture {
            rows,
            lease,
            machine,
            session,
            config,
        }
    }

    fn dispatcher(f: &Fixture, notifier: Arc<TestNotifier>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(f.rows.clone()),
            notifier,
            f.machine.clone(),
            f.session.clone(),
            f.config.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn five_pending_rows_send_on_the_absolute_schedule() {
        let f = fixture(sample_rows(5), 2).await;
        let notifier = TestNotifier::new();
        let report = dispatcher(&f, notifier.clone())
            .run(PollerSet::new())
            .await
            .unwrap();

        assert_eq!(report.sent_ok, 5);
        assert_eq!(report.start_index, Some(0));
        assert!(!report.stopped_early);

        // Row i fires at i * delay: 0, 2, 4, 6, 8 seconds.
        let offsets = notifier.send_offsets();
        let expected: Vec<Duration> = (0..5).map(|i| Duration::from_secs(i * 2)).collect();
        assert_eq!(offsets, expected);

        for row in f.rows.snapshot().await {
            assert_eq!(row.status, RowStatus::Success);
        }
        let lease = f.lease.peek().await.unwrap();
        assert!(!lease.is_running);
        assert_eq!(lease.owner_id, "");
    }

    #[tokio::test(start_paused = true)]
    async fn resume_processes_only_unfinished_rows() {
        let mut rows = sample_rows(5);
        rows[0].status = RowStatus::Success;
        rows[1].status = RowStatus::Fail;
        let f = fixture(rows, 2).await;
        let notifier = TestNotifier::new();
        let report = dispatcher(&f, notifier.clone())
            .run(PollerSet::new())
            .await
            .unwrap();

        assert_eq!(report.start_index, Some(2));
        assert_eq!(report.sent_ok, 3);
        assert_eq!(
            notifier.sent_emails(),
            vec![
                "contact2@example.com",
                "contact3@example.com",
                "contact4@example.com"
            ]
        );
        // Finalized rows are never touched again.
        let touched: Vec<usize> = f.rows.write_log().await.iter().map(|(i, _)| *i).collect();
        assert!(!touched.contains(&0));
        assert!(!touched.contains(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn every_row_walks_processing_then_one_terminal_status() {
        let f = fixture(sample_rows(3), 1).await;
        let notifier = TestNotifier::failing_for("contact1@example.com");
        let report = dispatcher(&f, notifier)
            .run(PollerSet::new())
            .await
            .unwrap();

        assert_eq!(report.sent_ok, 2);
        assert_eq!(report.sent_fail, 1);

        let log = f.rows.write_log().await;
        for i in 0..3 {
            let writes: Vec<RowStatus> = log
                .iter()
                .filter(|(idx, _)| *idx == i)
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(writes[0], RowStatus::Processing, "row {i}");
            assert_eq!(writes.len(), 2, "row {i} written exactly twice");
            assert!(writes[1].is_terminal(), "row {i} ends terminal");
        }
        assert_eq!(f.rows.snapshot().await[1].status, RowStatus::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_to_do_releases_immediately() {
        let mut rows = sample_rows(2);
        rows[0].status = RowStatus::Success;
        rows[1].status = RowStatus::Fail;
        let f = fixture(rows, 2).await;
        let notifier = TestNotifier::new();
        let report = dispatcher(&f, notifier.clone())
            .run(PollerSet::new())
            .await
            .unwrap();

        assert_eq!(report.start_index, None);
        assert!(notifier.sent().is_empty());
        assert!(!f.lease.peek().await.unwrap().is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sends_delay_but_never_compound_drift() {
        // Delay 2s, each send takes 3s. Slots are 0/2/4; actual send
        // starts are 0/3/6 — each row slips by its predecessor's overrun
        // only, not by the sum of all previous overruns.
        let f = fixture(sample_rows(3), 2).await;
        let notifier = TestNotifier::with_latency(Duration::from_secs(3));
        dispatcher(&f, notifier.clone())
            .run(PollerSet::new())
            .await
            .unwrap();

        let offsets = notifier.send_offsets();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_secs(3),
                Duration::from_secs(6)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handoff_ack_stops_before_the_next_row_starts() {
        let f = fixture(sample_rows(5), 2).await;
        let notifier = TestNotifier::new();

        // After the second send completes, the waiting client's
        // acknowledgment lands and our poller (simulated inline) sees it.
        let lease = f.lease.clone();
        let machine = f.machine.clone();
        notifier.set_after_send(
            2,
            Box::new(move || {
                let lease = lease.clone();
                let machine = machine.clone();
                tokio::spawn(async move {
                    lease
                        .write_lease(&LeasePatch::request_handoff())
                        .await
                        .unwrap();
                    machine.refresh().await.unwrap();
                });
            }),
        );

        let report = dispatcher(&f, notifier.clone())
            .run(PollerSet::new())
            .await
            .unwrap();

        assert!(report.stopped_early);
        assert_eq!(report.sent_ok, 2);
        // Row 1's outcome is durable; row 2 was never started.
        let snapshot = f.rows.snapshot().await;
        assert_eq!(snapshot[1].status, RowStatus::Success);
        assert_eq!(snapshot[2].status, RowStatus::Pending);
        assert_eq!(notifier.sent().len(), 2);
        // The lease is released for the waiting client.
        assert!(!f.lease.peek().await.unwrap().is_running);
        assert_eq!(f.machine.state(), LeaseState::Idle);
    }

    /// Row store wrapper that fails the Processing claim for one row once.
    struct FlakyClaimStore {
        inner: MemoryRowStore,
        fail_index: usize,
        tripped: StdMutex<bool>,
    }

    #[async_trait]
    impl RowStore for FlakyClaimStore {
        async fn list_rows(&self) -> dripsend_core::error::Result<Vec<Row>> {
            self.inner.list_rows().await
        }
        async fn row_status(&self, index: usize) -> dripsend_core::error::Result<RowStatus> {
            self.inner.row_status(index).await
        }
        async fn set_row_status(
            &self,
            index: usize,
            status: RowStatus,
        ) -> dripsend_core::error::Result<()> {
            if index == self.fail_index && status == RowStatus::Processing {
                let mut tripped = self.tripped.lock().unwrap();
                if !*tripped {
                    *tripped = true;
                    return Err(DripsendError::Store("write timed out".into()));
                }
            }
            self.inner.set_row_status(index, status).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_claim_skips_the_send_and_continues() {
        let f = fixture(sample_rows(3), 2).await;
        let flaky = Arc::new(FlakyClaimStore {
            inner: f.rows.clone(),
            fail_index: 1,
            tripped: StdMutex::new(false),
        });
        let notifier = TestNotifier::new();
        let d = Dispatcher::new(
            flaky,
            notifier.clone(),
            f.machine.clone(),
            f.session.clone(),
            f.config.clone(),
        );
        let report = d.run(PollerSet::new()).await.unwrap();

        // Row 1 was never sent: the durable claim did not land.
        assert_eq!(report.sent_ok, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            notifier.sent_emails(),
            vec!["contact0@example.com", "contact2@example.com"]
        );
        // Still Pending, so the next run resumes from it.
        assert_eq!(f.rows.snapshot().await[1].status, RowStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrently_finished_row_is_not_resent() {
        let f = fixture(sample_rows(3), 2).await;
        let notifier = TestNotifier::new();

        // While row 0 is being handled, another client finishes row 2.
        let rows = f.rows.clone();
        notifier.set_after_send(
            1,
            Box::new(move || {
                let rows = rows.clone();
                tokio::spawn(async move {
                    rows.set_row_status(2, RowStatus::Success).await.unwrap();
                });
            }),
        );

        let report = dispatcher(&f, notifier.clone())
            .run(PollerSet::new())
            .await
            .unwrap();

        assert_eq!(report.sent_ok, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            notifier.sent_emails(),
            vec!["contact0@example.com", "contact1@example.com"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_refuses_without_the_owner_state() {
        let rows = MemoryRowStore::new(sample_rows(1));
        let lease = MemoryLeaseStore::new();
        let config = DispatchConfig::default();
        let machine = Arc::new(LeaseMachine::with_session_id(
            Arc::new(lease),
            config.clone(),
            "tester".into(),
        ));
        let d = Dispatcher::new(
            Arc::new(rows),
            TestNotifier::new(),
            machine,
            session::shared(DispatchSession::new("tester", 2)),
            config,
        );
        assert!(d.run(PollerSet::new()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn status_poller_preempts_a_paced_run() {
        // Full handoff wiring: a real status poller observes the
        // acknowledgment written mid-run and the loop stops at the next
        // row boundary.
        let f = fixture(sample_rows(5), 2).await;
        let notifier = TestNotifier::new();

        let mut pollers = PollerSet::new();
        pollers.spawn_status_poller(f.machine.clone(), Duration::from_secs(1));

        let lease = f.lease.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            lease
                .write_lease(&LeasePatch::request_handoff())
                .await
                .unwrap();
        });

        let report = dispatcher(&f, notifier.clone()).run(pollers).await.unwrap();

        assert!(report.stopped_early);
        // Rows at t=0 and t=2 went out; the ack landed at t=2.5 and the
        // poller saw it before the t=4 slot.
        assert_eq!(report.sent_ok, 2);
        assert!(!f.lease.peek().await.unwrap().is_running);
    }
}
