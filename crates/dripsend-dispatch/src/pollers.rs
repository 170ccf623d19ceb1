//! Background poller set.
//!
//! Three independently scheduled repeating tasks keep local state in step
//! with the shared stores while the dispatcher runs: the status poller
//! refreshes the lease view (feeding cooperative preemption), the ack
//! poller is a slower second check that still fires when the status
//! poller is starved by a long send, and the row-refresh poller keeps the
//! progress figures honest against concurrent sheet edits. The whole set
//! cancels as a group when dispatch stops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use dripsend_core::traits::RowStore;
use dripsend_core::types::RowStatus;

use crate::lease::{LeaseMachine, LeaseState};
use crate::progress::Progress;
use crate::session::SharedSession;

/// A group of cancelable background polling tasks.
pub struct PollerSet {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for PollerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PollerSet {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Refresh the local lease view every `period`. Feeds
    /// `LeaseMachine::observe_lease`, which is where cooperative
    /// preemption and takeover-availability are noticed.
    pub fn spawn_status_poller(&mut self, machine: Arc<LeaseMachine>, period: Duration) {
        let mut rx = self.shutdown.subscribe();
        self.handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = machine.refresh().await {
                            tracing::warn!("⚠️ Status poll failed (will retry): {e}");
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
            tracing::debug!("Status poller stopped");
        }));
    }

    /// Slower explicit acknowledgment check, active only while Owner.
    /// Covers the case where the status poller's shorter period is itself
    /// starved by a long-running send.
    pub fn spawn_ack_poller(&mut self, machine: Arc<LeaseMachine>, period: Duration) {
        let mut rx = self.shutdown.subscribe();
        self.handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if machine.state() != LeaseState::Owner {
                            continue;
                        }
                        if let Err(e) = machine.refresh().await {
                            tracing::warn!("⚠️ Ack poll failed (will retry): {e}");
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
            tracing::debug!("Ack poller stopped");
        }));
    }

    /// One-shot lease check shortly after a handoff request, so the
    /// waiting client isn't stuck out a full ack period for its first
    /// observation.
    pub fn spawn_handoff_probe(&mut self, machine: Arc<LeaseMachine>, delay: Duration) {
        let mut rx = self.shutdown.subscribe();
        self.handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = machine.refresh().await {
                        tracing::warn!("⚠️ Handoff probe failed: {e}");
                    }
                }
                _ = rx.changed() => {}
            }
        }));
    }

    /// Refresh the row snapshot every `period` while dispatching, so
    /// percentage/ETA figures reflect concurrent external edits.
    pub fn spawn_row_refresh(
        &mut self,
        store: Arc<dyn RowStore>,
        session: SharedSession,
        period: Duration,
    ) {
        let mut rx = self.shutdown.subscribe();
        self.handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match store.list_rows().await {
                            Ok(rows) => {
                                let pending = rows
                                    .iter()
                                    .filter(|r| !r.status.is_terminal())
                                    .count();
                                let done: usize = rows.len() - pending;
                                let mut s = session.lock().expect("session poisoned");
                                s.total = rows.len();
                                let progress = Progress::compute(
                                    done,
                                    rows.len(),
                                    pending,
                                    s.delay_seconds,
                                );
                                s.remaining_seconds = progress.remaining_seconds;
                            }
                            Err(e) => {
                                tracing::warn!("⚠️ Row refresh failed (will retry): {e}");
                            }
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
            tracing::debug!("Row refresh poller stopped");
        }));
    }

    /// Stop the whole group and wait for the tasks to wind down.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

/// Count of rows still awaiting dispatch in a snapshot.
pub fn pending_rows(rows: &[dripsend_core::types::Row]) -> usize {
    rows.iter()
        .filter(|r| !matches!(r.status, RowStatus::Success | RowStatus::Fail))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dripsend_core::config::DispatchConfig;
    use dripsend_core::traits::LeaseStore;
    use dripsend_core::types::LeasePatch;
    use dripsend_store::{MemoryLeaseStore, MemoryRowStore, sample_rows};

    use crate::lease::StartDecision;
    use crate::session::{self, DispatchSession};

    fn owner_machine(store: &MemoryLeaseStore) -> Arc<LeaseMachine> {
        Arc::new(LeaseMachine::with_session_id(
            Arc::new(store.clone()),
            DispatchConfig::default(),
            "owner".into(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn status_poller_delivers_preemption() {
        let store = MemoryLeaseStore::new();
        let machine = owner_machine(&store);
        assert_eq!(
            machine.request_start().await.unwrap(),
            StartDecision::Started
        );

        let mut pollers = PollerSet::new();
        pollers.spawn_status_poller(machine.clone(), Duration::from_secs(5));

        // Another client asks for a handoff.
        store
            .write_lease(&LeasePatch::request_handoff())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(machine.state(), LeaseState::Idle);
        pollers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ack_poller_delivers_preemption_to_the_owner() {
        let store = MemoryLeaseStore::new();
        let machine = owner_machine(&store);
        assert_eq!(
            machine.request_start().await.unwrap(),
            StartDecision::Started
        );

        let mut pollers = PollerSet::new();
        pollers.spawn_ack_poller(machine.clone(), Duration::from_secs(60));

        // Let the immediate first tick pass, then request the handoff.
        tokio::time::sleep(Duration::from_secs(1)).await;
        store
            .write_lease(&LeasePatch::request_handoff())
            .await
            .unwrap();

        // Nothing before the next ack period elapses...
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(machine.state(), LeaseState::Owner);

        // ...then the slow check notices the acknowledgment on its own.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(machine.state(), LeaseState::Idle);
        pollers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ack_poller_ignores_non_owner_sessions() {
        let store = MemoryLeaseStore::with_lease(dripsend_core::types::Lease {
            owner_id: "other".into(),
            is_running: true,
            ..Default::default()
        });
        let machine = Arc::new(LeaseMachine::with_session_id(
            Arc::new(store.clone()),
            DispatchConfig::default(),
            "waiter".into(),
        ));
        assert!(matches!(
            machine.request_start().await.unwrap(),
            StartDecision::Busy { .. }
        ));
        machine.send_handoff_request().await.unwrap();

        let mut pollers = PollerSet::new();
        pollers.spawn_ack_poller(machine.clone(), Duration::from_secs(60));

        // The owner releases, but the ack poller only refreshes while this
        // session is Owner; a waiting session relies on the status poller.
        store.write_lease(&LeasePatch::release()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(machine.state(), LeaseState::WaitingForRelease);
        pollers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_pollers_stop_observing() {
        let store = MemoryLeaseStore::new();
        let machine = owner_machine(&store);
        assert_eq!(
            machine.request_start().await.unwrap(),
            StartDecision::Started
        );

        let mut pollers = PollerSet::new();
        pollers.spawn_status_poller(machine.clone(), Duration::from_secs(5));
        pollers.shutdown().await;

        store
            .write_lease(&LeasePatch::request_handoff())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        // No poller left to observe the acknowledgment.
        assert_eq!(machine.state(), LeaseState::Owner);
    }

    #[tokio::test(start_paused = true)]
    async fn row_refresh_updates_session_figures() {
        let rows = MemoryRowStore::new(sample_rows(4));
        let session = session::shared(DispatchSession::new("owner", 2));
        session.lock().unwrap().delay_seconds = 2;

        let mut pollers = PollerSet::new();
        pollers.spawn_row_refresh(
            Arc::new(rows.clone()),
            session.clone(),
            Duration::from_secs(3),
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        {
            let s = session.lock().unwrap();
            assert_eq!(s.total, 4);
            assert_eq!(s.remaining_seconds, 8);
        }

        // A concurrent editor finishes two rows; the next tick notices.
        rows.set_row_status(0, RowStatus::Success).await.unwrap();
        rows.set_row_status(1, RowStatus::Fail).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        {
            let s = session.lock().unwrap();
            assert_eq!(s.remaining_seconds, 4);
        }
        pollers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn handoff_probe_checks_once_shortly_after_request() {
        let store = MemoryLeaseStore::with_lease(dripsend_core::types::Lease {
            owner_id: "other".into(),
            is_running: true,
            ..Default::default()
        });
        let machine = Arc::new(LeaseMachine::with_session_id(
            Arc::new(store.clone()),
            DispatchConfig::default(),
            "waiter".into(),
        ));
        assert!(matches!(
            machine.request_start().await.unwrap(),
            StartDecision::Busy { .. }
        ));
        machine.send_handoff_request().await.unwrap();

        // The owner releases almost immediately.
        store.write_lease(&LeasePatch::release()).await.unwrap();

        let mut pollers = PollerSet::new();
        pollers.spawn_handoff_probe(machine.clone(), Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(3)).await;

        // Observed well before a full 60s ack period.
        assert_eq!(machine.state(), LeaseState::CanTakeOver);
        pollers.shutdown().await;
    }
}
