//! Lease state machine — one client's view of who owns dispatch.
//!
//! The shared lease store has no compare-and-swap, so claiming is a
//! read-then-write with a guarded re-read shortly after (if another
//! session's id is on the document by then, we lost the race and back
//! off). Preemption is cooperative: an owner asked to release via the
//! `acknowledged` flag is never killed mid-row, only stopped before the
//! next one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dripsend_core::config::DispatchConfig;
use dripsend_core::error::Result;
use dripsend_core::traits::LeaseStore;
use dripsend_core::types::{Lease, LeasePatch};

/// How long after writing a claim we re-read to see whether it stuck.
const CLAIM_GUARD: Duration = Duration::from_millis(750);

/// Pause between lease-release retry attempts.
const RELEASE_RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Per-client ownership states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Not involved; free to request a start.
    Idle,
    /// Saw a foreign owner on start; operator may request a handoff.
    RequestingTakeover,
    /// Holds the lease; allowed to dispatch.
    Owner,
    /// Handoff requested; waiting for the foreign owner to release.
    WaitingForRelease,
    /// Foreign owner released; a fresh start will succeed.
    CanTakeOver,
}

impl std::fmt::Display for LeaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LeaseState::Idle => "Idle",
            LeaseState::RequestingTakeover => "RequestingTakeover",
            LeaseState::Owner => "Owner",
            LeaseState::WaitingForRelease => "WaitingForRelease",
            LeaseState::CanTakeOver => "CanTakeOver",
        };
        write!(f, "{name}")
    }
}

/// Outcome of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    /// Lease claimed; caller is the Owner.
    Started,
    /// Someone else is dispatching. Machine is in RequestingTakeover;
    /// the operator can choose to send a handoff request.
    Busy { owner_id: String },
}

struct Inner {
    state: LeaseState,
    /// True while our claim patch is on the shared document and a release
    /// write is still owed — survives preemption back to Idle.
    claimed: bool,
}

/// One client session's lease machine.
pub struct LeaseMachine {
    store: Arc<dyn LeaseStore>,
    session_id: String,
    config: DispatchConfig,
    inner: Mutex<Inner>,
}

impl LeaseMachine {
    pub fn new(store: Arc<dyn LeaseStore>, config: DispatchConfig) -> Self {
        let session_id = format!(
            "{}-{}",
            whoami::username(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        Self::with_session_id(store, config, session_id)
    }

    /// Fixed session id, for tests and for resuming a named session.
    pub fn with_session_id(
        store: Arc<dyn LeaseStore>,
        config: DispatchConfig,
        session_id: String,
    ) -> Self {
        Self {
            store,
            session_id,
            config,
            inner: Mutex::new(Inner {
                state: LeaseState::Idle,
                claimed: false,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> LeaseState {
        self.inner.lock().expect("lease state poisoned").state
    }

    pub fn is_owner(&self) -> bool {
        self.state() == LeaseState::Owner
    }

    fn set_state(&self, state: LeaseState) {
        self.inner.lock().expect("lease state poisoned").state = state;
    }

    /// Try to become the dispatching owner.
    ///
    /// Store errors propagate without touching local state — an
    /// unreachable store never produces an optimistic ownership claim.
    pub async fn request_start(&self) -> Result<StartDecision> {
        let lease = self.store.read_lease().await?;

        if lease.is_running && lease.owner_id != self.session_id {
            tracing::info!(
                "⏳ Lease busy: '{}' has been running since {}",
                lease.owner_id,
                lease.started_at
            );
            self.set_state(LeaseState::RequestingTakeover);
            return Ok(StartDecision::Busy {
                owner_id: lease.owner_id,
            });
        }

        self.store
            .write_lease(&LeasePatch::claim(
                &self.session_id,
                self.config.delay_seconds,
            ))
            .await?;

        // The store has no CAS: re-read after a beat and verify our claim
        // stuck. A concurrent claimer whose write landed second wins.
        tokio::time::sleep(CLAIM_GUARD).await;
        let observed = self.store.read_lease().await?;
        if observed.owner_id != self.session_id {
            tracing::warn!(
                "🏁 Lost claim race to '{}'; backing off",
                observed.owner_id
            );
            self.set_state(LeaseState::RequestingTakeover);
            return Ok(StartDecision::Busy {
                owner_id: observed.owner_id,
            });
        }

        {
            let mut inner = self.inner.lock().expect("lease state poisoned");
            inner.state = LeaseState::Owner;
            inner.claimed = true;
        }
        tracing::info!("🔑 Lease claimed by '{}'", self.session_id);
        Ok(StartDecision::Started)
    }

    /// Ask the current owner to stop. Only valid from RequestingTakeover.
    /// Writes `acknowledged` on the shared document; never touches ownerId.
    pub async fn send_handoff_request(&self) -> Result<()> {
        self.store.write_lease(&LeasePatch::request_handoff()).await?;
        self.set_state(LeaseState::WaitingForRelease);
        tracing::info!("🤝 Handoff requested; waiting for the owner to release");
        Ok(())
    }

    /// Fold a fresh lease observation into local state. Called by the
    /// pollers on every refresh; pure local, no store I/O.
    pub fn observe_lease(&self, lease: &Lease) {
        let mut inner = self.inner.lock().expect("lease state poisoned");
        match inner.state {
            LeaseState::Owner => {
                if lease.acknowledged && lease.owner_id == self.session_id {
                    // Cooperative preemption: stop before the next row.
                    inner.state = LeaseState::Idle;
                    tracing::info!("🛑 Handoff acknowledged; stopping after the in-flight row");
                }
            }
            LeaseState::WaitingForRelease => {
                if !lease.is_running {
                    inner.state = LeaseState::CanTakeOver;
                    tracing::info!("✅ Previous owner released; takeover available");
                }
            }
            _ => {}
        }
    }

    /// Read the lease and fold it into local state.
    pub async fn refresh(&self) -> Result<Lease> {
        let lease = self.store.read_lease().await?;
        self.observe_lease(&lease);
        Ok(lease)
    }

    /// Whether a release write is still owed to the shared store.
    pub fn holds_claim(&self) -> bool {
        self.inner.lock().expect("lease state poisoned").claimed
    }

    /// Release the shared lease. Retries transient write failures; if none
    /// land, the error surfaces so the operator can reset manually.
    pub async fn release(&self) -> Result<()> {
        if !self.holds_claim() {
            self.set_state(LeaseState::Idle);
            return Ok(());
        }

        let mut last_err = None;
        for attempt in 1..=self.config.release_retries.max(1) {
            match self.store.write_lease(&LeasePatch::release()).await {
                Ok(_) => {
                    let mut inner = self.inner.lock().expect("lease state poisoned");
                    inner.state = LeaseState::Idle;
                    inner.claimed = false;
                    tracing::info!("🔓 Lease released by '{}'", self.session_id);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("⚠️ Lease release attempt {attempt} failed: {e}");
                    last_err = Some(e);
                    tokio::time::sleep(RELEASE_RETRY_PAUSE).await;
                }
            }
        }
        Err(last_err.expect("at least one release attempt"))
    }

    /// Force-write a release patch regardless of local claim state — the
    /// manual reset path for a lease stranded by a dead owner.
    pub async fn force_release(&self) -> Result<()> {
        self.store.write_lease(&LeasePatch::release()).await?;
        let mut inner = self.inner.lock().expect("lease state poisoned");
        inner.state = LeaseState::Idle;
        inner.claimed = false;
        tracing::warn!("🧹 Lease force-released");
        Ok(())
    }
}
