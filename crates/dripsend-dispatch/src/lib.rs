//! # Dripsend Dispatch
//! The coordination-and-pacing core: the lease state machine that keeps at
//! most one operator session dispatching, the poller set that keeps the
//! local view of the shared lease and row snapshot fresh, and the
//! resumable batch dispatcher that paces sends against an absolute
//! wall-clock schedule.
//!
//! ## Architecture
//! ```text
//! LeaseMachine (Idle → Owner / RequestingTakeover → WaitingForRelease → CanTakeOver)
//!   ├── gates entry into Dispatcher (only an Owner dispatches)
//!   └── fed by PollerSet
//!         ├── status poller   (5s)  → observe_lease (cooperative preemption)
//!         ├── ack poller      (60s, Owner only, + one-shot probe)
//!         └── row refresh     (3s, while dispatching) → session progress
//!
//! Dispatcher
//!   ├── startIndex = first row not Success/Fail
//!   ├── per row: stop-check → status refetch → Processing claim → send → terminal status
//!   ├── sleeps to processStart + (i - startIndex) * delay  (no drift compounding)
//!   └── on exit: release lease, cancel pollers, final row refresh
//! ```

pub mod dispatcher;
pub mod lease;
pub mod pollers;
pub mod progress;
pub mod session;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use lease::{LeaseMachine, LeaseState, StartDecision};
pub use pollers::PollerSet;
pub use progress::Progress;
pub use session::DispatchSession;
