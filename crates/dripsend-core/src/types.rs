//! Row and lease data model — the documents dripsend shares with the
//! outside world.
//!
//! A `Row` is one line of the contact sheet (columns A..G); the seventh
//! column is a status cell the dispatcher treats as a durable per-row
//! checkpoint. A `Lease` is the single shared settings document that says
//! which operator session, if any, currently owns dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Zero-based index of the status column (column G).
pub const STATUS_COLUMN: usize = 6;

/// Per-row dispatch status, stored in the sheet's status column.
///
/// `Pending` is the empty cell. `Processing` is a soft in-flight claim
/// written before the notifier call; on resume it counts as `Pending`
/// because no terminal outcome landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Pending,
    Processing,
    Success,
    Fail,
}

impl RowStatus {
    /// The exact string stored in the sheet cell.
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Pending => "",
            RowStatus::Processing => "Processing",
            RowStatus::Success => "Success",
            RowStatus::Fail => "Fail",
        }
    }

    /// Parse a sheet cell. Unknown values are treated as `Pending` so a
    /// hand-edited cell never wedges the dispatcher.
    pub fn parse(cell: &str) -> Self {
        match cell.trim() {
            "Processing" => RowStatus::Processing,
            "Success" => RowStatus::Success,
            "Fail" => RowStatus::Fail,
            _ => RowStatus::Pending,
        }
    }

    /// Terminal statuses are never overwritten by the dispatcher.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RowStatus::Success | RowStatus::Fail)
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowStatus::Pending => write!(f, "Pending"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// One contact-sheet row: name, phone, email, make, model, reg, status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub contact: String,
    pub phone: String,
    pub email: String,
    pub make: String,
    pub model: String,
    pub reg: String,
    pub status: RowStatus,
}

impl Row {
    /// Build from the raw positional cells the sheet API returns.
    /// Trailing cells may be absent; missing cells read as empty.
    pub fn from_cells(cells: &[String]) -> Self {
        let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();
        Self {
            contact: cell(0),
            phone: cell(1),
            email: cell(2),
            make: cell(3),
            model: cell(4),
            reg: cell(5),
            status: RowStatus::parse(&cell(STATUS_COLUMN)),
        }
    }
}

/// The shared lease document. One instance, externally stored, mutable by
/// every client; the store offers no compare-and-swap, so every writer
/// treats every write as possibly racing with another (see the dispatch
/// crate's guarded claim).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Session id of the current owner; empty means no owner.
    #[serde(default)]
    pub owner_id: String,
    /// True iff an owner currently claims the dispatch lease.
    #[serde(default)]
    pub is_running: bool,
    /// True iff the current owner has been asked to release.
    #[serde(default)]
    pub acknowledged: bool,
    /// Timestamp of the last claim.
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    /// Owner-supplied inter-row pacing interval.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
}

pub(crate) fn default_delay_seconds() -> u64 {
    120
}

impl Default for Lease {
    fn default() -> Self {
        Self {
            owner_id: String::new(),
            is_running: false,
            acknowledged: false,
            started_at: Utc::now(),
            delay_seconds: default_delay_seconds(),
        }
    }
}

impl Lease {
    /// Apply a partial patch, field by field. Mirrors the store's
    /// merge-not-replace write semantics.
    pub fn apply(&mut self, patch: &LeasePatch) {
        if let Some(owner_id) = &patch.owner_id {
            self.owner_id = owner_id.clone();
        }
        if let Some(is_running) = patch.is_running {
            self.is_running = is_running;
        }
        if let Some(acknowledged) = patch.acknowledged {
            self.acknowledged = acknowledged;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = started_at;
        }
        if let Some(delay_seconds) = patch.delay_seconds {
            self.delay_seconds = delay_seconds;
        }
    }
}

/// Partial-field lease update. Only set fields are written; the store
/// merges them into the existing document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeasePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u64>,
}

impl LeasePatch {
    /// Patch that claims the lease for `owner_id`.
    pub fn claim(owner_id: &str, delay_seconds: u64) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            is_running: Some(true),
            acknowledged: Some(false),
            started_at: Some(Utc::now()),
            delay_seconds: Some(delay_seconds),
        }
    }

    /// Patch that releases the lease entirely.
    pub fn release() -> Self {
        Self {
            owner_id: Some(String::new()),
            is_running: Some(false),
            acknowledged: Some(false),
            started_at: None,
            delay_seconds: None,
        }
    }

    /// Patch that asks the current owner to stop. Never touches ownerId.
    pub fn request_handoff() -> Self {
        Self {
            acknowledged: Some(true),
            ..Self::default()
        }
    }
}
