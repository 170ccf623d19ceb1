//! Collaborator traits — the three external seams the dispatch engine is
//! written against: the row store, the lease store, and the notifier.
//! Real clients live in `dripsend-store` / `dripsend-notify`; tests plug in
//! the in-memory doubles.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Lease, LeasePatch, Row, RowStatus};

/// Ordered external table of contact rows with a mutable status column.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Fetch the full ordered row list.
    async fn list_rows(&self) -> Result<Vec<Row>>;

    /// Fetch one row's current status. Used by the dispatcher right before
    /// claiming a row, so skip decisions never rest on a stale snapshot.
    async fn row_status(&self, index: usize) -> Result<RowStatus>;

    /// Write one row's status cell.
    async fn set_row_status(&self, index: usize, status: RowStatus) -> Result<()>;
}

/// The single shared lease document. No compare-and-swap: reads and
/// partial-patch writes only, and concurrent patches may interleave.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read the lease, creating the default (not running, no owner)
    /// document if none exists yet.
    async fn read_lease(&self) -> Result<Lease>;

    /// Merge a partial patch into the document and return the result.
    async fn write_lease(&self, patch: &LeasePatch) -> Result<Lease>;
}

/// Fire-and-forget outbound notification for one row.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one notification. `Ok(())` means the transport accepted the
    /// message; there is no delivery receipt beyond that.
    async fn send(&self, row: &Row) -> Result<()>;
}
