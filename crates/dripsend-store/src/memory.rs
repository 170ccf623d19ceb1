//! In-memory row and lease stores.
//!
//! Same API as the real clients, no network. Used by `run --dry-run`,
//! `preview` against local fixtures, and the dispatch-crate tests. Both
//! stores carry an unreachable switch so store-outage behavior is testable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use dripsend_core::error::{DripsendError, Result};
use dripsend_core::traits::{LeaseStore, RowStore};
use dripsend_core::types::{Lease, LeasePatch, Row, RowStatus};

/// In-memory row store.
#[derive(Clone, Default)]
pub struct MemoryRowStore {
    rows: Arc<Mutex<Vec<Row>>>,
    /// Every status write, in order. Tests assert on this.
    writes: Arc<Mutex<Vec<(usize, RowStatus)>>>,
    unreachable: Arc<AtomicBool>,
}

impl MemoryRowStore {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
            writes: Arc::new(Mutex::new(Vec::new())),
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate the store going away (or coming back).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Vec<Row> {
        self.rows.lock().await.clone()
    }

    /// The ordered status-write history.
    pub async fn write_log(&self) -> Vec<(usize, RowStatus)> {
        self.writes.lock().await.clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DripsendError::Store("row store unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn list_rows(&self) -> Result<Vec<Row>> {
        self.check_reachable()?;
        Ok(self.rows.lock().await.clone())
    }

    async fn row_status(&self, index: usize) -> Result<RowStatus> {
        self.check_reachable()?;
        let rows = self.rows.lock().await;
        rows.get(index)
            .map(|row| row.status)
            .ok_or_else(|| DripsendError::Store(format!("row {index} out of range")))
    }

    async fn set_row_status(&self, index: usize, status: RowStatus) -> Result<()> {
        self.check_reachable()?;
        let mut rows = self.rows.lock().await;
        let row = rows
            .get_mut(index)
            .ok_or_else(|| DripsendError::Store(format!("row {index} out of range")))?;
        row.status = status;
        drop(rows);
        self.writes.lock().await.push((index, status));
        Ok(())
    }
}

/// In-memory lease store.
#[derive(Clone, Default)]
pub struct MemoryLeaseStore {
    lease: Arc<Mutex<Option<Lease>>>,
    unreachable: Arc<AtomicBool>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the document, e.g. with a lease already held by someone else.
    pub fn with_lease(lease: Lease) -> Self {
        Self {
            lease: Arc::new(Mutex::new(Some(lease))),
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Direct peek for assertions; creates nothing.
    pub async fn peek(&self) -> Option<Lease> {
        self.lease.lock().await.clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DripsendError::Lease("lease store unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn read_lease(&self) -> Result<Lease> {
        self.check_reachable()?;
        let mut slot = self.lease.lock().await;
        // Created lazily on first read, default not-running.
        Ok(slot.get_or_insert_with(Lease::default).clone())
    }

    async fn write_lease(&self, patch: &LeasePatch) -> Result<Lease> {
        self.check_reachable()?;
        let mut slot = self.lease.lock().await;
        let lease = slot.get_or_insert_with(Lease::default);
        lease.apply(patch);
        Ok(lease.clone())
    }
}

/// Fixture rows for tests and dry-runs.
pub fn sample_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| Row {
            contact: format!("Contact {i}"),
            phone: format!("555-01{i:02}"),
            email: format!("contact{i}@example.com"),
            make: "Ford".into(),
            model: "Focus".into(),
            reg: format!("AB{i:02} CDE"),
            status: RowStatus::Pending,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lease_created_lazily_on_first_read() {
        let store = MemoryLeaseStore::new();
        assert!(store.peek().await.is_none());
        let lease = store.read_lease().await.unwrap();
        assert!(!lease.is_running);
        assert_eq!(lease.owner_id, "");
        assert!(store.peek().await.is_some());
    }

    #[tokio::test]
    async fn writes_merge_and_are_logged() {
        let store = MemoryRowStore::new(sample_rows(2));
        store.set_row_status(1, RowStatus::Processing).await.unwrap();
        store.set_row_status(1, RowStatus::Success).await.unwrap();
        assert_eq!(store.row_status(1).await.unwrap(), RowStatus::Success);
        assert_eq!(
            store.write_log().await,
            vec![(1, RowStatus::Processing), (1, RowStatus::Success)]
        );
    }

    #[tokio::test]
    async fn unreachable_store_errors_instead_of_lying() {
        let store = MemoryLeaseStore::new();
        store.set_unreachable(true);
        assert!(store.read_lease().await.is_err());
        store.set_unreachable(false);
        assert!(store.read_lease().await.is_ok());
    }
}
