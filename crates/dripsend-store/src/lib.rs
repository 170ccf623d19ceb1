//! # Dripsend Store
//! Clients for the two external documents dripsend coordinates through:
//! the contact sheet (row store) and the shared settings document (lease
//! store), plus in-memory implementations for dry-runs and tests.

pub mod lease;
pub mod memory;
pub mod sheets;

pub use lease::HttpLeaseStore;
pub use memory::{MemoryLeaseStore, MemoryRowStore, sample_rows};
pub use sheets::SheetsRowStore;
