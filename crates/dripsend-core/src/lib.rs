//! # Dripsend Core
//! Shared foundation for the dripsend workspace: configuration, the error
//! type, the row/lease data model, and the three collaborator traits
//! (row store, lease store, notifier) every other crate plugs into.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::DripsendConfig;
pub use error::{DripsendError, Result};
pub use traits::{LeaseStore, Notifier, RowStore};
pub use types::{Lease, LeasePatch, Row, RowStatus};
