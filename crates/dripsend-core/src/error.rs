//! Dripsend error type.

use thiserror::Error;

/// Workspace-wide error type.
#[derive(Debug, Error)]
pub enum DripsendError {
    /// Configuration file missing, unreadable, or invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// Row store (sheet) read/write failed.
    #[error("Row store error: {0}")]
    Store(String),

    /// Lease store (settings document) read/write failed.
    #[error("Lease error: {0}")]
    Lease(String),

    /// Notification send failed.
    #[error("Notify error: {0}")]
    Notify(String),

    /// Message template could not be rendered.
    #[error("Template error: {0}")]
    Template(String),
}

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, DripsendError>;
