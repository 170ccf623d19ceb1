//! Log-only notifier for dry runs — renders the message and prints it
//! instead of sending anything.

use async_trait::async_trait;

use dripsend_core::config::SmtpConfig;
use dripsend_core::error::Result;
use dripsend_core::traits::Notifier;
use dripsend_core::types::Row;

use crate::template;

/// Notifier that logs what would have been sent.
pub struct LogNotifier {
    config: SmtpConfig,
}

impl LogNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, row: &Row) -> Result<()> {
        tracing::info!(
            "📝 [dry-run] To: {} | Subject: {}",
            row.email,
            template::render(&self.config.subject, row)
        );
        tracing::debug!("📝 [dry-run] Body:\n{}", template::render(&self.config.body, row));
        Ok(())
    }
}
