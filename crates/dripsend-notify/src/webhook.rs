//! Generic HTTP webhook notifier — POST one JSON document per row.
//! Useful when the downstream transport is an SMS gateway or an
//! automation hook rather than SMTP. Selected via `notify.channel`.

use async_trait::async_trait;

use dripsend_core::config::NotifyConfig;
use dripsend_core::error::{DripsendError, Result};
use dripsend_core::traits::Notifier;
use dripsend_core::types::Row;

pub struct WebhookNotifier {
    config: NotifyConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

/// The JSON document posted for one row. Every sheet column except the
/// status cell, which is dispatcher bookkeeping, not contact data.
fn payload(row: &Row) -> serde_json::Value {
    serde_json::json!({
        "contact": row.contact,
        "phone": row.phone,
        "email": row.email,
        "make": row.make,
        "model": row.model,
        "reg": row.reg,
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, row: &Row) -> Result<()> {
        let mut req = self
            .client
            .post(&self.config.webhook_url)
            .json(&payload(row))
            .timeout(std::time::Duration::from_secs(10));

        for (key, value) in &self.config.webhook_headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DripsendError::Notify(format!("Webhook send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ Webhook notified for {}", row.contact);
            Ok(())
        } else {
            Err(DripsendError::Notify(format!(
                "Webhook error {}",
                resp.status()
            )))
        }
    }
}
