//! HTTP lease store.
//!
//! The lease is a single settings document behind a small REST endpoint:
//! GET returns the document (the endpoint creates the default one on first
//! read), POST merges a partial patch. No compare-and-swap; callers must
//! treat every write as possibly racing with another client's.

use async_trait::async_trait;
use serde::Deserialize;

use dripsend_core::config::LeaseConfig;
use dripsend_core::error::{DripsendError, Result};
use dripsend_core::traits::LeaseStore;
use dripsend_core::types::{Lease, LeasePatch};

/// Lease store backed by the shared settings endpoint.
pub struct HttpLeaseStore {
    config: LeaseConfig,
    client: reqwest::Client,
}

/// Endpoint envelope: `{ "success": true, "data": { ...lease... } }`.
#[derive(Debug, Deserialize)]
struct LeaseEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<Lease>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpLeaseStore {
    pub fn new(config: LeaseConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.timeout_secs)
    }

    async fn unwrap_envelope(response: reqwest::Response) -> Result<Lease> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DripsendError::Lease(format!(
                "Lease endpoint error {status}: {body}"
            )));
        }
        let envelope: LeaseEnvelope = response
            .json()
            .await
            .map_err(|e| DripsendError::Lease(format!("Invalid lease response: {e}")))?;
        if !envelope.success {
            return Err(DripsendError::Lease(format!(
                "Lease endpoint rejected request: {}",
                envelope.error.unwrap_or_else(|| "unknown".into())
            )));
        }
        envelope
            .data
            .ok_or_else(|| DripsendError::Lease("Lease response missing document".into()))
    }
}

#[async_trait]
impl LeaseStore for HttpLeaseStore {
    async fn read_lease(&self) -> Result<Lease> {
        let response = self
            .client
            .get(&self.config.endpoint)
            .timeout(self.timeout())
            .send()
            .await
            .map_err(|e| DripsendError::Lease(format!("Lease read failed: {e}")))?;
        Self::unwrap_envelope(response).await
    }

    async fn write_lease(&self, patch: &LeasePatch) -> Result<Lease> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(patch)
            .timeout(self.timeout())
            .send()
            .await
            .map_err(|e| DripsendError::Lease(format!("Lease write failed: {e}")))?;
        let lease = Self::unwrap_envelope(response).await?;
        tracing::debug!(
            "🔑 Lease patched: running={} owner='{}' ack={}",
            lease.is_running,
            lease.owner_id,
            lease.acknowledged
        );
        Ok(lease)
    }
}
