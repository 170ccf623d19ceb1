//! Google Sheets row store.
//!
//! The contact list lives in columns A..G of one tab, data starting at
//! sheet row 2 (row 1 is headers). Column G is the status cell. Reads use
//! the `values.get` endpoint, status writes use `values.update` with RAW
//! input, exactly the two calls the sheet exposes to us.

use async_trait::async_trait;
use serde::Deserialize;

use dripsend_core::config::SheetConfig;
use dripsend_core::error::{DripsendError, Result};
use dripsend_core::traits::RowStore;
use dripsend_core::types::{Row, RowStatus};

/// First sheet row holding data (1-based, row 1 is the header).
const DATA_START_ROW: usize = 2;

/// Row store backed by the Google Sheets values API.
pub struct SheetsRowStore {
    config: SheetConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl SheetsRowStore {
    pub fn new(config: SheetConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            self.config.api_base, self.config.spreadsheet_id, range
        )
    }

    /// A1-notation range for the whole data region.
    fn list_range(&self) -> String {
        format!("{}!A{}:G", self.config.tab, DATA_START_ROW)
    }

    /// A1-notation range for one row's status cell.
    fn status_range(&self, index: usize) -> String {
        format!("{}!G{}", self.config.tab, index + DATA_START_ROW)
    }

    async fn fetch_range(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let response = self
            .client
            .get(self.values_url(range))
            .bearer_auth(&self.config.api_token)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| DripsendError::Store(format!("Sheet fetch failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DripsendError::Store(format!(
                "Sheet API error {status}: {body}"
            )));
        }

        let parsed: ValuesResponse = response
            .json()
            .await
            .map_err(|e| DripsendError::Store(format!("Invalid sheet response: {e}")))?;
        Ok(parsed.values)
    }
}

#[async_trait]
impl RowStore for SheetsRowStore {
    async fn list_rows(&self) -> Result<Vec<Row>> {
        let values = self.fetch_range(&self.list_range()).await?;
        let rows: Vec<Row> = values.iter().map(|cells| Row::from_cells(cells)).collect();
        tracing::debug!("📋 Fetched {} rows from sheet", rows.len());
        Ok(rows)
    }

    async fn row_status(&self, index: usize) -> Result<RowStatus> {
        let values = self.fetch_range(&self.status_range(index)).await?;
        let cell = values
            .first()
            .and_then(|row| row.first())
            .map(String::as_str)
            .unwrap_or("");
        Ok(RowStatus::parse(cell))
    }

    async fn set_row_status(&self, index: usize, status: RowStatus) -> Result<()> {
        let url = format!(
            "{}?valueInputOption=RAW",
            self.values_url(&self.status_range(index))
        );
        let body = serde_json::json!({ "values": [[status.as_str()]] });

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| DripsendError::Store(format!("Status update failed: {e}")))?;

        if !response.status().is_success() {
            let status_code = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DripsendError::Store(format!(
                "Status update error {status_code}: {body}"
            )));
        }

        tracing::debug!("✏️ Row {index} status set to '{}'", status.as_str());
        Ok(())
    }
}
