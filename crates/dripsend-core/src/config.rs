//! Dripsend configuration system.
//!
//! TOML file at `~/.dripsend/config.toml`, with env-var overrides for the
//! two secrets (sheet API token, SMTP password) so the file can stay
//! credential-free.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{DripsendError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DripsendConfig {
    #[serde(default)]
    pub sheet: SheetConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Row store: the contact sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetConfig {
    /// Spreadsheet document id.
    #[serde(default)]
    pub spreadsheet_id: String,
    /// Tab name inside the document.
    #[serde(default = "default_tab")]
    pub tab: String,
    /// API base URL. Overridable for tests.
    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,
    /// Bearer token for the sheets API. Usually left empty here and
    /// supplied via DRIPSEND_SHEETS_TOKEN.
    #[serde(default)]
    pub api_token: String,
}

fn default_tab() -> String {
    "Sheet1".into()
}
fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com/v4/spreadsheets".into()
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            tab: default_tab(),
            api_base: default_sheets_api_base(),
            api_token: String::new(),
        }
    }
}

/// Lease store: the shared settings endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Settings endpoint URL (GET reads/creates, POST patches).
    #[serde(default)]
    pub endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_lease_timeout")]
    pub timeout_secs: u64,
}

fn default_lease_timeout() -> u64 {
    10
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: default_lease_timeout(),
        }
    }
}

/// Which outbound channel carries the per-row notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    /// SMTP email, configured under `[smtp]`.
    #[default]
    Email,
    /// HTTP webhook; one JSON POST per row.
    Webhook,
}

/// Outbound channel selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub channel: NotifyChannel,
    /// Webhook endpoint; required when channel = "webhook".
    #[serde(default)]
    pub webhook_url: String,
    /// Extra headers sent with every webhook request (auth tokens etc).
    #[serde(default)]
    pub webhook_headers: HashMap<String, String>,
}

/// SMTP notifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Sender address and SMTP username.
    #[serde(default)]
    pub email: String,
    /// App password. Usually supplied via DRIPSEND_SMTP_PASSWORD.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Subject template; `{contact}`, `{make}`, `{model}`, `{reg}`,
    /// `{phone}`, `{email}` placeholders are substituted per row.
    #[serde(default = "default_subject")]
    pub subject: String,
    /// Plain-text body template, same placeholders.
    #[serde(default = "default_body")]
    pub body: String,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_subject() -> String {
    "Outstanding enquiry for your {make} {model}".into()
}
fn default_body() -> String {
    "Hi {contact},\n\n\
     We still have an outstanding enquiry for your {make} {model} ({reg}).\n\
     We have {phone} on file as your contact number.\n"
        .into()
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            email: String::new(),
            password: String::new(),
            display_name: None,
            subject: default_subject(),
            body: default_body(),
        }
    }
}

/// Pacing and polling knobs for the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Inter-row pacing interval. Minimum 1.
    #[serde(default = "default_delay")]
    pub delay_seconds: u64,
    /// Lease view refresh period.
    #[serde(default = "default_status_poll")]
    pub status_poll_secs: u64,
    /// Secondary handoff-acknowledgment check period (Owner only).
    #[serde(default = "default_ack_poll")]
    pub ack_poll_secs: u64,
    /// Row snapshot refresh period while dispatching.
    #[serde(default = "default_row_refresh")]
    pub row_refresh_secs: u64,
    /// One-shot ack probe delay after a handoff request is sent.
    #[serde(default = "default_handoff_probe")]
    pub handoff_probe_secs: u64,
    /// How many times a failed lease release is retried before the
    /// failure is surfaced to the operator.
    #[serde(default = "default_release_retries")]
    pub release_retries: u32,
}

fn default_delay() -> u64 {
    120
}
fn default_status_poll() -> u64 {
    5
}
fn default_ack_poll() -> u64 {
    60
}
fn default_row_refresh() -> u64 {
    3
}
fn default_handoff_probe() -> u64 {
    2
}
fn default_release_retries() -> u32 {
    3
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay(),
            status_poll_secs: default_status_poll(),
            ack_poll_secs: default_ack_poll(),
            row_refresh_secs: default_row_refresh(),
            handoff_probe_secs: default_handoff_probe(),
            release_retries: default_release_retries(),
        }
    }
}

impl DripsendConfig {
    /// Load config from the default path (~/.dripsend/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DripsendError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DripsendError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config.with_env_overrides())
    }

    /// Default config path (~/.dripsend/config.toml).
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".dripsend").join("config.toml")
    }

    /// Secrets from the environment win over the file.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var("DRIPSEND_SHEETS_TOKEN") {
            self.sheet.api_token = token;
        }
        if let Ok(pass) = std::env::var("DRIPSEND_SMTP_PASSWORD") {
            self.smtp.password = pass;
        }
        self
    }

    /// Validate the knobs the dispatch engine depends on.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.delay_seconds < 1 {
            return Err(DripsendError::Config(
                "dispatch.delay_seconds must be at least 1".into(),
            ));
        }
        if self.dispatch.status_poll_secs < 1 || self.dispatch.row_refresh_secs < 1 {
            return Err(DripsendError::Config(
                "poll periods must be at least 1 second".into(),
            ));
        }
        if self.notify.channel == NotifyChannel::Webhook && self.notify.webhook_url.is_empty() {
            return Err(DripsendError::Config(
                "notify.webhook_url is required when notify.channel = \"webhook\"".into(),
            ));
        }
        Ok(())
    }
}
