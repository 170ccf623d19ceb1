//! # Dripsend Notify
//! Outbound notification channels: SMTP email (the primary transport) and
//! a generic HTTP webhook. One notification per contact row, fire and
//! forget — transport acceptance is the only receipt.

pub mod email;
pub mod log;
pub mod template;
pub mod webhook;

pub use email::EmailNotifier;
pub use log::LogNotifier;
pub use webhook::WebhookNotifier;
