//! SMTP email notifier.
//!
//! STARTTLS relay (port 587 by default, Gmail-style app-password auth),
//! plain-text body rendered per row from the configured templates.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use dripsend_core::config::SmtpConfig;
use dripsend_core::error::{DripsendError, Result};
use dripsend_core::traits::Notifier;
use dripsend_core::types::Row;

use crate::template;

/// Email notifier over an async SMTP relay.
pub struct EmailNotifier {
    config: SmtpConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let creds = Credentials::new(config.email.clone(), config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| DripsendError::Notify(format!("SMTP relay: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Self { config, mailer })
    }

    fn build_message(&self, row: &Row) -> Result<Message> {
        let from_name = self.config.display_name.as_deref().unwrap_or("Dripsend");
        let from: Mailbox = format!("{from_name} <{}>", self.config.email)
            .parse()
            .map_err(|e| DripsendError::Notify(format!("Invalid from address: {e}")))?;
        let to: Mailbox = row
            .email
            .parse()
            .map_err(|e| DripsendError::Notify(format!("Invalid recipient '{}': {e}", row.email)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(template::render(&self.config.subject, row))
            .header(ContentType::TEXT_PLAIN)
            .body(template::render(&self.config.body, row))
            .map_err(|e| DripsendError::Notify(format!("Build email: {e}")))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, row: &Row) -> Result<()> {
        let message = self.build_message(row)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| DripsendError::Notify(format!("SMTP send: {e}")))?;
        tracing::info!("📧 Email sent to {}", row.email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dripsend_core::types::RowStatus;

    fn notifier() -> EmailNotifier {
        EmailNotifier::new(SmtpConfig {
            email: "sender@example.com".into(),
            password: "app-password".into(),
            ..SmtpConfig::default()
        })
        .unwrap()
    }

    fn row(email: &str) -> Row {
        Row {
            contact: "Ana".into(),
            phone: "555-0101".into(),
            email: email.into(),
            make: "Ford".into(),
            model: "Focus".into(),
            reg: "AB12 CDE".into(),
            status: RowStatus::Pending,
        }
    }

    #[tokio::test]
    async fn builds_message_with_rendered_subject() {
        let msg = notifier().build_message(&row("ana@example.com")).unwrap();
        let rendered = String::from_utf8(msg.formatted()).unwrap();
        assert!(rendered.contains("Outstanding enquiry for your Ford Focus"));
        assert!(rendered.contains("To: ana@example.com"));
    }

    #[tokio::test]
    async fn bad_recipient_is_a_notify_error() {
        let err = notifier().build_message(&row("not an address")).unwrap_err();
        assert!(matches!(err, DripsendError::Notify(_)));
    }
}
