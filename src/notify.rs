//! Outbound notifications — SMTP via lettre, or the log when unconfigured.
//!
//! Delivery is advisory: callers fire notifications only after the state
//! change has committed, and log failures instead of propagating them.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::NotifyError;

/// Outbound notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// SMTP notifier.
pub struct EmailNotifier {
    config: SmtpConfig,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Send an email via SMTP. Blocks on the socket — run in spawn_blocking.
    fn send_email(
        config: &SmtpConfig,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(config.from_address.parse().map_err(|e| {
                NotifyError::InvalidAddress {
                    address: config.from_address.clone(),
                    reason: format!("{e}"),
                }
            })?)
            .to(to.parse().map_err(|e| NotifyError::InvalidAddress {
                address: to.to_string(),
                reason: format!("{e}"),
            })?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| NotifyError::Send(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        transport
            .send(&email)
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        info!("Email sent to {to}");
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let config = self.config.clone();
        let to = to.to_string();
        let subject = subject.to_string();
        let body = body.to_string();

        tokio::task::spawn_blocking(move || Self::send_email(&config, &to, &subject, &body))
            .await
            .map_err(|e| NotifyError::Send(format!("Send task panicked: {e}")))?
    }
}

/// Send without awaiting the result. Used after a state change has
/// committed; delivery failure is logged, never surfaced to the caller.
pub fn send_detached(notifier: &Arc<dyn Notifier>, to: &str, subject: &str, body: &str) {
    let notifier = Arc::clone(notifier);
    let to = to.to_string();
    let subject = subject.to_string();
    let body = body.to_string();
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&to, &subject, &body).await {
            tracing::warn!("Notification to {to} failed: {e}");
        }
    });
}

/// Fallback notifier that writes to the log instead of the wire, so the
/// rest of the service behaves the same with SMTP unconfigured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, to: &str, subject: &str, _body: &str) -> Result<(), NotifyError> {
        info!(to, subject, "Notification (email disabled)");
        Ok(())
    }
}
