//! Side-channel admin-alert notifier (§6, §5 "Admin notification email is
//! best-effort and never gates pipeline progress"). No outbound mail
//! transport is wired up here — this is the ambient-logging-plus-stub shape
//! the core requires of the actual mailer, which is an external collaborator.

use tracing::{error, warn};

#[derive(Clone)]
pub struct Notifier {
    recipients: Vec<String>,
}

impl Notifier {
    pub fn new(recipients: Vec<String>) -> Self {
        Self { recipients }
    }

    /// Failures here are logged, never propagated — an alert that can't be
    /// sent must not turn into a second pipeline failure.
    pub async fn send_admin_alert(&self, subject: &str, html_body: &str) {
        if self.recipients.is_empty() {
            warn!(subject, "admin alert suppressed, no ADMIN_ALERT_EMAILS configured");
            return;
        }
        match self.deliver(subject, html_body).await {
            Ok(()) => {}
            Err(e) => error!(subject, error = %e, "failed to deliver admin alert"),
        }
    }

    async fn deliver(&self, subject: &str, html_body: &str) -> Result<(), anyhow::Error> {
        for recipient in &self.recipients {
            tracing::info!(recipient, subject, body_len = html_body.len(), "admin alert dispatched");
        }
        Ok(())
    }
}
