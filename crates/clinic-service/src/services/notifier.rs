//! SMS and email delivery.
//!
//! Production sends go through [`HttpNotifier`], a JSON webhook to a
//! delivery gateway. Without a gateway configured the service falls back to
//! [`LogNotifier`]. Tests use [`RecordingNotifier`].

use crate::models::NotificationChannel;
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_notification;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Timeout for one gateway request.
const NOTIFIER_REQUEST_TIMEOUT_SECS: u64 = 10;

/// One outbound message.
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub channel: NotificationChannel,
    /// Phone number (sms) or email address (email).
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

impl Notification {
    pub fn sms(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel: NotificationChannel::Sms,
            recipient: recipient.into(),
            subject: None,
            body: body.into(),
        }
    }

    pub fn email(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            channel: NotificationChannel::Email,
            recipient: recipient.into(),
            subject: Some(subject.into()),
            body: body.into(),
        }
    }

    /// Address a user by phone if they have one, else by email.
    pub fn to_contact(
        phone: Option<&str>,
        email: Option<&str>,
        subject: &str,
        body: impl Into<String>,
    ) -> Option<Self> {
        match (phone, email) {
            (Some(phone), _) => Some(Self::sms(phone, body)),
            (None, Some(email)) => Some(Self::email(email, subject, body)),
            (None, None) => None,
        }
    }
}

// Recipient and body stay out of logs
impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("channel", &self.channel)
            .field("recipient", &hash_for_correlation(&self.recipient))
            .field("subject", &self.subject)
            .field("body", &"[REDACTED]")
            .finish()
    }
}

/// Delivery failures.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification gateway unreachable: {0}")]
    Transport(String),

    #[error("Notification gateway rejected the message with status {0}")]
    Rejected(u16),

    #[error("Notifier misconfigured: {0}")]
    Configuration(String),
}

/// Sends notifications over some channel.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sends a notification and swallows the failure.
///
/// Used for side effects that must never fail the request that caused them.
/// Returns whether the send succeeded.
pub async fn notify_best_effort(
    notifier: &dyn Notifier,
    kind: &'static str,
    notification: Notification,
) -> bool {
    let channel = notification.channel.as_str();
    match notifier.send(&notification).await {
        Ok(()) => {
            record_notification(kind, channel, "sent");
            true
        }
        Err(e) => {
            warn!(
                target: "clinic.notify",
                kind,
                channel,
                recipient_hash = %hash_for_correlation(&notification.recipient),
                error = %e,
                "Best-effort notification failed"
            );
            record_notification(kind, channel, "failed");
            false
        }
    }
}

/// JSON webhook notifier.
///
/// Posts the [`Notification`] as JSON with a bearer API key. Any non-2xx
/// response is a failure.
#[derive(Clone)]
pub struct HttpNotifier {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl fmt::Debug for HttpNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpNotifier")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpNotifier {
    /// # Errors
    ///
    /// Returns `NotifyError::Configuration` if the HTTP client cannot be built.
    pub fn new(url: String, api_key: Option<String>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(NOTIFIER_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "clinic.notify", error = %e, "Failed to build HTTP client");
                NotifyError::Configuration(e.to_string())
            })?;

        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip_all, name = "clinic.notify.http", fields(channel = %notification.channel))]
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "clinic.notify", error = %e, "Notification gateway request failed");
            NotifyError::Transport(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            warn!(target: "clinic.notify", status = %status, "Notification gateway rejected message");
            Err(NotifyError::Rejected(status.as_u16()))
        }
    }
}

/// Logs each send and succeeds. Used when no gateway is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            target: "clinic.notify",
            channel = %notification.channel,
            recipient_hash = %hash_for_correlation(&notification.recipient),
            subject = notification.subject.as_deref().unwrap_or(""),
            "Notification (log only)"
        );
        Ok(())
    }
}

/// Keeps every notification in memory.
///
/// Backs the test harness; a failing variant exercises error paths.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send fails (after recording the attempt).
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages sent to one recipient, oldest first.
    pub fn sent_to(&self, recipient: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient == recipient)
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());

        if self.fail {
            Err(NotifyError::Transport("recording notifier set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_json_shape() {
        let json = serde_json::to_value(Notification::sms("+15550100", "Your code")).unwrap();
        assert_eq!(json["channel"], "sms");
        assert_eq!(json["recipient"], "+15550100");
        assert!(json.get("subject").is_none());

        let json =
            serde_json::to_value(Notification::email("a@clinic.test", "Hello", "Body")).unwrap();
        assert_eq!(json["subject"], "Hello");
    }

    #[test]
    fn test_to_contact_prefers_phone() {
        let sms = Notification::to_contact(Some("+15550100"), Some("a@b.test"), "S", "hi").unwrap();
        assert_eq!(sms.channel, NotificationChannel::Sms);
        assert_eq!(sms.recipient, "+15550100");

        let email = Notification::to_contact(None, Some("a@b.test"), "S", "hi").unwrap();
        assert_eq!(email.channel, NotificationChannel::Email);
        assert_eq!(email.subject.as_deref(), Some("S"));

        assert!(Notification::to_contact(None, None, "S", "hi").is_none());
    }

    #[test]
    fn test_debug_hides_recipient_and_body() {
        let debug = format!("{:?}", Notification::sms("+15550100", "123456"));
        assert!(!debug.contains("+15550100"));
        assert!(!debug.contains("123456"));
    }

    #[tokio::test]
    async fn test_best_effort_reports_outcome() {
        let ok = RecordingNotifier::new();
        assert!(notify_best_effort(&ok, "test", Notification::sms("+1555", "hi")).await);
        assert_eq!(ok.sent_to("+1555").len(), 1);

        let failing = RecordingNotifier::failing();
        assert!(!notify_best_effort(&failing, "test", Notification::sms("+1555", "hi")).await);
        assert_eq!(failing.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        assert!(LogNotifier
            .send(&Notification::email("a@clinic.test", "s", "b"))
            .await
            .is_ok());
    }

    #[test]
    fn test_http_notifier_debug_redacts_key() {
        let notifier =
            HttpNotifier::new("http://gateway.test/send".to_string(), Some("k-123".to_string()))
                .unwrap();
        let debug = format!("{notifier:?}");
        assert!(debug.contains("gateway.test"));
        assert!(!debug.contains("k-123"));
    }
}
