//! Post-commit notifications.
//!
//! Messages go out only after the account write has landed. Delivery runs on a
//! spawned task and its outcome is logged, never returned to the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::logging::{log, obj, v_str, Domain, Level};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The invited user received the first-time gift.
    ReferralWelcome { user_id: String, referrer_id: String, gift: u64 },
    /// The inviter was credited for a new referral.
    ReferralCredited { user_id: String, referred_id: String, bonus: u64 },
    PackageActivated { user_id: String, package: String, expires_at: i64 },
}

impl Notification {
    pub fn user_id(&self) -> &str {
        match self {
            Notification::ReferralWelcome { user_id, .. }
            | Notification::ReferralCredited { user_id, .. }
            | Notification::PackageActivated { user_id, .. } => user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ReferralWelcome { .. } => "referral_welcome",
            Notification::ReferralCredited { .. } => "referral_credited",
            Notification::PackageActivated { .. } => "package_activated",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the structured log. Used when no chat transport is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let mut fields = obj(&[
            ("user_id", v_str(notification.user_id())),
            ("kind", v_str(notification.kind())),
        ]);
        fields.insert("payload".to_string(), serde_json::to_value(notification)?);
        log(Level::Info, Domain::Notify, "notification", fields);
        Ok(())
    }
}

/// Keeps everything it is asked to send. Optionally fails every send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Sends tried so far, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("notifier offline");
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}

/// Fire and forget. Outside a tokio runtime the messages are dropped with a warning.
pub fn dispatch(notifier: &Arc<dyn Notifier>, batch: Vec<Notification>) {
    if batch.is_empty() {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        log(
            Level::Warn,
            Domain::Notify,
            "dispatch_skipped",
            obj(&[("count", json!(batch.len())), ("reason", v_str("no runtime"))]),
        );
        return;
    };
    let notifier = Arc::clone(notifier);
    handle.spawn(async move {
        for notification in batch {
            if let Err(err) = notifier.send(&notification).await {
                log(
                    Level::Warn,
                    Domain::Notify,
                    "send_failed",
                    obj(&[
                        ("user_id", v_str(notification.user_id())),
                        ("kind", v_str(notification.kind())),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
            }
        }
    });
}
