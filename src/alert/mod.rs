//! Threshold alerts and the notification outbox.

mod slack;

pub use slack::*;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::store::{AlertThresholds, LatestResult};

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Network(String),
    #[error("webhook answered with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Info,
    Alert,
}

/// A short text queued for the notification channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub kind: AlertKind,
    pub text: String,
}

impl AlertMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::Info,
            text: text.into(),
        }
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::Alert,
            text: text.into(),
        }
    }
}

/// An external channel that messages are delivered to.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, messages: &[AlertMessage]) -> Result<(), NotifyError>;
}

/// Compare a snapshot against the configured floors.
pub fn evaluate(result: &LatestResult, thresholds: &AlertThresholds) -> Vec<AlertMessage> {
    let mut alerts = Vec::new();

    if result.down_speed < thresholds.download {
        alerts.push(AlertMessage::alert(format!(
            "Current Download speed ({}) lower than {}",
            result.down_speed_str, thresholds.download
        )));
    }
    if result.up_speed < thresholds.upload {
        alerts.push(AlertMessage::alert(format!(
            "Current Upload speed ({}) lower than {}",
            result.up_speed_str, thresholds.upload
        )));
    }

    alerts
}

/// Ordered outbox in front of a [`Notifier`].
///
/// Sending always drains the outbox first, so a failed delivery is dropped
/// rather than resent with the next batch.
pub struct Alerter {
    notifier: Arc<dyn Notifier>,
    outbox: Mutex<Vec<AlertMessage>>,
}

impl Alerter {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn add_message(&self, text: impl Into<String>) {
        self.lock().push(AlertMessage::info(text));
    }

    pub fn add_alert(&self, alert: AlertMessage) {
        self.lock().push(alert);
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Send everything queued and wait for the outcome.
    pub async fn flush(&self) -> bool {
        let messages = self.take();
        if messages.is_empty() {
            return true;
        }
        deliver(self.notifier.as_ref(), messages).await
    }

    /// Send everything queued from a detached task. Returns `None` when the
    /// outbox was empty.
    pub fn dispatch(&self) -> Option<JoinHandle<bool>> {
        let messages = self.take();
        if messages.is_empty() {
            return None;
        }
        let notifier = self.notifier.clone();
        Some(tokio::spawn(async move {
            deliver(notifier.as_ref(), messages).await
        }))
    }

    fn take(&self) -> Vec<AlertMessage> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AlertMessage>> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn deliver(notifier: &dyn Notifier, messages: Vec<AlertMessage>) -> bool {
    match notifier.send(&messages).await {
        Ok(()) => {
            tracing::debug!("Delivered {} notification(s)", messages.len());
            true
        }
        Err(e) => {
            tracing::error!("Error while sending {} notification(s): {}", messages.len(), e);
            false
        }
    }
}
