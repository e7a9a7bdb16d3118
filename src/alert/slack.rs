//! Slack incoming-webhook notifier.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{AlertKind, AlertMessage, Notifier, NotifyError};

const ALERT_COLOR: &str = "#a6364f";
const INFO_COLOR: &str = "#36a64f";

/// Upper bound for one webhook delivery.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    fallback: &'a str,
    color: &'static str,
    author_name: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: String,
    attachments: Vec<Attachment<'a>>,
}

/// Posts messages to a Slack webhook, one attachment per message.
pub struct SlackNotifier {
    client: reqwest::Client,
    endpoint: String,
    app_name: String,
}

impl SlackNotifier {
    pub fn new(endpoint: &str, app_name: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            app_name: app_name.to_string(),
        })
    }

    fn payload<'a>(&'a self, messages: &'a [AlertMessage]) -> SlackMessage<'a> {
        SlackMessage {
            text: format!("Message from {}", self.app_name),
            attachments: messages
                .iter()
                .map(|m| Attachment {
                    fallback: &m.text,
                    color: match m.kind {
                        AlertKind::Alert => ALERT_COLOR,
                        AlertKind::Info => INFO_COLOR,
                    },
                    author_name: &self.app_name,
                    text: &m.text,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, messages: &[AlertMessage]) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.payload(messages))
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        tracing::debug!("Slack response status code: {}", status.as_u16());
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        if let Ok(body) = response.text().await {
            tracing::debug!("Slack response: {}", body);
        }
        Ok(())
    }
}
