//! Chat webhook notifier.

use serde_json::json;

use super::{Notification, Notifier, NotifyError};
use crate::backend::BackendFuture;

/// Posts `{"text": ...}` to an incoming webhook.
#[derive(Clone, Debug)]
pub struct ChatNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl ChatNotifier {
    /// Creates a notifier for `webhook_url`.
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Notifier for ChatNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BackendFuture<'a, (), NotifyError> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.webhook_url)
                .json(&json!({ "text": notification.text }))
                .send()
                .await
                .map_err(|err| NotifyError::Transport(err.to_string()))?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(NotifyError::Rejected(status.as_u16()))
            }
        })
    }
}
