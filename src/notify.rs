use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ArchiverError;

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> Result<(), ArchiverError>;
}

/// Discord-compatible webhook: `POST {"content": "..."}`.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, ArchiverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("epaper-archiver/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArchiverError::WebhookHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| ArchiverError::WebhookHttp(err.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &str) -> Result<(), ArchiverError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { content: message })
            .send()
            .map_err(|err| ArchiverError::WebhookHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "webhook request failed".to_string());
            return Err(ArchiverError::WebhookStatus { status, message });
        }
        info!("notification sent");
        Ok(())
    }
}

/// Sends through `notifier` if one is configured; failures only get logged.
pub fn notify_quietly(notifier: Option<&dyn Notifier>, message: &str) {
    let Some(notifier) = notifier else {
        return;
    };
    if let Err(err) = notifier.notify(message) {
        warn!(error = %err, "notification failed");
    }
}
