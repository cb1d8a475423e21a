//! Webhook delivery of user notifications.

use std::time::Duration;

use async_trait::async_trait;
use pairlink::UserId;
use pairlink::notify::Notifier;
use serde::Serialize;
use tracing::debug;
use url::Url;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Body posted to the webhook for every notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookPayload<'a> {
	Text { recipient: UserId, text: &'a str },
	Image { recipient: UserId, url: &'a str, caption: &'a str },
}

/// Posts notifications as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
	client: reqwest::Client,
	url: Url,
}

impl WebhookNotifier {
	pub fn new(url: Url) -> crate::error::Result<Self> {
		let client = reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build()?;
		Ok(Self { client, url })
	}

	async fn deliver(&self, payload: WebhookPayload<'_>) -> pairlink::Result<()> {
		let response = self
			.client
			.post(self.url.clone())
			.json(&payload)
			.send()
			.await
			.map_err(|err| pairlink::Error::Notify(err.to_string()))?;
		let status = response.status();
		if !status.is_success() {
			return Err(pairlink::Error::Notify(format!("webhook answered {status}")));
		}
		debug!(target = "pairlink.notify", %status, "webhook delivered");
		Ok(())
	}
}

#[async_trait]
impl Notifier for WebhookNotifier {
	async fn send_text(&self, recipient: UserId, text: &str) -> pairlink::Result<()> {
		self.deliver(WebhookPayload::Text { recipient, text }).await
	}

	async fn send_image(&self, recipient: UserId, url: &str, caption: &str) -> pairlink::Result<()> {
		self.deliver(WebhookPayload::Image { recipient, url, caption }).await
	}
}
