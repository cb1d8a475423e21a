//! Periodic self-ping that keeps sleeping hosts awake.

use std::time::Duration;

use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

pub const PING_INTERVAL: Duration = Duration::from_secs(10 * 60);
const PING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct KeepAlive {
	client: reqwest::Client,
	url: Url,
	interval: Duration,
}

impl KeepAlive {
	pub fn new(url: Url) -> crate::error::Result<Self> {
		let client = reqwest::Client::builder().timeout(PING_TIMEOUT).build()?;
		Ok(Self {
			client,
			url,
			interval: PING_INTERVAL,
		})
	}

	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	pub async fn ping(&self) -> crate::error::Result<StatusCode> {
		let response = self.client.get(self.url.clone()).send().await?;
		Ok(response.status())
	}

	/// Pings once per interval, starting one interval from now.
	pub fn spawn(self) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(self.interval);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				match self.ping().await {
					Ok(status) => info!(target = "pairlink.keepalive", url = %self.url, %status, "self-ping"),
					Err(err) => warn!(target = "pairlink.keepalive", url = %self.url, error = %err, "self-ping failed"),
				}
			}
		})
	}
}
