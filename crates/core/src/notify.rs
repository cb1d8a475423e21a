//! Outbound user notifications.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::types::UserId;

/// Channel used to message users. Delivery is best-effort: callers log
/// failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
	async fn send_text(&self, recipient: UserId, text: &str) -> Result<()>;

	async fn send_image(&self, recipient: UserId, url: &str, caption: &str) -> Result<()>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
	async fn send_text(&self, recipient: UserId, text: &str) -> Result<()> {
		info!(target = "pairlink.notify", %recipient, text, "notification");
		Ok(())
	}

	async fn send_image(&self, recipient: UserId, url: &str, caption: &str) -> Result<()> {
		info!(target = "pairlink.notify", %recipient, url, caption, "image notification");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn log_notifier_never_fails() {
		let notifier = LogNotifier;
		assert!(notifier.send_text(UserId(1), "hello").await.is_ok());
		assert!(notifier.send_image(UserId(1), "https://example.com/a.jpg", "hi").await.is_ok());
	}
}
