//! In-memory protocol client and notifier for tests.
//!
//! # Example
//!
//! ```ignore
//! let (client, controller) = FakeProtocolBuilder::new().build();
//! controller.script_code(Err(CodeRequestError::new(Some(428), "closed")));
//!
//! // drive a pairing attempt with `client`...
//! let socket = controller.wait_for_opened(1).await;
//! socket.emit(ConnectionUpdate::open());
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use pairlink_protocol::ConnectionUpdate;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::connection::{OpenConfig, OpenedConnection, ProtocolClient, ProtocolConnection};
use crate::error::{CodeRequestError, Result};
use crate::notify::Notifier;
use crate::types::UserId;

pub const DEFAULT_FAKE_CODE: &str = "ABCD1234";

/// Builder for a fake protocol client and its controller.
pub struct FakeProtocolBuilder {
	auto_connecting: bool,
}

impl FakeProtocolBuilder {
	pub fn new() -> Self {
		Self { auto_connecting: true }
	}

	/// When set (the default), every opened socket immediately reports
	/// `connecting`, like the real library does.
	pub fn auto_connecting(mut self, enabled: bool) -> Self {
		self.auto_connecting = enabled;
		self
	}

	pub fn build(self) -> (Arc<FakeProtocolClient>, FakeProtocolController) {
		let shared = Arc::new(FakeShared {
			auto_connecting: self.auto_connecting,
			next_id: AtomicU32::new(1),
			sockets: Mutex::new(Vec::new()),
			code_script: Mutex::new(VecDeque::new()),
			open_script: Mutex::new(VecDeque::new()),
			opened: Notify::new(),
		});
		let client = Arc::new(FakeProtocolClient { shared: Arc::clone(&shared) });
		(client, FakeProtocolController { shared })
	}
}

impl Default for FakeProtocolBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct FakeShared {
	auto_connecting: bool,
	next_id: AtomicU32,
	sockets: Mutex<Vec<FakeSocket>>,
	code_script: Mutex<VecDeque<std::result::Result<String, CodeRequestError>>>,
	open_script: Mutex<VecDeque<CodeRequestError>>,
	opened: Notify,
}

pub struct FakeProtocolClient {
	shared: Arc<FakeShared>,
}

#[async_trait]
impl ProtocolClient for FakeProtocolClient {
	async fn open(&self, config: OpenConfig) -> std::result::Result<OpenedConnection, CodeRequestError> {
		if let Some(err) = self.shared.open_script.lock().pop_front() {
			return Err(err);
		}

		let id = format!("fake-{}", self.shared.next_id.fetch_add(1, Ordering::SeqCst));
		let (tx, rx) = mpsc::unbounded_channel();
		if self.shared.auto_connecting {
			let _ = tx.send(ConnectionUpdate::connecting());
		}
		let socket = FakeSocket {
			state: Arc::new(SocketState {
				id,
				config,
				updates: Mutex::new(Some(tx)),
				closed: AtomicBool::new(false),
				code_requests: Mutex::new(Vec::new()),
				shared: Arc::downgrade(&self.shared),
			}),
		};
		self.shared.sockets.lock().push(socket.clone());
		self.shared.opened.notify_waiters();

		Ok(OpenedConnection::new(Arc::new(socket), rx))
	}
}

/// Controller for scripting responses and inspecting opened sockets.
pub struct FakeProtocolController {
	shared: Arc<FakeShared>,
}

impl FakeProtocolController {
	/// Queues the outcome of the next pairing-code request. Unscripted
	/// requests succeed with [`DEFAULT_FAKE_CODE`].
	pub fn script_code(&self, outcome: std::result::Result<String, CodeRequestError>) {
		self.shared.code_script.lock().push_back(outcome);
	}

	/// Makes the next `open` fail with `err`.
	pub fn script_open_failure(&self, err: CodeRequestError) {
		self.shared.open_script.lock().push_back(err);
	}

	pub fn opened(&self) -> Vec<FakeSocket> {
		self.shared.sockets.lock().clone()
	}

	pub fn open_count(&self) -> usize {
		self.shared.sockets.lock().len()
	}

	/// Waits until at least `count` sockets were opened and returns the
	/// `count`-th one.
	pub async fn wait_for_opened(&self, count: usize) -> FakeSocket {
		loop {
			let notified = self.shared.opened.notified();
			if let Some(socket) = self.shared.sockets.lock().get(count - 1) {
				return socket.clone();
			}
			notified.await;
		}
	}

	/// Waits until the socket's pairing code was requested.
	pub async fn wait_for_code_request(&self, socket: &FakeSocket) {
		while socket.code_requests().is_empty() {
			tokio::time::sleep(std::time::Duration::from_millis(10)).await;
		}
	}
}

struct SocketState {
	id: String,
	config: OpenConfig,
	updates: Mutex<Option<mpsc::UnboundedSender<ConnectionUpdate>>>,
	closed: AtomicBool,
	code_requests: Mutex<Vec<String>>,
	shared: std::sync::Weak<FakeShared>,
}

/// One socket opened by the fake client; also the test's view of it.
#[derive(Clone)]
pub struct FakeSocket {
	state: Arc<SocketState>,
}

impl FakeSocket {
	pub fn auth_dir(&self) -> PathBuf {
		self.state.config.auth_dir.clone()
	}

	/// Delivers a lifecycle update; ignored once the socket is closed.
	pub fn emit(&self, update: ConnectionUpdate) {
		if let Some(tx) = self.state.updates.lock().as_ref() {
			let _ = tx.send(update);
		}
	}

	pub fn is_closed(&self) -> bool {
		self.state.closed.load(Ordering::SeqCst)
	}

	pub fn code_requests(&self) -> Vec<String> {
		self.state.code_requests.lock().clone()
	}

	pub fn socket_id(&self) -> &str {
		&self.state.id
	}
}

#[async_trait]
impl ProtocolConnection for FakeSocket {
	fn id(&self) -> &str {
		&self.state.id
	}

	async fn request_pairing_code(&self, phone: &str) -> std::result::Result<String, CodeRequestError> {
		self.state.code_requests.lock().push(phone.to_string());
		let scripted = self.state.shared.upgrade().and_then(|shared| shared.code_script.lock().pop_front());
		scripted.unwrap_or_else(|| Ok(DEFAULT_FAKE_CODE.to_string()))
	}

	async fn close(&self) {
		self.state.closed.store(true, Ordering::SeqCst);
		self.state.updates.lock().take();
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
	Text { recipient: UserId, text: String },
	Image { recipient: UserId, url: String, caption: String },
}

/// Notifier that records every message instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
	sent: Mutex<Vec<SentMessage>>,
	fail_for: Mutex<Vec<UserId>>,
}

impl RecordingNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every delivery to `user` fail.
	pub fn fail_for(&self, user: UserId) {
		self.fail_for.lock().push(user);
	}

	pub fn sent(&self) -> Vec<SentMessage> {
		self.sent.lock().clone()
	}

	pub fn texts_for(&self, user: UserId) -> Vec<String> {
		self.sent
			.lock()
			.iter()
			.filter_map(|message| match message {
				SentMessage::Text { recipient, text } if *recipient == user => Some(text.clone()),
				_ => None,
			})
			.collect()
	}

	fn check(&self, user: UserId) -> Result<()> {
		if self.fail_for.lock().contains(&user) {
			return Err(crate::Error::Notify(format!("delivery to {user} failed")));
		}
		Ok(())
	}
}

#[async_trait]
impl Notifier for RecordingNotifier {
	async fn send_text(&self, recipient: UserId, text: &str) -> Result<()> {
		self.check(recipient)?;
		self.sent.lock().push(SentMessage::Text {
			recipient,
			text: text.to_string(),
		});
		Ok(())
	}

	async fn send_image(&self, recipient: UserId, url: &str, caption: &str) -> Result<()> {
		self.check(recipient)?;
		self.sent.lock().push(SentMessage::Image {
			recipient,
			url: url.to_string(),
			caption: caption.to_string(),
		});
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	fn open_config() -> OpenConfig {
		OpenConfig {
			auth_dir: PathBuf::from("/tmp/auth_1_1"),
			browser: "test".into(),
			connect_timeout: Duration::from_secs(1),
			keep_alive_interval: Duration::from_secs(1),
		}
	}

	#[tokio::test]
	async fn opened_sockets_report_connecting_and_record_requests() {
		let (client, controller) = FakeProtocolBuilder::new().build();
		let mut opened = client.open(open_config()).await.unwrap();

		assert_eq!(opened.updates.recv().await, Some(ConnectionUpdate::connecting()));
		assert_eq!(opened.handle.request_pairing_code("123").await.unwrap(), DEFAULT_FAKE_CODE);

		let socket = controller.wait_for_opened(1).await;
		assert_eq!(socket.code_requests(), vec!["123".to_string()]);
		assert_eq!(socket.auth_dir(), PathBuf::from("/tmp/auth_1_1"));
	}

	#[tokio::test]
	async fn closing_ends_the_update_stream() {
		let (client, controller) = FakeProtocolBuilder::new().auto_connecting(false).build();
		let mut opened = client.open(open_config()).await.unwrap();
		let socket = controller.wait_for_opened(1).await;

		socket.emit(ConnectionUpdate::open());
		opened.handle.close().await;
		socket.emit(ConnectionUpdate::closed(Some(500)));

		assert_eq!(opened.updates.recv().await, Some(ConnectionUpdate::open()));
		assert_eq!(opened.updates.recv().await, None);
		assert!(socket.is_closed());
	}

	#[tokio::test]
	async fn scripted_failures_are_consumed_in_order() {
		let (client, controller) = FakeProtocolBuilder::new().build();
		controller.script_open_failure(CodeRequestError::new(Some(405), "rejected"));
		controller.script_code(Err(CodeRequestError::new(Some(428), "closed")));

		let err = client.open(open_config()).await.unwrap_err();
		assert_eq!(err.status_code, Some(405));

		let opened = client.open(open_config()).await.unwrap();
		let err = opened.handle.request_pairing_code("1").await.unwrap_err();
		assert_eq!(err.status_code, Some(428));
		assert!(opened.handle.request_pairing_code("1").await.is_ok());
		assert_eq!(controller.open_count(), 1);
	}

	#[tokio::test]
	async fn recording_notifier_can_fail_per_user() {
		let notifier = RecordingNotifier::new();
		notifier.fail_for(UserId(2));
		notifier.send_text(UserId(1), "hi").await.unwrap();
		assert!(notifier.send_text(UserId(2), "hi").await.is_err());
		assert_eq!(notifier.texts_for(UserId(1)), vec!["hi".to_string()]);
	}
}
