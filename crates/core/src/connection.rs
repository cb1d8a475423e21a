//! Protocol-client boundary.
//!
//! A [`ProtocolClient`] opens connections; each connection yields a stream of
//! [`ConnectionUpdate`]s and accepts one pairing-code request. The pairing
//! driver owns an [`OpenedConnection`] for the duration of an attempt and
//! shares its [`ConnectionHandle`] with the registry, which only ever closes
//! it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pairlink_protocol::ConnectionUpdate;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

use crate::error::CodeRequestError;

/// Parameters for opening a protocol connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConfig {
	/// Credential directory the protocol library reads and writes.
	pub auth_dir: PathBuf,
	pub browser: String,
	pub connect_timeout: Duration,
	pub keep_alive_interval: Duration,
}

#[async_trait]
pub trait ProtocolConnection: Send + Sync {
	fn id(&self) -> &str;

	async fn request_pairing_code(&self, phone: &str) -> Result<String, CodeRequestError>;

	/// Advisory close; implementations must tolerate repeated calls.
	async fn close(&self);
}

#[async_trait]
pub trait ProtocolClient: Send + Sync {
	async fn open(&self, config: OpenConfig) -> Result<OpenedConnection, CodeRequestError>;
}

/// A freshly opened connection and its lifecycle stream.
pub struct OpenedConnection {
	pub handle: ConnectionHandle,
	pub updates: mpsc::UnboundedReceiver<ConnectionUpdate>,
}

impl OpenedConnection {
	pub fn new(connection: Arc<dyn ProtocolConnection>, updates: mpsc::UnboundedReceiver<ConnectionUpdate>) -> Self {
		Self {
			handle: ConnectionHandle::new(connection),
			updates,
		}
	}
}

impl fmt::Debug for OpenedConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OpenedConnection").field("handle", &self.handle).finish_non_exhaustive()
	}
}

struct HandleState {
	closed: AtomicBool,
	notify: Notify,
}

/// Shared handle to one protocol connection. Clones refer to the same socket;
/// `close` runs the underlying close at most once.
#[derive(Clone)]
pub struct ConnectionHandle {
	connection: Arc<dyn ProtocolConnection>,
	state: Arc<HandleState>,
}

impl ConnectionHandle {
	pub fn new(connection: Arc<dyn ProtocolConnection>) -> Self {
		Self {
			connection,
			state: Arc::new(HandleState {
				closed: AtomicBool::new(false),
				notify: Notify::new(),
			}),
		}
	}

	pub fn id(&self) -> &str {
		self.connection.id()
	}

	pub async fn request_pairing_code(&self, phone: &str) -> Result<String, CodeRequestError> {
		self.connection.request_pairing_code(phone).await
	}

	pub async fn close(&self) {
		if self.state.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		debug!(target = "pairlink.connection", id = self.id(), "closing connection");
		self.state.notify.notify_waiters();
		self.connection.close().await;
	}

	pub fn is_closed(&self) -> bool {
		self.state.closed.load(Ordering::SeqCst)
	}

	/// Resolves once any clone of this handle has been closed.
	pub async fn closed(&self) {
		let notified = self.state.notify.notified();
		if self.is_closed() {
			return;
		}
		notified.await;
	}

	pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
		Arc::ptr_eq(&self.state, &other.state)
	}
}

impl fmt::Debug for ConnectionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionHandle")
			.field("id", &self.id())
			.field("closed", &self.is_closed())
			.finish()
	}
}
