//! WebSocket JSON-RPC client for the protocol sidecar.
//!
//! The sidecar hosts the actual protocol library; pairlink drives it over a
//! single WebSocket link:
//!
//! 1. every request gets a fresh numeric id and a oneshot channel,
//! 2. the reader task correlates responses by id and completes the channel,
//! 3. `connection.update` events are routed by `connectionId` to the update
//!    stream of the matching [`OpenedConnection`].
//!
//! Updates that arrive before their connection's `open` response has been
//! processed are buffered and replayed on registration; buffers nobody claims
//! within the request timeout are dropped. An `open` whose response arrives
//! after the call gave up is closed on the sidecar. When the link drops,
//! pending requests fail and every open connection observes a close.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use pairlink_protocol::{
	CloseParams, ConnectionUpdate, EVENT_CONNECTION_UPDATE, METHOD_CLOSE, METHOD_OPEN, METHOD_REQUEST_PAIRING_CODE, Message as BridgeMessage,
	OpenParams, OpenResult, PairingCodeParams, PairingCodeResult, Request, UpdateEvent,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, info, warn};

use crate::connection::{OpenConfig, OpenedConnection, ProtocolClient, ProtocolConnection};
use crate::error::{CodeRequestError, Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type RpcResult = std::result::Result<Value, CodeRequestError>;

/// Updates for a connection id nobody has registered yet.
struct Backlog {
	first_seen: Instant,
	updates: Vec<ConnectionUpdate>,
}

struct BridgeInner {
	last_id: AtomicU32,
	callbacks: Mutex<HashMap<u32, oneshot::Sender<RpcResult>>>,
	listeners: Mutex<HashMap<String, mpsc::UnboundedSender<ConnectionUpdate>>>,
	backlog: Mutex<HashMap<String, Backlog>>,
	/// Connections being closed; their updates are dropped until the sidecar acks.
	retired: Mutex<HashSet<String>>,
	outbound: mpsc::UnboundedSender<String>,
	closed: AtomicBool,
	request_timeout: Duration,
}

/// Cheaply cloneable handle to one sidecar link.
#[derive(Clone)]
pub struct BridgeClient {
	inner: Arc<BridgeInner>,
}

impl BridgeClient {
	pub async fn connect(url: &str) -> Result<Self> {
		let (stream, _) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|err| Error::Bridge(format!("cannot connect to {url}: {err}")))?;
		info!(target = "pairlink.bridge", url, "connected to protocol sidecar");
		Ok(Self::from_stream(stream, DEFAULT_REQUEST_TIMEOUT))
	}

	/// Spawns the writer and reader tasks over an established stream.
	pub fn from_stream<S>(stream: WebSocketStream<S>, request_timeout: Duration) -> Self
	where
		S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	{
		let (mut sink, mut source) = stream.split();
		let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		let inner = Arc::new(BridgeInner::new(outbound, request_timeout));

		tokio::spawn(async move {
			while let Some(text) = outbound_rx.recv().await {
				if let Err(err) = sink.send(Frame::Text(text.into())).await {
					warn!(target = "pairlink.bridge", error = %err, "failed to write to sidecar");
					break;
				}
			}
			let _ = sink.close().await;
		});

		let reader = Arc::clone(&inner);
		tokio::spawn(async move {
			while let Some(frame) = source.next().await {
				match frame {
					Ok(Frame::Text(text)) => reader.dispatch(&text),
					Ok(Frame::Close(_)) => break,
					Ok(_) => {}
					Err(err) => {
						warn!(target = "pairlink.bridge", error = %err, "sidecar link failed");
						break;
					}
				}
			}
			debug!(target = "pairlink.bridge", "sidecar link closed");
			reader.shutdown();
		});

		Self { inner }
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Writes a request and returns its id with the channel its response lands on.
	fn send(&self, method: &str, params: Value) -> std::result::Result<(u32, oneshot::Receiver<RpcResult>), CodeRequestError> {
		if self.is_closed() {
			return Err(Error::ChannelClosed.into());
		}

		let id = self.inner.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.inner.callbacks.lock().insert(id, tx);

		let request = Request {
			id,
			method: method.to_string(),
			params,
		};
		let text = match serde_json::to_string(&request) {
			Ok(text) => text,
			Err(err) => {
				self.inner.callbacks.lock().remove(&id);
				return Err(Error::from(err).into());
			}
		};
		if self.inner.outbound.send(text).is_err() {
			self.inner.callbacks.lock().remove(&id);
			return Err(Error::ChannelClosed.into());
		}
		Ok((id, rx))
	}

	async fn call(&self, method: &str, params: Value) -> RpcResult {
		let (id, rx) = self.send(method, params)?;
		match tokio::time::timeout(self.inner.request_timeout, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(Error::ChannelClosed.into()),
			Err(_) => {
				self.inner.callbacks.lock().remove(&id);
				Err(CodeRequestError::new(None, format!("{method} timed out")))
			}
		}
	}

	/// Like [`call`](Self::call) for `open`, except that a timed-out request
	/// keeps listening so a late connection can be closed.
	async fn call_open(&self, params: Value) -> RpcResult {
		let (id, mut rx) = self.send(METHOD_OPEN, params)?;
		match tokio::time::timeout(self.inner.request_timeout, &mut rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(Error::ChannelClosed.into()),
			Err(_) => {
				tokio::spawn(self.clone().close_late_open(id, rx));
				Err(CodeRequestError::new(None, format!("{METHOD_OPEN} timed out")))
			}
		}
	}

	async fn close_late_open(self, id: u32, rx: oneshot::Receiver<RpcResult>) {
		let late = tokio::time::timeout(self.inner.request_timeout, rx).await;
		self.inner.callbacks.lock().remove(&id);
		let Ok(Ok(Ok(value))) = late else {
			return;
		};
		let connection_id = match serde_json::from_value::<OpenResult>(value) {
			Ok(OpenResult { connection_id }) => connection_id,
			Err(err) => {
				warn!(target = "pairlink.bridge", error = %err, "malformed late open response");
				return;
			}
		};
		warn!(target = "pairlink.bridge", id = %connection_id, "closing connection opened after its request timed out");
		BridgeConnection {
			id: connection_id,
			client: self,
		}
		.close()
		.await;
	}

	#[cfg(test)]
	fn detached(request_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
		let (outbound, outbound_rx) = mpsc::unbounded_channel();
		let client = Self {
			inner: Arc::new(BridgeInner::new(outbound, request_timeout)),
		};
		(client, outbound_rx)
	}
}

impl BridgeInner {
	fn new(outbound: mpsc::UnboundedSender<String>, request_timeout: Duration) -> Self {
		Self {
			last_id: AtomicU32::new(0),
			callbacks: Mutex::new(HashMap::new()),
			listeners: Mutex::new(HashMap::new()),
			backlog: Mutex::new(HashMap::new()),
			retired: Mutex::new(HashSet::new()),
			outbound,
			closed: AtomicBool::new(false),
			request_timeout,
		}
	}

	fn dispatch(&self, text: &str) {
		match serde_json::from_str::<BridgeMessage>(text) {
			Ok(BridgeMessage::Response(response)) => {
				let Some(callback) = self.callbacks.lock().remove(&response.id) else {
					warn!(target = "pairlink.bridge", id = response.id, "response for unknown request");
					return;
				};
				let result = match response.error {
					Some(error) => Err(CodeRequestError::new(error.status_code, error.message)),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = callback.send(result);
			}
			Ok(BridgeMessage::Event(event)) if event.method == EVENT_CONNECTION_UPDATE => {
				match serde_json::from_value::<UpdateEvent>(event.params) {
					Ok(update) => self.route(update),
					Err(err) => warn!(target = "pairlink.bridge", error = %err, "malformed connection update"),
				}
			}
			Ok(BridgeMessage::Event(event)) => {
				debug!(target = "pairlink.bridge", method = %event.method, "ignoring sidecar event");
			}
			Err(err) => warn!(target = "pairlink.bridge", error = %err, "unparseable sidecar message"),
		}
	}

	fn route(&self, event: UpdateEvent) {
		let listeners = self.listeners.lock();
		if let Some(tx) = listeners.get(&event.connection_id) {
			let _ = tx.send(event.update);
			return;
		}
		if self.retired.lock().contains(&event.connection_id) {
			return;
		}

		let now = Instant::now();
		let mut backlog = self.backlog.lock();
		backlog.retain(|id, pending| {
			let keep = now.saturating_duration_since(pending.first_seen) <= self.request_timeout;
			if !keep {
				debug!(target = "pairlink.bridge", %id, dropped = pending.updates.len(), "dropping unclaimed updates");
			}
			keep
		});
		backlog
			.entry(event.connection_id)
			.or_insert_with(|| Backlog {
				first_seen: now,
				updates: Vec::new(),
			})
			.updates
			.push(event.update);
	}

	fn register(&self, connection_id: &str) -> mpsc::UnboundedReceiver<ConnectionUpdate> {
		let (tx, rx) = mpsc::unbounded_channel();
		let mut listeners = self.listeners.lock();
		if let Some(pending) = self.backlog.lock().remove(connection_id) {
			for update in pending.updates {
				let _ = tx.send(update);
			}
		}
		if self.closed.load(Ordering::SeqCst) {
			let _ = tx.send(ConnectionUpdate::closed(None));
		} else {
			listeners.insert(connection_id.to_string(), tx);
		}
		rx
	}

	fn retire(&self, connection_id: &str) {
		let mut listeners = self.listeners.lock();
		listeners.remove(connection_id);
		self.backlog.lock().remove(connection_id);
		self.retired.lock().insert(connection_id.to_string());
	}

	/// Forgets a retired connection once the sidecar answered its close.
	fn forget(&self, connection_id: &str) {
		self.retired.lock().remove(connection_id);
	}

	fn shutdown(&self) {
		self.closed.store(true, Ordering::SeqCst);
		for (_, callback) in self.callbacks.lock().drain() {
			let _ = callback.send(Err(Error::ChannelClosed.into()));
		}
		for (_, listener) in self.listeners.lock().drain() {
			let _ = listener.send(ConnectionUpdate::closed(None));
		}
	}
}

#[async_trait]
impl ProtocolClient for BridgeClient {
	async fn open(&self, config: OpenConfig) -> std::result::Result<OpenedConnection, CodeRequestError> {
		let params = OpenParams {
			auth_dir: config.auth_dir.to_string_lossy().into_owned(),
			browser: config.browser,
			connect_timeout_ms: config.connect_timeout.as_millis() as u64,
			keep_alive_interval_ms: config.keep_alive_interval.as_millis() as u64,
		};
		let value = self.call_open(serde_json::to_value(params).map_err(Error::from)?).await?;
		let OpenResult { connection_id } = serde_json::from_value(value).map_err(Error::from)?;
		debug!(target = "pairlink.bridge", id = %connection_id, "connection opened");

		let updates = self.inner.register(&connection_id);
		let connection = BridgeConnection {
			id: connection_id,
			client: self.clone(),
		};
		Ok(OpenedConnection::new(Arc::new(connection), updates))
	}
}

struct BridgeConnection {
	id: String,
	client: BridgeClient,
}

#[async_trait]
impl ProtocolConnection for BridgeConnection {
	fn id(&self) -> &str {
		&self.id
	}

	async fn request_pairing_code(&self, phone: &str) -> std::result::Result<String, CodeRequestError> {
		let params = PairingCodeParams {
			connection_id: self.id.clone(),
			phone: phone.to_string(),
		};
		let value = self
			.client
			.call(METHOD_REQUEST_PAIRING_CODE, serde_json::to_value(params).map_err(Error::from)?)
			.await?;
		let PairingCodeResult { code } = serde_json::from_value(value).map_err(Error::from)?;
		Ok(code)
	}

	async fn close(&self) {
		self.client.inner.retire(&self.id);
		let params = match serde_json::to_value(CloseParams {
			connection_id: self.id.clone(),
		}) {
			Ok(params) => params,
			Err(err) => {
				warn!(target = "pairlink.bridge", error = %err, "cannot encode close request");
				self.client.inner.forget(&self.id);
				return;
			}
		};
		if let Err(err) = self.client.call(METHOD_CLOSE, params).await {
			debug!(target = "pairlink.bridge", id = %self.id, error = %err, "close request failed");
		}
		self.client.inner.forget(&self.id);
	}
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use pairlink_protocol::ConnectionState;
	use serde_json::json;

	use super::*;

	fn open_config() -> OpenConfig {
		OpenConfig {
			auth_dir: PathBuf::from("/tmp/auth_1_1"),
			browser: "Ubuntu/Chrome".to_string(),
			connect_timeout: Duration::from_secs(180),
			keep_alive_interval: Duration::from_secs(30),
		}
	}

	async fn next_request(wire: &mut mpsc::UnboundedReceiver<String>) -> Request {
		let text = wire.recv().await.expect("request written");
		serde_json::from_str(&text).unwrap()
	}

	fn update_event(connection_id: &str) -> String {
		json!({
			"method": EVENT_CONNECTION_UPDATE,
			"params": { "connectionId": connection_id, "update": ConnectionUpdate::connecting() },
		})
		.to_string()
	}

	fn assert_drained(client: &BridgeClient) {
		assert!(client.inner.callbacks.lock().is_empty());
		assert!(client.inner.backlog.lock().is_empty());
		assert!(client.inner.retired.lock().is_empty());
	}

	#[tokio::test]
	async fn bookkeeping_is_empty_after_open_close_and_ack() {
		let (client, mut wire) = BridgeClient::detached(Duration::from_secs(5));

		let opener = client.clone();
		let opening = tokio::spawn(async move { opener.open(open_config()).await.unwrap() });
		let request = next_request(&mut wire).await;
		assert_eq!(request.method, METHOD_OPEN);
		client.inner.dispatch(&update_event("c1"));
		client.inner.dispatch(&json!({ "id": request.id, "result": { "connectionId": "c1" } }).to_string());
		let mut opened = opening.await.unwrap();
		assert_eq!(opened.updates.recv().await.and_then(|update| update.connection), Some(ConnectionState::Connecting));
		assert_drained(&client);
		assert_eq!(client.inner.listeners.lock().len(), 1);

		let handle = opened.handle.clone();
		let closing = tokio::spawn(async move { handle.close().await });
		let request = next_request(&mut wire).await;
		assert_eq!(request.method, METHOD_CLOSE);
		assert!(client.inner.retired.lock().contains("c1"));
		client.inner.dispatch(&update_event("c1"));
		client.inner.dispatch(&json!({ "id": request.id, "result": null }).to_string());
		closing.await.unwrap();

		assert_drained(&client);
		assert!(client.inner.listeners.lock().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn unclaimed_backlog_expires() {
		let (client, _wire) = BridgeClient::detached(Duration::from_secs(5));
		client.inner.dispatch(&update_event("orphan"));
		assert_eq!(client.inner.backlog.lock().len(), 1);

		tokio::time::sleep(Duration::from_secs(6)).await;
		client.inner.dispatch(&update_event("fresh"));

		let backlog = client.inner.backlog.lock();
		assert!(!backlog.contains_key("orphan"));
		assert!(backlog.contains_key("fresh"));
	}

	#[tokio::test(start_paused = true)]
	async fn late_open_response_closes_the_connection() {
		let (client, mut wire) = BridgeClient::detached(Duration::from_secs(5));

		let opener = client.clone();
		let opening = tokio::spawn(async move { opener.open(open_config()).await });
		let request = next_request(&mut wire).await;
		let err = opening.await.unwrap().err().expect("open timed out");
		assert!(err.message.contains("timed out"));

		client.inner.dispatch(&json!({ "id": request.id, "result": { "connectionId": "late" } }).to_string());
		let close = next_request(&mut wire).await;
		assert_eq!(close.method, METHOD_CLOSE);
		assert_eq!(close.params["connectionId"], "late");
		client.inner.dispatch(&json!({ "id": close.id, "result": null }).to_string());
		tokio::time::sleep(Duration::from_millis(10)).await;

		assert_drained(&client);
	}

	#[tokio::test(start_paused = true)]
	async fn open_without_any_response_releases_its_callback() {
		let (client, mut wire) = BridgeClient::detached(Duration::from_secs(5));

		let opener = client.clone();
		let opening = tokio::spawn(async move { opener.open(open_config()).await });
		next_request(&mut wire).await;
		assert!(opening.await.unwrap().is_err());
		assert_eq!(client.inner.callbacks.lock().len(), 1);

		tokio::time::sleep(Duration::from_secs(6)).await;
		assert_drained(&client);
	}
}
