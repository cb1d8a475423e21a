//! Driver executing the effects of one [`PairingMachine`].

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pairlink_protocol::ConnectionUpdate;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::PairingContext;
use super::failure::PairingFailure;
use super::finalize::ConnectedSession;
use super::machine::{Effect, PairingEvent, PairingMachine, Slot};
use super::scratch;
use crate::connection::{ConnectionHandle, OpenConfig};
use crate::error::CodeRequestError;
use crate::registry::{SessionEntry, SessionKey, SessionStatus};
use crate::types::{PhoneNumber, SessionId, UserId};

/// How an attempt concluded, as seen by the retry loop.
#[derive(Debug)]
pub(crate) enum AttemptReport {
	CodeIssued(String),
	/// The connection opened without a code ever being issued.
	Connected(SessionId),
	Retry { retry_count: u32, delay: Duration },
	Failed(PairingFailure),
}

type CodeResult = Result<String, CodeRequestError>;

pub(crate) struct Attempt {
	ctx: Arc<PairingContext>,
	user: UserId,
	phone: PhoneNumber,
	scratch_dir: PathBuf,
	machine: PairingMachine,
	handles: HashMap<Slot, ConnectionHandle>,
	primary_updates: Option<mpsc::UnboundedReceiver<ConnectionUpdate>>,
	reconnect_updates: Option<mpsc::UnboundedReceiver<ConnectionUpdate>>,
	pending_code: Option<oneshot::Receiver<CodeResult>>,
	deadline: Option<Instant>,
	/// Connection held by this attempt's registry entry, once a code was issued.
	registered: Option<ConnectionHandle>,
	/// Raised when the request driving this attempt is superseded or abandoned.
	cancelled: watch::Receiver<bool>,
	/// Set when another request closed this attempt's socket.
	superseded: bool,
	report: Option<oneshot::Sender<AttemptReport>>,
}

impl Attempt {
	pub(crate) fn new(
		ctx: Arc<PairingContext>,
		user: UserId,
		phone: PhoneNumber,
		retry_count: u32,
		scratch_dir: PathBuf,
		cancelled: watch::Receiver<bool>,
		report: oneshot::Sender<AttemptReport>,
	) -> Self {
		let machine = PairingMachine::new(retry_count, ctx.config.max_retries, ctx.config.retry_backoff_step);
		Self {
			ctx,
			user,
			phone,
			scratch_dir,
			machine,
			handles: HashMap::new(),
			primary_updates: None,
			reconnect_updates: None,
			pending_code: None,
			deadline: None,
			registered: None,
			cancelled,
			superseded: false,
			report: Some(report),
		}
	}

	pub(crate) async fn run(mut self) {
		info!(
			target = "pairlink.pairing",
			user = %self.user,
			phone = %self.phone.masked(),
			retry = self.machine.retry_count(),
			"pairing attempt started"
		);

		self.apply(PairingEvent::Start).await;
		while !self.machine.is_terminal() {
			let event = self.next_event().await;
			if matches!(event, PairingEvent::Superseded { .. }) {
				self.superseded = true;
			}
			self.apply(event).await;
		}

		debug!(target = "pairlink.pairing", user = %self.user, state = ?self.machine.state(), "pairing attempt concluded");
		scratch::schedule_removal(self.scratch_dir.clone(), self.ctx.config.scratch_retention);
	}

	async fn next_event(&mut self) -> PairingEvent {
		let deadline = self.deadline;
		let active_slot = self.machine.active_slot();
		let active = self.handles.get(&active_slot).cloned();

		tokio::select! {
			_ = sleep_until(deadline) => PairingEvent::TimedOut,
			update = next_update(&mut self.primary_updates) => PairingEvent::Update { slot: Slot::Primary, update },
			update = next_update(&mut self.reconnect_updates) => PairingEvent::Update { slot: Slot::Reconnect, update },
			result = next_code(&mut self.pending_code) => match result {
				Ok(code) => PairingEvent::CodeIssued { code },
				Err(error) => PairingEvent::CodeFailed { error },
			},
			_ = closed(active) => PairingEvent::Superseded { slot: active_slot },
			_ = cancelled(&mut self.cancelled) => PairingEvent::Superseded { slot: active_slot },
		}
	}

	async fn apply(&mut self, event: PairingEvent) {
		let mut queue = VecDeque::from([event]);
		while let Some(event) = queue.pop_front() {
			for effect in self.machine.transition(event) {
				if let Some(next) = self.execute(effect).await {
					queue.push_back(next);
				}
			}
		}
	}

	async fn execute(&mut self, effect: Effect) -> Option<PairingEvent> {
		match effect {
			Effect::ArmTimeout => {
				self.deadline = Some(Instant::now() + self.ctx.config.connection_timeout);
				None
			}
			Effect::CancelTimeout => {
				self.deadline = None;
				None
			}
			Effect::Open(slot) => Some(self.open(slot).await),
			Effect::RequestCode => self.request_code(),
			Effect::IssueCode(code) => {
				self.issue_code(code);
				None
			}
			Effect::Close(slot) => {
				self.close(slot).await;
				None
			}
			Effect::ScheduleRetry { retry_count, delay } => {
				self.report(AttemptReport::Retry { retry_count, delay });
				None
			}
			Effect::Finalize { slot } => {
				self.finalize(slot).await;
				None
			}
			Effect::Fail { kind, detail } => {
				self.fail(PairingFailure::new(kind, detail)).await;
				None
			}
		}
	}

	async fn open(&mut self, slot: Slot) -> PairingEvent {
		if slot == Slot::Reconnect {
			tokio::time::sleep(self.ctx.config.reconnect_delay).await;
		}

		let config = OpenConfig {
			auth_dir: self.scratch_dir.clone(),
			browser: self.ctx.config.browser.clone(),
			connect_timeout: self.ctx.config.connection_timeout,
			keep_alive_interval: self.ctx.config.keep_alive_interval,
		};

		match self.ctx.client.open(config).await {
			Ok(opened) => {
				debug!(target = "pairlink.pairing", user = %self.user, ?slot, id = opened.handle.id(), "connection opened");
				match slot {
					Slot::Primary => self.primary_updates = Some(opened.updates),
					Slot::Reconnect => {
						self.reconnect_updates = Some(opened.updates);
						self.track_reconnect(&opened.handle);
					}
				}
				self.handles.insert(slot, opened.handle);
				PairingEvent::Opened { slot }
			}
			Err(error) => {
				warn!(target = "pairlink.pairing", user = %self.user, ?slot, error = %error, "failed to open connection");
				PairingEvent::OpenFailed { slot, error }
			}
		}
	}

	fn track_reconnect(&mut self, handle: &ConnectionHandle) {
		if self.registered.is_none() {
			return;
		}
		let key = SessionKey::provisional(self.user, &self.phone);
		match self.ctx.registry.advance(&key, SessionStatus::Connecting, Some(handle.clone())) {
			Ok(()) => self.registered = Some(handle.clone()),
			Err(err) => debug!(target = "pairlink.pairing", user = %self.user, error = %err, "no entry to track reconnect"),
		}
	}

	fn request_code(&mut self) -> Option<PairingEvent> {
		let Some(handle) = self.handles.get(&Slot::Primary).cloned() else {
			return Some(PairingEvent::CodeFailed {
				error: CodeRequestError::new(None, "no connection to request a code on"),
			});
		};

		let (tx, rx) = oneshot::channel();
		let delay = self.ctx.config.code_request_delay;
		let phone = self.phone.as_str().to_string();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let _ = tx.send(handle.request_pairing_code(&phone).await);
		});
		self.pending_code = Some(rx);
		None
	}

	fn issue_code(&mut self, code: String) {
		if let Some(handle) = self.handles.get(&Slot::Primary).cloned() {
			let entry = SessionEntry::waiting(self.user, self.phone.clone(), handle.clone(), self.scratch_dir.clone());
			match self.ctx.registry.put(entry) {
				Ok(_) => self.registered = Some(handle),
				Err(err) => warn!(target = "pairlink.pairing", user = %self.user, error = %err, "failed to register waiting session"),
			}
		}
		info!(target = "pairlink.pairing", user = %self.user, phone = %self.phone.masked(), "pairing code issued");
		self.report(AttemptReport::CodeIssued(code));
	}

	async fn close(&mut self, slot: Slot) {
		match slot {
			Slot::Primary => self.primary_updates = None,
			Slot::Reconnect => self.reconnect_updates = None,
		}
		if let Some(handle) = self.handles.remove(&slot) {
			handle.close().await;
		}
	}

	async fn finalize(&mut self, slot: Slot) {
		self.primary_updates = None;
		self.reconnect_updates = None;
		self.pending_code = None;

		let Some(connection) = self.handles.get(&slot).cloned() else {
			warn!(target = "pairlink.pairing", user = %self.user, ?slot, "connected slot has no handle");
			return;
		};

		let session_id = SessionId::generate();
		info!(target = "pairlink.pairing", user = %self.user, session = %session_id, ?slot, "connection open");
		self.report(AttemptReport::Connected(session_id.clone()));

		self.ctx
			.finalizer
			.finalize(ConnectedSession {
				user: self.user,
				phone: self.phone.clone(),
				session_id,
				connection,
				scratch_dir: self.scratch_dir.clone(),
			})
			.await;
	}

	async fn fail(&mut self, failure: PairingFailure) {
		if let Some(tx) = self.report.take() {
			info!(target = "pairlink.pairing", user = %self.user, kind = %failure.kind, detail = %failure.detail, "pairing attempt failed");
			let _ = tx.send(AttemptReport::Failed(failure));
			return;
		}

		warn!(
			target = "pairlink.pairing",
			user = %self.user,
			kind = %failure.kind,
			detail = %failure.detail,
			"pairing failed after the code was issued"
		);
		if let Some(handle) = self.registered.take() {
			let key = SessionKey::provisional(self.user, &self.phone);
			self.ctx.registry.delete_if_connection(&key, &handle);
		}
		if self.superseded {
			return;
		}
		if let Err(err) = self.ctx.notifier.send_text(self.user, &failure.summary()).await {
			debug!(target = "pairlink.pairing", user = %self.user, error = %err, "failed to deliver failure notice");
		}
	}

	fn report(&mut self, report: AttemptReport) {
		if let Some(tx) = self.report.take() {
			let _ = tx.send(report);
		}
	}
}

async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

/// Next update of an optional stream. A stream that ends is reported once as
/// a close without status.
async fn next_update(updates: &mut Option<mpsc::UnboundedReceiver<ConnectionUpdate>>) -> ConnectionUpdate {
	let Some(rx) = updates.as_mut() else {
		return std::future::pending().await;
	};
	if let Some(update) = rx.recv().await {
		return update;
	}
	*updates = None;
	ConnectionUpdate::closed(None)
}

async fn next_code(pending: &mut Option<oneshot::Receiver<CodeResult>>) -> CodeResult {
	let Some(rx) = pending.as_mut() else {
		return std::future::pending().await;
	};
	let result = rx
		.await
		.unwrap_or_else(|_| Err(CodeRequestError::new(None, "code request abandoned")));
	*pending = None;
	result
}

/// Resolves once cancellation is raised. A channel whose sender is gone
/// without raising it never resolves.
pub(super) async fn cancelled(rx: &mut watch::Receiver<bool>) {
	if rx.wait_for(|cancelled| *cancelled).await.is_err() {
		std::future::pending::<()>().await;
	}
}

async fn closed(handle: Option<ConnectionHandle>) {
	match handle {
		Some(handle) => handle.closed().await,
		None => std::future::pending().await,
	}
}
