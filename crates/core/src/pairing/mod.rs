//! Pairing orchestration.
//!
//! A logical pairing request is a bounded loop of attempts. Each attempt runs
//! as its own task: it evicts whatever the user still has pending, opens a
//! connection on a fresh scratch directory and drives a [`PairingMachine`]
//! until it reaches a terminal state. The attempt reports back once, through a
//! oneshot channel, with a code, a retry request or a classified failure. It
//! keeps running after the code is issued so it can finalize the session when
//! the protocol reports the connection open.
//!
//! Until an attempt has registered a session entry, the orchestrator itself
//! tracks it per user. A newer request, an explicit [`cancel`], or dropping
//! the [`request_code`] future signals that attempt to close its sockets.
//!
//! [`cancel`]: PairingOrchestrator::cancel
//! [`request_code`]: PairingOrchestrator::request_code

mod attempt;
mod failure;
mod finalize;
pub mod machine;
pub mod scratch;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use self::attempt::{Attempt, AttemptReport};
pub use self::failure::{FailureKind, PairingFailure};
pub use self::finalize::{ConnectedSession, Finalizer};
pub use self::machine::{Effect, PairingEvent, PairingMachine, PairingState, Slot};
use crate::config::PairingConfig;
use crate::connection::ProtocolClient;
use crate::notify::Notifier;
use crate::registry::SessionRegistry;
use crate::types::{PhoneNumber, SessionId, UserId};

/// What a successful pairing request hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
	/// The user must enter `code` on their device.
	CodeIssued { code: String },
	/// The connection opened before a code was needed.
	Connected { session_id: SessionId },
}

pub(crate) struct PairingContext {
	pub(crate) client: Arc<dyn ProtocolClient>,
	pub(crate) registry: Arc<SessionRegistry>,
	pub(crate) finalizer: Arc<Finalizer>,
	pub(crate) notifier: Arc<dyn Notifier>,
	pub(crate) config: PairingConfig,
}

/// Cancellation handle of the attempt a user's request is driving.
struct InFlight {
	generation: u64,
	cancel: watch::Sender<bool>,
}

type InFlightMap = Mutex<HashMap<UserId, InFlight>>;

pub struct PairingOrchestrator {
	ctx: Arc<PairingContext>,
	in_flight: Arc<InFlightMap>,
	generations: AtomicU64,
}

impl PairingOrchestrator {
	pub fn new(
		client: Arc<dyn ProtocolClient>,
		registry: Arc<SessionRegistry>,
		finalizer: Arc<Finalizer>,
		notifier: Arc<dyn Notifier>,
		config: PairingConfig,
	) -> Self {
		Self {
			ctx: Arc::new(PairingContext {
				client,
				registry,
				finalizer,
				notifier,
				config,
			}),
			in_flight: Arc::new(Mutex::new(HashMap::new())),
			generations: AtomicU64::new(0),
		}
	}

	/// Signals the user's in-flight attempt, if any, to give up and close its
	/// sockets. Returns whether there was one.
	pub fn cancel(&self, user: UserId) -> bool {
		let Some(previous) = self.in_flight.lock().remove(&user) else {
			return false;
		};
		previous.cancel.send_replace(true);
		debug!(target = "pairlink.pairing", %user, generation = previous.generation, "cancelled in-flight attempt");
		true
	}

	/// Whether a request for `user` is still waiting on its attempt.
	pub fn is_in_flight(&self, user: UserId) -> bool {
		self.in_flight.lock().contains_key(&user)
	}

	fn track(&self, user: UserId) -> (InFlightGuard, watch::Receiver<bool>) {
		let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
		let (cancel, cancelled) = watch::channel(false);
		let previous = self.in_flight.lock().insert(user, InFlight { generation, cancel });
		if let Some(previous) = previous {
			previous.cancel.send_replace(true);
			debug!(target = "pairlink.pairing", %user, generation = previous.generation, "superseding in-flight attempt");
		}
		let guard = InFlightGuard {
			in_flight: Arc::clone(&self.in_flight),
			user,
			generation,
			settled: false,
		};
		(guard, cancelled)
	}

	/// Runs attempts until one yields a code, connects, or fails for good.
	///
	/// Dropping the returned future cancels the attempt it is waiting on.
	pub async fn request_code(&self, user: UserId, phone: &PhoneNumber) -> Result<PairingOutcome, PairingFailure> {
		let (mut guard, cancelled) = self.track(user);
		let result = self.run_attempts(user, phone, cancelled).await;
		guard.settled = true;
		result
	}

	async fn run_attempts(
		&self,
		user: UserId,
		phone: &PhoneNumber,
		mut cancelled: watch::Receiver<bool>,
	) -> Result<PairingOutcome, PairingFailure> {
		let max_retries = self.ctx.config.max_retries;
		let mut retry_count = 0;

		loop {
			let evicted = self.ctx.registry.evict_pending(user).await;
			if evicted > 0 {
				debug!(target = "pairlink.pairing", %user, evicted, "evicted previous attempt");
			}
			if *cancelled.borrow() {
				return Err(superseded());
			}

			let scratch_dir = scratch::create_attempt_dir(&self.ctx.config.scratch_root, user)
				.map_err(|err| PairingFailure::new(FailureKind::Unknown, format!("cannot create scratch directory: {err}")))?;

			let (tx, rx) = oneshot::channel();
			let attempt = Attempt::new(Arc::clone(&self.ctx), user, phone.clone(), retry_count, scratch_dir, cancelled.clone(), tx);
			tokio::spawn(attempt.run());

			let report = rx
				.await
				.unwrap_or_else(|_| AttemptReport::Failed(PairingFailure::new(FailureKind::Unknown, "attempt ended without a result")));

			match report {
				AttemptReport::CodeIssued(code) => return Ok(PairingOutcome::CodeIssued { code }),
				AttemptReport::Connected(session_id) => return Ok(PairingOutcome::Connected { session_id }),
				AttemptReport::Failed(failure) => return Err(failure),
				AttemptReport::Retry { retry_count: next, delay } => {
					info!(target = "pairlink.pairing", %user, retry = next, delay_secs = delay.as_secs(), "retrying after transient block");
					let progress = format!("Retrying... ({}/{})", next + 1, max_retries + 1);
					if let Err(err) = self.ctx.notifier.send_text(user, &progress).await {
						warn!(target = "pairlink.pairing", %user, error = %err, "failed to send retry notice");
					}
					tokio::select! {
						_ = tokio::time::sleep(delay) => {}
						_ = attempt::cancelled(&mut cancelled) => return Err(superseded()),
					}
					retry_count = next;
				}
			}
		}
	}
}

/// Clears the user's in-flight slot when its request ends. A request that is
/// dropped before it settles also cancels its attempt.
struct InFlightGuard {
	in_flight: Arc<InFlightMap>,
	user: UserId,
	generation: u64,
	settled: bool,
}

impl Drop for InFlightGuard {
	fn drop(&mut self) {
		let mut in_flight = self.in_flight.lock();
		if in_flight.get(&self.user).is_none_or(|current| current.generation != self.generation) {
			return;
		}
		if let Some(current) = in_flight.remove(&self.user) {
			if !self.settled {
				current.cancel.send_replace(true);
				debug!(target = "pairlink.pairing", user = %self.user, "abandoned request cancelled its attempt");
			}
		}
	}
}

fn superseded() -> PairingFailure {
	PairingFailure::new(FailureKind::Unknown, "superseded by a newer request")
}
