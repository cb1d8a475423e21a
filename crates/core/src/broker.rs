//! Service façade wiring every broker component together.
//!
//! The [`Broker`] owns one instance of each service and exposes the user
//! flow (`begin_pairing` → `submit_phone`), disconnects, and the operator
//! calls. Every denial maps to its own [`BrokerError`] variant.
//!
//! Code generation runs on its own task, so a caller that stops waiting
//! (an HTTP client hanging up, say) never strands the user's request in
//! `Generating`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::access::AccessList;
use crate::archive::DurableArchive;
use crate::cleanup::CleanupScheduler;
use crate::config::BrokerConfig;
use crate::connection::ProtocolClient;
use crate::host::{self, HostStats};
use crate::notify::Notifier;
use crate::pairing::{FailureKind, Finalizer, PairingFailure, PairingOrchestrator, PairingOutcome};
use crate::rate_limit::RateLimiter;
use crate::registry::{SessionRegistry, SessionStatus, SessionSummary};
use crate::requests::{RequestStage, RequestTracker};
use crate::types::{PhoneNumber, UserId};
use crate::users::{PairRecord, UserDirectory};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
	#[error("You are banned from using this service.")]
	Banned,

	#[error("Daily limit reached: {max} pairing codes per 24 hours. Try again later.")]
	RateLimited { max: u32 },

	#[error("This command is restricted to operators.")]
	NotPrivileged,

	#[error("Please verify your membership before requesting a pairing code.")]
	NotVerified,

	#[error("No pairing request in progress. Start one first.")]
	NoPendingRequest,

	#[error("A pairing code is already being generated for you. Please wait.")]
	AlreadyGenerating,

	#[error("Invalid phone number. Send 10-15 digits including the country code, e.g. 2348123456789.")]
	InvalidPhone,

	#[error("Generating the code took too long. Please start again.")]
	RequestTimedOut,

	#[error("{0}")]
	Pairing(#[from] PairingFailure),
}

impl BrokerError {
	/// Stable machine-readable identifier.
	pub fn code(&self) -> &'static str {
		match self {
			BrokerError::Banned => "banned",
			BrokerError::RateLimited { .. } => "rate_limited",
			BrokerError::NotPrivileged => "not_privileged",
			BrokerError::NotVerified => "not_verified",
			BrokerError::NoPendingRequest => "no_pending_request",
			BrokerError::AlreadyGenerating => "already_generating",
			BrokerError::InvalidPhone => "invalid_phone",
			BrokerError::RequestTimedOut => "request_timed_out",
			BrokerError::Pairing(failure) => failure.kind.as_str(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginOutcome {
	pub admin: bool,
	/// Codes left in the current window; `None` for privileged users.
	pub remaining: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
	pub users: usize,
	pub sessions: usize,
	pub connected: usize,
	pub waiting: usize,
	pub pending_requests: usize,
	pub banned: usize,
	pub verified: usize,
	pub uptime_secs: u64,
	pub host: HostStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
	pub sent: usize,
	pub failed: usize,
}

/// Everything a [`Broker`] is built from.
pub struct BrokerParts {
	pub client: Arc<dyn ProtocolClient>,
	pub notifier: Arc<dyn Notifier>,
	pub archive: Option<Arc<DurableArchive>>,
	pub privileged: Vec<UserId>,
	pub config: BrokerConfig,
}

pub struct Broker {
	rate_limiter: RateLimiter,
	access: AccessList,
	requests: Arc<RequestTracker>,
	users: Arc<UserDirectory>,
	registry: Arc<SessionRegistry>,
	orchestrator: Arc<PairingOrchestrator>,
	cleanup: Arc<CleanupScheduler>,
	notifier: Arc<dyn Notifier>,
	config: BrokerConfig,
	started_at: Instant,
}

impl Broker {
	pub fn new(parts: BrokerParts) -> Self {
		let BrokerParts {
			client,
			notifier,
			archive,
			privileged,
			config,
		} = parts;

		let registry = Arc::new(SessionRegistry::new());
		let requests = Arc::new(RequestTracker::new());
		let finalizer = Arc::new(Finalizer::new(
			Arc::clone(&registry),
			archive,
			Arc::clone(&notifier),
			config.finalize.clone(),
		));
		let orchestrator = Arc::new(PairingOrchestrator::new(
			client,
			Arc::clone(&registry),
			finalizer,
			Arc::clone(&notifier),
			config.pairing.clone(),
		));
		let cleanup = Arc::new(CleanupScheduler::new(
			Arc::clone(&registry),
			Arc::clone(&requests),
			config.cleanup.clone(),
		));

		Self {
			rate_limiter: RateLimiter::new(config.rate_limit.clone()),
			access: AccessList::new(privileged),
			requests,
			users: Arc::new(UserDirectory::new()),
			registry,
			orchestrator,
			cleanup,
			notifier,
			config,
			started_at: Instant::now(),
		}
	}

	pub fn registry(&self) -> &Arc<SessionRegistry> {
		&self.registry
	}

	pub fn requests(&self) -> &Arc<RequestTracker> {
		&self.requests
	}

	pub fn cleanup(&self) -> &Arc<CleanupScheduler> {
		&self.cleanup
	}

	pub fn users(&self) -> &UserDirectory {
		&self.users
	}

	pub fn is_privileged(&self, user: UserId) -> bool {
		self.access.is_privileged(user)
	}

	pub fn is_verified(&self, user: UserId) -> bool {
		self.access.is_verified(user)
	}

	/// Records that the chat layer confirmed `user` as a member. Returns
	/// `false` when the user was already verified.
	pub fn verify(&self, user: UserId) -> Result<bool, BrokerError> {
		if self.access.is_banned(user) {
			return Err(BrokerError::Banned);
		}
		self.users.touch(user);
		Ok(self.access.verify(user))
	}

	fn admit(&self, user: UserId) -> Result<(), BrokerError> {
		if self.access.is_banned(user) {
			return Err(BrokerError::Banned);
		}
		if self.config.require_verification && !self.access.is_verified(user) {
			return Err(BrokerError::NotVerified);
		}
		Ok(())
	}

	/// Starts a text-entry request. `admin` requests bypass the quota and are
	/// only open to privileged users.
	pub fn begin_pairing(&self, user: UserId, admin: bool) -> Result<BeginOutcome, BrokerError> {
		self.admit(user)?;
		self.users.touch(user);

		let privileged = self.access.is_privileged(user);
		if admin && !privileged {
			return Err(BrokerError::NotPrivileged);
		}
		if matches!(self.requests.get(user).map(|request| request.stage), Some(RequestStage::Generating)) {
			return Err(BrokerError::AlreadyGenerating);
		}
		if !self.rate_limiter.admit(user, privileged) {
			return Err(BrokerError::RateLimited {
				max: self.rate_limiter.max_per_window(),
			});
		}

		self.requests.begin(user, admin);
		info!(target = "pairlink.broker", %user, admin, "pairing request started");
		Ok(BeginOutcome {
			admin,
			remaining: (!privileged).then(|| self.rate_limiter.remaining(user)),
		})
	}

	/// Validates `text` as a phone number and runs the orchestrator for it.
	///
	/// The request stays `Generating` until the generation task ends, even if
	/// this future is dropped first.
	pub async fn submit_phone(&self, user: UserId, text: &str) -> Result<PairingOutcome, BrokerError> {
		self.admit(user)?;
		match self.requests.get(user).map(|request| request.stage) {
			None => return Err(BrokerError::NoPendingRequest),
			Some(RequestStage::Generating) => return Err(BrokerError::AlreadyGenerating),
			Some(RequestStage::AwaitingNumber { .. }) => {}
		}
		let phone = PhoneNumber::parse(text).ok_or(BrokerError::InvalidPhone)?;
		let admin = self.requests.mark_generating(user).ok_or(BrokerError::NoPendingRequest)?;

		let generation = Generation {
			orchestrator: Arc::clone(&self.orchestrator),
			users: Arc::clone(&self.users),
			requests: Arc::clone(&self.requests),
			timeout: self.config.request_timeout,
		};
		tokio::spawn(generation.run(user, phone, admin)).await.unwrap_or_else(|err| {
			warn!(target = "pairlink.broker", %user, error = %err, "generation task failed");
			Err(BrokerError::Pairing(PairingFailure::new(FailureKind::Unknown, "code generation was interrupted")))
		})
	}

	/// Closes and drops every session the user holds, including an attempt
	/// that has not issued its code yet.
	pub async fn disconnect(&self, user: UserId) -> Result<usize, BrokerError> {
		if self.access.is_banned(user) {
			return Err(BrokerError::Banned);
		}
		let cancelled = self.orchestrator.cancel(user);
		Ok(self.registry.disconnect_all(user).await + usize::from(cancelled))
	}

	/// Codes left for `user` in the current window; `None` when unlimited.
	pub fn quota(&self, user: UserId) -> Option<u32> {
		(!self.access.is_privileged(user)).then(|| self.rate_limiter.remaining(user))
	}

	pub fn require_operator(&self, operator: UserId) -> Result<(), BrokerError> {
		if self.access.is_privileged(operator) {
			Ok(())
		} else {
			Err(BrokerError::NotPrivileged)
		}
	}

	/// Bans `target` and tears down whatever it holds. Returns `false` when
	/// the user was already banned.
	pub async fn ban(&self, operator: UserId, target: UserId) -> Result<bool, BrokerError> {
		self.require_operator(operator)?;
		let banned = self.access.ban(target);
		self.requests.finish(target);
		self.orchestrator.cancel(target);
		self.registry.disconnect_all(target).await;
		Ok(banned)
	}

	pub fn unban(&self, operator: UserId, target: UserId) -> Result<bool, BrokerError> {
		self.require_operator(operator)?;
		Ok(self.access.unban(target))
	}

	pub fn reset_quota(&self, operator: UserId, target: UserId) -> Result<(), BrokerError> {
		self.require_operator(operator)?;
		self.rate_limiter.reset(target);
		info!(target = "pairlink.broker", %operator, user = %target, "quota reset");
		Ok(())
	}

	pub fn list_sessions(&self, operator: UserId) -> Result<Vec<SessionSummary>, BrokerError> {
		self.require_operator(operator)?;
		Ok(self.registry.snapshot())
	}

	pub fn stats(&self, operator: UserId) -> Result<BrokerStats, BrokerError> {
		self.require_operator(operator)?;
		Ok(BrokerStats {
			users: self.users.len(),
			sessions: self.registry.len(),
			connected: self.registry.count_with_status(SessionStatus::Connected),
			waiting: self.registry.count_with_status(SessionStatus::WaitingForAuth) + self.registry.count_with_status(SessionStatus::Connecting),
			pending_requests: self.requests.len(),
			banned: self.access.banned_count(),
			verified: self.access.verified_count(),
			uptime_secs: self.started_at.elapsed().as_secs(),
			host: host::sample(),
		})
	}

	/// Sends `text` to every known user, spaced by the broadcast interval.
	pub async fn broadcast(&self, operator: UserId, text: &str) -> Result<BroadcastReport, BrokerError> {
		self.require_operator(operator)?;
		let message = format!("Broadcast:\n\n{text}");
		let mut report = BroadcastReport::default();
		for (index, user) in self.users.known_users().into_iter().enumerate() {
			if index > 0 {
				tokio::time::sleep(self.config.broadcast_spacing).await;
			}
			match self.notifier.send_text(user, &message).await {
				Ok(()) => report.sent += 1,
				Err(err) => {
					warn!(target = "pairlink.broker", %user, error = %err, "broadcast delivery failed");
					report.failed += 1;
				}
			}
		}
		info!(target = "pairlink.broker", sent = report.sent, failed = report.failed, "broadcast finished");
		Ok(report)
	}
}

/// One `submit_phone` call's worth of work, owned by its own task.
struct Generation {
	orchestrator: Arc<PairingOrchestrator>,
	users: Arc<UserDirectory>,
	requests: Arc<RequestTracker>,
	timeout: Duration,
}

impl Generation {
	async fn run(self, user: UserId, phone: PhoneNumber, admin: bool) -> Result<PairingOutcome, BrokerError> {
		let _finish = FinishRequest {
			requests: Arc::clone(&self.requests),
			user,
		};

		// Dropping `request_code` on timeout cancels its attempt.
		let result = match tokio::time::timeout(self.timeout, self.orchestrator.request_code(user, &phone)).await {
			Ok(result) => result.map_err(BrokerError::from),
			Err(_) => {
				warn!(target = "pairlink.broker", %user, "pairing request timed out");
				Err(BrokerError::RequestTimedOut)
			}
		};
		self.users.record(user, pair_record(phone, admin, &result));
		result
	}
}

/// Ends the user's `Generating` request however the generation task exits.
struct FinishRequest {
	requests: Arc<RequestTracker>,
	user: UserId,
}

impl Drop for FinishRequest {
	fn drop(&mut self) {
		if self.requests.finish_generating(self.user) {
			debug!(target = "pairlink.broker", user = %self.user, "generating request finished");
		}
	}
}

fn pair_record(phone: PhoneNumber, admin: bool, result: &Result<PairingOutcome, BrokerError>) -> PairRecord {
	let (code, error) = match result {
		Ok(PairingOutcome::CodeIssued { code }) => (Some(code.clone()), None),
		Ok(PairingOutcome::Connected { .. }) => (None, None),
		Err(BrokerError::Pairing(failure)) => (None, Some(failure.summary())),
		Err(err) => (None, Some(err.to_string())),
	};
	PairRecord {
		phone,
		code,
		success: result.is_ok(),
		admin,
		error,
		at: Utc::now(),
	}
}
