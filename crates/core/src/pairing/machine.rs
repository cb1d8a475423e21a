//! Pure state machine for one pairing attempt.
//!
//! The machine never performs I/O: every event yields a list of [`Effect`]s
//! which the attempt driver executes, feeding results back in as new events.
//! Once a terminal state is reached every further event is a no-op.

use std::time::Duration;

use pairlink_protocol::{ConnectionUpdate, RemoteStatus};

use super::failure::FailureKind;
use crate::error::CodeRequestError;

/// Which socket of the attempt an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
	Primary,
	/// Socket opened after a restart-required close.
	Reconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
	Idle,
	RequestingCode,
	AwaitingPairing,
	Reconnecting,
	Connected { slot: Slot },
	Failed(FailureKind),
	/// This attempt ended; the driver starts attempt `retry_count`.
	RetryScheduled { retry_count: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairingEvent {
	Start,
	Opened { slot: Slot },
	OpenFailed { slot: Slot, error: CodeRequestError },
	Update { slot: Slot, update: ConnectionUpdate },
	CodeIssued { code: String },
	CodeFailed { error: CodeRequestError },
	TimedOut,
	/// The socket was closed from outside the attempt.
	Superseded { slot: Slot },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
	ArmTimeout,
	CancelTimeout,
	Open(Slot),
	RequestCode,
	IssueCode(String),
	Close(Slot),
	ScheduleRetry { retry_count: u32, delay: Duration },
	Finalize { slot: Slot },
	Fail { kind: FailureKind, detail: String },
}

#[derive(Debug, Clone)]
pub struct PairingMachine {
	state: PairingState,
	retry_count: u32,
	max_retries: u32,
	backoff_step: Duration,
	code_requested: bool,
	code_issued: bool,
	open_slots: Vec<Slot>,
}

impl PairingMachine {
	pub fn new(retry_count: u32, max_retries: u32, backoff_step: Duration) -> Self {
		Self {
			state: PairingState::Idle,
			retry_count,
			max_retries,
			backoff_step,
			code_requested: false,
			code_issued: false,
			open_slots: Vec::new(),
		}
	}

	pub fn state(&self) -> &PairingState {
		&self.state
	}

	pub fn retry_count(&self) -> u32 {
		self.retry_count
	}

	pub fn code_issued(&self) -> bool {
		self.code_issued
	}

	pub fn is_terminal(&self) -> bool {
		matches!(
			self.state,
			PairingState::Connected { .. } | PairingState::Failed(_) | PairingState::RetryScheduled { .. }
		)
	}

	/// The socket whose lifecycle currently decides the attempt.
	pub fn active_slot(&self) -> Slot {
		match self.state {
			PairingState::Reconnecting | PairingState::Connected { slot: Slot::Reconnect } => Slot::Reconnect,
			_ => Slot::Primary,
		}
	}

	pub fn transition(&mut self, event: PairingEvent) -> Vec<Effect> {
		if self.is_terminal() {
			return Vec::new();
		}

		match event {
			PairingEvent::Start => {
				if self.state != PairingState::Idle {
					return Vec::new();
				}
				self.state = PairingState::RequestingCode;
				vec![Effect::ArmTimeout, Effect::Open(Slot::Primary)]
			}
			PairingEvent::Opened { slot } => {
				if !self.open_slots.contains(&slot) {
					self.open_slots.push(slot);
				}
				Vec::new()
			}
			PairingEvent::OpenFailed { slot: Slot::Primary, error } if self.state == PairingState::RequestingCode => self.reject(error),
			PairingEvent::OpenFailed { slot: Slot::Reconnect, error } if self.state == PairingState::Reconnecting => {
				self.fail(FailureKind::ReconnectFailed, format!("reconnect socket failed to open: {error}"))
			}
			PairingEvent::OpenFailed { .. } => Vec::new(),
			PairingEvent::Update { slot, update } => self.on_update(slot, update),
			PairingEvent::CodeIssued { code } => {
				if self.state != PairingState::RequestingCode {
					return Vec::new();
				}
				self.state = PairingState::AwaitingPairing;
				self.code_issued = true;
				vec![Effect::IssueCode(code)]
			}
			PairingEvent::CodeFailed { error } => {
				if self.state != PairingState::RequestingCode {
					return Vec::new();
				}
				self.reject(error)
			}
			PairingEvent::TimedOut => self.fail(FailureKind::Timeout, "no pairing before the connection timeout"),
			PairingEvent::Superseded { slot } => {
				if slot != self.active_slot() {
					return Vec::new();
				}
				self.fail(FailureKind::Unknown, "superseded by a newer request")
			}
		}
	}

	fn on_update(&mut self, slot: Slot, update: ConnectionUpdate) -> Vec<Effect> {
		if update.is_open() {
			return match (&self.state, slot) {
				(PairingState::RequestingCode | PairingState::AwaitingPairing, Slot::Primary)
				| (PairingState::Reconnecting, Slot::Reconnect) => {
					self.state = PairingState::Connected { slot };
					vec![Effect::CancelTimeout, Effect::Finalize { slot }]
				}
				_ => Vec::new(),
			};
		}

		if update.is_close() {
			let status = update.close_status();
			return match (&self.state, slot) {
				(PairingState::RequestingCode, Slot::Primary) => {
					if RemoteStatus::from_code(status) == RemoteStatus::RestartRequired {
						return Vec::new();
					}
					self.reject(CodeRequestError::new(status, "connection closed before a code was issued"))
				}
				(PairingState::AwaitingPairing, Slot::Primary) => {
					if RemoteStatus::from_code(status) != RemoteStatus::RestartRequired {
						return Vec::new();
					}
					self.state = PairingState::Reconnecting;
					self.open_slots.retain(|open| *open != Slot::Primary);
					vec![Effect::Close(Slot::Primary), Effect::Open(Slot::Reconnect)]
				}
				(PairingState::Reconnecting, Slot::Reconnect) => {
					let detail = match status {
						Some(code) => format!("reconnect socket closed with status {code}"),
						None => "reconnect socket closed".to_string(),
					};
					self.fail(FailureKind::ReconnectFailed, detail)
				}
				_ => Vec::new(),
			};
		}

		if update.offers_pairing() && slot == Slot::Primary && self.state == PairingState::RequestingCode && !self.code_requested {
			self.code_requested = true;
			return vec![Effect::RequestCode];
		}
		Vec::new()
	}

	fn reject(&mut self, error: CodeRequestError) -> Vec<Effect> {
		match error.status() {
			RemoteStatus::TransientBlock if self.retry_count < self.max_retries => {
				let next = self.retry_count + 1;
				let delay = self.backoff_step * next;
				self.state = PairingState::RetryScheduled { retry_count: next };
				let mut effects = vec![Effect::CancelTimeout];
				effects.extend(self.close_open_slots());
				effects.push(Effect::ScheduleRetry { retry_count: next, delay });
				effects
			}
			RemoteStatus::TransientBlock => self.fail(FailureKind::Blocked, error.message),
			RemoteStatus::PermanentBlock => self.fail(FailureKind::NumberBlocked, error.message),
			RemoteStatus::Throttled => self.fail(FailureKind::RateLimitedByRemote, error.message),
			RemoteStatus::RestartRequired | RemoteStatus::Other(_) => self.fail(FailureKind::Unknown, error.message),
		}
	}

	fn fail(&mut self, kind: FailureKind, detail: impl Into<String>) -> Vec<Effect> {
		self.state = PairingState::Failed(kind);
		let mut effects = vec![Effect::CancelTimeout];
		effects.extend(self.close_open_slots());
		effects.push(Effect::Fail {
			kind,
			detail: detail.into(),
		});
		effects
	}

	fn close_open_slots(&self) -> Vec<Effect> {
		self.open_slots.iter().map(|slot| Effect::Close(*slot)).collect()
	}
}
