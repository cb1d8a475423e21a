use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Terminal failure classes of a pairing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	Timeout,
	/// Transient remote block that outlasted every retry.
	Blocked,
	NumberBlocked,
	RateLimitedByRemote,
	ReconnectFailed,
	Unknown,
}

impl FailureKind {
	pub fn as_str(self) -> &'static str {
		match self {
			FailureKind::Timeout => "timeout",
			FailureKind::Blocked => "blocked",
			FailureKind::NumberBlocked => "number_blocked",
			FailureKind::RateLimitedByRemote => "rate_limited_by_remote",
			FailureKind::ReconnectFailed => "reconnect_failed",
			FailureKind::Unknown => "unknown",
		}
	}
}

impl fmt::Display for FailureKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Classified failure with the detail reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.summary())]
pub struct PairingFailure {
	pub kind: FailureKind,
	pub detail: String,
}

impl PairingFailure {
	pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
		Self {
			kind,
			detail: detail.into(),
		}
	}

	/// Human-readable summary shown to the user.
	pub fn summary(&self) -> String {
		match self.kind {
			FailureKind::Timeout => "Connection timed out before pairing completed. Please try again.".to_string(),
			FailureKind::Blocked => "The remote service is temporarily blocking pairing requests. Try again in 2-4 hours.".to_string(),
			FailureKind::NumberBlocked => "This number is blocked by the remote service. Use a different number.".to_string(),
			FailureKind::RateLimitedByRemote => "Too many pairing requests reached the remote service. Wait about 2 hours.".to_string(),
			FailureKind::ReconnectFailed => "Reconnecting after pairing failed. Please try again.".to_string(),
			FailureKind::Unknown => format!("Pairing failed: {}", self.detail),
		}
	}
}
