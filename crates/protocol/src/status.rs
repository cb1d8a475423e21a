//! Remote status codes reported by the protocol library.
//!
//! The numeric values are a contract with the external library and are kept
//! as an enumerated table; pairlink never reinterprets them.

/// The remote asks for a mandatory restart of the connection (after pairing).
pub const RESTART_REQUIRED: u16 = 515;
/// Connection closed by the remote while negotiating.
pub const CONNECTION_CLOSED: u16 = 428;
/// Connection rejected by the remote, typically a temporary block.
pub const CONNECTION_REJECTED: u16 = 405;
/// The phone number is blocked by the remote.
pub const FORBIDDEN: u16 = 403;
/// The remote is throttling pairing requests.
pub const THROTTLED: u16 = 429;

/// Message fragment the library uses when a socket dies mid-request.
const CONNECTION_CLOSED_MESSAGE: &str = "Connection Closed";

/// Classification of a remote status signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
	RestartRequired,
	/// Transient block class: worth retrying after a backoff.
	TransientBlock,
	/// Permanent block of the number.
	PermanentBlock,
	Throttled,
	Other(Option<u16>),
}

impl RemoteStatus {
	/// Classifies a bare status code.
	pub fn from_code(code: Option<u16>) -> Self {
		match code {
			Some(RESTART_REQUIRED) => Self::RestartRequired,
			Some(CONNECTION_CLOSED | CONNECTION_REJECTED) => Self::TransientBlock,
			Some(FORBIDDEN) => Self::PermanentBlock,
			Some(THROTTLED) => Self::Throttled,
			other => Self::Other(other),
		}
	}

	/// Classifies a failed request, falling back to the error message when the
	/// library did not attach a known status code.
	pub fn classify(code: Option<u16>, message: &str) -> Self {
		match Self::from_code(code) {
			Self::Other(_) if message.contains(CONNECTION_CLOSED_MESSAGE) => Self::TransientBlock,
			status => status,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn table_maps_known_codes() {
		assert_eq!(RemoteStatus::from_code(Some(515)), RemoteStatus::RestartRequired);
		assert_eq!(RemoteStatus::from_code(Some(428)), RemoteStatus::TransientBlock);
		assert_eq!(RemoteStatus::from_code(Some(405)), RemoteStatus::TransientBlock);
		assert_eq!(RemoteStatus::from_code(Some(403)), RemoteStatus::PermanentBlock);
		assert_eq!(RemoteStatus::from_code(Some(429)), RemoteStatus::Throttled);
		assert_eq!(RemoteStatus::from_code(Some(500)), RemoteStatus::Other(Some(500)));
		assert_eq!(RemoteStatus::from_code(None), RemoteStatus::Other(None));
	}

	#[test]
	fn connection_closed_message_is_transient() {
		assert_eq!(RemoteStatus::classify(None, "Connection Closed"), RemoteStatus::TransientBlock);
		assert_eq!(RemoteStatus::classify(Some(403), "Connection Closed"), RemoteStatus::PermanentBlock);
		assert_eq!(RemoteStatus::classify(None, "boom"), RemoteStatus::Other(None));
	}
}
