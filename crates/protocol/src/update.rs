//! Connection lifecycle updates emitted by a protocol connection.

use serde::{Deserialize, Serialize};

/// Coarse connection state reported by the protocol library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
	Connecting,
	Open,
	Close,
}

/// Why a connection closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectInfo {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status_code: Option<u16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

/// One `connection.update` payload.
///
/// Every field is optional: the library emits partial updates (a QR offer
/// without a state change, a close with or without a disconnect reason).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub connection: Option<ConnectionState>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub qr: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_disconnect: Option<DisconnectInfo>,
}

impl ConnectionUpdate {
	pub fn connecting() -> Self {
		Self {
			connection: Some(ConnectionState::Connecting),
			..Default::default()
		}
	}

	pub fn open() -> Self {
		Self {
			connection: Some(ConnectionState::Open),
			..Default::default()
		}
	}

	pub fn qr(payload: impl Into<String>) -> Self {
		Self {
			qr: Some(payload.into()),
			..Default::default()
		}
	}

	/// Close update carrying an optional remote status code.
	pub fn closed(status_code: Option<u16>) -> Self {
		Self {
			connection: Some(ConnectionState::Close),
			qr: None,
			last_disconnect: Some(DisconnectInfo { status_code, message: None }),
		}
	}

	/// Returns `true` for the signals that should trigger a pairing-code request.
	pub fn offers_pairing(&self) -> bool {
		self.connection == Some(ConnectionState::Connecting) || self.qr.is_some()
	}

	pub fn is_open(&self) -> bool {
		self.connection == Some(ConnectionState::Open)
	}

	pub fn is_close(&self) -> bool {
		self.connection == Some(ConnectionState::Close)
	}

	/// Status code of the disconnect reason, if any.
	pub fn close_status(&self) -> Option<u16> {
		self.last_disconnect.as_ref().and_then(|info| info.status_code)
	}
}
