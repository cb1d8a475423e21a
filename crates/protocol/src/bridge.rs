//! JSON-RPC messages exchanged with the protocol sidecar.
//!
//! Requests carry a numeric `id` that the sidecar echoes back on the matching
//! response. Messages without an `id` are events:
//!
//! ```json
//! { "id": 3, "method": "requestPairingCode", "params": { "connectionId": "c1", "phone": "2348123456789" } }
//! { "id": 3, "result": { "code": "ABCD1234" } }
//! { "method": "connection.update", "params": { "connectionId": "c1", "update": { "connection": "open" } } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::update::ConnectionUpdate;

/// Opens a new protocol connection bound to a credential directory.
pub const METHOD_OPEN: &str = "open";
/// Requests a pairing code on an open connection.
pub const METHOD_REQUEST_PAIRING_CODE: &str = "requestPairingCode";
/// Tears down a connection and its listeners.
pub const METHOD_CLOSE: &str = "close";
/// Event carrying a [`ConnectionUpdate`] for one connection.
pub const EVENT_CONNECTION_UPDATE: &str = "connection.update";

/// Request message sent to the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Correlation id, unique per bridge link.
	pub id: u32,
	/// Method name to invoke.
	pub method: String,
	/// Method parameters.
	pub params: Value,
}

/// Response message from the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Request id this response correlates to.
	pub id: u32,
	/// Success result (mutually exclusive with error).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
}

/// Error details reported by the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
	pub message: String,
	/// Remote status code, when the protocol library attached one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status_code: Option<u16>,
}

/// Event message from the sidecar (no `id` field).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Discriminated union of inbound messages.
///
/// Messages with an `id` are responses, everything else is an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	Response(Response),
	Event(Event),
}

/// Parameters for [`METHOD_OPEN`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenParams {
	/// Directory holding the multi-file credential state for this connection.
	pub auth_dir: String,
	/// Browser identity presented to the remote endpoint.
	pub browser: String,
	pub connect_timeout_ms: u64,
	pub keep_alive_interval_ms: u64,
}

/// Result of [`METHOD_OPEN`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenResult {
	pub connection_id: String,
}

/// Parameters for [`METHOD_REQUEST_PAIRING_CODE`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PairingCodeParams {
	pub connection_id: String,
	pub phone: String,
}

/// Result of [`METHOD_REQUEST_PAIRING_CODE`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairingCodeResult {
	pub code: String,
}

/// Parameters for [`METHOD_CLOSE`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloseParams {
	pub connection_id: String,
}

/// Parameters of an [`EVENT_CONNECTION_UPDATE`] event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
	pub connection_id: String,
	pub update: ConnectionUpdate,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::update::ConnectionState;

	#[test]
	fn message_with_id_is_response() {
		let json = r#"{"id": 7, "result": {"code": "ABCD1234"}}"#;
		let Message::Response(response) = serde_json::from_str(json).unwrap() else {
			panic!("expected response");
		};
		assert_eq!(response.id, 7);
		let result: PairingCodeResult = serde_json::from_value(response.result.unwrap()).unwrap();
		assert_eq!(result.code, "ABCD1234");
	}

	#[test]
	fn error_response_keeps_status_code() {
		let json = r#"{"id": 2, "error": {"message": "Precondition Required", "statusCode": 428}}"#;
		let Message::Response(response) = serde_json::from_str(json).unwrap() else {
			panic!("expected response");
		};
		let error = response.error.unwrap();
		assert_eq!(error.status_code, Some(428));
		assert_eq!(error.message, "Precondition Required");
	}

	#[test]
	fn message_without_id_is_event() {
		let json = r#"{"method": "connection.update", "params": {"connectionId": "c1", "update": {"connection": "close", "lastDisconnect": {"statusCode": 515}}}}"#;
		let Message::Event(event) = serde_json::from_str(json).unwrap() else {
			panic!("expected event");
		};
		assert_eq!(event.method, EVENT_CONNECTION_UPDATE);
		let update: UpdateEvent = serde_json::from_value(event.params).unwrap();
		assert_eq!(update.connection_id, "c1");
		assert_eq!(update.update.connection, Some(ConnectionState::Close));
		assert_eq!(update.update.close_status(), Some(515));
	}

	#[test]
	fn open_params_use_camel_case() {
		let params = OpenParams {
			auth_dir: "/tmp/auth_1_2".to_string(),
			browser: "macOS/Chrome".to_string(),
			connect_timeout_ms: 180_000,
			keep_alive_interval_ms: 30_000,
		};
		let value = serde_json::to_value(&params).unwrap();
		assert_eq!(value["authDir"], "/tmp/auth_1_2");
		assert_eq!(value["connectTimeoutMs"], 180_000);
	}
}
