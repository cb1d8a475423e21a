//! Error types for the pairing broker.

use std::path::PathBuf;

use pairlink_protocol::RemoteStatus;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Bridge error: {0}")]
	Bridge(String),

	#[error("Bridge channel closed")]
	ChannelClosed,

	#[error("Remote log error: {0}")]
	RemoteLog(String),

	#[error("Registry error: {0}")]
	Registry(String),

	#[error("Credential directory not found: {0}")]
	MissingCredentials(PathBuf),

	#[error("Notification failed: {0}")]
	Notify(String),
}

/// A rejection reported by the remote endpoint, either while opening a
/// connection or while requesting a pairing code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CodeRequestError {
	pub status_code: Option<u16>,
	pub message: String,
}

impl CodeRequestError {
	pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
		Self {
			status_code,
			message: message.into(),
		}
	}

	/// Classifies the rejection against the external status table.
	pub fn status(&self) -> RemoteStatus {
		RemoteStatus::classify(self.status_code, &self.message)
	}
}

impl From<Error> for CodeRequestError {
	fn from(err: Error) -> Self {
		Self::new(None, err.to_string())
	}
}
