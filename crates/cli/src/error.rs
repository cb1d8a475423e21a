use std::net::SocketAddr;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error("Failed to bind {addr}: {source}")]
	Bind {
		addr: SocketAddr,
		#[source]
		source: std::io::Error,
	},

	#[error("Server error: {0}")]
	Server(#[source] std::io::Error),

	#[error(transparent)]
	Core(#[from] pairlink::Error),

	#[error("HTTP client error: {0}")]
	Http(#[from] reqwest::Error),
}
