//! Tunables for the broker services.
//!
//! Defaults carry the production timings; tests shrink them.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BROWSER: &str = "Ubuntu/Chrome/20.0.04";

/// Timings and limits for a single logical pairing request.
#[derive(Debug, Clone)]
pub struct PairingConfig {
	/// Connection-level timeout armed once per attempt.
	pub connection_timeout: Duration,
	pub max_retries: u32,
	/// Backoff before retry `n` is `(n + 1) * retry_backoff_step`.
	pub retry_backoff_step: Duration,
	/// Delay between the first pairing signal and the code request.
	pub code_request_delay: Duration,
	/// Delay before opening the reconnect socket after a restart request.
	pub reconnect_delay: Duration,
	/// How long scratch credential material outlives its attempt.
	pub scratch_retention: Duration,
	pub scratch_root: PathBuf,
	pub browser: String,
	pub keep_alive_interval: Duration,
}

impl Default for PairingConfig {
	fn default() -> Self {
		Self {
			connection_timeout: Duration::from_secs(180),
			max_retries: DEFAULT_MAX_RETRIES,
			retry_backoff_step: Duration::from_secs(20),
			code_request_delay: Duration::from_secs(2),
			reconnect_delay: Duration::from_secs(2),
			scratch_retention: Duration::from_secs(5 * 60),
			scratch_root: std::env::temp_dir().join("pairlink"),
			browser: DEFAULT_BROWSER.to_string(),
			keep_alive_interval: Duration::from_secs(30),
		}
	}
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
	pub window: Duration,
	pub max_per_window: u32,
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			window: Duration::from_secs(24 * 60 * 60),
			max_per_window: 2,
		}
	}
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
	pub interval: Duration,
	/// Age after which an unfinished text-entry request is dropped.
	pub request_timeout: Duration,
	/// Age after which provisional sessions and `auth_*` directories are reclaimed.
	pub stale_after: Duration,
	pub scratch_root: PathBuf,
}

impl Default for CleanupConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(3 * 60),
			request_timeout: Duration::from_secs(3 * 60),
			stale_after: Duration::from_secs(3 * 60),
			scratch_root: std::env::temp_dir().join("pairlink"),
		}
	}
}

/// What the user receives once their session is live.
#[derive(Debug, Clone, Default)]
pub struct FinalizeConfig {
	pub welcome_images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
	pub pairing: PairingConfig,
	pub rate_limit: RateLimitConfig,
	pub cleanup: CleanupConfig,
	pub finalize: FinalizeConfig,
	/// Upper bound on how long `submit_phone` waits for a code.
	pub request_timeout: Duration,
	pub broadcast_spacing: Duration,
	/// Non-privileged users must be verified before they may pair.
	pub require_verification: bool,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			pairing: PairingConfig::default(),
			rate_limit: RateLimitConfig::default(),
			cleanup: CleanupConfig::default(),
			finalize: FinalizeConfig::default(),
			request_timeout: Duration::from_secs(3 * 60),
			broadcast_spacing: Duration::from_millis(100),
			require_verification: false,
		}
	}
}

impl BrokerConfig {
	/// Points both the pairing driver and the sweeper at one scratch root.
	pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		self.pairing.scratch_root = root.clone();
		self.cleanup.scratch_root = root;
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scratch_root_is_shared() {
		let config = BrokerConfig::default().with_scratch_root("/tmp/x");
		assert_eq!(config.pairing.scratch_root, config.cleanup.scratch_root);
	}
}
