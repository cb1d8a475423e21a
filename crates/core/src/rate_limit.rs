//! Per-user sliding-window quota.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::types::UserId;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
	count: u32,
	window_start: Instant,
}

/// Tracks how many codes each user requested in the current window.
///
/// Windows are created lazily and live for the process lifetime only.
#[derive(Debug)]
pub struct RateLimiter {
	config: RateLimitConfig,
	windows: Mutex<HashMap<UserId, RateWindow>>,
}

impl RateLimiter {
	pub fn new(config: RateLimitConfig) -> Self {
		Self {
			config,
			windows: Mutex::new(HashMap::new()),
		}
	}

	pub fn admit(&self, user: UserId, privileged: bool) -> bool {
		self.admit_at(user, privileged, Instant::now())
	}

	/// Admits `user` at `now`. Denial leaves the window untouched.
	pub fn admit_at(&self, user: UserId, privileged: bool, now: Instant) -> bool {
		if privileged {
			return true;
		}

		let mut windows = self.windows.lock();
		let window = windows.entry(user).or_insert(RateWindow { count: 0, window_start: now });
		if now.saturating_duration_since(window.window_start) > self.config.window {
			window.count = 0;
			window.window_start = now;
		}

		if window.count >= self.config.max_per_window {
			debug!(target = "pairlink.rate_limit", %user, count = window.count, "quota exhausted");
			return false;
		}
		window.count += 1;
		true
	}

	pub fn reset(&self, user: UserId) {
		self.windows.lock().remove(&user);
	}

	pub fn remaining(&self, user: UserId) -> u32 {
		self.remaining_at(user, Instant::now())
	}

	pub fn remaining_at(&self, user: UserId, now: Instant) -> u32 {
		let windows = self.windows.lock();
		match windows.get(&user) {
			Some(window) if now.saturating_duration_since(window.window_start) <= self.config.window => {
				self.config.max_per_window.saturating_sub(window.count)
			}
			_ => self.config.max_per_window,
		}
	}

	pub fn max_per_window(&self) -> u32 {
		self.config.max_per_window
	}
}
