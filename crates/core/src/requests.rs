//! Pending text-entry requests, one per user.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
	/// Waiting for the user to type a phone number.
	AwaitingNumber { admin: bool },
	/// A code is being generated for the submitted number.
	Generating,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingRequest {
	pub stage: RequestStage,
	pub started_at: Instant,
}

#[derive(Debug, Default)]
pub struct RequestTracker {
	requests: Mutex<HashMap<UserId, PendingRequest>>,
}

impl RequestTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts (or restarts) the user's request in the awaiting-number stage.
	pub fn begin(&self, user: UserId, admin: bool) {
		self.begin_at(user, admin, Instant::now());
	}

	pub fn begin_at(&self, user: UserId, admin: bool, now: Instant) {
		self.requests.lock().insert(
			user,
			PendingRequest {
				stage: RequestStage::AwaitingNumber { admin },
				started_at: now,
			},
		);
	}

	pub fn get(&self, user: UserId) -> Option<PendingRequest> {
		self.requests.lock().get(&user).copied()
	}

	/// Moves an awaiting request to `Generating`, returning whether it was an
	/// admin request. `None` when the user has nothing awaiting a number.
	pub fn mark_generating(&self, user: UserId) -> Option<bool> {
		self.mark_generating_at(user, Instant::now())
	}

	/// Like [`mark_generating`](Self::mark_generating); the request's age restarts at `now`.
	pub fn mark_generating_at(&self, user: UserId, now: Instant) -> Option<bool> {
		let mut requests = self.requests.lock();
		let request = requests.get_mut(&user)?;
		match request.stage {
			RequestStage::AwaitingNumber { admin } => {
				request.stage = RequestStage::Generating;
				request.started_at = now;
				Some(admin)
			}
			RequestStage::Generating => None,
		}
	}

	pub fn finish(&self, user: UserId) -> bool {
		self.requests.lock().remove(&user).is_some()
	}

	/// Removes the request only while it is still `Generating`.
	pub fn finish_generating(&self, user: UserId) -> bool {
		let mut requests = self.requests.lock();
		if requests.get(&user).is_some_and(|request| request.stage == RequestStage::Generating) {
			requests.remove(&user);
			return true;
		}
		false
	}

	/// Drops awaiting requests older than `max_age` and returns their owners.
	/// `Generating` requests are left to the task that owns them.
	pub fn sweep_stale(&self, now: Instant, max_age: Duration) -> Vec<UserId> {
		let mut requests = self.requests.lock();
		let stale: Vec<UserId> = requests
			.iter()
			.filter(|(_, request)| matches!(request.stage, RequestStage::AwaitingNumber { .. }))
			.filter(|(_, request)| now.saturating_duration_since(request.started_at) > max_age)
			.map(|(user, _)| *user)
			.collect();
		for user in &stale {
			requests.remove(user);
		}
		stale
	}

	pub fn len(&self) -> usize {
		self.requests.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generating_requires_an_awaiting_request() {
		let tracker = RequestTracker::new();
		assert_eq!(tracker.mark_generating(UserId(1)), None);
		tracker.begin(UserId(1), true);
		assert_eq!(tracker.mark_generating(UserId(1)), Some(true));
		assert_eq!(tracker.mark_generating(UserId(1)), None);
		assert_eq!(tracker.get(UserId(1)).map(|r| r.stage), Some(RequestStage::Generating));
	}

	#[test]
	fn sweep_drops_only_old_requests() {
		let tracker = RequestTracker::new();
		let now = Instant::now();
		tracker.begin_at(UserId(1), false, now);
		tracker.begin_at(UserId(2), false, now + Duration::from_secs(170));
		let swept = tracker.sweep_stale(now + Duration::from_secs(181), Duration::from_secs(180));
		assert_eq!(swept, vec![UserId(1)]);
		assert!(tracker.get(UserId(2)).is_some());
		assert_eq!(tracker.len(), 1);
	}

	#[test]
	fn generating_requests_survive_the_sweep() {
		let tracker = RequestTracker::new();
		let t0 = Instant::now();
		tracker.begin_at(UserId(1), false, t0);
		assert_eq!(tracker.mark_generating_at(UserId(1), t0 + Duration::from_secs(170)), Some(false));
		assert_eq!(tracker.get(UserId(1)).map(|r| r.started_at), Some(t0 + Duration::from_secs(170)));

		let swept = tracker.sweep_stale(t0 + Duration::from_secs(600), Duration::from_secs(180));
		assert!(swept.is_empty());
		assert_eq!(tracker.get(UserId(1)).map(|r| r.stage), Some(RequestStage::Generating));
	}

	#[test]
	fn finish_generating_leaves_fresh_requests_alone() {
		let tracker = RequestTracker::new();
		tracker.begin(UserId(1), false);
		assert!(!tracker.finish_generating(UserId(1)));
		tracker.mark_generating(UserId(1));
		assert!(tracker.finish_generating(UserId(1)));
		assert!(tracker.is_empty());
	}

	#[test]
	fn finish_removes_request() {
		let tracker = RequestTracker::new();
		tracker.begin(UserId(4), false);
		assert!(tracker.finish(UserId(4)));
		assert!(!tracker.finish(UserId(4)));
		assert!(tracker.is_empty());
	}
}
