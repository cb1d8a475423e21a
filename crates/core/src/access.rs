//! Banned, verified and privileged users.

use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::info;

use crate::types::UserId;

#[derive(Debug, Default)]
pub struct AccessList {
	banned: RwLock<HashSet<UserId>>,
	/// Users the chat layer confirmed as members.
	verified: RwLock<HashSet<UserId>>,
	privileged: HashSet<UserId>,
}

impl AccessList {
	pub fn new(privileged: impl IntoIterator<Item = UserId>) -> Self {
		Self {
			banned: RwLock::new(HashSet::new()),
			verified: RwLock::new(HashSet::new()),
			privileged: privileged.into_iter().collect(),
		}
	}

	/// Returns `false` when the user was already banned.
	pub fn ban(&self, user: UserId) -> bool {
		let inserted = self.banned.write().insert(user);
		if inserted {
			info!(target = "pairlink.access", %user, "user banned");
		}
		inserted
	}

	/// Returns `false` when the user was not banned.
	pub fn unban(&self, user: UserId) -> bool {
		let removed = self.banned.write().remove(&user);
		if removed {
			info!(target = "pairlink.access", %user, "user unbanned");
		}
		removed
	}

	pub fn is_banned(&self, user: UserId) -> bool {
		self.banned.read().contains(&user)
	}

	/// Returns `false` when the user was already verified.
	pub fn verify(&self, user: UserId) -> bool {
		let inserted = self.verified.write().insert(user);
		if inserted {
			info!(target = "pairlink.access", %user, "user verified");
		}
		inserted
	}

	/// Privileged users count as verified.
	pub fn is_verified(&self, user: UserId) -> bool {
		self.is_privileged(user) || self.verified.read().contains(&user)
	}

	pub fn is_privileged(&self, user: UserId) -> bool {
		self.privileged.contains(&user)
	}

	pub fn verified_count(&self) -> usize {
		self.verified.read().len()
	}

	pub fn banned_count(&self) -> usize {
		self.banned.read().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ban_and_unban_report_changes() {
		let access = AccessList::default();
		assert!(access.ban(UserId(5)));
		assert!(!access.ban(UserId(5)));
		assert!(access.is_banned(UserId(5)));
		assert_eq!(access.banned_count(), 1);
		assert!(access.unban(UserId(5)));
		assert!(!access.unban(UserId(5)));
		assert!(!access.is_banned(UserId(5)));
	}

	#[test]
	fn verification_is_sticky_and_implied_by_privilege() {
		let access = AccessList::new([UserId(1)]);
		assert!(access.is_verified(UserId(1)));
		assert!(!access.is_verified(UserId(2)));
		assert!(access.verify(UserId(2)));
		assert!(!access.verify(UserId(2)));
		assert!(access.is_verified(UserId(2)));
		assert_eq!(access.verified_count(), 1);
	}

	#[test]
	fn privileged_set_is_fixed_at_construction() {
		let access = AccessList::new([UserId(1)]);
		assert!(access.is_privileged(UserId(1)));
		assert!(!access.is_privileged(UserId(2)));
	}
}
