//! Known users and their pairing history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::types::{PhoneNumber, UserId};

/// One finished pairing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRecord {
	pub phone: PhoneNumber,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	pub success: bool,
	pub admin: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct UserRecord {
	first_seen: DateTime<Utc>,
	history: Vec<PairRecord>,
}

#[derive(Debug, Default)]
pub struct UserDirectory {
	users: Mutex<BTreeMap<UserId, UserRecord>>,
}

impl UserDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers the user on first contact.
	pub fn touch(&self, user: UserId) {
		self.users.lock().entry(user).or_insert_with(|| UserRecord {
			first_seen: Utc::now(),
			history: Vec::new(),
		});
	}

	pub fn record(&self, user: UserId, record: PairRecord) {
		let mut users = self.users.lock();
		let entry = users.entry(user).or_insert_with(|| UserRecord {
			first_seen: record.at,
			history: Vec::new(),
		});
		entry.history.push(record);
	}

	pub fn history(&self, user: UserId) -> Vec<PairRecord> {
		self.users.lock().get(&user).map(|record| record.history.clone()).unwrap_or_default()
	}

	pub fn first_seen(&self, user: UserId) -> Option<DateTime<Utc>> {
		self.users.lock().get(&user).map(|record| record.first_seen)
	}

	pub fn known_users(&self) -> Vec<UserId> {
		self.users.lock().keys().copied().collect()
	}

	pub fn len(&self) -> usize {
		self.users.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
