//! In-memory index of in-flight and completed sessions.
//!
//! Entries are keyed either provisionally by `(user, phone)` while the user
//! types their code, or permanently by a [`SessionId`] once the protocol
//! reports the connection open. Mutations only touch the map; closing the
//! connections of removed entries happens after the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::connection::ConnectionHandle;
use crate::error::{Error, Result};
use crate::types::{PhoneNumber, SessionId, UserId};

/// Ordered lifecycle; entries only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
	WaitingForAuth,
	Connecting,
	Connected,
}

impl SessionStatus {
	pub const PENDING: [SessionStatus; 2] = [SessionStatus::WaitingForAuth, SessionStatus::Connecting];

	pub fn is_pending(self) -> bool {
		matches!(self, SessionStatus::WaitingForAuth | SessionStatus::Connecting)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			SessionStatus::WaitingForAuth => "waiting_for_auth",
			SessionStatus::Connecting => "connecting",
			SessionStatus::Connected => "connected",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
	Provisional { user: UserId, phone: PhoneNumber },
	Permanent(SessionId),
}

impl SessionKey {
	pub fn provisional(user: UserId, phone: &PhoneNumber) -> Self {
		Self::Provisional { user, phone: phone.clone() }
	}

	pub fn is_provisional(&self) -> bool {
		matches!(self, Self::Provisional { .. })
	}
}

impl fmt::Display for SessionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Provisional { user, phone } => write!(f, "temp_{user}_{phone}"),
			Self::Permanent(id) => write!(f, "{id}"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
	pub key: SessionKey,
	pub user: UserId,
	pub phone: PhoneNumber,
	pub status: SessionStatus,
	pub created_at: Instant,
	pub connection: Option<ConnectionHandle>,
	pub scratch_dir: Option<PathBuf>,
	pub archived: bool,
}

impl SessionEntry {
	/// Provisional entry created when a code is issued.
	pub fn waiting(user: UserId, phone: PhoneNumber, connection: ConnectionHandle, scratch_dir: PathBuf) -> Self {
		Self {
			key: SessionKey::provisional(user, &phone),
			user,
			phone,
			status: SessionStatus::WaitingForAuth,
			created_at: Instant::now(),
			connection: Some(connection),
			scratch_dir: Some(scratch_dir),
			archived: false,
		}
	}

	pub fn age(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.created_at)
	}

	async fn close(&self) {
		if let Some(connection) = &self.connection {
			connection.close().await;
		}
	}
}

/// Operator-facing view of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
	pub key: String,
	pub user_id: UserId,
	pub phone: String,
	pub status: SessionStatus,
	pub age_secs: u64,
	pub archived: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
	entries: Mutex<HashMap<SessionKey, SessionEntry>>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts `entry`, returning the entry it replaced. Refuses to move an
	/// existing entry backward.
	pub fn put(&self, entry: SessionEntry) -> Result<Option<SessionEntry>> {
		let mut entries = self.entries.lock();
		if let Some(existing) = entries.get(&entry.key) {
			if existing.status > entry.status {
				return Err(Error::Registry(format!(
					"refusing to move {} from {} back to {}",
					entry.key,
					existing.status.as_str(),
					entry.status.as_str()
				)));
			}
		}
		debug!(target = "pairlink.registry", key = %entry.key, status = entry.status.as_str(), "entry stored");
		Ok(entries.insert(entry.key.clone(), entry))
	}

	pub fn get(&self, key: &SessionKey) -> Option<SessionEntry> {
		self.entries.lock().get(key).cloned()
	}

	pub fn delete(&self, key: &SessionKey) -> Option<SessionEntry> {
		self.entries.lock().remove(key)
	}

	/// Removes the entry only while it still holds `connection`.
	pub fn delete_if_connection(&self, key: &SessionKey, connection: &ConnectionHandle) -> Option<SessionEntry> {
		let mut entries = self.entries.lock();
		let owned = entries
			.get(key)
			.and_then(|entry| entry.connection.as_ref())
			.is_some_and(|held| held.same_connection(connection));
		if owned { entries.remove(key) } else { None }
	}

	pub fn find_by_user(&self, user: UserId, statuses: &[SessionStatus]) -> Vec<SessionEntry> {
		self.entries
			.lock()
			.values()
			.filter(|entry| entry.user == user && statuses.contains(&entry.status))
			.cloned()
			.collect()
	}

	/// Moves an existing entry forward to `status`, optionally swapping the
	/// connection it holds.
	pub fn advance(&self, key: &SessionKey, status: SessionStatus, connection: Option<ConnectionHandle>) -> Result<()> {
		let mut entries = self.entries.lock();
		let entry = entries
			.get_mut(key)
			.ok_or_else(|| Error::Registry(format!("no entry for {key}")))?;
		if entry.status > status {
			return Err(Error::Registry(format!(
				"refusing to move {key} from {} back to {}",
				entry.status.as_str(),
				status.as_str()
			)));
		}
		entry.status = status;
		if connection.is_some() {
			entry.connection = connection;
		}
		Ok(())
	}

	/// Replaces the provisional entry for `(user, phone)` with a connected
	/// entry under `session_id`.
	pub fn promote(
		&self,
		user: UserId,
		phone: &PhoneNumber,
		session_id: SessionId,
		connection: ConnectionHandle,
		scratch_dir: Option<PathBuf>,
	) -> SessionEntry {
		let provisional = SessionKey::provisional(user, phone);
		let entry = SessionEntry {
			key: SessionKey::Permanent(session_id),
			user,
			phone: phone.clone(),
			status: SessionStatus::Connected,
			created_at: Instant::now(),
			connection: Some(connection),
			scratch_dir,
			archived: false,
		};

		let mut entries = self.entries.lock();
		entries.remove(&provisional);
		entries.insert(entry.key.clone(), entry.clone());
		info!(target = "pairlink.registry", %user, key = %entry.key, "session promoted to connected");
		entry
	}

	pub fn set_archived(&self, key: &SessionKey, archived: bool) -> bool {
		match self.entries.lock().get_mut(key) {
			Some(entry) => {
				entry.archived = archived;
				true
			}
			None => false,
		}
	}

	/// Removes every waiting/connecting entry of `user`.
	pub fn take_pending(&self, user: UserId) -> Vec<SessionEntry> {
		self.take_where(|entry| entry.user == user && entry.status.is_pending())
	}

	/// Removes and closes the user's pending entries; returns how many.
	pub async fn evict_pending(&self, user: UserId) -> usize {
		let evicted = self.take_pending(user);
		for entry in &evicted {
			debug!(target = "pairlink.registry", %user, key = %entry.key, "evicting superseded attempt");
			entry.close().await;
		}
		evicted.len()
	}

	/// Closes every connection the user holds and drops the entries.
	pub async fn disconnect_all(&self, user: UserId) -> usize {
		let removed = self.take_where(|entry| entry.user == user);
		for entry in &removed {
			entry.close().await;
		}
		if !removed.is_empty() {
			info!(target = "pairlink.registry", %user, count = removed.len(), "user sessions disconnected");
		}
		removed.len()
	}

	/// Removes provisional entries older than `max_age` at `now`.
	pub fn take_stale_provisional(&self, now: Instant, max_age: Duration) -> Vec<SessionEntry> {
		self.take_where(|entry| entry.key.is_provisional() && entry.age(now) > max_age)
	}

	pub fn snapshot(&self) -> Vec<SessionSummary> {
		self.snapshot_at(Instant::now())
	}

	pub fn snapshot_at(&self, now: Instant) -> Vec<SessionSummary> {
		let mut summaries: Vec<SessionSummary> = self
			.entries
			.lock()
			.values()
			.map(|entry| SessionSummary {
				key: entry.key.to_string(),
				user_id: entry.user,
				phone: entry.phone.masked(),
				status: entry.status,
				age_secs: entry.age(now).as_secs(),
				archived: entry.archived,
			})
			.collect();
		summaries.sort_by(|a, b| a.key.cmp(&b.key));
		summaries
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn count_with_status(&self, status: SessionStatus) -> usize {
		self.entries.lock().values().filter(|entry| entry.status == status).count()
	}

	fn take_where(&self, predicate: impl Fn(&SessionEntry) -> bool) -> Vec<SessionEntry> {
		let mut entries = self.entries.lock();
		let keys: Vec<SessionKey> = entries.values().filter(|entry| predicate(entry)).map(|entry| entry.key.clone()).collect();
		keys.iter().filter_map(|key| entries.remove(key)).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fake::{FakeProtocolBuilder, FakeSocket};

	fn phone(digits: &str) -> PhoneNumber {
		PhoneNumber::parse(digits).unwrap()
	}

	async fn open_handle() -> (ConnectionHandle, FakeSocket) {
		use crate::connection::{OpenConfig, ProtocolClient};
		let (client, controller) = FakeProtocolBuilder::new().build();
		let opened = client
			.open(OpenConfig {
				auth_dir: PathBuf::from("/tmp/none"),
				browser: "test".into(),
				connect_timeout: Duration::from_secs(1),
				keep_alive_interval: Duration::from_secs(1),
			})
			.await
			.unwrap();
		let socket = controller.wait_for_opened(1).await;
		(opened.handle, socket)
	}

	#[test]
	fn provisional_key_renders_temp_prefix() {
		let key = SessionKey::provisional(UserId(42), &phone("2348123456789"));
		assert_eq!(key.to_string(), "temp_42_2348123456789");
	}

	#[tokio::test]
	async fn put_refuses_backward_transitions() {
		let registry = SessionRegistry::new();
		let (handle, _socket) = open_handle().await;
		let mut entry = SessionEntry::waiting(UserId(1), phone("1234567890"), handle, PathBuf::from("/tmp/a"));
		registry.put(entry.clone()).unwrap();

		entry.status = SessionStatus::Connecting;
		assert!(registry.put(entry.clone()).unwrap().is_some());

		entry.status = SessionStatus::WaitingForAuth;
		assert!(matches!(registry.put(entry), Err(Error::Registry(_))));
	}

	#[tokio::test]
	async fn evict_pending_closes_connections() {
		let registry = SessionRegistry::new();
		let (handle, socket) = open_handle().await;
		registry
			.put(SessionEntry::waiting(UserId(1), phone("1234567890"), handle, PathBuf::from("/tmp/a")))
			.unwrap();

		assert_eq!(registry.evict_pending(UserId(1)).await, 1);
		assert!(socket.is_closed());
		assert!(registry.is_empty());
		assert_eq!(registry.evict_pending(UserId(1)).await, 0);
	}

	#[tokio::test]
	async fn promote_replaces_provisional_entry() {
		let registry = SessionRegistry::new();
		let (handle, _socket) = open_handle().await;
		let user = UserId(3);
		let number = phone("2348123456789");
		registry
			.put(SessionEntry::waiting(user, number.clone(), handle.clone(), PathBuf::from("/tmp/a")))
			.unwrap();

		let id = SessionId::from_string("00112233AABBCCDD");
		let entry = registry.promote(user, &number, id.clone(), handle, None);
		assert_eq!(entry.status, SessionStatus::Connected);
		assert!(registry.get(&SessionKey::provisional(user, &number)).is_none());
		assert!(registry.find_by_user(user, &SessionStatus::PENDING).is_empty());
		assert_eq!(registry.find_by_user(user, &[SessionStatus::Connected]).len(), 1);

		assert!(registry.set_archived(&SessionKey::Permanent(id.clone()), true));
		assert!(registry.get(&SessionKey::Permanent(id)).unwrap().archived);
	}

	#[tokio::test]
	async fn disconnect_all_counts_every_entry_of_the_user() {
		let registry = SessionRegistry::new();
		let (first, first_socket) = open_handle().await;
		let (second, second_socket) = open_handle().await;
		registry.promote(UserId(1), &phone("1234567890"), SessionId::generate(), first, None);
		registry
			.put(SessionEntry::waiting(UserId(1), phone("1234567899"), second, PathBuf::from("/tmp/b")))
			.unwrap();

		assert_eq!(registry.disconnect_all(UserId(1)).await, 2);
		assert!(first_socket.is_closed());
		assert!(second_socket.is_closed());
		assert_eq!(registry.disconnect_all(UserId(1)).await, 0);
	}

	#[tokio::test]
	async fn delete_if_connection_ignores_replaced_entries() {
		let registry = SessionRegistry::new();
		let (old, _) = open_handle().await;
		let (new, _) = open_handle().await;
		let number = phone("1234567890");
		let key = SessionKey::provisional(UserId(1), &number);
		registry.put(SessionEntry::waiting(UserId(1), number, new.clone(), PathBuf::from("/tmp/a"))).unwrap();

		assert!(registry.delete_if_connection(&key, &old).is_none());
		assert!(registry.delete_if_connection(&key, &new).is_some());
	}

	#[tokio::test]
	async fn stale_provisional_entries_are_taken_by_age() {
		let registry = SessionRegistry::new();
		let (handle, _) = open_handle().await;
		let number = phone("1234567890");
		registry.put(SessionEntry::waiting(UserId(1), number, handle.clone(), PathBuf::from("/tmp/a"))).unwrap();
		registry.promote(UserId(2), &phone("1234567899"), SessionId::generate(), handle, None);

		let now = Instant::now();
		assert!(registry.take_stale_provisional(now, Duration::from_secs(180)).is_empty());
		let later = now + Duration::from_secs(181);
		let taken = registry.take_stale_provisional(later, Duration::from_secs(180));
		assert_eq!(taken.len(), 1);
		assert_eq!(registry.len(), 1);
	}

	#[tokio::test]
	async fn snapshot_masks_phone_numbers() {
		let registry = SessionRegistry::new();
		let (handle, _) = open_handle().await;
		registry
			.put(SessionEntry::waiting(UserId(1), phone("2348123456789"), handle, PathBuf::from("/tmp/a")))
			.unwrap();
		let snapshot = registry.snapshot();
		assert_eq!(snapshot[0].phone, "234****6789");
		assert_eq!(snapshot[0].key, "temp_1_2348123456789");
		assert_eq!(registry.count_with_status(SessionStatus::WaitingForAuth), 1);
	}
}
