//! Documents stored in the session archive working copy.
//!
//! Layout inside the working copy:
//!
//! ```text
//! sessions/
//!   index.json              <- ArchiveIndex
//!   <SESSION_ID>/
//!     metadata.json         <- SessionMetadata
//!     creds.json, ...       <- copied credential files
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const ARCHIVE_INDEX_VERSION: &str = "1.0.0";
/// Status recorded for archived sessions.
pub const ARCHIVED_STATUS_ACTIVE: &str = "active";

/// One session row in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
	pub session_id: String,
	/// Masked phone number (`234****6789`).
	pub phone_number: String,
	pub user_id: i64,
	pub created: String,
	pub status: String,
	pub file_count: usize,
}

/// Aggregate stats kept next to the session map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
	pub total_sessions: usize,
	pub last_updated: String,
}

/// The shared `sessions/index.json` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveIndex {
	pub version: String,
	pub created: String,
	#[serde(default)]
	pub sessions: BTreeMap<String, IndexEntry>,
	pub stats: IndexStats,
}

impl ArchiveIndex {
	/// Empty index stamped with `now`.
	pub fn new(now: &str) -> Self {
		Self {
			version: ARCHIVE_INDEX_VERSION.to_string(),
			created: now.to_string(),
			sessions: BTreeMap::new(),
			stats: IndexStats {
				total_sessions: 0,
				last_updated: now.to_string(),
			},
		}
	}

	/// Inserts or replaces `entry` and recomputes stats.
	///
	/// `last_updated` only moves when the session map actually changed, so
	/// rewriting an identical entry leaves the document byte-identical.
	/// Returns whether the map changed.
	pub fn upsert(&mut self, entry: IndexEntry, now: &str) -> bool {
		let changed = self.sessions.get(&entry.session_id) != Some(&entry);
		if changed {
			self.sessions.insert(entry.session_id.clone(), entry);
			self.stats.last_updated = now.to_string();
		}
		self.stats.total_sessions = self.sessions.len();
		changed
	}

	/// `stats.total_sessions == |sessions|`.
	pub fn is_consistent(&self) -> bool {
		self.stats.total_sessions == self.sessions.len()
	}
}

/// Per-session `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
	pub session_id: String,
	pub phone_number: String,
	pub user_id: i64,
	pub created: String,
	pub files: Vec<String>,
	pub status: String,
	pub last_accessed: String,
}
