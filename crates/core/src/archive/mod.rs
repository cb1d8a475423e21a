//! Durable session archive.
//!
//! Completed sessions are copied into a working copy of a version-controlled
//! remote under `sessions/<id>/`, next to a `metadata.json` and the shared
//! `sessions/index.json`. Every archive operation holds one async mutex for
//! its whole duration and follows the same cycle per push attempt:
//!
//! 1. synchronize with the remote tip (fast-forward, else hard reset),
//! 2. (re)write this session's files on top of the synchronized tree,
//! 3. stage and commit; an unchanged tree is a successful no-op,
//! 4. push; a rejected push starts the cycle again.
//!
//! Rewriting after every synchronization keeps this operation's edits even
//! when a reset discarded them.

mod git;
mod memory;
mod remote;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use pairlink_protocol::{ARCHIVED_STATUS_ACTIVE, ArchiveIndex, IndexEntry, SessionMetadata};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use self::git::{DEFAULT_BRANCH, GitRemoteLog, authenticated_url};
pub use self::memory::{MemoryRemote, MemoryRemoteLog, Snapshot};
pub use self::remote::{PushOutcome, RemoteLog};
use crate::error::{Error, Result};
use crate::types::{PhoneNumber, SessionId, UserId};

pub const SESSIONS_DIR: &str = "sessions";
pub const INDEX_FILE: &str = "index.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const MAX_PUSH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveOutcome {
	pub success: bool,
	pub files_stored: usize,
	/// Whether this call created a commit.
	pub committed: bool,
}

pub struct DurableArchive {
	remote: Arc<dyn RemoteLog>,
	lock: Mutex<()>,
	max_push_attempts: u32,
}

impl DurableArchive {
	pub fn new(remote: Arc<dyn RemoteLog>) -> Self {
		Self {
			remote,
			lock: Mutex::new(()),
			max_push_attempts: MAX_PUSH_ATTEMPTS,
		}
	}

	pub fn with_max_push_attempts(mut self, attempts: u32) -> Self {
		self.max_push_attempts = attempts.max(1);
		self
	}

	pub fn workdir(&self) -> &Path {
		self.remote.workdir()
	}

	/// Synchronizes and makes sure `sessions/index.json` exists locally.
	pub async fn prepare(&self) -> Result<()> {
		let _guard = self.lock.lock().await;
		self.synchronize().await?;
		let sessions = self.sessions_dir();
		std::fs::create_dir_all(&sessions)?;
		let index_path = sessions.join(INDEX_FILE);
		if !index_path.exists() {
			write_json(&index_path, &ArchiveIndex::new(&timestamp()))?;
			info!(target = "pairlink.archive", path = %index_path.display(), "archive index created");
		}
		Ok(())
	}

	/// Archives one session. Failures are logged and reported as
	/// `success: false`; they never propagate.
	pub async fn archive(&self, session_id: &SessionId, phone: &PhoneNumber, credential_dir: &Path, user: UserId) -> ArchiveOutcome {
		let _guard = self.lock.lock().await;
		match self.archive_locked(session_id, phone, credential_dir, user).await {
			Ok(outcome) => {
				info!(
					target = "pairlink.archive",
					session = %session_id,
					files = outcome.files_stored,
					committed = outcome.committed,
					"session archived"
				);
				outcome
			}
			Err(err) => {
				warn!(target = "pairlink.archive", session = %session_id, error = %err, "archive failed");
				ArchiveOutcome::default()
			}
		}
	}

	pub fn read_index(&self) -> Result<Option<ArchiveIndex>> {
		read_json(&self.sessions_dir().join(INDEX_FILE))
	}

	async fn archive_locked(&self, session_id: &SessionId, phone: &PhoneNumber, credential_dir: &Path, user: UserId) -> Result<ArchiveOutcome> {
		let files = list_credential_files(credential_dir)?;

		for attempt in 1..=self.max_push_attempts {
			self.synchronize().await?;
			let files_stored = self.write_session(session_id, phone, user, credential_dir, &files)?;

			let staged = self.remote.stage_all().await?;
			if staged {
				self.remote.commit(&format!("Add session {session_id}")).await?;
			} else if !self.remote.ahead_of_remote().await? {
				debug!(target = "pairlink.archive", session = %session_id, "archive already up to date");
				return Ok(ArchiveOutcome {
					success: true,
					files_stored,
					committed: false,
				});
			}

			match self.remote.push().await? {
				PushOutcome::Pushed => {
					return Ok(ArchiveOutcome {
						success: true,
						files_stored,
						committed: staged,
					});
				}
				PushOutcome::Rejected => {
					warn!(target = "pairlink.archive", session = %session_id, attempt, "push rejected; resynchronizing");
				}
			}
		}

		Err(Error::RemoteLog(format!("push rejected {} times", self.max_push_attempts)))
	}

	async fn synchronize(&self) -> Result<()> {
		if let Err(err) = self.remote.fast_forward().await {
			debug!(target = "pairlink.archive", error = %err, "fast-forward failed; resetting to remote");
			self.remote.reset_to_remote().await?;
		}
		Ok(())
	}

	fn sessions_dir(&self) -> PathBuf {
		self.remote.workdir().join(SESSIONS_DIR)
	}

	fn write_session(&self, session_id: &SessionId, phone: &PhoneNumber, user: UserId, credential_dir: &Path, files: &[String]) -> Result<usize> {
		let sessions = self.sessions_dir();
		let session_dir = sessions.join(session_id.as_str());
		std::fs::create_dir_all(&session_dir)?;
		for name in files {
			std::fs::copy(credential_dir.join(name), session_dir.join(name))?;
		}

		let now = timestamp();
		let metadata_path = session_dir.join(METADATA_FILE);
		let metadata = match read_json::<SessionMetadata>(&metadata_path).ok().flatten() {
			Some(existing) if existing.phone_number == phone.as_str() && existing.user_id == user.0 && existing.files == files => existing,
			_ => SessionMetadata {
				session_id: session_id.to_string(),
				phone_number: phone.to_string(),
				user_id: user.0,
				created: now.clone(),
				files: files.to_vec(),
				status: ARCHIVED_STATUS_ACTIVE.to_string(),
				last_accessed: now.clone(),
			},
		};
		write_json(&metadata_path, &metadata)?;

		let index_path = sessions.join(INDEX_FILE);
		let mut index = read_json::<ArchiveIndex>(&index_path)?.unwrap_or_else(|| ArchiveIndex::new(&now));
		index.upsert(
			IndexEntry {
				session_id: session_id.to_string(),
				phone_number: phone.masked(),
				user_id: user.0,
				created: metadata.created.clone(),
				status: ARCHIVED_STATUS_ACTIVE.to_string(),
				file_count: files.len(),
			},
			&now,
		);
		write_json(&index_path, &index)?;
		Ok(files.len())
	}
}

/// Names of the regular files directly inside `dir`, sorted.
fn list_credential_files(dir: &Path) -> Result<Vec<String>> {
	if !dir.is_dir() {
		return Err(Error::MissingCredentials(dir.to_path_buf()));
	}
	let mut files = Vec::new();
	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		if entry.file_type()?.is_file() {
			files.push(entry.file_name().to_string_lossy().into_owned());
		}
	}
	files.sort();
	Ok(files)
}

fn timestamp() -> String {
	Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
	match std::fs::read_to_string(path) {
		Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(err) => Err(err.into()),
	}
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
	let contents = serde_json::to_string_pretty(value)?;
	if std::fs::read_to_string(path).is_ok_and(|existing| existing == contents) {
		return Ok(());
	}
	std::fs::write(path, contents)?;
	Ok(())
}
