//! In-process remote log for tests.
//!
//! [`MemoryRemote`] plays the shared server: an append-only list of tree
//! snapshots. Each [`MemoryRemoteLog`] is one working copy of it on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::remote::{PushOutcome, RemoteLog};
use crate::error::{Error, Result};

/// Relative path to file contents.
pub type Snapshot = BTreeMap<PathBuf, Vec<u8>>;

#[derive(Debug, Default)]
struct RemoteState {
	commits: Vec<Snapshot>,
	reject_pushes: u32,
}

#[derive(Debug, Default)]
pub struct MemoryRemote {
	state: Mutex<RemoteState>,
}

impl MemoryRemote {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn commit_count(&self) -> usize {
		self.state.lock().commits.len()
	}

	pub fn tip(&self) -> Snapshot {
		self.state.lock().commits.last().cloned().unwrap_or_default()
	}

	pub fn tip_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
		self.state.lock().commits.last().and_then(|tip| tip.get(path.as_ref()).cloned())
	}

	/// Simulates another writer pushing `changes` on top of the tip.
	pub fn commit_external(&self, changes: &[(&str, &[u8])]) {
		let mut state = self.state.lock();
		let mut next = state.commits.last().cloned().unwrap_or_default();
		for (path, contents) in changes {
			next.insert(PathBuf::from(path), contents.to_vec());
		}
		state.commits.push(next);
	}

	/// Rejects the next `count` pushes regardless of history.
	pub fn reject_next_pushes(&self, count: u32) {
		self.state.lock().reject_pushes = count;
	}
}

#[derive(Debug, Default)]
struct LocalState {
	/// Number of remote commits this working copy is based on.
	base: usize,
	unpushed: Vec<Snapshot>,
	staged: Option<Snapshot>,
}

pub struct MemoryRemoteLog {
	workdir: PathBuf,
	remote: Arc<MemoryRemote>,
	local: Mutex<LocalState>,
}

impl MemoryRemoteLog {
	/// Checks out the remote tip into `workdir`.
	pub fn new(workdir: impl Into<PathBuf>, remote: Arc<MemoryRemote>) -> Result<Self> {
		let log = Self {
			workdir: workdir.into(),
			remote,
			local: Mutex::new(LocalState::default()),
		};
		std::fs::create_dir_all(&log.workdir)?;
		let (tip, base) = {
			let state = log.remote.state.lock();
			(state.commits.last().cloned().unwrap_or_default(), state.commits.len())
		};
		materialize(&log.workdir, &tip)?;
		log.local.lock().base = base;
		Ok(log)
	}

	fn head(&self, local: &LocalState) -> Snapshot {
		if let Some(last) = local.unpushed.last() {
			return last.clone();
		}
		match local.base {
			0 => Snapshot::new(),
			base => self.remote.state.lock().commits.get(base - 1).cloned().unwrap_or_default(),
		}
	}
}

#[async_trait]
impl RemoteLog for MemoryRemoteLog {
	fn workdir(&self) -> &Path {
		&self.workdir
	}

	async fn fast_forward(&self) -> Result<()> {
		let mut local = self.local.lock();
		let (tip, len) = {
			let state = self.remote.state.lock();
			(state.commits.last().cloned().unwrap_or_default(), state.commits.len())
		};
		if len == local.base {
			return Ok(());
		}
		if !local.unpushed.is_empty() {
			return Err(Error::RemoteLog("local and remote history diverged".into()));
		}
		materialize(&self.workdir, &tip)?;
		local.base = len;
		Ok(())
	}

	async fn reset_to_remote(&self) -> Result<()> {
		let mut local = self.local.lock();
		let (tip, len) = {
			let state = self.remote.state.lock();
			(state.commits.last().cloned().unwrap_or_default(), state.commits.len())
		};
		materialize(&self.workdir, &tip)?;
		local.unpushed.clear();
		local.staged = None;
		local.base = len;
		Ok(())
	}

	async fn stage_all(&self) -> Result<bool> {
		let mut local = self.local.lock();
		let snapshot = capture(&self.workdir)?;
		let changed = snapshot != self.head(&local);
		local.staged = changed.then_some(snapshot);
		Ok(changed)
	}

	async fn commit(&self, _message: &str) -> Result<()> {
		let mut local = self.local.lock();
		let staged = local.staged.take().ok_or_else(|| Error::RemoteLog("nothing staged to commit".into()))?;
		local.unpushed.push(staged);
		Ok(())
	}

	async fn push(&self) -> Result<PushOutcome> {
		let mut local = self.local.lock();
		let mut state = self.remote.state.lock();
		if state.reject_pushes > 0 {
			state.reject_pushes -= 1;
			return Ok(PushOutcome::Rejected);
		}
		if state.commits.len() != local.base {
			return Ok(PushOutcome::Rejected);
		}
		let unpushed = std::mem::take(&mut local.unpushed);
		state.commits.extend(unpushed);
		local.base = state.commits.len();
		Ok(PushOutcome::Pushed)
	}

	async fn ahead_of_remote(&self) -> Result<bool> {
		Ok(!self.local.lock().unpushed.is_empty())
	}
}

fn capture(root: &Path) -> Result<Snapshot> {
	let mut snapshot = Snapshot::new();
	let mut pending = vec![root.to_path_buf()];
	while let Some(dir) = pending.pop() {
		for entry in std::fs::read_dir(&dir)? {
			let path = entry?.path();
			if path.is_dir() {
				pending.push(path);
			} else {
				let relative = path.strip_prefix(root).map_err(|err| Error::RemoteLog(err.to_string()))?.to_path_buf();
				snapshot.insert(relative, std::fs::read(&path)?);
			}
		}
	}
	Ok(snapshot)
}

fn materialize(root: &Path, snapshot: &Snapshot) -> Result<()> {
	for entry in std::fs::read_dir(root)? {
		let path = entry?.path();
		if path.is_dir() {
			std::fs::remove_dir_all(&path)?;
		} else {
			std::fs::remove_file(&path)?;
		}
	}
	for (relative, contents) in snapshot {
		let path = root.join(relative);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, contents)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn commit_and_push_publish_the_working_copy() {
		let dir = tempfile::tempdir().unwrap();
		let remote = MemoryRemote::new();
		let log = MemoryRemoteLog::new(dir.path(), Arc::clone(&remote)).unwrap();

		std::fs::write(dir.path().join("a.txt"), b"one").unwrap();
		assert!(log.stage_all().await.unwrap());
		log.commit("add a").await.unwrap();
		assert!(log.ahead_of_remote().await.unwrap());
		assert_eq!(log.push().await.unwrap(), PushOutcome::Pushed);

		assert_eq!(remote.commit_count(), 1);
		assert_eq!(remote.tip_file("a.txt"), Some(b"one".to_vec()));
		assert!(!log.stage_all().await.unwrap());
	}

	#[tokio::test]
	async fn diverged_history_needs_a_reset() {
		let dir = tempfile::tempdir().unwrap();
		let remote = MemoryRemote::new();
		let log = MemoryRemoteLog::new(dir.path(), Arc::clone(&remote)).unwrap();

		std::fs::write(dir.path().join("mine.txt"), b"mine").unwrap();
		log.stage_all().await.unwrap();
		log.commit("mine").await.unwrap();
		remote.commit_external(&[("theirs.txt", b"theirs")]);

		assert_eq!(log.push().await.unwrap(), PushOutcome::Rejected);
		assert!(log.fast_forward().await.is_err());
		log.reset_to_remote().await.unwrap();

		assert!(dir.path().join("theirs.txt").exists());
		assert!(!dir.path().join("mine.txt").exists());
		assert!(!log.ahead_of_remote().await.unwrap());
	}

	#[tokio::test]
	async fn fast_forward_picks_up_remote_commits() {
		let dir = tempfile::tempdir().unwrap();
		let remote = MemoryRemote::new();
		let log = MemoryRemoteLog::new(dir.path(), Arc::clone(&remote)).unwrap();
		remote.commit_external(&[("sessions/index.json", b"{}")]);

		log.fast_forward().await.unwrap();
		assert_eq!(std::fs::read(dir.path().join("sessions/index.json")).unwrap(), b"{}");
	}
}
