//! Per-attempt scratch credential directories (`auth_{user}_{millis}`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::UserId;

pub const SCRATCH_PREFIX: &str = "auth_";

pub fn attempt_dir_name(user: UserId, millis: i64) -> String {
	format!("{SCRATCH_PREFIX}{user}_{millis}")
}

/// Creates a fresh, uniquely named directory under `root`.
pub fn create_attempt_dir(root: &Path, user: UserId) -> Result<PathBuf> {
	std::fs::create_dir_all(root)?;
	let mut millis = chrono::Utc::now().timestamp_millis();
	loop {
		let dir = root.join(attempt_dir_name(user, millis));
		match std::fs::create_dir(&dir) {
			Ok(()) => return Ok(dir),
			Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => millis += 1,
			Err(err) => return Err(err.into()),
		}
	}
}

/// Removes `dir` recursively. Returns `false` when it was already gone.
pub fn remove_scratch_dir(dir: &Path) -> std::io::Result<bool> {
	match std::fs::remove_dir_all(dir) {
		Ok(()) => Ok(true),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
		Err(err) => Err(err),
	}
}

pub fn schedule_removal(dir: PathBuf, after: Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		tokio::time::sleep(after).await;
		match remove_scratch_dir(&dir) {
			Ok(true) => debug!(target = "pairlink.pairing", dir = %dir.display(), "scratch directory removed"),
			Ok(false) => {}
			Err(err) => warn!(target = "pairlink.pairing", dir = %dir.display(), error = %err, "failed to remove scratch directory"),
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn attempt_dirs_are_namespaced_and_unique() {
		let root = tempfile::tempdir().unwrap();
		let first = create_attempt_dir(root.path(), UserId(7)).unwrap();
		let second = create_attempt_dir(root.path(), UserId(7)).unwrap();
		assert_ne!(first, second);
		let name = first.file_name().unwrap().to_string_lossy().to_string();
		assert!(name.starts_with("auth_7_"));
	}

	#[test]
	fn removing_a_missing_dir_is_not_an_error() {
		let root = tempfile::tempdir().unwrap();
		assert!(!remove_scratch_dir(&root.path().join("auth_missing")).unwrap());
	}

	#[tokio::test(start_paused = true)]
	async fn scheduled_removal_waits_for_retention() {
		let root = tempfile::tempdir().unwrap();
		let dir = create_attempt_dir(root.path(), UserId(1)).unwrap();
		let task = schedule_removal(dir.clone(), Duration::from_secs(300));

		tokio::time::sleep(Duration::from_secs(299)).await;
		assert!(dir.exists());
		task.await.unwrap();
		assert!(!dir.exists());
	}
}
