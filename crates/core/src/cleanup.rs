//! Periodic reclamation of abandoned work.
//!
//! Each sweep runs three independent, fail-soft passes: stale text-entry
//! requests, stale provisional sessions, and orphaned `auth_*` scratch
//! directories. A failure in one entry is logged and counted; the sweep
//! carries on.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CleanupConfig;
use crate::pairing::scratch::{SCRATCH_PREFIX, remove_scratch_dir};
use crate::registry::SessionRegistry;
use crate::requests::RequestTracker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
	pub stale_requests: usize,
	pub stale_sessions: usize,
	pub orphaned_dirs: usize,
	pub failures: usize,
}

impl SweepReport {
	pub fn is_empty(&self) -> bool {
		self.stale_requests == 0 && self.stale_sessions == 0 && self.orphaned_dirs == 0 && self.failures == 0
	}
}

pub struct CleanupScheduler {
	registry: Arc<SessionRegistry>,
	requests: Arc<RequestTracker>,
	config: CleanupConfig,
}

impl CleanupScheduler {
	pub fn new(registry: Arc<SessionRegistry>, requests: Arc<RequestTracker>, config: CleanupConfig) -> Self {
		Self {
			registry,
			requests,
			config,
		}
	}

	/// Sweeps every `interval` until the task is aborted.
	pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(self.config.interval);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				let report = self.sweep().await;
				if !report.is_empty() {
					info!(
						target = "pairlink.cleanup",
						requests = report.stale_requests,
						sessions = report.stale_sessions,
						dirs = report.orphaned_dirs,
						failures = report.failures,
						"cleanup sweep finished"
					);
				}
			}
		})
	}

	pub async fn sweep(&self) -> SweepReport {
		self.sweep_at(Instant::now(), SystemTime::now()).await
	}

	/// Sweeps as of `now` (registry and request ages) and `wall` (directory
	/// modification times).
	pub async fn sweep_at(&self, now: Instant, wall: SystemTime) -> SweepReport {
		let mut report = SweepReport::default();

		let stale = self.requests.sweep_stale(now, self.config.request_timeout);
		for user in &stale {
			debug!(target = "pairlink.cleanup", %user, "dropped stale request");
		}
		report.stale_requests = stale.len();

		for entry in self.registry.take_stale_provisional(now, self.config.stale_after) {
			debug!(target = "pairlink.cleanup", key = %entry.key, "evicting stale provisional session");
			if let Some(connection) = &entry.connection {
				connection.close().await;
			}
			if let Some(dir) = &entry.scratch_dir {
				if let Err(err) = remove_scratch_dir(dir) {
					warn!(target = "pairlink.cleanup", key = %entry.key, error = %err, "failed to remove session scratch directory");
					report.failures += 1;
				}
			}
			report.stale_sessions += 1;
		}

		let (removed, failures) = self.sweep_orphaned_dirs(wall);
		report.orphaned_dirs = removed;
		report.failures += failures;
		report
	}

	fn sweep_orphaned_dirs(&self, wall: SystemTime) -> (usize, usize) {
		let root = &self.config.scratch_root;
		let entries = match std::fs::read_dir(root) {
			Ok(entries) => entries,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return (0, 0),
			Err(err) => {
				warn!(target = "pairlink.cleanup", root = %root.display(), error = %err, "cannot list scratch root");
				return (0, 1);
			}
		};

		let (mut removed, mut failures) = (0, 0);
		for entry in entries.flatten() {
			let path = entry.path();
			let is_scratch = entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX);
			if !is_scratch || !path.is_dir() {
				continue;
			}
			match self.orphan_age_exceeded(&path, wall) {
				Ok(false) => {}
				Ok(true) => match remove_scratch_dir(&path) {
					Ok(_) => {
						debug!(target = "pairlink.cleanup", dir = %path.display(), "removed orphaned scratch directory");
						removed += 1;
					}
					Err(err) => {
						warn!(target = "pairlink.cleanup", dir = %path.display(), error = %err, "failed to remove scratch directory");
						failures += 1;
					}
				},
				Err(err) => {
					warn!(target = "pairlink.cleanup", dir = %path.display(), error = %err, "cannot stat scratch directory");
					failures += 1;
				}
			}
		}
		(removed, failures)
	}

	fn orphan_age_exceeded(&self, path: &Path, wall: SystemTime) -> std::io::Result<bool> {
		let modified = std::fs::metadata(path)?.modified()?;
		Ok(wall.duration_since(modified).is_ok_and(|age| age > self.config.stale_after))
	}
}
