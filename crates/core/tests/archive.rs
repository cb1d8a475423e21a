use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use pairlink::archive::{DurableArchive, INDEX_FILE, MemoryRemote, MemoryRemoteLog, PushOutcome, RemoteLog, SESSIONS_DIR};
use pairlink::{PhoneNumber, SessionId, UserId};
use pairlink_protocol::{ArchiveIndex, IndexEntry, SessionMetadata};
use tempfile::TempDir;

fn index_path() -> PathBuf {
	Path::new(SESSIONS_DIR).join(INDEX_FILE)
}

fn credentials(root: &TempDir, name: &str) -> PathBuf {
	let dir = root.path().join(name);
	std::fs::create_dir_all(&dir).unwrap();
	std::fs::write(dir.join("creds.json"), format!(r#"{{"me":"{name}"}}"#)).unwrap();
	std::fs::write(dir.join("app-state-sync-key-1.json"), b"{}").unwrap();
	dir
}

fn remote_index(remote: &MemoryRemote) -> ArchiveIndex {
	serde_json::from_slice(&remote.tip_file(index_path()).expect("index on remote")).unwrap()
}

fn phone() -> PhoneNumber {
	PhoneNumber::parse("2348123456789").unwrap()
}

#[tokio::test]
async fn archiving_twice_commits_once() {
	let work = tempfile::tempdir().unwrap();
	let creds = tempfile::tempdir().unwrap();
	let remote = MemoryRemote::new();
	let archive = DurableArchive::new(Arc::new(MemoryRemoteLog::new(work.path(), Arc::clone(&remote)).unwrap()));
	let session = SessionId::from_string("A1B2C3D4E5F60718");
	let dir = credentials(&creds, "first");

	let first = archive.archive(&session, &phone(), &dir, UserId(1)).await;
	assert!(first.success);
	assert!(first.committed);
	assert_eq!(first.files_stored, 2);
	assert_eq!(remote.commit_count(), 1);

	let second = archive.archive(&session, &phone(), &dir, UserId(1)).await;
	assert!(second.success);
	assert!(!second.committed);
	assert_eq!(remote.commit_count(), 1);

	let index = remote_index(&remote);
	assert_eq!(index.stats.total_sessions, 1);
	assert_eq!(index.sessions["A1B2C3D4E5F60718"].phone_number, "234****6789");

	let metadata: SessionMetadata = serde_json::from_slice(
		&remote
			.tip_file(Path::new(SESSIONS_DIR).join("A1B2C3D4E5F60718").join("metadata.json"))
			.unwrap(),
	)
	.unwrap();
	assert_eq!(metadata.phone_number, "2348123456789");
	assert_eq!(metadata.files, vec!["app-state-sync-key-1.json", "creds.json"]);
	assert!(archive.workdir().join(SESSIONS_DIR).join("A1B2C3D4E5F60718").join("creds.json").exists());
}

/// Pushes a foreign session to the shared remote right before the first push.
struct Interfering {
	inner: MemoryRemoteLog,
	remote: Arc<MemoryRemote>,
	fired: AtomicBool,
}

#[async_trait]
impl RemoteLog for Interfering {
	fn workdir(&self) -> &Path {
		self.inner.workdir()
	}

	async fn fast_forward(&self) -> pairlink::Result<()> {
		self.inner.fast_forward().await
	}

	async fn reset_to_remote(&self) -> pairlink::Result<()> {
		self.inner.reset_to_remote().await
	}

	async fn stage_all(&self) -> pairlink::Result<bool> {
		self.inner.stage_all().await
	}

	async fn commit(&self, message: &str) -> pairlink::Result<()> {
		self.inner.commit(message).await
	}

	async fn push(&self) -> pairlink::Result<PushOutcome> {
		if !self.fired.swap(true, Ordering::SeqCst) {
			let mut index = ArchiveIndex::new("2026-01-01T00:00:00.000Z");
			index.upsert(
				IndexEntry {
					session_id: "FOREIGN0000000001".to_string(),
					phone_number: "447****0000".to_string(),
					user_id: 7,
					created: "2026-01-01T00:00:00.000Z".to_string(),
					status: "active".to_string(),
					file_count: 1,
				},
				"2026-01-01T00:00:00.000Z",
			);
			let index = serde_json::to_vec_pretty(&index).unwrap();
			self.remote.commit_external(&[
				("sessions/index.json", index.as_slice()),
				("sessions/FOREIGN0000000001/creds.json", b"{}".as_slice()),
			]);
		}
		self.inner.push().await
	}

	async fn ahead_of_remote(&self) -> pairlink::Result<bool> {
		self.inner.ahead_of_remote().await
	}
}

#[tokio::test]
async fn concurrent_remote_writer_is_merged_into_the_index() {
	let work = tempfile::tempdir().unwrap();
	let creds = tempfile::tempdir().unwrap();
	let remote = MemoryRemote::new();
	let log = Interfering {
		inner: MemoryRemoteLog::new(work.path(), Arc::clone(&remote)).unwrap(),
		remote: Arc::clone(&remote),
		fired: AtomicBool::new(false),
	};
	let archive = DurableArchive::new(Arc::new(log));
	let session = SessionId::from_string("B1B2C3D4E5F60718");

	let outcome = archive.archive(&session, &phone(), &credentials(&creds, "mine"), UserId(1)).await;

	assert!(outcome.success);
	let index = remote_index(&remote);
	assert_eq!(index.stats.total_sessions, 2);
	assert!(index.sessions.contains_key("FOREIGN0000000001"));
	assert!(index.sessions.contains_key("B1B2C3D4E5F60718"));
	assert!(remote.tip_file("sessions/FOREIGN0000000001/creds.json").is_some());
	assert!(remote.tip_file("sessions/B1B2C3D4E5F60718/creds.json").is_some());
}

#[tokio::test]
async fn persistent_rejection_reports_failure() {
	let work = tempfile::tempdir().unwrap();
	let creds = tempfile::tempdir().unwrap();
	let remote = MemoryRemote::new();
	remote.reject_next_pushes(3);
	let archive = DurableArchive::new(Arc::new(MemoryRemoteLog::new(work.path(), Arc::clone(&remote)).unwrap()));

	let outcome = archive
		.archive(&SessionId::generate(), &phone(), &credentials(&creds, "mine"), UserId(1))
		.await;

	assert!(!outcome.success);
	assert_eq!(remote.commit_count(), 0);
}

#[tokio::test]
async fn rejection_within_the_bound_still_succeeds() {
	let work = tempfile::tempdir().unwrap();
	let creds = tempfile::tempdir().unwrap();
	let remote = MemoryRemote::new();
	remote.reject_next_pushes(2);
	let archive = DurableArchive::new(Arc::new(MemoryRemoteLog::new(work.path(), Arc::clone(&remote)).unwrap()));

	let outcome = archive
		.archive(&SessionId::generate(), &phone(), &credentials(&creds, "mine"), UserId(1))
		.await;

	assert!(outcome.success);
	assert_eq!(remote.commit_count(), 1);
}

#[tokio::test]
async fn missing_credentials_fail_without_committing() {
	let work = tempfile::tempdir().unwrap();
	let creds = tempfile::tempdir().unwrap();
	let remote = MemoryRemote::new();
	let archive = DurableArchive::new(Arc::new(MemoryRemoteLog::new(work.path(), Arc::clone(&remote)).unwrap()));

	let outcome = archive
		.archive(&SessionId::generate(), &phone(), &creds.path().join("gone"), UserId(1))
		.await;

	assert!(!outcome.success);
	assert_eq!(outcome.files_stored, 0);
	assert_eq!(remote.commit_count(), 0);
}

#[tokio::test]
async fn concurrent_archives_are_serialized() {
	let work = tempfile::tempdir().unwrap();
	let creds = tempfile::tempdir().unwrap();
	let remote = MemoryRemote::new();
	let archive = DurableArchive::new(Arc::new(MemoryRemoteLog::new(work.path(), Arc::clone(&remote)).unwrap()));
	let first_dir = credentials(&creds, "first");
	let second_dir = credentials(&creds, "second");
	let first_id = SessionId::generate();
	let second_id = SessionId::generate();
	let first_phone = phone();
	let second_phone = PhoneNumber::parse("447700900123").unwrap();

	let (first, second) = tokio::join!(
		archive.archive(&first_id, &first_phone, &first_dir, UserId(1)),
		archive.archive(&second_id, &second_phone, &second_dir, UserId(2)),
	);

	assert!(first.success && second.success);
	assert_eq!(remote.commit_count(), 2);
	assert_eq!(remote_index(&remote).stats.total_sessions, 2);
}

#[tokio::test]
async fn prepare_creates_the_index_locally() {
	let work = tempfile::tempdir().unwrap();
	let remote = MemoryRemote::new();
	let archive = DurableArchive::new(Arc::new(MemoryRemoteLog::new(work.path(), remote).unwrap()));

	archive.prepare().await.unwrap();

	let index = archive.read_index().unwrap().unwrap();
	assert_eq!(index.stats.total_sessions, 0);
	assert!(index.sessions.is_empty());
}
