use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use pairlink::archive::{DEFAULT_BRANCH, DurableArchive, GitRemoteLog};
use pairlink::{PhoneNumber, SessionId, UserId};

fn git_available() -> bool {
	Command::new("git").arg("--version").output().is_ok_and(|output| output.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
	let output = Command::new("git")
		.args(["-c", "user.name=seed", "-c", "user.email=seed@localhost", "-c", "commit.gpgsign=false"])
		.args(args)
		.current_dir(dir)
		.output()
		.unwrap();
	assert!(output.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&output.stderr));
	String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Bare repository with one seed commit on `main`.
fn seeded_remote(root: &Path) -> std::path::PathBuf {
	let bare = root.join("remote.git");
	std::fs::create_dir_all(&bare).unwrap();
	git(&bare, &["init", "--bare"]);
	git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);

	let seed = root.join("seed");
	std::fs::create_dir_all(&seed).unwrap();
	git(&seed, &["init"]);
	git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
	std::fs::write(seed.join("README.md"), "sessions\n").unwrap();
	git(&seed, &["add", "-A"]);
	git(&seed, &["commit", "-m", "seed"]);
	git(&seed, &["push", bare.to_str().unwrap(), "HEAD:main"]);
	bare
}

#[tokio::test]
async fn git_archive_commits_once_per_session() {
	if !git_available() {
		eprintln!("git not installed; skipping");
		return;
	}
	let root = tempfile::tempdir().unwrap();
	let bare = seeded_remote(root.path());
	let creds = root.path().join("auth_1_1");
	std::fs::create_dir_all(&creds).unwrap();
	std::fs::write(creds.join("creds.json"), b"{\"me\":1}").unwrap();

	let log = GitRemoteLog::clone_fresh(bare.to_str().unwrap(), None, DEFAULT_BRANCH, root.path().join("work"))
		.await
		.unwrap();
	let archive = DurableArchive::new(Arc::new(log));
	archive.prepare().await.unwrap();

	let session = SessionId::generate();
	let phone = PhoneNumber::parse("2348123456789").unwrap();
	let first = archive.archive(&session, &phone, &creds, UserId(1)).await;
	let second = archive.archive(&session, &phone, &creds, UserId(1)).await;

	assert!(first.success && first.committed);
	assert!(second.success && !second.committed);
	assert_eq!(git(&bare, &["rev-list", "--count", "main"]), "2");

	let listing = git(&bare, &["ls-tree", "-r", "--name-only", "main"]);
	assert!(listing.contains(&format!("sessions/{session}/creds.json")));
	assert!(listing.contains("sessions/index.json"));
}
