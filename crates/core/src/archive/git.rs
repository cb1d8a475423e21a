//! [`RemoteLog`] backed by the `git` binary.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::remote::{PushOutcome, RemoteLog};
use crate::error::{Error, Result};

pub const DEFAULT_BRANCH: &str = "main";
const COMMITTER_NAME: &str = "pairlink";
const COMMITTER_EMAIL: &str = "pairlink@localhost";

pub struct GitRemoteLog {
	workdir: PathBuf,
	branch: String,
}

impl GitRemoteLog {
	/// Uses an existing clone at `workdir`.
	pub fn open(workdir: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
		Self {
			workdir: workdir.into(),
			branch: branch.into(),
		}
	}

	/// Replaces `workdir` with a fresh clone of `url` at `branch`.
	pub async fn clone_fresh(url: &str, token: Option<&str>, branch: &str, workdir: impl Into<PathBuf>) -> Result<Self> {
		let workdir = workdir.into();
		if workdir.exists() {
			std::fs::remove_dir_all(&workdir)?;
		}
		if let Some(parent) = workdir.parent() {
			std::fs::create_dir_all(parent)?;
		}

		let remote = authenticated_url(url, token);
		let output = Command::new("git")
			.arg("clone")
			.args(["--branch", branch])
			.arg(&remote)
			.arg(&workdir)
			.output()
			.await?;
		if !output.status.success() {
			return Err(Error::RemoteLog(format!("git clone of {url} failed: {}", stderr(&output))));
		}
		info!(target = "pairlink.archive", url, branch, dir = %workdir.display(), "archive repository cloned");

		let log = Self::open(workdir, branch);
		log.git(&["config", "user.name", COMMITTER_NAME]).await?;
		log.git(&["config", "user.email", COMMITTER_EMAIL]).await?;
		Ok(log)
	}

	async fn run(&self, args: &[&str]) -> Result<Output> {
		debug!(target = "pairlink.archive", args = ?args, "git");
		Ok(Command::new("git").args(args).current_dir(&self.workdir).output().await?)
	}

	async fn git(&self, args: &[&str]) -> Result<String> {
		let output = self.run(args).await?;
		if !output.status.success() {
			return Err(Error::RemoteLog(format!("git {} failed: {}", args.join(" "), stderr(&output))));
		}
		Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
	}

	fn tracking_ref(&self) -> String {
		format!("origin/{}", self.branch)
	}
}

#[async_trait]
impl RemoteLog for GitRemoteLog {
	fn workdir(&self) -> &Path {
		&self.workdir
	}

	async fn fast_forward(&self) -> Result<()> {
		self.git(&["pull", "--ff-only", "origin", &self.branch]).await.map(|_| ())
	}

	async fn reset_to_remote(&self) -> Result<()> {
		self.git(&["fetch", "origin", &self.branch]).await?;
		self.git(&["reset", "--hard", &self.tracking_ref()]).await?;
		self.git(&["clean", "-fd"]).await?;
		Ok(())
	}

	async fn stage_all(&self) -> Result<bool> {
		self.git(&["add", "-A"]).await?;
		let output = self.run(&["diff", "--cached", "--quiet"]).await?;
		match output.status.code() {
			Some(0) => Ok(false),
			Some(1) => Ok(true),
			_ => Err(Error::RemoteLog(format!("git diff --cached failed: {}", stderr(&output)))),
		}
	}

	async fn commit(&self, message: &str) -> Result<()> {
		self.git(&["commit", "-m", message]).await.map(|_| ())
	}

	async fn push(&self) -> Result<PushOutcome> {
		let refspec = format!("HEAD:{}", self.branch);
		let output = self.run(&["push", "origin", &refspec]).await?;
		if output.status.success() {
			return Ok(PushOutcome::Pushed);
		}
		warn!(target = "pairlink.archive", stderr = %stderr(&output), "git push rejected");
		Ok(PushOutcome::Rejected)
	}

	async fn ahead_of_remote(&self) -> Result<bool> {
		let range = format!("{}..HEAD", self.tracking_ref());
		let count = self.git(&["rev-list", "--count", &range]).await?;
		count
			.parse::<u64>()
			.map(|ahead| ahead > 0)
			.map_err(|err| Error::RemoteLog(format!("unexpected rev-list output {count:?}: {err}")))
	}
}

/// Embeds `token` into an `https://` remote URL.
pub fn authenticated_url(url: &str, token: Option<&str>) -> String {
	match (token, url.strip_prefix("https://")) {
		(Some(token), Some(rest)) if !token.is_empty() => format!("https://x-access-token:{token}@{rest}"),
		_ => url.to_string(),
	}
}

fn stderr(output: &Output) -> String {
	String::from_utf8_lossy(&output.stderr).trim().to_string()
}
