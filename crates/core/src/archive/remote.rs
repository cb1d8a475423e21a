use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
	Pushed,
	/// The remote moved on; resynchronize and try again.
	Rejected,
}

/// Narrow view of a version-controlled working copy with one remote.
#[async_trait]
pub trait RemoteLog: Send + Sync {
	fn workdir(&self) -> &Path;

	/// Fast-forwards the working copy to the remote tip. Fails when local and
	/// remote history diverged.
	async fn fast_forward(&self) -> Result<()>;

	/// Discards local commits and files and checks out the remote tip.
	async fn reset_to_remote(&self) -> Result<()>;

	/// Stages every change in the working copy; `true` when anything is staged.
	async fn stage_all(&self) -> Result<bool>;

	async fn commit(&self, message: &str) -> Result<()>;

	async fn push(&self) -> Result<PushOutcome>;

	/// Whether local commits are waiting to be pushed.
	async fn ahead_of_remote(&self) -> Result<bool>;
}
