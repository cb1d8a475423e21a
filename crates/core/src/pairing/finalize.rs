use std::path::PathBuf;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::archive::DurableArchive;
use crate::config::FinalizeConfig;
use crate::connection::ConnectionHandle;
use crate::notify::Notifier;
use crate::registry::SessionRegistry;
use crate::types::{PhoneNumber, SessionId, UserId};

/// A session whose protocol connection reported open.
#[derive(Debug, Clone)]
pub struct ConnectedSession {
	pub user: UserId,
	pub phone: PhoneNumber,
	pub session_id: SessionId,
	pub connection: ConnectionHandle,
	pub scratch_dir: PathBuf,
}

/// Promotes connected sessions, archives them and welcomes the user.
pub struct Finalizer {
	registry: Arc<SessionRegistry>,
	archive: Option<Arc<DurableArchive>>,
	notifier: Arc<dyn Notifier>,
	config: FinalizeConfig,
}

impl Finalizer {
	pub fn new(
		registry: Arc<SessionRegistry>,
		archive: Option<Arc<DurableArchive>>,
		notifier: Arc<dyn Notifier>,
		config: FinalizeConfig,
	) -> Self {
		Self {
			registry,
			archive,
			notifier,
			config,
		}
	}

	/// Returns whether the session reached the archive.
	pub async fn finalize(&self, session: ConnectedSession) -> bool {
		let ConnectedSession {
			user,
			phone,
			session_id,
			connection,
			scratch_dir,
		} = session;

		let entry = self
			.registry
			.promote(user, &phone, session_id.clone(), connection, Some(scratch_dir.clone()));

		let archived = match &self.archive {
			Some(archive) => archive.archive(&session_id, &phone, &scratch_dir, user).await.success,
			None => false,
		};
		self.registry.set_archived(&entry.key, archived);
		if !archived && self.archive.is_some() {
			warn!(target = "pairlink.pairing", %user, session = %session_id, "session connected but not archived");
		}

		self.welcome(user, &session_id).await;
		info!(target = "pairlink.pairing", %user, session = %session_id, archived, "session finalized");
		archived
	}

	async fn welcome(&self, user: UserId, session_id: &SessionId) {
		let image = self.config.welcome_images.choose(&mut rand::thread_rng()).cloned();
		if let Some(url) = image {
			if let Err(err) = self.notifier.send_image(user, &url, "Your session is connected.").await {
				warn!(target = "pairlink.pairing", %user, error = %err, "failed to send welcome image");
			}
		}

		let text = format!("Session ID: {session_id}\n\nKeep this ID private.");
		if let Err(err) = self.notifier.send_text(user, &text).await {
			warn!(target = "pairlink.pairing", %user, error = %err, "failed to send session id");
		}
	}
}
