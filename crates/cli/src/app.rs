//! Process wiring: builds the broker from [`ServeConfig`] and runs it until a
//! shutdown signal arrives.

use std::sync::Arc;

use pairlink::archive::{DurableArchive, GitRemoteLog};
use pairlink::bridge::BridgeClient;
use pairlink::notify::{LogNotifier, Notifier};
use pairlink::{Broker, BrokerParts};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{ArchiveSettings, ServeConfig};
use crate::error::{CliError, Result};
use crate::keepalive::KeepAlive;
use crate::notifier::WebhookNotifier;
use crate::server;
use crate::shutdown::shutdown_signal;

pub async fn run(config: ServeConfig) -> Result<()> {
	let client = BridgeClient::connect(config.bridge_url.as_str()).await?;

	let archive = match &config.archive {
		Some(settings) => open_archive(settings).await,
		None => {
			info!(target = "pairlink.archive", "no archive repository configured; sessions stay local");
			None
		}
	};

	let notifier: Arc<dyn Notifier> = match &config.notify_url {
		Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
		None => {
			info!(target = "pairlink.notify", "no webhook configured; notifications are logged");
			Arc::new(LogNotifier)
		}
	};

	let broker = Arc::new(Broker::new(BrokerParts {
		client: Arc::new(client),
		notifier,
		archive,
		privileged: config.privileged.clone(),
		config: config.broker.clone(),
	}));

	let cleanup = Arc::clone(broker.cleanup()).spawn();
	let keepalive = match &config.self_ping_url {
		Some(url) => Some(KeepAlive::new(url.clone())?.spawn()),
		None => None,
	};

	let listener = TcpListener::bind(config.addr).await.map_err(|source| CliError::Bind {
		addr: config.addr,
		source,
	})?;
	let served = server::serve(listener, server::router(Arc::clone(&broker)), shutdown_signal()).await;

	cleanup.abort();
	if let Some(keepalive) = keepalive {
		keepalive.abort();
	}
	info!(target = "pairlink", "stopped");
	served
}

/// Clones the archive remote and prepares its index. Archival is optional,
/// so failures only disable it.
async fn open_archive(settings: &ArchiveSettings) -> Option<Arc<DurableArchive>> {
	let log = match GitRemoteLog::clone_fresh(&settings.repo, settings.token.as_deref(), &settings.branch, &settings.workdir).await {
		Ok(log) => log,
		Err(err) => {
			warn!(target = "pairlink.archive", error = %err, "cannot clone archive repository; archiving disabled");
			return None;
		}
	};
	let archive = DurableArchive::new(Arc::new(log));
	if let Err(err) = archive.prepare().await {
		warn!(target = "pairlink.archive", error = %err, "cannot prepare archive index; archiving disabled");
		return None;
	}
	info!(target = "pairlink.archive", dir = %archive.workdir().display(), "archive ready");
	Some(Arc::new(archive))
}
