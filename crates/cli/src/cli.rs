use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "pairlink")]
#[command(about = "Pairing-code broker for a multi-device messaging protocol")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the broker and its HTTP surface
	Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
	/// Port for the HTTP surface [default: $PORT or 3000]
	#[arg(long, env = "PAIRLINK_PORT")]
	pub port: Option<u16>,

	/// Address to bind
	#[arg(long, env = "PAIRLINK_HOST", default_value = "0.0.0.0")]
	pub host: String,

	/// Root for per-attempt credential directories
	#[arg(long, env = "PAIRLINK_SCRATCH_DIR", value_name = "DIR")]
	pub scratch_dir: Option<PathBuf>,

	/// WebSocket URL of the protocol sidecar
	#[arg(long, env = "PAIRLINK_BRIDGE_URL", default_value = "ws://127.0.0.1:8765")]
	pub bridge_url: Url,

	/// Remote repository that archives completed sessions
	#[arg(long, env = "PAIRLINK_ARCHIVE_REPO")]
	pub archive_repo: Option<String>,

	/// Access token embedded into an https archive remote
	#[arg(long, env = "PAIRLINK_ARCHIVE_TOKEN", hide_env_values = true)]
	pub archive_token: Option<String>,

	/// Branch the archive commits to
	#[arg(long, env = "PAIRLINK_ARCHIVE_BRANCH", default_value = pairlink::archive::DEFAULT_BRANCH)]
	pub archive_branch: String,

	/// Working copy location for the archive
	#[arg(long, env = "PAIRLINK_ARCHIVE_DIR", value_name = "DIR")]
	pub archive_dir: Option<PathBuf>,

	/// Webhook receiving user notifications; notifications are only logged when unset
	#[arg(long, env = "PAIRLINK_NOTIFY_URL")]
	pub notify_url: Option<Url>,

	/// Comma-separated privileged user ids
	#[arg(long, env = "PAIRLINK_ADMINS", value_delimiter = ',')]
	pub admins: Vec<i64>,

	/// Comma-separated image URLs for the welcome message
	#[arg(long, env = "PAIRLINK_WELCOME_IMAGES", value_delimiter = ',')]
	pub welcome_images: Vec<String>,

	/// External URL pinged every 10 minutes to keep the host awake [default: $RENDER_EXTERNAL_URL]
	#[arg(long, env = "PAIRLINK_SELF_PING_URL")]
	pub self_ping_url: Option<Url>,

	/// Refuse pairing to non-admins until the chat layer verifies them
	#[arg(long, env = "PAIRLINK_REQUIRE_VERIFICATION")]
	pub require_verification: bool,
}
