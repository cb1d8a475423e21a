//! Resolved process configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use pairlink::UserId;
use pairlink::config::BrokerConfig;
use url::Url;

use crate::cli::ServeArgs;
use crate::error::{CliError, Result};

pub const DEFAULT_PORT: u16 = 3000;

/// Where and how completed sessions are archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSettings {
	pub repo: String,
	pub token: Option<String>,
	pub branch: String,
	pub workdir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServeConfig {
	pub addr: SocketAddr,
	pub bridge_url: Url,
	pub archive: Option<ArchiveSettings>,
	pub notify_url: Option<Url>,
	pub self_ping_url: Option<Url>,
	pub privileged: Vec<UserId>,
	pub broker: BrokerConfig,
}

impl ServeConfig {
	pub fn from_args(args: ServeArgs) -> Result<Self> {
		Self::resolve(args, |key| std::env::var(key).ok())
	}

	/// Resolves `args`, consulting `env` for the platform fallbacks
	/// (`PORT`, `RENDER_EXTERNAL_URL`).
	pub fn resolve(args: ServeArgs, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let port = match args.port {
			Some(port) => port,
			None => match env("PORT") {
				Some(raw) => raw
					.trim()
					.parse()
					.map_err(|_| CliError::Config(format!("PORT is not a valid port: {raw:?}")))?,
				None => DEFAULT_PORT,
			},
		};
		let host: IpAddr = args
			.host
			.parse()
			.map_err(|_| CliError::Config(format!("invalid bind address {:?}", args.host)))?;

		let self_ping_url = match args.self_ping_url {
			Some(url) => Some(url),
			None => env("RENDER_EXTERNAL_URL")
				.filter(|raw| !raw.trim().is_empty())
				.map(|raw| Url::parse(raw.trim()).map_err(|err| CliError::Config(format!("RENDER_EXTERNAL_URL: {err}"))))
				.transpose()?,
		};

		let scratch_root = args.scratch_dir.unwrap_or_else(|| std::env::temp_dir().join("pairlink"));
		let mut broker = BrokerConfig::default().with_scratch_root(scratch_root);
		broker.finalize.welcome_images = args.welcome_images.into_iter().filter(|url| !url.trim().is_empty()).collect();
		broker.require_verification = args.require_verification;

		let archive = args.archive_repo.filter(|repo| !repo.trim().is_empty()).map(|repo| ArchiveSettings {
			repo,
			token: args.archive_token.filter(|token| !token.is_empty()),
			branch: args.archive_branch,
			workdir: args.archive_dir.unwrap_or_else(|| std::env::temp_dir().join("pairlink-archive")),
		});

		Ok(Self {
			addr: SocketAddr::new(host, port),
			bridge_url: args.bridge_url,
			archive,
			notify_url: args.notify_url,
			self_ping_url,
			privileged: args.admins.into_iter().map(UserId).collect(),
			broker,
		})
	}
}

#[cfg(test)]
mod tests {
	use clap::Parser;

	use super::*;
	use crate::cli::{Cli, Commands};

	fn args(extra: &[&str]) -> ServeArgs {
		let mut argv = vec!["pairlink", "serve"];
		argv.extend_from_slice(extra);
		match Cli::try_parse_from(argv).unwrap().command {
			Commands::Serve(args) => args,
		}
	}

	fn no_env(_: &str) -> Option<String> {
		None
	}

	#[test]
	fn port_falls_back_to_platform_variable() {
		let config = ServeConfig::resolve(args(&[]), |key| (key == "PORT").then(|| "8080".to_string())).unwrap();
		assert_eq!(config.addr.port(), 8080);

		let config = ServeConfig::resolve(args(&["--port", "9000"]), |_| Some("8080".to_string())).unwrap();
		assert_eq!(config.addr.port(), 9000);

		let config = ServeConfig::resolve(args(&[]), no_env).unwrap();
		assert_eq!(config.addr.port(), DEFAULT_PORT);
	}

	#[test]
	fn bad_platform_port_is_a_config_error() {
		let err = ServeConfig::resolve(args(&[]), |_| Some("eighty".to_string())).unwrap_err();
		assert!(matches!(err, CliError::Config(_)));
	}

	#[test]
	fn verification_is_opt_in() {
		assert!(!ServeConfig::resolve(args(&[]), no_env).unwrap().broker.require_verification);
		let config = ServeConfig::resolve(args(&["--require-verification"]), no_env).unwrap();
		assert!(config.broker.require_verification);
	}

	#[test]
	fn archive_is_optional() {
		assert!(ServeConfig::resolve(args(&[]), no_env).unwrap().archive.is_none());

		let config = ServeConfig::resolve(
			args(&["--archive-repo", "https://github.com/acme/sessions.git", "--archive-dir", "/srv/archive"]),
			no_env,
		)
		.unwrap();
		let archive = config.archive.unwrap();
		assert_eq!(archive.branch, "main");
		assert_eq!(archive.workdir, PathBuf::from("/srv/archive"));
		assert!(archive.token.is_none());
	}

	#[test]
	fn self_ping_falls_back_to_external_url() {
		let config = ServeConfig::resolve(args(&[]), |key| {
			(key == "RENDER_EXTERNAL_URL").then(|| "https://pairlink.example.com".to_string())
		})
		.unwrap();
		assert_eq!(config.self_ping_url.unwrap().as_str(), "https://pairlink.example.com/");
	}

	#[test]
	fn scratch_dir_reaches_both_services() {
		let config = ServeConfig::resolve(args(&["--scratch-dir", "/srv/scratch", "--admins", "5"]), no_env).unwrap();
		assert_eq!(config.broker.pairing.scratch_root, PathBuf::from("/srv/scratch"));
		assert_eq!(config.broker.cleanup.scratch_root, PathBuf::from("/srv/scratch"));
		assert_eq!(config.privileged, vec![UserId(5)]);
	}
}
