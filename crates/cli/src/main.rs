use clap::Parser;
use pairlink_cli::cli::{Cli, Commands};
use pairlink_cli::config::ServeConfig;
use pairlink_cli::{app, logging};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let result = match cli.command {
		Commands::Serve(args) => match ServeConfig::from_args(args) {
			Ok(config) => app::run(config).await.map_err(anyhow::Error::from),
			Err(err) => Err(anyhow::Error::from(err)),
		},
	};

	if let Err(err) = result {
		error!(target = "pairlink", error = %format!("{err:#}"), "command failed");
		std::process::exit(1);
	}
}
