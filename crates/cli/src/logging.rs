use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over the verbosity count.
pub fn init_logging(verbose: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
	let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}

fn default_directive(verbose: u8) -> &'static str {
	match verbose {
		0 => "warn,pairlink=info",
		1 => "info",
		_ => "debug",
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn verbosity_raises_the_level() {
		assert_eq!(default_directive(0), "warn,pairlink=info");
		assert_eq!(default_directive(1), "info");
		assert_eq!(default_directive(5), "debug");
	}
}
