use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. The `RUST_LOG` environment
/// variable takes precedence over the configured level.
pub fn init(log_level: &str) {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new(log_level.to_string())),
		)
		.with_target(false)
		.init();
}
