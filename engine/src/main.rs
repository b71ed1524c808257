use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;

use keeper_engine::{
	logging, metrics, scheduler,
	services::Services,
	settings::{CommandLineOptions, Settings},
	startup_check,
};

#[tokio::main]
async fn main() -> ExitCode {
	let settings = match Settings::new(CommandLineOptions::parse()) {
		Ok(settings) => settings,
		Err(error) => {
			eprintln!("Error reading settings: {error}");
			return ExitCode::FAILURE;
		},
	};

	logging::init(&settings.log_level);
	tracing::info!(
		"Starting keeper service, version {}, network {}",
		env!("CARGO_PKG_VERSION"),
		settings.network,
	);
	if settings.sentry_dsn.is_some() {
		tracing::debug!("Crash-reporting DSN is configured but no reporter is wired in");
	}

	metrics::register_metrics();
	metrics::APP_VERSION
		.with_label_values(&[&settings.network.to_string(), env!("CARGO_PKG_VERSION")])
		.set(1);

	let services = match Services::build(settings) {
		Ok(services) => services,
		Err(error) => {
			tracing::error!("Failed to initialize clients: {error:#}");
			return ExitCode::FAILURE;
		},
	};

	metrics::KEEPER_ACCOUNT
		.with_label_values(&[
			&services.settings.network.to_string(),
			&format!("{:#x}", services.keeper_address()),
		])
		.set(1);

	if let Err(error) = startup_check::startup_checks(&services).await {
		tracing::error!("Startup checks failed: {error:#}");
		return ExitCode::FAILURE;
	}

	let metrics_server =
		match metrics::serve(&services.settings.metrics_host, services.settings.metrics_port) {
			Ok(server) => server,
			Err(error) => {
				tracing::error!("Failed to start metrics server: {error:#}");
				return ExitCode::FAILURE;
			},
		};
	tokio::spawn(metrics_server);

	let (shutdown_sender, shutdown_receiver) = watch::channel(false);
	tokio::spawn(async move {
		shutdown_signal().await;
		tracing::info!("Shutdown signal received");
		let _ = shutdown_sender.send(true);
	});

	tracing::info!("Started keeper service...");
	scheduler::run(services, shutdown_receiver).await;
	ExitCode::SUCCESS
}

async fn shutdown_signal() {
	let ctrl_c = tokio::signal::ctrl_c();
	#[cfg(unix)]
	{
		let mut sigterm =
			tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
				.expect("failed to install SIGTERM handler");
		tokio::select! {
			_ = ctrl_c => {},
			_ = sigterm.recv() => {},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = ctrl_c.await;
	}
}
