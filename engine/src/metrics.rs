//! Metric monitoring for the keeper,
//! allowing a prometheus server to scrape the daemon.
//! Returns the metrics encoded in the prometheus text format.

use std::net::IpAddr;

use anyhow::Context;
use lazy_static::lazy_static;
use prometheus::{GaugeVec, IntCounter, IntGauge, IntGaugeVec, Opts, Registry};
use tracing::info;
use warp::Filter;

lazy_static! {
	static ref REGISTRY: Registry = Registry::new();
	pub static ref APP_VERSION: IntGaugeVec = IntGaugeVec::new(
		Opts::new("app_version", "Keeper version"),
		&["network", "version"]
	)
	.expect("metric successfully created");
	pub static ref KEEPER_ACCOUNT: IntGaugeVec = IntGaugeVec::new(
		Opts::new("keeper_account", "Keeper account"),
		&["network", "account"]
	)
	.expect("metric successfully created");
	pub static ref EPOCH: IntGauge =
		IntGauge::new("epoch", "Chain finalized head: epoch").expect("metric successfully created");
	pub static ref CONSENSUS_BLOCK: IntGauge =
		IntGauge::new("consensus_block", "Chain finalized head: consensus slot")
			.expect("metric successfully created");
	pub static ref EXECUTION_BLOCK: IntGauge =
		IntGauge::new("execution_block", "Chain finalized head: execution block")
			.expect("metric successfully created");
	pub static ref EXECUTION_TS: IntGauge =
		IntGauge::new("execution_ts", "Chain finalized head: execution timestamp")
			.expect("metric successfully created");
	pub static ref KEEPER_BALANCE: GaugeVec =
		GaugeVec::new(Opts::new("keeper_balance", "Keeper balance"), &["network"])
			.expect("metric successfully created");
	pub static ref PROCESSED_EXITS: IntCounter =
		IntCounter::new("processed_exits", "Number of exits the keeper processed")
			.expect("metric successfully created");
	pub static ref ORACLE_AVG_REWARDS_PER_SECOND: GaugeVec = GaugeVec::new(
		Opts::new("oracle_avg_rewards_per_second", "Oracle average rewards per second"),
		&["oracle_address"]
	)
	.expect("metric successfully created");
	pub static ref ORACLE_UPDATE_TIMESTAMP: IntGaugeVec = IntGaugeVec::new(
		Opts::new("oracle_update_timestamp", "Oracle update timestamp"),
		&["oracle_address"]
	)
	.expect("metric successfully created");
}

pub fn register_metrics() {
	REGISTRY
		.register(Box::new(APP_VERSION.clone()))
		.expect("metric successfully registered");
	REGISTRY
		.register(Box::new(KEEPER_ACCOUNT.clone()))
		.expect("metric successfully registered");
	REGISTRY.register(Box::new(EPOCH.clone())).expect("metric successfully registered");
	REGISTRY
		.register(Box::new(CONSENSUS_BLOCK.clone()))
		.expect("metric successfully registered");
	REGISTRY
		.register(Box::new(EXECUTION_BLOCK.clone()))
		.expect("metric successfully registered");
	REGISTRY
		.register(Box::new(EXECUTION_TS.clone()))
		.expect("metric successfully registered");
	REGISTRY
		.register(Box::new(KEEPER_BALANCE.clone()))
		.expect("metric successfully registered");
	REGISTRY
		.register(Box::new(PROCESSED_EXITS.clone()))
		.expect("metric successfully registered");
	REGISTRY
		.register(Box::new(ORACLE_AVG_REWARDS_PER_SECOND.clone()))
		.expect("metric successfully registered");
	REGISTRY
		.register(Box::new(ORACLE_UPDATE_TIMESTAMP.clone()))
		.expect("metric successfully registered");
}

/// Binds the prometheus exposition endpoint and returns the serving future.
pub fn serve(
	host: &str,
	port: u16,
) -> anyhow::Result<impl std::future::Future<Output = ()> + Send + 'static> {
	let address: IpAddr =
		host.parse().with_context(|| format!("invalid metrics host {host}"))?;
	info!("Starting metrics server on {address}:{port}");

	let future = warp::serve(
		warp::any()
			.and(warp::path("metrics"))
			.and(warp::path::end())
			.map(metrics_handler),
	)
	.bind((address, port));

	Ok(future)
}

fn metrics_handler() -> String {
	use prometheus::Encoder;
	let encoder = prometheus::TextEncoder::new();

	let mut buffer = Vec::new();
	if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
		tracing::error!("could not encode metrics: {}", e);
	};
	match String::from_utf8(buffer) {
		Ok(v) => v,
		Err(e) => {
			tracing::error!("metrics could not be encoded as utf8: {}", e);
			String::default()
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn registry_accepts_all_metrics_once() {
		register_metrics();
		PROCESSED_EXITS.inc();
		EPOCH.set(100);
		assert!(metrics_handler().contains("processed_exits"));
	}
}
