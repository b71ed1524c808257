//! Runtime settings.
//!
//! Settings come from environment variables, optionally overridden from the
//! command line. The command-line options implement [`config::Source`] so
//! that everything funnels through one `config` builder with one set of
//! defaults.

use std::{collections::HashMap, time::Duration};

use clap::Parser;
use config::{Config, ConfigBuilder, ConfigError, Environment, Map, Source, Value};
use serde::Deserialize;

use crate::networks::{network_config, Network, NetworkConfig};

#[derive(Parser, Debug, Clone, Default)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct CommandLineOptions {
	#[clap(long = "network")]
	network: Option<String>,
	#[clap(long = "execution_endpoints")]
	execution_endpoints: Option<String>,
	#[clap(long = "consensus_endpoints")]
	consensus_endpoints: Option<String>,
	#[clap(long = "graph_api_url")]
	graph_api_url: Option<String>,
	#[clap(long = "metrics_host")]
	metrics_host: Option<String>,
	#[clap(long = "metrics_port")]
	metrics_port: Option<u16>,
	#[clap(long = "log_level")]
	log_level: Option<String>,
}

pub fn insert_command_line_option<T: Clone + Into<Value>>(
	map: &mut HashMap<String, Value>,
	key: &str,
	option: &Option<T>,
) {
	if let Some(value) = option {
		map.insert(key.to_string(), value.clone().into());
	}
}

impl Source for CommandLineOptions {
	fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
		Box::new((*self).clone())
	}

	fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
		let mut map: HashMap<String, Value> = HashMap::new();

		insert_command_line_option(&mut map, "network", &self.network);
		insert_command_line_option(&mut map, "execution_endpoints", &self.execution_endpoints);
		insert_command_line_option(&mut map, "consensus_endpoints", &self.consensus_endpoints);
		insert_command_line_option(&mut map, "graph_api_url", &self.graph_api_url);
		insert_command_line_option(&mut map, "metrics_host", &self.metrics_host);
		insert_command_line_option(
			&mut map,
			"metrics_port",
			&self.metrics_port.map(|port| port as i64),
		);
		insert_command_line_option(&mut map, "log_level", &self.log_level);

		Ok(map)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
	pub network: Network,

	pub execution_endpoints: Vec<String>,
	pub consensus_endpoints: Vec<String>,
	pub l2_execution_endpoints: Vec<String>,
	pub ipfs_fetch_endpoints: Vec<String>,
	pub graph_api_url: Option<String>,

	pub private_key: String,

	pub skip_distributor_rewards: bool,
	pub skip_oseth_price_update: bool,
	pub skip_force_exits: bool,
	pub skip_ltv_update: bool,

	pub max_fee_per_gas_gwei: u64,
	pub priority_fee_num_blocks: u64,
	pub priority_fee_percentile: f64,
	pub attempts_with_default_gas: u32,

	pub execution_transaction_timeout: u64,
	pub ipfs_client_timeout: u64,
	pub ipfs_client_retry_timeout: u64,
	pub oracle_timeout: u64,
	pub graph_api_timeout: u64,
	pub graph_api_retry_timeout: u64,
	pub graph_page_size: u64,
	pub default_retry_time: u64,
	pub validators_fetch_chunk_size: usize,

	pub price_update_interval: u64,
	pub price_max_waiting_time: u64,
	pub force_exits_update_interval: u64,
	pub ltv_update_interval: u64,
	pub ltv_percent_delta: f64,

	pub metrics_host: String,
	pub metrics_port: u16,
	pub sentry_dsn: Option<String>,
	pub log_level: String,
}

impl Settings {
	pub fn new(opts: CommandLineOptions) -> Result<Self, ConfigError> {
		let mut settings: Settings = set_defaults(Config::builder())?
			.add_source(
				Environment::default()
					.try_parsing(true)
					.list_separator(",")
					.with_list_parse_key("execution_endpoints")
					.with_list_parse_key("consensus_endpoints")
					.with_list_parse_key("l2_execution_endpoints")
					.with_list_parse_key("ipfs_fetch_endpoints"),
			)
			.add_source(opts)
			.build()?
			.try_deserialize()?;

		settings.validate()?;
		Ok(settings)
	}

	fn validate(&mut self) -> Result<(), ConfigError> {
		if self.execution_endpoints.is_empty() {
			return Err(ConfigError::Message("EXECUTION_ENDPOINTS must not be empty".to_string()));
		}
		if self.consensus_endpoints.is_empty() {
			return Err(ConfigError::Message("CONSENSUS_ENDPOINTS must not be empty".to_string()));
		}
		if self.price_duty_enabled() {
			if self.l2_execution_endpoints.is_empty() {
				return Err(ConfigError::Message(
					"L2_EXECUTION_ENDPOINTS must be set when the price duty is enabled"
						.to_string(),
				));
			}
			if self.price_max_waiting_time >= self.price_update_interval {
				return Err(ConfigError::Message(format!(
					"PRICE_MAX_WAITING_TIME ({}) should be less than PRICE_UPDATE_INTERVAL ({})",
					self.price_max_waiting_time, self.price_update_interval
				)));
			}
		}
		if (self.force_exits_duty_enabled() || self.ltv_duty_enabled()) &&
			self.graph_api_url.is_none()
		{
			return Err(ConfigError::Message(
				"GRAPH_API_URL must be set when graph-backed duties are enabled".to_string(),
			));
		}
		Ok(())
	}

	pub fn network_config(&self) -> &'static NetworkConfig {
		network_config(self.network)
	}

	pub fn distributor_duty_enabled(&self) -> bool {
		!self.skip_distributor_rewards
	}

	pub fn price_duty_enabled(&self) -> bool {
		self.network.supports_oseth_price() && !self.skip_oseth_price_update
	}

	pub fn force_exits_duty_enabled(&self) -> bool {
		self.network.supports_force_exits() && !self.skip_force_exits
	}

	pub fn ltv_duty_enabled(&self) -> bool {
		!self.skip_ltv_update
	}

	pub fn execution_transaction_timeout(&self) -> Duration {
		Duration::from_secs(self.execution_transaction_timeout)
	}

	pub fn ipfs_client_timeout(&self) -> Duration {
		Duration::from_secs(self.ipfs_client_timeout)
	}

	pub fn ipfs_client_retry_timeout(&self) -> Duration {
		Duration::from_secs(self.ipfs_client_retry_timeout)
	}

	pub fn oracle_timeout(&self) -> Duration {
		Duration::from_secs(self.oracle_timeout)
	}

	pub fn graph_api_timeout(&self) -> Duration {
		Duration::from_secs(self.graph_api_timeout)
	}

	pub fn graph_api_retry_timeout(&self) -> Duration {
		Duration::from_secs(self.graph_api_retry_timeout)
	}

	pub fn default_retry_time(&self) -> Duration {
		Duration::from_secs(self.default_retry_time)
	}

	pub fn price_update_interval(&self) -> Duration {
		Duration::from_secs(self.price_update_interval)
	}

	pub fn price_max_waiting_time(&self) -> Duration {
		Duration::from_secs(self.price_max_waiting_time)
	}

	pub fn force_exits_update_interval(&self) -> Duration {
		Duration::from_secs(self.force_exits_update_interval)
	}

	pub fn ltv_update_interval(&self) -> Duration {
		Duration::from_secs(self.ltv_update_interval)
	}
}

fn set_defaults(
	config_builder: ConfigBuilder<config::builder::DefaultState>,
) -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
	Ok(config_builder
		.set_default("l2_execution_endpoints", Vec::<String>::new())?
		.set_default(
			"ipfs_fetch_endpoints",
			vec![
				"https://stakewise-v3.infura-ipfs.io".to_string(),
				"https://gateway.pinata.cloud".to_string(),
				"https://ipfs.io".to_string(),
			],
		)?
		.set_default("skip_distributor_rewards", false)?
		.set_default("skip_oseth_price_update", false)?
		.set_default("skip_force_exits", false)?
		.set_default("skip_ltv_update", false)?
		.set_default("max_fee_per_gas_gwei", 100u64)?
		.set_default("priority_fee_num_blocks", 10u64)?
		.set_default("priority_fee_percentile", 80.0f64)?
		.set_default("attempts_with_default_gas", 5u32)?
		.set_default("execution_transaction_timeout", 60u64)?
		.set_default("ipfs_client_timeout", 60u64)?
		.set_default("ipfs_client_retry_timeout", 120u64)?
		.set_default("oracle_timeout", 60u64)?
		.set_default("graph_api_timeout", 10u64)?
		.set_default("graph_api_retry_timeout", 60u64)?
		.set_default("graph_page_size", 100u64)?
		.set_default("default_retry_time", 30u64)?
		.set_default("validators_fetch_chunk_size", 100u64)?
		.set_default("price_update_interval", 12 * 60 * 60u64)?
		.set_default("price_max_waiting_time", 60 * 60u64)?
		.set_default("force_exits_update_interval", 120u64)?
		.set_default("ltv_update_interval", 24 * 60 * 60u64)?
		.set_default("ltv_percent_delta", 0.0002f64)?
		.set_default("metrics_host", "127.0.0.1")?
		.set_default("metrics_port", 9100u16 as i64)?
		.set_default("log_level", "info")?)
}

#[cfg(test)]
pub mod test_utils {
	use super::*;

	/// Settings for unit tests; no environment access.
	pub fn new_test_settings() -> Settings {
		Settings {
			network: Network::Mainnet,
			execution_endpoints: vec!["http://localhost:8545".to_string()],
			consensus_endpoints: vec!["http://localhost:5052".to_string()],
			l2_execution_endpoints: vec![],
			ipfs_fetch_endpoints: vec!["https://ipfs.io".to_string()],
			graph_api_url: Some("http://localhost:8000/subgraphs/name/stakewise".to_string()),
			private_key: "0x0000000000000000000000000000000000000000000000000000000000000001"
				.to_string(),
			skip_distributor_rewards: false,
			skip_oseth_price_update: true,
			skip_force_exits: true,
			skip_ltv_update: true,
			max_fee_per_gas_gwei: 100,
			priority_fee_num_blocks: 10,
			priority_fee_percentile: 80.0,
			attempts_with_default_gas: 3,
			execution_transaction_timeout: 60,
			ipfs_client_timeout: 60,
			ipfs_client_retry_timeout: 120,
			oracle_timeout: 60,
			graph_api_timeout: 10,
			graph_api_retry_timeout: 60,
			graph_page_size: 100,
			default_retry_time: 30,
			validators_fetch_chunk_size: 100,
			price_update_interval: 12 * 60 * 60,
			price_max_waiting_time: 60 * 60,
			force_exits_update_interval: 120,
			ltv_update_interval: 24 * 60 * 60,
			ltv_percent_delta: 0.0002,
			metrics_host: "127.0.0.1".to_string(),
			metrics_port: 9100,
			sentry_dsn: None,
			log_level: "info".to_string(),
		}
	}

	#[test]
	fn price_timing_constraint_is_enforced() {
		let mut settings = new_test_settings();
		settings.skip_oseth_price_update = false;
		settings.l2_execution_endpoints = vec!["http://localhost:8546".to_string()];
		settings.price_max_waiting_time = settings.price_update_interval;
		assert!(settings.validate().is_err());

		settings.price_max_waiting_time = settings.price_update_interval - 1;
		assert!(settings.validate().is_ok());
	}

	#[test]
	fn graph_url_required_for_graph_duties() {
		let mut settings = new_test_settings();
		settings.skip_ltv_update = false;
		settings.graph_api_url = None;
		assert!(settings.validate().is_err());
	}
}
