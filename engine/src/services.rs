//! Shared client/facade wiring.
//!
//! The dependency graph is built once at startup, in order: execution
//! clients first, then the contract facade, then the duties receive
//! everything by reference from the scheduler. No globals.

use std::sync::Arc;

use anyhow::{Context, Result};
use ethers::{
	signers::LocalWallet,
	types::{Address, TxHash},
};
use futures::Future;

use crate::{
	consensus::ConsensusClient,
	contracts::{
		KeeperContract, MerkleDistributorContract, MulticallContract, OsTokenVaultEscrowContract,
		PriceFeedContract, PriceFeedSenderContract, StrategyRegistryContract,
		VaultUserLtvTrackerContract,
	},
	errors::ExecutionError,
	execution::{submit::submit, ExecutionClient, GasManager, TxGasParams},
	graph::GraphClient,
	ipfs::IpfsFetchClient,
	networks::NetworkConfig,
	protocol_config::OracleCommittee,
	settings::Settings,
	votes::OracleHttpClient,
};

pub struct Services {
	pub settings: Settings,
	pub network: &'static NetworkConfig,

	pub execution: Arc<ExecutionClient>,
	pub l2_execution: Option<Arc<ExecutionClient>>,
	pub consensus: ConsensusClient,
	pub ipfs: IpfsFetchClient,
	pub graph: Option<GraphClient>,
	pub oracle_http: OracleHttpClient,
	pub gas: GasManager,

	pub keeper: KeeperContract,
	pub distributor: MerkleDistributorContract,
	pub multicall: MulticallContract,
	pub ltv_tracker: VaultUserLtvTrackerContract,
	pub strategy_registry: StrategyRegistryContract,
	pub escrow: OsTokenVaultEscrowContract,
	pub price_sender: Option<PriceFeedSenderContract>,
	pub price_feed: Option<PriceFeedContract>,
}

impl Services {
	pub fn build(settings: Settings) -> Result<Self> {
		let network = settings.network_config();

		let wallet: LocalWallet = settings
			.private_key
			.trim_start_matches("0x")
			.parse()
			.context("invalid PRIVATE_KEY")?;

		let chain_id = network.chain_id;
		let execution = Arc::new(ExecutionClient::new(
			&settings.execution_endpoints,
			Some(wallet),
			chain_id,
			settings.default_retry_time(),
		)?);

		let l2_execution = if settings.l2_execution_endpoints.is_empty() {
			None
		} else {
			Some(Arc::new(ExecutionClient::new(
				&settings.l2_execution_endpoints,
				None,
				chain_id,
				settings.default_retry_time(),
			)?))
		};

		let consensus =
			ConsensusClient::new(&settings.consensus_endpoints, settings.default_retry_time())?;

		let ipfs = IpfsFetchClient::new(
			&settings.ipfs_fetch_endpoints,
			settings.ipfs_client_timeout(),
			settings.ipfs_client_retry_timeout(),
		)?;

		let graph = settings
			.graph_api_url
			.as_ref()
			.map(|url| {
				GraphClient::new(
					url,
					settings.graph_api_timeout(),
					settings.graph_api_retry_timeout(),
					settings.graph_page_size,
				)
			})
			.transpose()?;

		let oracle_http = OracleHttpClient::new(settings.oracle_timeout())?;

		let gas = GasManager::new(
			execution.clone(),
			settings.max_fee_per_gas_gwei,
			settings.priority_fee_num_blocks,
			settings.priority_fee_percentile,
			network.min_effective_priority_fee_per_gas,
		);

		let keeper = KeeperContract::new(
			network.keeper_contract_address,
			network.keeper_genesis_block,
			network.seconds_per_block,
			execution.clone(),
		);
		let distributor = MerkleDistributorContract::new(
			network.merkle_distributor_contract_address,
			execution.clone(),
		);
		let multicall =
			MulticallContract::new(network.multicall_contract_address, execution.clone());
		let ltv_tracker = VaultUserLtvTrackerContract::new(
			network.vault_user_ltv_tracker_contract_address,
			execution.clone(),
		);
		let strategy_registry = StrategyRegistryContract::new(
			network.strategy_registry_contract_address,
			execution.clone(),
		);
		let escrow = OsTokenVaultEscrowContract::new(
			network.ostoken_vault_escrow_contract_address,
			execution.clone(),
		);

		let (price_sender, price_feed) = match (&network.price, &l2_execution) {
			(Some(price), Some(l2_execution)) => (
				Some(PriceFeedSenderContract::new(
					price.price_feed_sender_contract_address,
					execution.clone(),
				)),
				Some(PriceFeedContract::new(
					price.target_price_feed_contract_address,
					l2_execution.clone(),
				)),
			),
			_ => (None, None),
		};

		Ok(Self {
			settings,
			network,
			execution,
			l2_execution,
			consensus,
			ipfs,
			graph,
			oracle_http,
			gas,
			keeper,
			distributor,
			multicall,
			ltv_tracker,
			strategy_registry,
			escrow,
			price_sender,
			price_feed,
		})
	}

	pub fn keeper_address(&self) -> Address {
		self.execution.address().expect("main execution client always carries the keeper key")
	}

	pub fn graph(&self) -> Result<&GraphClient> {
		self.graph.as_ref().context("graph client is not configured")
	}

	/// Routes a transaction through the gas-aware submission wrapper:
	/// default params on every first attempt, high-priority params on the
	/// final escape-hatch resubmission.
	pub async fn submit_tx<F, Fut>(&self, tx_function: F) -> Result<TxHash, ExecutionError>
	where
		F: Fn(Option<TxGasParams>) -> Fut,
		Fut: Future<Output = Result<TxHash, ExecutionError>>,
	{
		let default_params = self.gas.default_params().await?;
		submit(
			|gas| tx_function(Some(gas.unwrap_or(default_params))),
			|| self.gas.high_priority_params(),
			self.settings.attempts_with_default_gas,
			self.network.block_period(),
		)
		.await
	}

	/// Waits for the receipt and reports whether the transaction succeeded.
	pub async fn wait_for_tx_status(&self, tx_hash: TxHash) -> Result<bool, ExecutionError> {
		let receipt = self
			.execution
			.wait_for_transaction_receipt(tx_hash, self.settings.execution_transaction_timeout())
			.await?;
		Ok(receipt.status.map(|status| status.as_u64() == 1).unwrap_or(false))
	}

	/// Loads the committee for the current tick.
	pub async fn load_protocol_config(&self) -> Result<OracleCommittee> {
		crate::protocol_config::load_protocol_config(&self.execution, &self.keeper, &self.ipfs)
			.await
	}
}
