use std::sync::Arc;

use ethers::{
	prelude::abigen,
	types::{Address, Bytes, H256, U256},
};

use crate::{
	contracts::HarvestParams,
	errors::{classify_contract_error, ExecutionError},
	execution::ExecutionClient,
	graph::ExitRequest,
};

abigen!(
	IStrategyRegistry,
	r#"[
		function getStrategyConfig(bytes32 strategyId, string configName) view returns (bytes)
	]"#
);

abigen!(
	IOsTokenVaultEscrow,
	r#"[
		function liqThresholdPercent() view returns (uint64)
	]"#
);

abigen!(
	IStrategyProxy,
	r#"[
		function owner() view returns (address)
	]"#
);

abigen!(
	ILeverageStrategy,
	r#"[
		function canForceEnterExitQueue(address vault, address user) view returns (bool)
		function forceEnterExitQueue(address vault, address user)
		function claimExitedAssets(address vault, address user, (uint256,uint256,uint256) exitPosition)
		function updateVaultState(address vault, (bytes32,int160,uint160,bytes32[]) harvestParams)
	]"#
);

pub struct StrategyRegistryContract {
	address: Address,
	client: Arc<ExecutionClient>,
}

impl StrategyRegistryContract {
	pub fn new(address: Address, client: Arc<ExecutionClient>) -> Self {
		Self { address, client }
	}

	async fn strategy_config(
		&self,
		strategy_id: H256,
		config_name: &'static str,
	) -> Result<U256, ExecutionError> {
		let address = self.address;
		self.client
			.request("getStrategyConfig", move |provider| async move {
				IStrategyRegistry::new(address, provider)
					.get_strategy_config(strategy_id.0, config_name.to_string())
					.call()
					.await
					.map(|value| U256::from_big_endian(&value))
					.map_err(classify_contract_error)
			})
			.await
	}

	pub async fn borrow_force_exit_ltv_percent(
		&self,
		strategy_id: H256,
	) -> Result<U256, ExecutionError> {
		self.strategy_config(strategy_id, "borrowForceExitLtvPercent").await
	}

	pub async fn vault_force_exit_ltv_percent(
		&self,
		strategy_id: H256,
	) -> Result<U256, ExecutionError> {
		self.strategy_config(strategy_id, "vaultForceExitLtvPercent").await
	}
}

pub struct OsTokenVaultEscrowContract {
	address: Address,
	client: Arc<ExecutionClient>,
}

impl OsTokenVaultEscrowContract {
	pub fn new(address: Address, client: Arc<ExecutionClient>) -> Self {
		Self { address, client }
	}

	pub async fn liq_threshold_percent(&self) -> Result<u64, ExecutionError> {
		let address = self.address;
		self.client
			.request("liqThresholdPercent", move |provider| async move {
				IOsTokenVaultEscrow::new(address, provider)
					.liq_threshold_percent()
					.call()
					.await
					.map_err(classify_contract_error)
			})
			.await
	}
}

pub struct StrategyProxyContract {
	address: Address,
	client: Arc<ExecutionClient>,
}

impl StrategyProxyContract {
	pub fn new(address: Address, client: Arc<ExecutionClient>) -> Self {
		Self { address, client }
	}

	pub async fn owner(&self) -> Result<Address, ExecutionError> {
		let address = self.address;
		self.client
			.request("owner", move |provider| async move {
				IStrategyProxy::new(address, provider)
					.owner()
					.call()
					.await
					.map_err(classify_contract_error)
			})
			.await
	}
}

/// Encode-only surface of the leverage strategy: every state change goes
/// through the multicall contract, so the wrapper only ever produces
/// calldata for batching.
pub struct LeverageStrategyContract {
	address: Address,
	client: Arc<ExecutionClient>,
}

impl LeverageStrategyContract {
	pub fn new(address: Address, client: Arc<ExecutionClient>) -> Self {
		Self { address, client }
	}

	/// Resolves the strategy contract behind a position's proxy.
	pub async fn from_proxy(
		proxy: Address,
		client: Arc<ExecutionClient>,
	) -> Result<Self, ExecutionError> {
		let owner = StrategyProxyContract::new(proxy, client.clone()).owner().await?;
		Ok(Self::new(owner, client))
	}

	pub fn address(&self) -> Address {
		self.address
	}

	fn binding(&self) -> ILeverageStrategy<crate::execution::rpc::HttpProvider> {
		ILeverageStrategy::new(self.address, self.client.provider())
	}

	fn calldata<D: ethers::abi::Detokenize>(
		call: ethers::contract::ContractCall<crate::execution::rpc::HttpProvider, D>,
		what: &'static str,
	) -> Result<Bytes, ExecutionError> {
		call.calldata()
			.ok_or_else(|| ExecutionError::Other(anyhow::anyhow!("no calldata for {what}")))
	}

	pub fn can_force_enter_exit_queue_calldata(
		&self,
		vault: Address,
		user: Address,
	) -> Result<Bytes, ExecutionError> {
		Self::calldata(
			self.binding().can_force_enter_exit_queue(vault, user),
			"canForceEnterExitQueue",
		)
	}

	pub fn force_enter_exit_queue_calldata(
		&self,
		vault: Address,
		user: Address,
	) -> Result<Bytes, ExecutionError> {
		Self::calldata(self.binding().force_enter_exit_queue(vault, user), "forceEnterExitQueue")
	}

	pub fn claim_exited_assets_calldata(
		&self,
		vault: Address,
		user: Address,
		exit_request: &ExitRequest,
	) -> Result<Bytes, ExecutionError> {
		let exit_position = (
			exit_request.position_ticket,
			U256::from(exit_request.timestamp),
			exit_request.exit_queue_index.unwrap_or_default(),
		);
		Self::calldata(
			self.binding().claim_exited_assets(vault, user, exit_position),
			"claimExitedAssets",
		)
	}

	pub fn update_vault_state_calldata(
		&self,
		vault: Address,
		harvest_params: &HarvestParams,
	) -> Result<Bytes, ExecutionError> {
		Self::calldata(
			self.binding().update_vault_state(vault, harvest_params.as_tuple()),
			"updateVaultState",
		)
	}
}
