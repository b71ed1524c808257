use std::sync::Arc;

use ethers::{prelude::abigen, types::{Address, Bytes, TxHash}};

use crate::{
	constants::EVENTS_BLOCKS_RANGE_INTERVAL,
	contracts::{apply_gas_params, apply_nonce},
	duties::rewards::RewardVoteBody,
	errors::{classify_contract_error, ExecutionError},
	execution::{ExecutionClient, TxGasParams},
};

abigen!(
	IKeeper,
	r#"[
		function updateRewards((bytes32,uint256,uint64,string,bytes) params)
		function rewardsNonce() view returns (uint64)
		function canUpdateRewards() view returns (bool)
		function rewardsMinOracles() view returns (uint256)
		function canHarvest(address vault) view returns (bool)
		event ConfigUpdated(string configIpfsHash)
	]"#
);

pub struct KeeperContract {
	address: Address,
	genesis_block: u64,
	seconds_per_block: u64,
	client: Arc<ExecutionClient>,
}

impl KeeperContract {
	pub fn new(
		address: Address,
		genesis_block: u64,
		seconds_per_block: u64,
		client: Arc<ExecutionClient>,
	) -> Self {
		Self { address, genesis_block, seconds_per_block, client }
	}

	pub fn address(&self) -> Address {
		self.address
	}

	pub async fn rewards_nonce(&self) -> Result<u64, ExecutionError> {
		let address = self.address;
		self.client
			.request("rewardsNonce", move |provider| async move {
				IKeeper::new(address, provider)
					.rewards_nonce()
					.call()
					.await
					.map_err(classify_contract_error)
			})
			.await
	}

	/// Whether the keeper contract accepts the next rewards update yet.
	pub async fn can_update_rewards(&self) -> Result<bool, ExecutionError> {
		let address = self.address;
		self.client
			.request("canUpdateRewards", move |provider| async move {
				IKeeper::new(address, provider)
					.can_update_rewards()
					.call()
					.await
					.map_err(classify_contract_error)
			})
			.await
	}

	pub async fn rewards_min_oracles(&self) -> Result<u64, ExecutionError> {
		let address = self.address;
		self.client
			.request("rewardsMinOracles", move |provider| async move {
				IKeeper::new(address, provider)
					.rewards_min_oracles()
					.call()
					.await
					.map(|count| count.as_u64())
					.map_err(classify_contract_error)
			})
			.await
	}

	pub async fn can_harvest(
		&self,
		vault: Address,
		at_block: Option<u64>,
	) -> Result<bool, ExecutionError> {
		let address = self.address;
		self.client
			.request("canHarvest", move |provider| async move {
				let mut call = IKeeper::new(address, provider).can_harvest(vault);
				if let Some(block) = at_block {
					call = call.block(block);
				}
				call.call().await.map_err(classify_contract_error)
			})
			.await
	}

	/// Submits the rewards update transaction. The signatures blob is the
	/// address-ordered concatenation produced by the vote aggregator.
	pub async fn update_rewards(
		&self,
		vote: &RewardVoteBody,
		signatures: Bytes,
		gas: Option<TxGasParams>,
	) -> Result<TxHash, ExecutionError> {
		let address = self.address;
		let params = (
			vote.root.0,
			ethers::types::U256::from(vote.avg_reward_per_second),
			vote.update_timestamp,
			vote.ipfs_hash.clone(),
			signatures,
		);
		self.client
			.send("updateRewards", move |signer, nonce| {
				let params = params.clone();
				async move {
					let mut call = IKeeper::new(address, signer).update_rewards(params);
					apply_nonce(&mut call, nonce);
					if let Some(gas) = gas {
						apply_gas_params(&mut call, &gas);
					}
					call.send()
						.await
						.map(|pending| *pending)
						.map_err(classify_contract_error)
				}
			})
			.await
	}

	/// Scans backwards for the most recent `ConfigUpdated` event, one
	/// 24-hour window at a time, stopping at the keeper genesis block.
	pub async fn last_config_ipfs_hash(
		&self,
		to_block: u64,
	) -> Result<Option<String>, ExecutionError> {
		let address = self.address;
		let stride = EVENTS_BLOCKS_RANGE_INTERVAL.as_secs() / self.seconds_per_block;
		let mut to = to_block;
		while to >= self.genesis_block {
			let from = std::cmp::max(to.saturating_sub(stride), self.genesis_block);
			let events: Vec<ConfigUpdatedFilter> = self
				.client
				.request("ConfigUpdated", move |provider| async move {
					IKeeper::new(address, provider)
						.event::<ConfigUpdatedFilter>()
						.from_block(from)
						.to_block(to)
						.query()
						.await
						.map_err(classify_contract_error)
				})
				.await?;
			if let Some(event) = events.last() {
				return Ok(Some(event.config_ipfs_hash.clone()));
			}
			if from == self.genesis_block {
				break;
			}
			to = from - 1;
		}
		Ok(None)
	}
}
