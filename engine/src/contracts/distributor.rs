use std::sync::Arc;

use ethers::{
	prelude::abigen,
	types::{Address, Bytes, TxHash, H256},
};

use crate::{
	contracts::{apply_gas_params, apply_nonce},
	duties::distributor::DistributorRewardVoteBody,
	errors::{classify_contract_error, ExecutionError},
	execution::{ExecutionClient, TxGasParams},
};

abigen!(
	IMerkleDistributor,
	r#"[
		function rewardsRoot() view returns (bytes32)
		function nonce() view returns (uint64)
		function rewardsMinOracles() view returns (uint256)
		function getNextRewardsRootUpdateTimestamp() view returns (uint64)
		function setRewardsRoot(bytes32 newRewardsRoot, string newRewardsIpfsHash, bytes signatures)
	]"#
);

pub struct MerkleDistributorContract {
	address: Address,
	client: Arc<ExecutionClient>,
}

impl MerkleDistributorContract {
	pub fn new(address: Address, client: Arc<ExecutionClient>) -> Self {
		Self { address, client }
	}

	pub async fn rewards_root(&self) -> Result<H256, ExecutionError> {
		let address = self.address;
		self.client
			.request("rewardsRoot", move |provider| async move {
				IMerkleDistributor::new(address, provider)
					.rewards_root()
					.call()
					.await
					.map(H256)
					.map_err(classify_contract_error)
			})
			.await
	}

	pub async fn nonce(&self) -> Result<u64, ExecutionError> {
		let address = self.address;
		self.client
			.request("nonce", move |provider| async move {
				IMerkleDistributor::new(address, provider)
					.nonce()
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
				IMerkleDistributor::new(address, provider)
					.rewards_min_oracles()
					.call()
					.await
					.map(|count| count.as_u64())
					.map_err(classify_contract_error)
			})
			.await
	}

	pub async fn next_rewards_root_update_timestamp(&self) -> Result<u64, ExecutionError> {
		let address = self.address;
		self.client
			.request("getNextRewardsRootUpdateTimestamp", move |provider| async move {
				IMerkleDistributor::new(address, provider)
					.get_next_rewards_root_update_timestamp()
					.call()
					.await
					.map_err(classify_contract_error)
			})
			.await
	}

	pub async fn set_rewards_root(
		&self,
		vote: &DistributorRewardVoteBody,
		signatures: Bytes,
		gas: Option<TxGasParams>,
	) -> Result<TxHash, ExecutionError> {
		let address = self.address;
		let root = vote.root.0;
		let ipfs_hash = vote.ipfs_hash.clone();
		self.client
			.send("setRewardsRoot", move |signer, nonce| {
				let ipfs_hash = ipfs_hash.clone();
				let signatures = signatures.clone();
				async move {
					let mut call = IMerkleDistributor::new(address, signer)
						.set_rewards_root(root, ipfs_hash, signatures);
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
}
