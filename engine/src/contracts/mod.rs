//! Typed facade over the on-chain contracts the keeper talks to.
//!
//! Each contract gets an `abigen!` binding plus a thin wrapper that maps our
//! domain values to ABI tuples and routes calls through the execution
//! client's failover/serialization machinery. Encode-only helpers exist for
//! multicall composition.

pub mod distributor;
pub mod keeper;
pub mod ltv_tracker;
pub mod multicall;
pub mod price;
pub mod strategy;

pub use distributor::MerkleDistributorContract;
pub use keeper::KeeperContract;
pub use ltv_tracker::VaultUserLtvTrackerContract;
pub use multicall::MulticallContract;
pub use price::{PriceFeedContract, PriceFeedSenderContract};
pub use strategy::{
	LeverageStrategyContract, OsTokenVaultEscrowContract, StrategyProxyContract,
	StrategyRegistryContract,
};

use ethers::types::{transaction::eip2718::TypedTransaction, H256, I256, U256};

use crate::execution::TxGasParams;

/// Merkle rewards proof required to call `updateVaultState` on a vault with
/// pending rewards. The zero-valued variant covers vaults with no rewards
/// yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestParams {
	pub rewards_root: H256,
	pub reward: I256,
	pub unlocked_mev_reward: U256,
	pub proof: Vec<H256>,
}

impl HarvestParams {
	pub fn zero() -> Self {
		Self::default()
	}

	/// ABI tuple shape shared by every contract taking harvest params.
	pub(crate) fn as_tuple(&self) -> ([u8; 32], I256, U256, Vec<[u8; 32]>) {
		(
			self.rewards_root.0,
			self.reward,
			self.unlocked_mev_reward,
			self.proof.iter().map(|hash| hash.0).collect(),
		)
	}
}

/// Overrides the EIP-1559 fee fields on a prepared contract call. A no-op
/// for legacy transactions, which this keeper never builds.
pub(crate) fn apply_gas_params<M, D>(
	call: &mut ethers::contract::ContractCall<M, D>,
	params: &TxGasParams,
) {
	if let TypedTransaction::Eip1559(tx) = &mut call.tx {
		tx.max_fee_per_gas = Some(params.max_fee_per_gas);
		tx.max_priority_fee_per_gas = Some(params.max_priority_fee_per_gas);
	}
}

/// Pins the account nonce handed out by the execution client's serialized
/// sign-and-send path.
pub(crate) fn apply_nonce<M, D>(call: &mut ethers::contract::ContractCall<M, D>, nonce: U256) {
	call.tx.set_nonce(nonce);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_harvest_params_are_all_zero() {
		let (root, reward, unlocked, proof) = HarvestParams::zero().as_tuple();
		assert_eq!(root, [0u8; 32]);
		assert_eq!(reward, I256::zero());
		assert_eq!(unlocked, U256::zero());
		assert!(proof.is_empty());
	}
}
