//! EIP-1559 transaction gas parameters.
//!
//! Two parameter sets come out of here: the default baseline used for every
//! first submission attempt, and a high-priority escape hatch used only
//! after the default attempts failed with a fee-too-low error.

use std::sync::Arc;

use ethers::types::{BlockNumber, U256};

use crate::{constants::HIGH_PRIORITY_FEE_FLOOR_MULTIPLIER, errors::ExecutionError, execution::ExecutionClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxGasParams {
	pub max_fee_per_gas: U256,
	pub max_priority_fee_per_gas: U256,
}

pub struct GasManager {
	client: Arc<ExecutionClient>,
	max_fee_per_gas: U256,
	priority_fee_num_blocks: u64,
	priority_fee_percentile: f64,
	min_effective_priority_fee_per_gas: U256,
}

impl GasManager {
	pub fn new(
		client: Arc<ExecutionClient>,
		max_fee_per_gas_gwei: u64,
		priority_fee_num_blocks: u64,
		priority_fee_percentile: f64,
		min_effective_priority_fee_per_gas: U256,
	) -> Self {
		Self {
			client,
			max_fee_per_gas: U256::from(max_fee_per_gas_gwei) * U256::exp10(9),
			priority_fee_num_blocks,
			priority_fee_percentile,
			min_effective_priority_fee_per_gas,
		}
	}

	pub async fn default_params(&self) -> Result<TxGasParams, ExecutionError> {
		self.params_with_floor(self.min_effective_priority_fee_per_gas).await
	}

	/// Same percentile window with the priority-fee floor raised. Used once
	/// per submission, after every default-gas attempt failed.
	pub async fn high_priority_params(&self) -> Result<TxGasParams, ExecutionError> {
		self.params_with_floor(
			self.min_effective_priority_fee_per_gas * HIGH_PRIORITY_FEE_FLOOR_MULTIPLIER,
		)
		.await
	}

	async fn params_with_floor(&self, floor: U256) -> Result<TxGasParams, ExecutionError> {
		let fee_history = self
			.client
			.fee_history(
				self.priority_fee_num_blocks,
				BlockNumber::Latest,
				&[self.priority_fee_percentile],
			)
			.await?;

		let rewards: Vec<U256> =
			fee_history.reward.iter().flatten().copied().collect();
		let priority_fee = std::cmp::max(
			percentile(&rewards, self.priority_fee_percentile),
			floor,
		);

		// The last entry of base_fee_per_gas is the next block's base fee.
		let base_fee = fee_history
			.base_fee_per_gas
			.last()
			.copied()
			.unwrap_or_default();

		let max_fee_per_gas =
			std::cmp::min(self.max_fee_per_gas, base_fee * 2 + priority_fee);

		Ok(TxGasParams { max_fee_per_gas, max_priority_fee_per_gas: priority_fee })
	}
}

/// Nearest-rank percentile over an unsorted slice. Zero for an empty slice.
fn percentile(values: &[U256], pct: f64) -> U256 {
	if values.is_empty() {
		return U256::zero();
	}
	let mut sorted = values.to_vec();
	sorted.sort();
	let rank = ((sorted.len() - 1) as f64 * pct / 100.0).round() as usize;
	sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
	use super::*;

	fn wei(n: u64) -> U256 {
		U256::from(n)
	}

	#[test]
	fn percentile_of_empty_is_zero() {
		assert_eq!(percentile(&[], 80.0), U256::zero());
	}

	#[test]
	fn percentile_picks_nearest_rank() {
		let values: Vec<U256> = (1..=10).map(wei).collect();
		assert_eq!(percentile(&values, 0.0), wei(1));
		assert_eq!(percentile(&values, 50.0), wei(6));
		assert_eq!(percentile(&values, 80.0), wei(8));
		assert_eq!(percentile(&values, 100.0), wei(10));
	}

	#[test]
	fn percentile_is_order_independent() {
		let values = vec![wei(30), wei(10), wei(20)];
		assert_eq!(percentile(&values, 50.0), wei(20));
	}
}
