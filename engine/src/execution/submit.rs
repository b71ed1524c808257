//! Transaction submission wrapper.
//!
//! Handles periods with high gas in the network: a transaction is attempted
//! `attempts_with_default_gas` times with the default gas params, sleeping
//! one block period between attempts when the node rejects it with the
//! fee-too-low RPC code. When every default attempt has failed, it is
//! resubmitted once with high-priority gas. At most one submission is ever
//! accepted per successful return; receipt waiting is the caller's business.

use std::time::Duration;

use ethers::types::TxHash;
use futures::Future;

use crate::{errors::ExecutionError, execution::TxGasParams};

pub async fn submit<F, Fut, G, GFut>(
	tx_function: F,
	high_priority_params: G,
	attempts_with_default_gas: u32,
	block_period: Duration,
) -> Result<TxHash, ExecutionError>
where
	F: Fn(Option<TxGasParams>) -> Fut,
	Fut: Future<Output = Result<TxHash, ExecutionError>>,
	G: FnOnce() -> GFut,
	GFut: Future<Output = Result<TxGasParams, ExecutionError>>,
{
	for attempt in 0..attempts_with_default_gas {
		match tx_function(None).await {
			Ok(tx_hash) => return Ok(tx_hash),
			Err(error) if error.is_fee_too_low() => {
				tracing::warn!("submission attempt {attempt} rejected: {error}");
				if attempt + 1 < attempts_with_default_gas {
					tokio::time::sleep(block_period).await;
				}
			},
			Err(error) => return Err(error),
		}
	}

	let params = high_priority_params().await?;
	tracing::info!(
		"resubmitting with high-priority gas: max_fee_per_gas={}, max_priority_fee_per_gas={}",
		params.max_fee_per_gas,
		params.max_priority_fee_per_gas
	);
	tx_function(Some(params)).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::errors::FEE_TOO_LOW_RPC_CODE;
	use ethers::types::U256;
	use std::sync::{
		atomic::{AtomicU32, Ordering},
		Arc, Mutex,
	};

	fn fee_too_low() -> ExecutionError {
		ExecutionError::TransientRpc {
			code: FEE_TOO_LOW_RPC_CODE,
			message: "fee too low".to_string(),
		}
	}

	fn high_priority() -> TxGasParams {
		TxGasParams {
			max_fee_per_gas: U256::from(200_000_000_000u64),
			max_priority_fee_per_gas: U256::from(5_000_000_000u64),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn first_attempt_success_submits_once() {
		let attempts = Arc::new(AtomicU32::new(0));
		let counter = attempts.clone();

		let tx_hash = submit(
			move |_gas| {
				counter.fetch_add(1, Ordering::Relaxed);
				async { Ok(TxHash::from_low_u64_be(7)) }
			},
			|| async { panic!("high-priority gas must not be requested") },
			3,
			Duration::from_secs(12),
		)
		.await
		.unwrap();

		assert_eq!(tx_hash, TxHash::from_low_u64_be(7));
		assert_eq!(attempts.load(Ordering::Relaxed), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn fee_too_low_exhausts_default_attempts_then_goes_high_priority() {
		// Scenario: three default-gas rejections, then one high-priority
		// rejection. Four transact invocations in total, the last carrying
		// the high-priority params, and the final error propagates.
		let invocations = Arc::new(Mutex::new(Vec::<Option<TxGasParams>>::new()));
		let log = invocations.clone();

		let result = submit(
			move |gas| {
				log.lock().unwrap().push(gas);
				async { Err::<TxHash, _>(fee_too_low()) }
			},
			|| async { Ok(high_priority()) },
			3,
			Duration::from_secs(12),
		)
		.await;

		assert!(matches!(result, Err(ExecutionError::TransientRpc { .. })));
		let invocations = invocations.lock().unwrap();
		assert_eq!(invocations.len(), 4);
		assert_eq!(invocations[..3], [None, None, None]);
		assert_eq!(invocations[3], Some(high_priority()));
	}

	#[tokio::test(start_paused = true)]
	async fn other_errors_propagate_immediately() {
		let attempts = Arc::new(AtomicU32::new(0));
		let counter = attempts.clone();

		let result = submit(
			move |_gas| {
				counter.fetch_add(1, Ordering::Relaxed);
				async { Err::<TxHash, _>(ExecutionError::Other(anyhow::anyhow!("reverted"))) }
			},
			|| async { panic!("high-priority gas must not be requested") },
			3,
			Duration::from_secs(12),
		)
		.await;

		assert!(result.is_err());
		assert_eq!(attempts.load(Ordering::Relaxed), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn succeeds_on_a_later_default_attempt() {
		let attempts = Arc::new(AtomicU32::new(0));
		let counter = attempts.clone();

		let tx_hash = submit(
			move |_gas| {
				let attempt = counter.fetch_add(1, Ordering::Relaxed);
				async move {
					if attempt == 0 {
						Err(fee_too_low())
					} else {
						Ok(TxHash::from_low_u64_be(9))
					}
				}
			},
			|| async { panic!("high-priority gas must not be requested") },
			3,
			Duration::from_secs(12),
		)
		.await
		.unwrap();

		assert_eq!(tx_hash, TxHash::from_low_u64_be(9));
		assert_eq!(attempts.load(Ordering::Relaxed), 2);
	}
}
