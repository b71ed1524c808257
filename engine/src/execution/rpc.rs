//! Execution-chain RPC client.
//!
//! Wraps a list of redundant HTTP endpoints. Reads fail over across every
//! endpoint with backoff until the configured retry window is exhausted,
//! then surface `EndpointUnavailable`. Transaction submission always goes
//! through the primary endpoint and is serialized behind a lock so that two
//! duties can never race on the keeper account's transaction nonce.

use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use ethers::{
	middleware::SignerMiddleware,
	providers::{Http, Middleware, Provider, RpcError},
	signers::{LocalWallet, Signer},
	types::{
		Address, Block, BlockNumber, FeeHistory, SyncingStatus, TransactionReceipt, TxHash, H256,
		U256,
	},
};
use futures::Future;

use crate::{
	constants::RECEIPT_POLL_INTERVAL,
	errors::{ExecutionError, FEE_TOO_LOW_RPC_CODE},
	retrier::RetryPolicy,
};

pub type HttpProvider = Provider<Http>;
pub type SignerClient = SignerMiddleware<Arc<HttpProvider>, LocalWallet>;

pub fn classify_provider_error(err: ethers::providers::ProviderError) -> ExecutionError {
	if let Some(response) = err.as_error_response() {
		if response.code == FEE_TOO_LOW_RPC_CODE {
			return ExecutionError::TransientRpc {
				code: response.code,
				message: response.message.clone(),
			};
		}
	}
	ExecutionError::Other(anyhow::Error::new(err))
}

struct ExecutionNode {
	endpoint: String,
	provider: Arc<HttpProvider>,
	signer: Option<Arc<SignerClient>>,
}

struct NonceInfo {
	next_nonce: U256,
	requested_at: Instant,
}

pub struct ExecutionClient {
	nodes: Vec<ExecutionNode>,
	retry_policy: RetryPolicy,
	address: Option<Address>,
	// Guards the whole sign-and-send path.
	sign_send_lock: tokio::sync::Mutex<()>,
	nonce_info: tokio::sync::Mutex<Option<NonceInfo>>,
}

impl ExecutionClient {
	pub fn new(
		endpoints: &[String],
		wallet: Option<LocalWallet>,
		chain_id: u64,
		retry_window: Duration,
	) -> Result<Self> {
		let wallet = wallet.map(|wallet| wallet.with_chain_id(chain_id));
		let address = wallet.as_ref().map(|wallet| wallet.address());

		let nodes = endpoints
			.iter()
			.map(|endpoint| {
				let provider = Arc::new(
					Provider::<Http>::try_from(endpoint.as_str())
						.with_context(|| format!("invalid execution endpoint {endpoint}"))?,
				);
				let signer = wallet
					.clone()
					.map(|wallet| Arc::new(SignerMiddleware::new(provider.clone(), wallet)));
				Ok(ExecutionNode { endpoint: endpoint.clone(), provider, signer })
			})
			.collect::<Result<Vec<_>>>()?;

		if nodes.is_empty() {
			return Err(anyhow!("at least one execution endpoint is required"));
		}

		Ok(Self {
			nodes,
			retry_policy: RetryPolicy::with_max_elapsed(retry_window),
			address,
			sign_send_lock: tokio::sync::Mutex::new(()),
			nonce_info: tokio::sync::Mutex::new(None),
		})
	}

	/// The keeper account address, when a signing key is configured.
	pub fn address(&self) -> Option<Address> {
		self.address
	}

	/// Runs a read against the endpoint list: every endpoint is tried in
	/// order, full rounds are separated by exponential backoff, and the
	/// retry window bounds the total time spent.
	pub async fn request<T, F, Fut>(&self, name: &'static str, f: F) -> Result<T, ExecutionError>
	where
		F: Fn(Arc<HttpProvider>) -> Fut,
		Fut: Future<Output = Result<T, ExecutionError>>,
	{
		let started = Instant::now();
		let mut attempt: u32 = 0;
		let mut last_error = String::new();
		loop {
			for node in &self.nodes {
				match f(node.provider.clone()).await {
					Ok(value) => return Ok(value),
					// Transient errors are the submitter's business, not a
					// sign of endpoint failure.
					Err(error @ ExecutionError::TransientRpc { .. }) => return Err(error),
					Err(error) => {
						tracing::warn!("{name} failed on {}: {error}", node.endpoint);
						last_error = error.to_string();
					},
				}
			}
			let delay = self.retry_policy.delay_for_attempt(attempt);
			if started.elapsed() + delay >= self.retry_policy.max_elapsed {
				return Err(ExecutionError::EndpointUnavailable(last_error));
			}
			tokio::time::sleep(delay).await;
			attempt = attempt.saturating_add(1);
		}
	}

	/// Runs a signed operation against the primary endpoint only, behind the
	/// sign-and-send lock, with an explicitly assigned account nonce. No
	/// failover: retrying a send on a sibling endpoint could double-submit a
	/// transaction that was actually accepted.
	pub async fn send<F, Fut>(&self, name: &'static str, f: F) -> Result<TxHash, ExecutionError>
	where
		F: Fn(Arc<SignerClient>, U256) -> Fut,
		Fut: Future<Output = Result<TxHash, ExecutionError>>,
	{
		let node = self.nodes.first().expect("checked non-empty on construction");
		let signer = node.signer.clone().ok_or(ExecutionError::SignerUnavailable)?;

		let _guard = self.sign_send_lock.lock().await;
		let nonce = self.next_nonce(&signer).await?;
		tracing::debug!("{name}: submitting with nonce {nonce} via {}", node.endpoint);
		let result = f(signer, nonce).await;
		if result.is_err() {
			// Re-requested on the next send; a rejected transaction never
			// consumed its nonce.
			tracing::warn!("Resetting keeper nonce due to a send error");
			*self.nonce_info.lock().await = None;
		}
		result
	}

	async fn next_nonce(&self, signer: &Arc<SignerClient>) -> Result<U256, ExecutionError> {
		let mut nonce_info_lock = self.nonce_info.lock().await;

		const NONCE_LIFETIME: Duration = Duration::from_secs(120);

		// Reset the nonce if too old to ensure that we never get stuck with
		// an incorrect one.
		if nonce_info_lock
			.as_ref()
			.is_some_and(|nonce| nonce.requested_at.elapsed() > NONCE_LIFETIME)
		{
			*nonce_info_lock = None;
		}

		let nonce_info = match nonce_info_lock.as_mut() {
			Some(nonce_info) => nonce_info,
			None => {
				let address = self.address.ok_or(ExecutionError::SignerUnavailable)?;
				let tx_count = signer
					.get_transaction_count(address, Some(BlockNumber::Pending.into()))
					.await
					.map_err(|error| ExecutionError::Other(anyhow::Error::new(error)))?;
				nonce_info_lock
					.insert(NonceInfo { next_nonce: tx_count, requested_at: Instant::now() })
			},
		};

		let result = nonce_info.next_nonce;
		nonce_info.next_nonce += U256::one();
		Ok(result)
	}

	/// Borrow a signer-bound middleware for building calldata. Does not hit
	/// the network.
	pub fn signer(&self) -> Result<Arc<SignerClient>, ExecutionError> {
		self.nodes
			.first()
			.expect("checked non-empty on construction")
			.signer
			.clone()
			.ok_or(ExecutionError::SignerUnavailable)
	}

	/// Borrow the primary provider for building read-only contract bindings.
	pub fn provider(&self) -> Arc<HttpProvider> {
		self.nodes.first().expect("checked non-empty on construction").provider.clone()
	}

	pub async fn get_balance(&self, address: Address) -> Result<U256, ExecutionError> {
		self.request("get_balance", |provider| async move {
			provider
				.get_balance(address, None)
				.await
				.map_err(classify_provider_error)
		})
		.await
	}

	pub async fn get_block_number(&self) -> Result<u64, ExecutionError> {
		self.request("get_block_number", |provider| async move {
			provider
				.get_block_number()
				.await
				.map(|number| number.as_u64())
				.map_err(classify_provider_error)
		})
		.await
	}

	pub async fn get_block(&self, block: BlockNumber) -> Result<Block<H256>, ExecutionError> {
		self.request("get_block", |provider| async move {
			provider
				.get_block(block)
				.await
				.map_err(classify_provider_error)?
				.ok_or_else(|| {
					ExecutionError::Other(anyhow!("block {block:?} not returned by node"))
				})
		})
		.await
	}

	pub async fn get_logs(
		&self,
		filter: ethers::types::Filter,
	) -> Result<Vec<ethers::types::Log>, ExecutionError> {
		self.request("get_logs", |provider| {
			let filter = filter.clone();
			async move { provider.get_logs(&filter).await.map_err(classify_provider_error) }
		})
		.await
	}

	pub async fn fee_history(
		&self,
		block_count: u64,
		newest_block: BlockNumber,
		reward_percentiles: &[f64],
	) -> Result<FeeHistory, ExecutionError> {
		self.request("fee_history", |provider| {
			let reward_percentiles = reward_percentiles.to_vec();
			async move {
				provider
					.fee_history(block_count, newest_block, &reward_percentiles)
					.await
					.map_err(classify_provider_error)
			}
		})
		.await
	}

	pub async fn syncing(&self) -> Result<SyncingStatus, ExecutionError> {
		self.request("syncing", |provider| async move {
			provider.syncing().await.map_err(classify_provider_error)
		})
		.await
	}

	/// Polls for the receipt of `tx_hash` once per poll interval until the
	/// timeout elapses.
	pub async fn wait_for_transaction_receipt(
		&self,
		tx_hash: TxHash,
		timeout: Duration,
	) -> Result<TransactionReceipt, ExecutionError> {
		let started = Instant::now();
		loop {
			let receipt = self
				.request("get_transaction_receipt", |provider| async move {
					provider
						.get_transaction_receipt(tx_hash)
						.await
						.map_err(classify_provider_error)
				})
				.await?;
			if let Some(receipt) = receipt {
				return Ok(receipt);
			}
			if started.elapsed() >= timeout {
				return Err(ExecutionError::ReceiptTimeout { tx_hash, timeout });
			}
			tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_wallet() -> LocalWallet {
		"0000000000000000000000000000000000000000000000000000000000000001"
			.parse()
			.unwrap()
	}

	#[test]
	fn rejects_empty_endpoint_list() {
		assert!(
			ExecutionClient::new(&[], Some(test_wallet()), 1, Duration::from_secs(1)).is_err()
		);
	}

	#[test]
	fn read_only_client_has_no_address() {
		let client = ExecutionClient::new(
			&["http://localhost:8545".to_string()],
			None,
			1,
			Duration::from_secs(1),
		)
		.unwrap();
		assert_eq!(client.address(), None);
		assert!(matches!(client.signer(), Err(ExecutionError::SignerUnavailable)));
	}

	#[tokio::test]
	async fn request_gives_up_after_retry_window() {
		let client = ExecutionClient::new(
			&["http://localhost:1".to_string(), "http://localhost:2".to_string()],
			None,
			1,
			Duration::from_millis(10),
		)
		.unwrap();

		let result: Result<(), _> = client
			.request("always_fails", |_provider| async {
				Err(ExecutionError::Other(anyhow!("nope")))
			})
			.await;

		assert!(matches!(result, Err(ExecutionError::EndpointUnavailable(_))));
	}

	#[tokio::test]
	async fn transient_errors_are_not_retried_across_endpoints() {
		let client = ExecutionClient::new(
			&["http://localhost:1".to_string(), "http://localhost:2".to_string()],
			None,
			1,
			Duration::from_secs(5),
		)
		.unwrap();

		let result: Result<(), _> = client
			.request("fee_too_low", |_provider| async {
				Err(ExecutionError::TransientRpc {
					code: FEE_TOO_LOW_RPC_CODE,
					message: "fee too low".to_string(),
				})
			})
			.await;

		assert!(matches!(result, Err(ExecutionError::TransientRpc { .. })));
	}
}
