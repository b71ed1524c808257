use std::sync::Arc;

use ethers::{
	prelude::abigen,
	types::{Address, TxHash, U256},
};

use crate::{
	contracts::{apply_gas_params, apply_nonce},
	errors::{classify_contract_error, ExecutionError},
	execution::{ExecutionClient, TxGasParams},
};

abigen!(
	IPriceFeedSender,
	r#"[
		function quoteRateSync(uint32 targetChain) view returns (uint256)
		function syncRate(uint32 targetChain, address targetAddress) payable
	]"#
);

abigen!(
	IPriceFeed,
	r#"[
		function latestTimestamp() view returns (uint256)
	]"#
);

pub struct PriceFeedSenderContract {
	address: Address,
	client: Arc<ExecutionClient>,
}

impl PriceFeedSenderContract {
	pub fn new(address: Address, client: Arc<ExecutionClient>) -> Self {
		Self { address, client }
	}

	/// Cross-chain messaging fee for one rate sync.
	pub async fn quote_rate_sync(&self, target_chain: u32) -> Result<U256, ExecutionError> {
		let address = self.address;
		self.client
			.request("quoteRateSync", move |provider| async move {
				IPriceFeedSender::new(address, provider)
					.quote_rate_sync(target_chain)
					.call()
					.await
					.map_err(classify_contract_error)
			})
			.await
	}

	pub async fn sync_rate(
		&self,
		target_chain: u32,
		target_address: Address,
		fee: U256,
		gas: Option<TxGasParams>,
	) -> Result<TxHash, ExecutionError> {
		let address = self.address;
		self.client
			.send("syncRate", move |signer, nonce| async move {
				let mut call = IPriceFeedSender::new(address, signer)
					.sync_rate(target_chain, target_address)
					.value(fee);
				apply_nonce(&mut call, nonce);
				if let Some(gas) = gas {
					apply_gas_params(&mut call, &gas);
				}
				call.send()
					.await
					.map(|pending| *pending)
					.map_err(classify_contract_error)
			})
			.await
	}
}

/// Read-only price feed on the target chain, served by the L2 execution
/// client.
pub struct PriceFeedContract {
	address: Address,
	client: Arc<ExecutionClient>,
}

impl PriceFeedContract {
	pub fn new(address: Address, client: Arc<ExecutionClient>) -> Self {
		Self { address, client }
	}

	pub async fn latest_timestamp(&self) -> Result<u64, ExecutionError> {
		let address = self.address;
		self.client
			.request("latestTimestamp", move |provider| async move {
				IPriceFeed::new(address, provider)
					.latest_timestamp()
					.call()
					.await
					.map(|timestamp| timestamp.as_u64())
					.map_err(classify_contract_error)
			})
			.await
	}
}
