use std::sync::Arc;

use ethers::{
	prelude::abigen,
	types::{Address, Bytes, TxHash, U256},
};

use crate::{
	contracts::{apply_gas_params, apply_nonce},
	errors::{classify_contract_error, ExecutionError},
	execution::{ExecutionClient, TxGasParams},
};

abigen!(
	Multicall,
	r#"[
		function aggregate((address,bytes)[] calls) returns (uint256 blockNumber, bytes[] returnData)
	]"#
);

/// One `(target, calldata)` entry of an aggregate batch.
pub type Call = (Address, Bytes);

pub struct MulticallContract {
	address: Address,
	client: Arc<ExecutionClient>,
}

impl MulticallContract {
	pub fn new(address: Address, client: Arc<ExecutionClient>) -> Self {
		Self { address, client }
	}

	/// Executes the batch as a read at one block height.
	pub async fn aggregate(
		&self,
		calls: Vec<Call>,
		at_block: Option<u64>,
	) -> Result<(U256, Vec<Bytes>), ExecutionError> {
		let address = self.address;
		self.client
			.request("aggregate", move |provider| {
				let calls = calls.clone();
				async move {
					let mut call = Multicall::new(address, provider).aggregate(calls);
					if let Some(block) = at_block {
						call = call.block(block);
					}
					call.call().await.map_err(classify_contract_error)
				}
			})
			.await
	}

	/// Submits the batch as a transaction.
	pub async fn aggregate_transaction(
		&self,
		calls: Vec<Call>,
		gas: Option<TxGasParams>,
	) -> Result<TxHash, ExecutionError> {
		let address = self.address;
		self.client
			.send("aggregate", move |signer, nonce| {
				let calls = calls.clone();
				async move {
					let mut call = Multicall::new(address, signer).aggregate(calls);
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
