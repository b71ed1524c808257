use std::sync::Arc;

use ethers::{
	prelude::abigen,
	types::{Address, TxHash, U256},
};

use crate::{
	contracts::{apply_gas_params, apply_nonce, HarvestParams},
	errors::{classify_contract_error, ExecutionError},
	execution::{ExecutionClient, TxGasParams},
};

abigen!(
	IVaultUserLtvTracker,
	r#"[
		function vaultToUser(address vault) view returns (address)
		function getVaultMaxLtv(address vault, (bytes32,int160,uint160,bytes32[]) harvestParams) view returns (uint256)
		function updateVaultMaxLtvUser(address vault, address user, (bytes32,int160,uint160,bytes32[]) harvestParams)
	]"#
);

pub struct VaultUserLtvTrackerContract {
	address: Address,
	client: Arc<ExecutionClient>,
}

impl VaultUserLtvTrackerContract {
	pub fn new(address: Address, client: Arc<ExecutionClient>) -> Self {
		Self { address, client }
	}

	/// The user currently registered as the vault's max-LTV holder.
	pub async fn vault_to_user(&self, vault: Address) -> Result<Address, ExecutionError> {
		let address = self.address;
		self.client
			.request("vaultToUser", move |provider| async move {
				IVaultUserLtvTracker::new(address, provider)
					.vault_to_user(vault)
					.call()
					.await
					.map_err(classify_contract_error)
			})
			.await
	}

	pub async fn get_vault_max_ltv(
		&self,
		vault: Address,
		harvest_params: Option<&HarvestParams>,
	) -> Result<U256, ExecutionError> {
		let address = self.address;
		let params = harvest_params.cloned().unwrap_or_else(HarvestParams::zero);
		self.client
			.request("getVaultMaxLtv", move |provider| {
				let params = params.clone();
				async move {
					IVaultUserLtvTracker::new(address, provider)
						.get_vault_max_ltv(vault, params.as_tuple())
						.call()
						.await
						.map_err(classify_contract_error)
				}
			})
			.await
	}

	pub async fn update_vault_max_ltv_user(
		&self,
		vault: Address,
		user: Address,
		harvest_params: Option<&HarvestParams>,
		gas: Option<TxGasParams>,
	) -> Result<TxHash, ExecutionError> {
		let address = self.address;
		let params = harvest_params.cloned().unwrap_or_else(HarvestParams::zero);
		self.client
			.send("updateVaultMaxLtvUser", move |signer, nonce| {
				let params = params.clone();
				async move {
					let mut call = IVaultUserLtvTracker::new(address, signer)
						.update_vault_max_ltv_user(vault, user, params.as_tuple());
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
