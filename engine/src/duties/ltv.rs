//! Vault max-LTV tracking duty.
//!
//! Finds the allocator with the highest LTV in each osToken vault and
//! registers it in the tracker contract when it changed since the last
//! update.

use anyhow::Context;
use ethers::types::BlockNumber;

use crate::{
	app_state::{unix_now, within_interval},
	duties::force_exit::wad_to_f64,
	services::Services,
};

pub async fn process_ltv(
	services: &Services,
	ltv_updated_timestamp: &mut Option<u64>,
) -> anyhow::Result<()> {
	let now = unix_now();
	if within_interval(*ltv_updated_timestamp, services.settings.ltv_update_interval, now) {
		return Ok(());
	}

	let block = services.execution.get_block(BlockNumber::Latest).await?;
	let block_number = block.number.context("latest block carries no number")?.as_u64();
	tracing::debug!("Current block: {block_number}");

	services.graph()?.check_synced_to(block_number).await?;

	let vaults = services.graph()?.ostoken_vaults().await?;
	if vaults.is_empty() {
		tracing::info!("No osToken vaults found");
		return Ok(());
	}

	let graph_vaults = services.graph()?.vaults(&vaults).await?;

	for vault in vaults {
		let Some(max_ltv_user) = services.graph()?.vault_max_ltv_allocator(vault).await? else {
			tracing::warn!("No allocators in vault {vault:?}");
			continue;
		};
		tracing::info!("Max LTV user for vault {vault:?} is {max_ltv_user:?}");

		let harvest_params = graph_vaults
			.iter()
			.find(|graph_vault| graph_vault.address == vault)
			.and_then(|graph_vault| graph_vault.harvest_params.clone());

		let ltv = services
			.ltv_tracker
			.get_vault_max_ltv(vault, harvest_params.as_ref())
			.await?;
		tracing::info!("Current LTV for vault {vault:?}: {}", wad_to_f64(ltv));

		let previous_user = services.ltv_tracker.vault_to_user(vault).await?;
		if max_ltv_user == previous_user {
			tracing::info!("Max LTV user did not change since last update. Skip updating user.");
			continue;
		}

		tracing::info!("Updating max LTV user for vault {vault:?}");
		let tx_hash = services
			.submit_tx(|gas| {
				services.ltv_tracker.update_vault_max_ltv_user(
					vault,
					max_ltv_user,
					harvest_params.as_ref(),
					gas,
				)
			})
			.await?;
		tracing::info!("Update transaction sent, tx hash: {tx_hash:?}");

		if !services.wait_for_tx_status(tx_hash).await? {
			anyhow::bail!("update tx failed, tx hash: {tx_hash:?}");
		}

		let ltv = services
			.ltv_tracker
			.get_vault_max_ltv(vault, harvest_params.as_ref())
			.await?;
		tracing::info!("LTV for vault {vault:?} after update: {}", wad_to_f64(ltv));
	}

	tracing::info!("LTV update process completed.");
	*ltv_updated_timestamp = Some(now);
	Ok(())
}
