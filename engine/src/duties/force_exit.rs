//! Leverage-position force-exit duty.
//!
//! Monitors leverage positions and triggers exits/claims for those that
//! approach the liquidation threshold. Position discovery runs against the
//! graph at the finalized block; forceability checks batch an optional
//! `updateVaultState` with the read through the multicall contract so both
//! resolve at one block.

use anyhow::Context;
use ethers::types::{Address, BlockNumber, Bytes, TxHash, U256};

use crate::{
	app_state::{unix_now, within_interval},
	contracts::{multicall::Call, HarvestParams, LeverageStrategyContract},
	graph::{ExitRequest, GraphVault, LeveragePosition},
	services::Services,
};

/// Solidity decimals: an integer is a decimal multiplied by WAD.
const WAD: f64 = 1e18;

pub(crate) fn wad_to_f64(value: U256) -> f64 {
	value.low_u128() as f64 / WAD
}

/// Liquidation threshold lowered by the configured delta so positions exit
/// before they become liquidatable.
pub(crate) fn adjusted_liq_threshold(liq_threshold_percent: u64, delta: f64) -> f64 {
	let threshold = liq_threshold_percent as f64 / WAD;
	threshold - threshold * delta
}

/// Union of the borrow-selected and vault-selected position sets, deduped
/// by `(vault, user)` with borrow positions taking precedence.
pub(crate) fn merge_positions(
	borrow_positions: Vec<LeveragePosition>,
	vault_positions: Vec<LeveragePosition>,
) -> Vec<LeveragePosition> {
	let borrow_ids: std::collections::HashSet<(Address, Address)> =
		borrow_positions.iter().map(LeveragePosition::id).collect();
	let mut merged = borrow_positions;
	for position in vault_positions {
		if !borrow_ids.contains(&position.id()) {
			merged.push(position);
		}
	}
	merged
}

pub(crate) fn decode_bool(data: &Bytes) -> bool {
	data.iter().any(|byte| *byte != 0)
}

pub async fn process_force_exits(
	services: &Services,
	force_exits_updated_timestamp: &mut Option<u64>,
) -> anyhow::Result<()> {
	let now = unix_now();
	if within_interval(
		*force_exits_updated_timestamp,
		services.settings.force_exits_update_interval,
		now,
	) {
		return Ok(());
	}

	let block = services.execution.get_block(BlockNumber::Finalized).await?;
	let block_number = block.number.context("finalized block carries no number")?.as_u64();
	tracing::debug!("Current block: {block_number}");

	services.graph()?.check_synced_to(block_number).await?;

	handle_leverage_positions(services, block_number).await?;
	handle_ostoken_exit_requests(services, block_number).await?;

	*force_exits_updated_timestamp = Some(now);
	Ok(())
}

async fn handle_leverage_positions(
	services: &Services,
	block_number: u64,
) -> anyhow::Result<()> {
	let leverage_positions = fetch_leverage_positions(services, block_number).await?;
	if leverage_positions.is_empty() {
		tracing::info!("No risky leverage positions found");
		return Ok(());
	}

	tracing::info!("Checking {} leverage positions...", leverage_positions.len());

	let vaults = unique_vaults(leverage_positions.iter().map(|position| position.vault));
	let graph_vaults = services.graph()?.vaults(&vaults).await?;

	for position in leverage_positions {
		let harvest_params = vault_harvest_params(&graph_vaults, position.vault);
		handle_leverage_position(services, &position, harvest_params.as_ref(), block_number)
			.await?;
	}
	Ok(())
}

async fn fetch_leverage_positions(
	services: &Services,
	block_number: u64,
) -> anyhow::Result<Vec<LeveragePosition>> {
	let strategy_id = services.network.leverage_strategy_id;
	let borrow_ltv = wad_to_f64(
		services.strategy_registry.borrow_force_exit_ltv_percent(strategy_id).await?,
	);
	let vault_ltv = wad_to_f64(
		services.strategy_registry.vault_force_exit_ltv_percent(strategy_id).await?,
	);

	let all_positions = services.graph()?.leverage_positions(block_number).await?;

	let borrow_positions: Vec<LeveragePosition> = all_positions
		.iter()
		.filter(|position| position.borrow_ltv > borrow_ltv)
		.cloned()
		.collect();

	let proxies: Vec<Address> = all_positions.iter().map(|position| position.proxy).collect();
	let risky_allocators =
		services.graph()?.allocators_above_ltv(vault_ltv, &proxies, block_number).await?;
	let vault_positions: Vec<LeveragePosition> = all_positions
		.iter()
		.filter(|position| risky_allocators.contains(&position.proxy))
		.cloned()
		.collect();

	Ok(merge_positions(borrow_positions, vault_positions))
}

async fn handle_leverage_position(
	services: &Services,
	position: &LeveragePosition,
	harvest_params: Option<&HarvestParams>,
	block_number: u64,
) -> anyhow::Result<()> {
	let strategy =
		LeverageStrategyContract::from_proxy(position.proxy, services.execution.clone()).await?;

	if !can_force_enter_exit_queue(
		services,
		&strategy,
		position.vault,
		position.user,
		harvest_params,
		block_number,
	)
	.await?
	{
		tracing::info!(
			"Skip leverage position because it cannot be forcefully closed: vault={:?}, user={:?}...",
			position.vault,
			position.user,
		);
		return Ok(());
	}

	if let Some(exit_request) = &position.exit_request {
		if exit_request.is_fully_claimable() {
			tracing::info!(
				"Claiming exited assets for leverage position: vault={:?}, user={:?}...",
				position.vault,
				position.user,
			);
			let claimed = claim_exited_assets(
				services,
				&strategy,
				position.vault,
				position.user,
				exit_request,
				harvest_params,
				block_number,
			)
			.await;
			match claimed {
				Some(_) => tracing::info!(
					"Successfully claimed exited assets for leverage position: vault={:?}, user={:?}",
					position.vault,
					position.user,
				),
				None => return Ok(()),
			}

			// The position state changed after claiming; recheck before the
			// force exit.
			if !can_force_enter_exit_queue(
				services,
				&strategy,
				position.vault,
				position.user,
				harvest_params,
				block_number,
			)
			.await?
			{
				tracing::info!(
					"Skip leverage position because it cannot be forcefully closed: vault={:?}, user={:?}...",
					position.vault,
					position.user,
				);
				return Ok(());
			}
		}
	}

	tracing::info!(
		"Force exiting leverage position: vault={:?}, user={:?}...",
		position.vault,
		position.user,
	);
	if force_enter_exit_queue(
		services,
		&strategy,
		position.vault,
		position.user,
		harvest_params,
		block_number,
	)
	.await
	.is_some()
	{
		tracing::info!(
			"Successfully triggered exit for leverage position: vault={:?}, user={:?}",
			position.vault,
			position.user,
		);
	}
	Ok(())
}

async fn handle_ostoken_exit_requests(
	services: &Services,
	block_number: u64,
) -> anyhow::Result<()> {
	let liq_threshold = services.escrow.liq_threshold_percent().await?;
	let max_ltv =
		adjusted_liq_threshold(liq_threshold, services.settings.ltv_percent_delta);

	let exit_requests = services.graph()?.ostoken_exit_requests(max_ltv, block_number).await?;
	let exit_requests: Vec<_> = exit_requests
		.into_iter()
		.filter(|request| request.exit_request.is_fully_claimable())
		.collect();

	if exit_requests.is_empty() {
		tracing::info!("No osToken exit requests found");
		return Ok(());
	}

	tracing::info!("Force assets claim for {} exit requests...", exit_requests.len());
	let vaults = unique_vaults(exit_requests.iter().map(|request| request.vault));
	let graph_vaults = services.graph()?.vaults(&vaults).await?;

	for request in exit_requests {
		// The escrow owner is the position's strategy proxy.
		let position_owner = services.graph()?.leverage_position_owner(request.owner).await?;
		let harvest_params = vault_harvest_params(&graph_vaults, request.vault);

		tracing::info!(
			"Claiming exited assets: vault={:?}, user={:?}...",
			request.vault,
			position_owner,
		);
		let strategy =
			LeverageStrategyContract::from_proxy(request.owner, services.execution.clone())
				.await?;
		if claim_exited_assets(
			services,
			&strategy,
			request.vault,
			position_owner,
			&request.exit_request,
			harvest_params.as_ref(),
			block_number,
		)
		.await
		.is_some()
		{
			tracing::info!(
				"Successfully claimed exited assets: vault={:?}, user={:?}",
				request.vault,
				request.owner,
			);
		}
	}
	Ok(())
}

/// Batches an optional `updateVaultState` with `canForceEnterExitQueue` so
/// the answer reflects a harvested vault state at one block.
async fn can_force_enter_exit_queue(
	services: &Services,
	strategy: &LeverageStrategyContract,
	vault: Address,
	user: Address,
	harvest_params: Option<&HarvestParams>,
	block_number: u64,
) -> anyhow::Result<bool> {
	let mut calls: Vec<Call> = Vec::new();
	let update_state =
		push_update_state_call(services, strategy, vault, harvest_params, block_number, &mut calls)
			.await?;
	calls.push((strategy.address(), strategy.can_force_enter_exit_queue_calldata(vault, user)?));

	let (_, mut returns) = services.multicall.aggregate(calls, Some(block_number)).await?;
	if update_state {
		returns.remove(0);
	}
	let data = returns.first().context("multicall returned no data")?;
	Ok(decode_bool(data))
}

async fn claim_exited_assets(
	services: &Services,
	strategy: &LeverageStrategyContract,
	vault: Address,
	user: Address,
	exit_request: &ExitRequest,
	harvest_params: Option<&HarvestParams>,
	block_number: u64,
) -> Option<TxHash> {
	let transaction = async {
		let mut calls: Vec<Call> = Vec::new();
		push_update_state_call(services, strategy, vault, harvest_params, block_number, &mut calls)
			.await?;
		calls.push((
			strategy.address(),
			strategy.claim_exited_assets_calldata(vault, user, exit_request)?,
		));
		submit_multicall(services, calls).await
	};
	match transaction.await {
		Ok(tx_hash) => Some(tx_hash),
		Err(error) => {
			tracing::error!(
				"Failed to claim exited assets for leverage position: vault={vault:?}, user={user:?}: {error:#}"
			);
			None
		},
	}
}

async fn force_enter_exit_queue(
	services: &Services,
	strategy: &LeverageStrategyContract,
	vault: Address,
	user: Address,
	harvest_params: Option<&HarvestParams>,
	block_number: u64,
) -> Option<TxHash> {
	let transaction = async {
		let mut calls: Vec<Call> = Vec::new();
		push_update_state_call(services, strategy, vault, harvest_params, block_number, &mut calls)
			.await?;
		calls.push((strategy.address(), strategy.force_enter_exit_queue_calldata(vault, user)?));
		submit_multicall(services, calls).await
	};
	match transaction.await {
		Ok(tx_hash) => Some(tx_hash),
		Err(error) => {
			tracing::error!(
				"Failed to force enter exit queue: vault={vault:?}, user={user:?}: {error:#}"
			);
			None
		},
	}
}

async fn push_update_state_call(
	services: &Services,
	strategy: &LeverageStrategyContract,
	vault: Address,
	harvest_params: Option<&HarvestParams>,
	block_number: u64,
	calls: &mut Vec<Call>,
) -> anyhow::Result<bool> {
	if let Some(params) = harvest_params {
		if services.keeper.can_harvest(vault, Some(block_number)).await? {
			calls.push((strategy.address(), strategy.update_vault_state_calldata(vault, params)?));
			return Ok(true);
		}
	}
	Ok(false)
}

async fn submit_multicall(services: &Services, calls: Vec<Call>) -> anyhow::Result<TxHash> {
	let tx_hash = services
		.submit_tx(|gas| services.multicall.aggregate_transaction(calls.clone(), gas))
		.await?;
	tracing::info!("Waiting for transaction {tx_hash:?} confirmation");
	if !services.wait_for_tx_status(tx_hash).await? {
		anyhow::bail!("transaction {tx_hash:?} reverted");
	}
	Ok(tx_hash)
}

fn unique_vaults(vaults: impl Iterator<Item = Address>) -> Vec<Address> {
	let mut unique: Vec<Address> = Vec::new();
	for vault in vaults {
		if !unique.contains(&vault) {
			unique.push(vault);
		}
	}
	unique
}

fn vault_harvest_params(graph_vaults: &[GraphVault], vault: Address) -> Option<HarvestParams> {
	graph_vaults
		.iter()
		.find(|graph_vault| graph_vault.address == vault)
		.and_then(|graph_vault| graph_vault.harvest_params.clone())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn position(vault: u64, user: u64, borrow_ltv: f64) -> LeveragePosition {
		LeveragePosition {
			vault: Address::from_low_u64_be(vault),
			user: Address::from_low_u64_be(user),
			proxy: Address::from_low_u64_be(user + 1000),
			borrow_ltv,
			exit_request: None,
		}
	}

	#[test]
	fn positions_merge_without_duplicates() {
		let borrow = vec![position(1, 1, 0.95), position(1, 2, 0.94)];
		let vault = vec![position(1, 2, 0.94), position(2, 3, 0.91)];
		let merged = merge_positions(borrow, vault);
		assert_eq!(merged.len(), 3);
		let ids: Vec<(Address, Address)> = merged.iter().map(LeveragePosition::id).collect();
		assert_eq!(
			ids,
			vec![
				(Address::from_low_u64_be(1), Address::from_low_u64_be(1)),
				(Address::from_low_u64_be(1), Address::from_low_u64_be(2)),
				(Address::from_low_u64_be(2), Address::from_low_u64_be(3)),
			]
		);
	}

	#[test]
	fn wad_values_convert_to_decimals() {
		assert_eq!(wad_to_f64(U256::from(950_000_000_000_000_000u128)), 0.95);
		assert_eq!(wad_to_f64(U256::zero()), 0.0);
	}

	#[test]
	fn liq_threshold_is_adjusted_downwards() {
		let threshold = adjusted_liq_threshold(900_000_000_000_000_000, 0.0002);
		assert!(threshold < 0.9);
		assert!(threshold > 0.8997);
	}

	#[test]
	fn multicall_bool_returns_decode() {
		let truthy = Bytes::from(
			hex::decode("0000000000000000000000000000000000000000000000000000000000000001")
				.unwrap(),
		);
		let falsy = Bytes::from(vec![0u8; 32]);
		assert!(decode_bool(&truthy));
		assert!(!decode_bool(&falsy));
	}
}
