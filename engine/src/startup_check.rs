//! Pre-loop health checks.
//!
//! Runs once before the scheduler starts: warns when the keeper balance is
//! low and blocks until at least one consensus node and one execution node
//! are synced. Graph-backed duties additionally require the graph node to
//! be caught up with the finalized block.

use anyhow::Context;
use ethers::types::{BlockNumber, SyncingStatus};

use crate::{constants::STARTUP_CHECK_INTERVAL, execution::ExecutionClient, services::Services};

pub async fn startup_checks(services: &Services) -> anyhow::Result<()> {
	let keeper_address = services.keeper_address();
	tracing::info!("Checking keeper account {keeper_address:?}...");
	check_keeper_balance(services).await?;

	wait_for_consensus_nodes(services).await;
	wait_for_execution_nodes(&services.execution, "execution").await;

	if services.settings.price_duty_enabled() {
		let l2_execution = services
			.l2_execution
			.as_ref()
			.context("price duty enabled without an L2 execution client")?;
		wait_for_execution_nodes(l2_execution, "l2 execution").await;
	}

	if services.settings.force_exits_duty_enabled() || services.settings.ltv_duty_enabled() {
		let block = services.execution.get_block(BlockNumber::Finalized).await?;
		let block_number = block.number.context("finalized block carries no number")?.as_u64();
		let graph = services.graph()?;
		graph.check_synced_to(block_number).await?;
		tracing::info!("Connected to graph node at {}.", graph.endpoint());
	}

	Ok(())
}

async fn check_keeper_balance(services: &Services) -> anyhow::Result<()> {
	let minimum = services.network.keeper_min_balance;
	if minimum.is_zero() {
		return Ok(());
	}
	let balance = services.execution.get_balance(services.keeper_address()).await?;
	if balance < minimum {
		tracing::warn!(
			"Keeper balance is too low. At least {} {} is recommended.",
			minimum.low_u128() as f64 / 1e18,
			services.network.symbol,
		);
	}
	Ok(())
}

async fn wait_for_consensus_nodes(services: &Services) {
	loop {
		match services.consensus.is_syncing().await {
			Ok((false, _)) => match services.consensus.get_finality_checkpoint_epoch().await {
				Ok(epoch) => {
					tracing::info!("Connected to consensus node. Finalized epoch: {epoch}");
					return;
				},
				Err(error) => {
					tracing::warn!("Failed to fetch finality checkpoint: {error}");
				},
			},
			Ok((true, sync_distance)) => {
				tracing::warn!(
					"The consensus node has not completed synchronization yet. \
					The remaining synchronization distance is {sync_distance}.",
				);
			},
			Err(error) => {
				tracing::warn!("Failed to connect to consensus nodes. {error}");
			},
		}
		tracing::warn!("Retrying consensus nodes in {STARTUP_CHECK_INTERVAL:?}...");
		tokio::time::sleep(STARTUP_CHECK_INTERVAL).await;
	}
}

async fn wait_for_execution_nodes(client: &ExecutionClient, what: &'static str) {
	loop {
		match check_execution_node(client).await {
			Ok(Some(block_number)) => {
				tracing::info!(
					"Connected to {what} node. Current block number: {block_number}"
				);
				return;
			},
			Ok(None) => {},
			Err(error) => {
				tracing::warn!("Failed to connect to {what} nodes. {error}");
			},
		}
		tracing::warn!("Retrying {what} nodes in {STARTUP_CHECK_INTERVAL:?}...");
		tokio::time::sleep(STARTUP_CHECK_INTERVAL).await;
	}
}

async fn check_execution_node(client: &ExecutionClient) -> anyhow::Result<Option<u64>> {
	if let SyncingStatus::IsSyncing(_) = client.syncing().await? {
		tracing::warn!("The execution node has not completed synchronization yet.");
		return Ok(None);
	}
	let block_number = client.get_block_number().await?;
	if block_number == 0 {
		// A node can report synced while still serving block number zero.
		tracing::warn!("Execution node reports block number 0, waiting...");
		return Ok(None);
	}
	Ok(Some(block_number))
}
