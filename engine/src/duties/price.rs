//! Cross-chain price-feed sync duty.
//!
//! Mirrors the osETH rate from the home chain to the target chain. The duty
//! never blocks a tick waiting for cross-chain propagation: after a
//! submission it records the time and simply skips subsequent ticks until
//! either the target-chain feed catches up or the waiting window expires.

use anyhow::Context;

use crate::{app_state::unix_now, services::Services};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PriceAction {
	/// Target chain was updated recently enough.
	Skip,
	/// A sync is in flight; keep waiting for propagation.
	AwaitPropagation,
	/// The waiting window expired without the target chain moving.
	Resubmit,
	Sync,
}

pub(crate) fn decide_price_action(
	now: u64,
	target_chain_timestamp: u64,
	last_submitted: Option<u64>,
	update_interval: u64,
	max_waiting_time: u64,
) -> PriceAction {
	if now.saturating_sub(target_chain_timestamp) < update_interval {
		return PriceAction::Skip;
	}
	match last_submitted {
		Some(submitted_at) if now.saturating_sub(submitted_at) < max_waiting_time =>
			PriceAction::AwaitPropagation,
		Some(_) => PriceAction::Resubmit,
		None => PriceAction::Sync,
	}
}

pub async fn process_price(
	services: &Services,
	last_price_updated_timestamp: &mut Option<u64>,
) -> anyhow::Result<()> {
	let price_config =
		services.network.price.as_ref().context("network has no price sync config")?;
	let price_feed =
		services.price_feed.as_ref().context("target price feed client is not configured")?;
	let price_sender =
		services.price_sender.as_ref().context("price feed sender is not configured")?;

	let target_chain_timestamp = price_feed.latest_timestamp().await?;
	let now = unix_now();

	match decide_price_action(
		now,
		target_chain_timestamp,
		*last_price_updated_timestamp,
		services.settings.price_update_interval,
		services.settings.price_max_waiting_time,
	) {
		PriceAction::Skip => {
			tracing::debug!("Target chain price feed is fresh enough. No action needed.");
			return Ok(());
		},
		PriceAction::AwaitPropagation => {
			tracing::debug!("Waiting for the rate sync to propagate to the target chain...");
			return Ok(());
		},
		PriceAction::Resubmit => {
			tracing::error!(
				"Target chain price feed did not update within the waiting window, resubmitting"
			);
			*last_price_updated_timestamp = None;
		},
		PriceAction::Sync => {},
	}

	let fee = price_sender.quote_rate_sync(price_config.target_chain).await?;
	let tx_hash = services
		.submit_tx(|gas| {
			price_sender.sync_rate(price_config.target_chain, price_config.target_address, fee, gas)
		})
		.await?;
	tracing::info!("Sync transaction sent: {tx_hash:?}");

	if !services.wait_for_tx_status(tx_hash).await? {
		anyhow::bail!("sync transaction failed, tx hash: {tx_hash:?}");
	}
	tracing::info!("Sync transaction confirmed");

	*last_price_updated_timestamp = Some(unix_now());
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	const UPDATE_INTERVAL: u64 = 12 * 60 * 60;
	const MAX_WAITING_TIME: u64 = 60 * 60;

	#[test]
	fn fresh_target_chain_skips() {
		assert_eq!(
			decide_price_action(1_000_000, 1_000_000 - 10, None, UPDATE_INTERVAL, MAX_WAITING_TIME),
			PriceAction::Skip
		);
	}

	#[test]
	fn stale_target_chain_syncs() {
		assert_eq!(
			decide_price_action(
				1_000_000,
				1_000_000 - UPDATE_INTERVAL - 1,
				None,
				UPDATE_INTERVAL,
				MAX_WAITING_TIME
			),
			PriceAction::Sync
		);
	}

	#[test]
	fn in_flight_sync_waits_for_propagation() {
		let now = 1_000_000;
		assert_eq!(
			decide_price_action(
				now,
				now - UPDATE_INTERVAL - 1,
				Some(now - MAX_WAITING_TIME + 1),
				UPDATE_INTERVAL,
				MAX_WAITING_TIME
			),
			PriceAction::AwaitPropagation
		);
	}

	#[test]
	fn expired_waiting_window_resubmits() {
		let now = 1_000_000;
		assert_eq!(
			decide_price_action(
				now,
				now - UPDATE_INTERVAL - 1,
				Some(now - MAX_WAITING_TIME),
				UPDATE_INTERVAL,
				MAX_WAITING_TIME
			),
			PriceAction::Resubmit
		);
	}
}
