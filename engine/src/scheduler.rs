//! The keeper's main loop.
//!
//! One tick: reload the oracle committee, run every enabled duty
//! concurrently, collect each duty's error without aborting the tick, then
//! sleep out the remainder of the block period. Shutdown preempts both the
//! inter-tick sleep and the empty-committee backoff.

use std::time::Instant;

use tokio::sync::watch;

use crate::{
	app_state::AppState,
	constants::EMPTY_COMMITTEE_RETRY_INTERVAL,
	duties::{
		distributor::process_distributor_rewards,
		exits::process_exits,
		force_exit::process_force_exits,
		ltv::process_ltv,
		price::process_price,
		rewards::{process_rewards, RewardsCache},
	},
	metrics,
	services::Services,
};

pub async fn run(services: Services, mut shutdown: watch::Receiver<bool>) {
	let mut rewards_cache = RewardsCache::default();
	let mut app_state = AppState::default();
	let network_label = services.settings.network.to_string();

	while !*shutdown.borrow() {
		let started = Instant::now();

		run_tick(&services, &mut rewards_cache, &mut app_state, &mut shutdown).await;

		match services.execution.get_balance(services.keeper_address()).await {
			Ok(balance) => {
				metrics::KEEPER_BALANCE
					.with_label_values(&[&network_label])
					.set(balance.low_u128() as f64 / 1e18);
			},
			Err(error) => tracing::warn!("Failed to fetch keeper balance: {error}"),
		}

		let sleep_for = services.network.block_period().saturating_sub(started.elapsed());
		tokio::select! {
			_ = tokio::time::sleep(sleep_for) => {},
			_ = shutdown.changed() => {},
		}
	}

	tracing::info!("Scheduler stopped");
}

async fn run_tick(
	services: &Services,
	rewards_cache: &mut RewardsCache,
	app_state: &mut AppState,
	shutdown: &mut watch::Receiver<bool>,
) {
	let committee = match services.load_protocol_config().await {
		Ok(committee) if !committee.is_empty() => committee,
		Ok(_) => {
			tracing::error!("Empty oracles set");
			tokio::select! {
				_ = tokio::time::sleep(EMPTY_COMMITTEE_RETRY_INTERVAL) => {},
				_ = shutdown.changed() => {},
			}
			return;
		},
		Err(error) => {
			tracing::error!("Failed to load protocol config: {error:#}");
			tokio::select! {
				_ = tokio::time::sleep(EMPTY_COMMITTEE_RETRY_INTERVAL) => {},
				_ = shutdown.changed() => {},
			}
			return;
		},
	};

	let AppState {
		last_price_updated_timestamp,
		force_exits_updated_timestamp,
		ltv_updated_timestamp,
	} = app_state;

	let settings = &services.settings;

	// All duties run concurrently; none of them aborts a sibling.
	let (rewards, exits, distributor, price, force_exits, ltv) = tokio::join!(
		process_rewards(services, rewards_cache, &committee),
		process_exits(services, &committee),
		async {
			if settings.distributor_duty_enabled() {
				process_distributor_rewards(services, &committee).await
			} else {
				Ok(())
			}
		},
		async {
			if settings.price_duty_enabled() {
				process_price(services, last_price_updated_timestamp).await
			} else {
				Ok(())
			}
		},
		async {
			if settings.force_exits_duty_enabled() {
				process_force_exits(services, force_exits_updated_timestamp).await
			} else {
				Ok(())
			}
		},
		async {
			if settings.ltv_duty_enabled() {
				process_ltv(services, ltv_updated_timestamp).await
			} else {
				Ok(())
			}
		},
	);

	let outcomes = [
		("rewards", rewards),
		("exits", exits),
		("distributor-rewards", distributor),
		("price", price),
		("force-exit", force_exits),
		("ltv", ltv),
	];
	for (duty, outcome) in outcomes {
		if let Err(error) = outcome {
			tracing::error!("{duty} duty failed: {error:#}");
		}
	}
}
