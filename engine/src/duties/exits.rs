//! Validator voluntary-exit duty.
//!
//! Oracles publish BLS exit-signature shares per validator. The keeper
//! groups shares by validator, drops validators that are already on their
//! way out, recombines the threshold shares into the full signature and
//! submits the voluntary exit to the beacon pool. Fork boundaries make the
//! same signature valid against either the current or the previous fork
//! version, so a rejected submission is retried once at the previous fork
//! epoch.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures::future::join_all;
use serde::Deserialize;

use crate::{
	constants::EXITS_URL_PATH,
	crypto::{reconstruct_shared_bls_signature, BlsSignature, BLS_SIGNATURE_LENGTH},
	errors::OracleResponseError,
	metrics,
	protocol_config::{Oracle, OracleCommittee},
	services::Services,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorExitShare {
	pub validator_index: u64,
	pub exit_signature_share: BlsSignature,
	pub share_index: u64,
}

#[derive(Deserialize)]
struct ExitShareResponse {
	index: u64,
	exit_signature_share: String,
}

pub(crate) fn parse_exit_shares(
	endpoint: &str,
	share_index: u64,
	value: serde_json::Value,
) -> Result<Vec<ValidatorExitShare>, OracleResponseError> {
	let entries: Vec<ExitShareResponse> =
		serde_json::from_value(value).map_err(|error| OracleResponseError::Invalid {
			url: endpoint.to_string(),
			reason: error.to_string(),
		})?;

	entries
		.into_iter()
		.map(|entry| {
			let bytes = hex::decode(entry.exit_signature_share.trim_start_matches("0x"))
				.map_err(|error| OracleResponseError::Invalid {
					url: endpoint.to_string(),
					reason: format!("bad exit signature share hex: {error}"),
				})?;
			let exit_signature_share: BlsSignature =
				bytes.try_into().map_err(|_| OracleResponseError::Invalid {
					url: endpoint.to_string(),
					reason: format!(
						"exit signature share is not {BLS_SIGNATURE_LENGTH} bytes"
					),
				})?;
			Ok(ValidatorExitShare {
				validator_index: entry.index,
				exit_signature_share,
				share_index,
			})
		})
		.collect()
}

/// Groups shares by validator index. Each oracle contributes its committee
/// slot as the share index, so distinct oracles always carry distinct
/// indices.
pub(crate) fn group_shares_by_validator(
	per_oracle: Vec<Vec<ValidatorExitShare>>,
) -> HashMap<u64, Vec<ValidatorExitShare>> {
	let mut grouped: HashMap<u64, Vec<ValidatorExitShare>> = HashMap::new();
	for shares in per_oracle {
		for share in shares {
			grouped.entry(share.validator_index).or_default().push(share);
		}
	}
	grouped
}

pub async fn process_exits(
	services: &Services,
	committee: &OracleCommittee,
) -> anyhow::Result<()> {
	let validator_exits = fetch_validator_exits(services, committee).await;
	if validator_exits.is_empty() {
		return Ok(());
	}

	let head = services.consensus.get_chain_head(services.network.slots_per_epoch).await?;
	metrics::EPOCH.set(head.epoch as i64);
	metrics::CONSENSUS_BLOCK.set(head.consensus_slot as i64);
	metrics::EXECUTION_BLOCK.set(head.execution_block as i64);
	metrics::EXECUTION_TS.set(head.execution_timestamp as i64);

	// Exit-eligibility is checked at the finalized slot, in bounded chunks.
	let mut indices: Vec<u64> = validator_exits.keys().copied().collect();
	indices.sort_unstable();
	let mut eligible: HashSet<u64> = HashSet::new();
	let state_id = head.consensus_slot.to_string();
	for chunk in indices.chunks(services.settings.validators_fetch_chunk_size) {
		let validators =
			services.consensus.get_validators_by_ids(chunk, &state_id).await?;
		for validator in validators {
			if !validator.is_exiting_or_exited() {
				eligible.insert(validator.index);
			}
		}
	}

	let threshold = committee.exit_signature_recover_threshold as usize;
	let fork = services.consensus.get_fork_data("head").await?;
	let mut previous_fork_epoch: Option<u64> = None;

	for (validator_index, shares) in validator_exits {
		if !eligible.contains(&validator_index) {
			tracing::info!("Validator {validator_index} is already exiting, skipping...");
			continue;
		}
		if shares.len() < threshold {
			tracing::warn!(
				"Not enough exit signature shares for validator {validator_index}, skipping..."
			);
			continue;
		}

		tracing::info!("Starting validator {validator_index} exit");

		let share_map: BTreeMap<u64, BlsSignature> = shares
			.iter()
			.map(|share| (share.share_index, share.exit_signature_share))
			.collect();
		let exit_signature = match reconstruct_shared_bls_signature(&share_map) {
			Ok(signature) => signature,
			Err(error) => {
				tracing::error!(
					"Failed to reconstruct exit signature for validator {validator_index}: {error}"
				);
				continue;
			},
		};
		let signature_hex = format!("0x{}", hex::encode(exit_signature));

		match services
			.consensus
			.submit_voluntary_exit(fork.epoch, validator_index, &signature_hex)
			.await
		{
			Ok(()) => {},
			Err(error) if error.is_client_response() => {
				// The signature may predate the current fork; retry against
				// the previous fork version's epoch.
				tracing::warn!(
					"Voluntary exit for validator {validator_index} rejected at epoch {}: {error}. \
					Retrying at the previous fork epoch",
					fork.epoch
				);
				let epoch = match previous_fork_epoch {
					Some(epoch) => epoch,
					None => {
						let last_slot_of_previous_epoch =
							fork.epoch * services.network.slots_per_epoch - 1;
						let previous = services
							.consensus
							.get_fork_data(&last_slot_of_previous_epoch.to_string())
							.await?
							.epoch;
						previous_fork_epoch = Some(previous);
						previous
					},
				};
				if let Err(error) = services
					.consensus
					.submit_voluntary_exit(epoch, validator_index, &signature_hex)
					.await
				{
					tracing::error!(
						"Voluntary exit for validator {validator_index} failed at previous fork epoch {epoch}: {error}"
					);
					continue;
				}
			},
			Err(error) => {
				tracing::error!(
					"Voluntary exit submission failed for validator {validator_index}: {error}"
				);
				continue;
			},
		}

		metrics::PROCESSED_EXITS.inc();
		tracing::info!("Validator {validator_index} was successfully exited");
	}

	Ok(())
}

async fn fetch_validator_exits(
	services: &Services,
	committee: &OracleCommittee,
) -> HashMap<u64, Vec<ValidatorExitShare>> {
	let outcomes = join_all(
		committee.oracles.iter().map(|oracle| fetch_exit_shares(services, oracle)),
	)
	.await;

	let mut per_oracle = Vec::new();
	for (oracle, outcome) in committee.oracles.iter().zip(outcomes) {
		match outcome {
			Ok(shares) => per_oracle.push(shares),
			Err(error) => {
				tracing::warn!("Failed to fetch exit shares from {}: {error}", oracle.public_key)
			},
		}
	}
	group_shares_by_validator(per_oracle)
}

/// Endpoints are tried in order; the first valid response wins.
async fn fetch_exit_shares(
	services: &Services,
	oracle: &Oracle,
) -> Result<Vec<ValidatorExitShare>, OracleResponseError> {
	let mut last_error = None;
	for endpoint in &oracle.endpoints {
		match services.oracle_http.get_json(endpoint, EXITS_URL_PATH).await {
			Ok(value) => return parse_exit_shares(endpoint, oracle.share_index, value),
			Err(error) => {
				tracing::warn!("{error}");
				last_error = Some(error);
			},
		}
	}
	Err(last_error.unwrap_or_else(|| OracleResponseError::Invalid {
		url: oracle.public_key.clone(),
		reason: "oracle has no endpoints".to_string(),
	}))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn share(validator_index: u64, share_index: u64) -> ValidatorExitShare {
		ValidatorExitShare {
			validator_index,
			exit_signature_share: [share_index as u8; BLS_SIGNATURE_LENGTH],
			share_index,
		}
	}

	#[test]
	fn shares_group_by_validator_across_oracles() {
		let grouped = group_shares_by_validator(vec![
			vec![share(12345, 1), share(99, 1)],
			vec![share(12345, 3)],
			vec![share(12345, 4)],
		]);
		assert_eq!(grouped[&12345].len(), 3);
		assert_eq!(grouped[&99].len(), 1);

		let indices: HashSet<u64> =
			grouped[&12345].iter().map(|share| share.share_index).collect();
		assert_eq!(indices, HashSet::from([1, 3, 4]));
	}

	#[test]
	fn exit_shares_parse_from_oracle_response() {
		let value = json!([
			{ "index": 12345, "exit_signature_share": format!("0x{}", "ab".repeat(96)) },
			{ "index": 12346, "exit_signature_share": format!("0x{}", "cd".repeat(96)) },
		]);
		let shares = parse_exit_shares("http://oracle", 2, value).unwrap();
		assert_eq!(shares.len(), 2);
		assert_eq!(shares[0].validator_index, 12345);
		assert_eq!(shares[0].share_index, 2);
		assert_eq!(shares[1].exit_signature_share[0], 0xcd);
	}

	#[test]
	fn wrong_length_share_is_invalid() {
		let value = json!([{ "index": 1, "exit_signature_share": "0xabcd" }]);
		assert!(parse_exit_shares("http://oracle", 1, value).is_err());
	}

	#[test]
	fn missing_key_invalidates_response() {
		let value = json!([{ "index": 1 }]);
		assert!(parse_exit_shares("http://oracle", 1, value).is_err());
	}
}
