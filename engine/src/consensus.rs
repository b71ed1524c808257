//! Consensus-chain REST client.
//!
//! Thin wrapper over the beacon API subset the keeper needs. GET requests
//! fail over across every configured endpoint with backoff inside the retry
//! window; POSTs try each endpoint exactly once. Block-by-slot returns
//! `None` for slots without a proposal so callers can step backwards.

use std::time::{Duration, Instant};

use anyhow::anyhow;
use serde::Deserialize;

use crate::{constants::CONSENSUS_REQUEST_TIMEOUT, errors::ConsensusError, retrier::RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
	pub epoch: u64,
	pub consensus_slot: u64,
	pub execution_block: u64,
	pub execution_timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkData {
	pub epoch: u64,
	pub current_version: [u8; 4],
	pub previous_version: [u8; 4],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
	pub index: u64,
	pub status: String,
	pub public_key: String,
}

impl ValidatorInfo {
	/// Statuses for which a voluntary exit would be pointless or rejected.
	pub fn is_exiting_or_exited(&self) -> bool {
		matches!(
			self.status.as_str(),
			"active_exiting" |
				"exited_unslashed" |
				"exited_slashed" |
				"withdrawal_possible" |
				"withdrawal_done"
		)
	}
}

#[derive(Deserialize)]
struct FinalityCheckpointsResponse {
	data: FinalityCheckpointsData,
}

#[derive(Deserialize)]
struct FinalityCheckpointsData {
	finalized: Checkpoint,
}

#[derive(Deserialize)]
struct Checkpoint {
	epoch: String,
}

#[derive(Deserialize)]
struct BeaconBlockResponse {
	data: BeaconBlockData,
}

#[derive(Deserialize)]
struct BeaconBlockData {
	message: BeaconBlockMessage,
}

#[derive(Deserialize)]
struct BeaconBlockMessage {
	slot: String,
	body: BeaconBlockBody,
}

#[derive(Deserialize)]
struct BeaconBlockBody {
	execution_payload: ExecutionPayload,
}

#[derive(Deserialize)]
struct ExecutionPayload {
	block_number: String,
	timestamp: String,
}

#[derive(Deserialize)]
struct ValidatorsResponse {
	data: Vec<ValidatorEntry>,
}

#[derive(Deserialize)]
struct ValidatorEntry {
	index: String,
	status: String,
	validator: ValidatorDetails,
}

#[derive(Deserialize)]
struct ValidatorDetails {
	pubkey: String,
}

#[derive(Deserialize)]
struct ForkResponse {
	data: ForkResponseData,
}

#[derive(Deserialize)]
struct ForkResponseData {
	previous_version: String,
	current_version: String,
	epoch: String,
}

#[derive(Deserialize)]
struct SyncingResponse {
	data: SyncingData,
}

#[derive(Deserialize)]
struct SyncingData {
	is_syncing: bool,
	sync_distance: String,
}

pub struct ConsensusClient {
	http: reqwest::Client,
	endpoints: Vec<String>,
	retry_policy: RetryPolicy,
}

impl ConsensusClient {
	pub fn new(endpoints: &[String], retry_window: Duration) -> anyhow::Result<Self> {
		if endpoints.is_empty() {
			return Err(anyhow!("at least one consensus endpoint is required"));
		}
		Ok(Self {
			http: reqwest::Client::builder().timeout(CONSENSUS_REQUEST_TIMEOUT).build()?,
			endpoints: endpoints
				.iter()
				.map(|endpoint| endpoint.trim_end_matches('/').to_string())
				.collect(),
			retry_policy: RetryPolicy::with_max_elapsed(retry_window),
		})
	}

	async fn get_json(&self, path: &str) -> Result<Option<serde_json::Value>, ConsensusError> {
		let started = Instant::now();
		let mut attempt: u32 = 0;
		let mut last_error = String::new();
		loop {
			for endpoint in &self.endpoints {
				let url = format!("{endpoint}{path}");
				match self.http.get(&url).send().await {
					Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
						// Expected for non-proposed slots; not an endpoint failure.
						return Ok(None);
					},
					Ok(response) if response.status().is_success() => {
						match response.json::<serde_json::Value>().await {
							Ok(value) => return Ok(Some(value)),
							Err(error) => {
								tracing::warn!("invalid consensus response from {url}: {error}");
								last_error = error.to_string();
							},
						}
					},
					Ok(response) => {
						let status = response.status().as_u16();
						tracing::warn!("consensus request to {url} returned status {status}");
						last_error = format!("status {status}");
					},
					Err(error) => {
						tracing::warn!("consensus request to {url} failed: {error}");
						last_error = error.to_string();
					},
				}
			}
			let delay = self.retry_policy.delay_for_attempt(attempt);
			if started.elapsed() + delay >= self.retry_policy.max_elapsed {
				return Err(ConsensusError::EndpointUnavailable(last_error));
			}
			tokio::time::sleep(delay).await;
			attempt = attempt.saturating_add(1);
		}
	}

	async fn get_json_required(&self, path: &str) -> Result<serde_json::Value, ConsensusError> {
		self.get_json(path).await?.ok_or_else(|| {
			ConsensusError::UnexpectedResponse(format!("{path} unexpectedly returned 404"))
		})
	}

	pub async fn get_finality_checkpoint_epoch(&self) -> Result<u64, ConsensusError> {
		let value = self
			.get_json_required("/eth/v1/beacon/states/head/finality_checkpoints")
			.await?;
		let response: FinalityCheckpointsResponse =
			serde_json::from_value(value).map_err(|e| {
				ConsensusError::UnexpectedResponse(e.to_string())
			})?;
		parse_u64(&response.data.finalized.epoch, "finalized epoch")
	}

	/// Returns `None` for slots without a proposed block; callers step
	/// backwards until they find one.
	pub async fn get_block(
		&self,
		slot: u64,
	) -> Result<Option<(u64, u64, u64)>, ConsensusError> {
		let value = match self.get_json(&format!("/eth/v2/beacon/blocks/{slot}")).await? {
			Some(value) => value,
			None => return Ok(None),
		};
		let response: BeaconBlockResponse = serde_json::from_value(value)
			.map_err(|e| ConsensusError::UnexpectedResponse(e.to_string()))?;
		let message = response.data.message;
		Ok(Some((
			parse_u64(&message.slot, "block slot")?,
			parse_u64(&message.body.execution_payload.block_number, "execution block")?,
			parse_u64(&message.body.execution_payload.timestamp, "execution timestamp")?,
		)))
	}

	/// Resolves the finalized [`ChainHead`]: the checkpoint's boundary slot,
	/// stepping backwards through empty slots until a proposed block is
	/// found.
	pub async fn get_chain_head(&self, slots_per_epoch: u64) -> Result<ChainHead, ConsensusError> {
		let epoch = self.get_finality_checkpoint_epoch().await?;
		let boundary_slot = epoch * slots_per_epoch;
		for step in 0..slots_per_epoch {
			let slot = boundary_slot.saturating_sub(step);
			if let Some((consensus_slot, execution_block, execution_timestamp)) =
				self.get_block(slot).await?
			{
				return Ok(ChainHead {
					epoch,
					consensus_slot,
					execution_block,
					execution_timestamp,
				});
			}
			if slot == 0 {
				break;
			}
		}
		Err(ConsensusError::UnexpectedResponse(format!(
			"no proposed block in the epoch ending at slot {boundary_slot}"
		)))
	}

	pub async fn get_validators_by_ids(
		&self,
		ids: &[u64],
		state_id: &str,
	) -> Result<Vec<ValidatorInfo>, ConsensusError> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let id_query = ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
		let value = self
			.get_json_required(&format!(
				"/eth/v1/beacon/states/{state_id}/validators?id={id_query}"
			))
			.await?;
		let response: ValidatorsResponse = serde_json::from_value(value)
			.map_err(|e| ConsensusError::UnexpectedResponse(e.to_string()))?;
		response
			.data
			.into_iter()
			.map(|entry| {
				Ok(ValidatorInfo {
					index: parse_u64(&entry.index, "validator index")?,
					status: entry.status,
					public_key: entry.validator.pubkey,
				})
			})
			.collect()
	}

	pub async fn get_fork_data(&self, state_id: &str) -> Result<ForkData, ConsensusError> {
		let value = self
			.get_json_required(&format!("/eth/v1/beacon/states/{state_id}/fork"))
			.await?;
		let response: ForkResponse = serde_json::from_value(value)
			.map_err(|e| ConsensusError::UnexpectedResponse(e.to_string()))?;
		Ok(ForkData {
			epoch: parse_u64(&response.data.epoch, "fork epoch")?,
			current_version: parse_version(&response.data.current_version)?,
			previous_version: parse_version(&response.data.previous_version)?,
		})
	}

	pub async fn is_syncing(&self) -> Result<(bool, u64), ConsensusError> {
		let value = self.get_json_required("/eth/v1/node/syncing").await?;
		let response: SyncingResponse = serde_json::from_value(value)
			.map_err(|e| ConsensusError::UnexpectedResponse(e.to_string()))?;
		Ok((
			response.data.is_syncing,
			parse_u64(&response.data.sync_distance, "sync distance")?,
		))
	}

	/// Submits a signed voluntary exit. Each endpoint is tried exactly once;
	/// the first acceptance wins.
	pub async fn submit_voluntary_exit(
		&self,
		epoch: u64,
		validator_index: u64,
		signature: &str,
	) -> Result<(), ConsensusError> {
		let body = serde_json::json!({
			"message": {
				"epoch": epoch.to_string(),
				"validator_index": validator_index.to_string(),
			},
			"signature": signature,
		});

		let mut last_error: Option<ConsensusError> = None;
		for endpoint in &self.endpoints {
			let url = format!("{endpoint}/eth/v1/beacon/pool/voluntary_exits");
			match self.http.post(&url).json(&body).send().await {
				Ok(response) if response.status().is_success() => return Ok(()),
				Ok(response) => {
					let status = response.status().as_u16();
					tracing::warn!("voluntary exit rejected by {url} with status {status}");
					last_error = Some(ConsensusError::BadStatus { url, status });
				},
				Err(error) => {
					tracing::warn!("voluntary exit submission to {url} failed: {error}");
					last_error = Some(ConsensusError::Http(error));
				},
			}
		}
		Err(last_error
			.unwrap_or_else(|| ConsensusError::EndpointUnavailable("no endpoints".to_string())))
	}
}

fn parse_u64(value: &str, what: &str) -> Result<u64, ConsensusError> {
	value
		.parse()
		.map_err(|_| ConsensusError::UnexpectedResponse(format!("invalid {what}: {value}")))
}

fn parse_version(value: &str) -> Result<[u8; 4], ConsensusError> {
	let stripped = value.trim_start_matches("0x");
	let bytes = hex::decode(stripped)
		.map_err(|_| ConsensusError::UnexpectedResponse(format!("invalid fork version {value}")))?;
	bytes.try_into().map_err(|_| {
		ConsensusError::UnexpectedResponse(format!("fork version {value} is not 4 bytes"))
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exiting_statuses_are_recognized() {
		let mut validator = ValidatorInfo {
			index: 1,
			status: "active_ongoing".to_string(),
			public_key: "0xaa".to_string(),
		};
		assert!(!validator.is_exiting_or_exited());

		for status in [
			"active_exiting",
			"exited_unslashed",
			"exited_slashed",
			"withdrawal_possible",
			"withdrawal_done",
		] {
			validator.status = status.to_string();
			assert!(validator.is_exiting_or_exited(), "{status} should be terminal");
		}
	}

	#[test]
	fn fork_version_parses() {
		assert_eq!(parse_version("0x04000000").unwrap(), [4, 0, 0, 0]);
		assert!(parse_version("0x04").is_err());
	}

	#[test]
	fn decimal_strings_parse() {
		assert_eq!(parse_u64("312992", "epoch").unwrap(), 312992);
		assert!(parse_u64("not-a-number", "epoch").is_err());
	}
}
