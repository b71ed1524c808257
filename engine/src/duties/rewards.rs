//! Keeper rewards duty.
//!
//! Polls the committee for reward votes, keeps them in a per-timestamp
//! cache so slightly desynchronized oracles can still reach quorum on a
//! later tick, and submits the earliest winning bucket to the keeper
//! contract.

use std::collections::BTreeMap;

use ethers::types::{Address, Bytes, H256};
use serde::Deserialize;

use crate::{
	constants::{DEFAULT_CACHE_SIZE, REWARD_VOTE_URL_PATH},
	errors::OracleResponseError,
	metrics,
	protocol_config::OracleCommittee,
	services::Services,
	votes::{concat_signatures, fetch_votes, select_winner, OracleVote, Quorum},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RewardVoteBody {
	pub root: H256,
	pub ipfs_hash: String,
	pub avg_reward_per_second: u128,
	pub update_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardVote {
	pub oracle_address: Address,
	pub nonce: u64,
	pub signature: Bytes,
	pub body: RewardVoteBody,
}

impl OracleVote for RewardVote {
	type Body = RewardVoteBody;

	fn oracle_address(&self) -> Address {
		self.oracle_address
	}

	fn nonce(&self) -> u64 {
		self.nonce
	}

	fn update_timestamp(&self) -> u64 {
		self.body.update_timestamp
	}

	fn body(&self) -> &Self::Body {
		&self.body
	}

	fn signature(&self) -> &Bytes {
		&self.signature
	}
}

#[derive(Deserialize)]
struct RewardVoteResponse {
	nonce: u64,
	update_timestamp: u64,
	signature: String,
	root: String,
	ipfs_hash: String,
	avg_reward_per_second: u128,
}

pub(crate) fn parse_reward_vote(
	oracle_address: Address,
	endpoint: &str,
	value: serde_json::Value,
) -> Result<RewardVote, OracleResponseError> {
	let response: RewardVoteResponse =
		serde_json::from_value(value).map_err(|error| OracleResponseError::Invalid {
			url: endpoint.to_string(),
			reason: error.to_string(),
		})?;
	let invalid = |reason: String| OracleResponseError::Invalid {
		url: endpoint.to_string(),
		reason,
	};

	let signature = hex::decode(response.signature.trim_start_matches("0x"))
		.map_err(|error| invalid(format!("bad signature hex: {error}")))?;
	let root: H256 = response
		.root
		.parse()
		.map_err(|_| invalid(format!("bad root: {}", response.root)))?;

	let address_label = format!("{oracle_address:#x}");
	metrics::ORACLE_AVG_REWARDS_PER_SECOND
		.with_label_values(&[&address_label])
		.set(response.avg_reward_per_second as f64);
	metrics::ORACLE_UPDATE_TIMESTAMP
		.with_label_values(&[&address_label])
		.set(response.update_timestamp as i64);

	Ok(RewardVote {
		oracle_address,
		nonce: response.nonce,
		signature: Bytes::from(signature),
		body: RewardVoteBody {
			root,
			ipfs_hash: response.ipfs_hash,
			avg_reward_per_second: response.avg_reward_per_second,
			update_timestamp: response.update_timestamp,
		},
	})
}

/// Cache solves the problem of oracle synchronization.
/// On some networks, oracles fail to synchronize within a specific epoch.
/// Storing votes across rounds makes it easier to catch up.
#[derive(Debug)]
pub struct RewardsCache {
	data: BTreeMap<u64, Vec<RewardVote>>,
	cache_size: usize,
}

impl Default for RewardsCache {
	fn default() -> Self {
		Self::new(DEFAULT_CACHE_SIZE)
	}
}

impl RewardsCache {
	pub fn new(cache_size: usize) -> Self {
		Self { data: BTreeMap::new(), cache_size }
	}

	/// Merges votes into their timestamp buckets, deduplicating by identity,
	/// and evicts the oldest buckets past the size bound.
	pub fn update(&mut self, votes: Vec<RewardVote>) {
		for vote in votes {
			let bucket = self.data.entry(vote.body.update_timestamp).or_default();
			if !bucket.contains(&vote) {
				bucket.push(vote);
			}
		}
		while self.data.len() > self.cache_size {
			self.data.pop_first();
		}
	}

	/// Buckets in ascending `update_timestamp` order.
	pub fn buckets(&self) -> impl Iterator<Item = (&u64, &Vec<RewardVote>)> {
		self.data.iter()
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	pub fn clear(&mut self) {
		self.data.clear();
	}
}

/// Scans buckets oldest-first and returns the first one that yields a
/// quorum-backed winner.
pub(crate) fn find_earliest_winner(
	cache: &RewardsCache,
	rewards_threshold: usize,
) -> Option<Quorum<RewardVote>> {
	for (update_timestamp, bucket) in cache.buckets() {
		match select_winner(bucket, rewards_threshold) {
			Some(quorum) => return Some(quorum),
			None => {
				tracing::warn!(
					"Not enough oracle votes for timestamp {update_timestamp}, checking next timestamp..."
				);
			},
		}
	}
	None
}

pub async fn process_rewards(
	services: &Services,
	cache: &mut RewardsCache,
	committee: &OracleCommittee,
) -> anyhow::Result<()> {
	if !services.keeper.can_update_rewards().await? {
		return Ok(());
	}

	let mut votes = fetch_reward_votes(services, committee).await;
	if votes.is_empty() {
		tracing::warn!("No active votes");
		return Ok(());
	}

	let current_nonce = services.keeper.rewards_nonce().await?;
	votes.retain(|vote| vote.nonce == current_nonce);
	if votes.is_empty() {
		tracing::info!("No votes with nonce {current_nonce}");
		return Ok(());
	}

	cache.update(votes);

	let Some(quorum) = find_earliest_winner(cache, committee.rewards_threshold as usize) else {
		tracing::warn!("Not enough oracle votes to update rewards, skipping update...");
		return Ok(());
	};

	tracing::info!(
		"Submitting rewards update: root={:?}, ipfs hash={}, timestamp={}, avg_reward_per_second={}",
		quorum.body.root,
		quorum.body.ipfs_hash,
		quorum.body.update_timestamp,
		quorum.body.avg_reward_per_second,
	);

	let signatures = concat_signatures(&quorum);
	let tx_hash = services
		.submit_tx(|gas| services.keeper.update_rewards(&quorum.body, signatures.clone(), gas))
		.await?;

	if services.wait_for_tx_status(tx_hash).await? {
		tracing::info!("Rewards have been successfully updated. Tx hash: {tx_hash:?}");
	} else {
		tracing::error!("Rewards transaction failed. Tx hash: {tx_hash:?}");
	}

	// The nonce will have advanced or the votes are stale either way; the
	// cache is cleared regardless of the receipt status.
	cache.clear();
	Ok(())
}

async fn fetch_reward_votes(
	services: &Services,
	committee: &OracleCommittee,
) -> Vec<RewardVote> {
	let oracle_http = &services.oracle_http;
	fetch_votes(&committee.oracles, |oracle, endpoint| {
		let oracle_address = oracle.address;
		async move {
			let value = oracle_http.get_json(&endpoint, REWARD_VOTE_URL_PATH).await?;
			parse_reward_vote(oracle_address, &endpoint, value)
		}
	})
	.await
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn body(root_byte: u8, update_timestamp: u64) -> RewardVoteBody {
		RewardVoteBody {
			root: H256::repeat_byte(root_byte),
			ipfs_hash: format!("bafkrei{root_byte:02x}"),
			avg_reward_per_second: 1000,
			update_timestamp,
		}
	}

	fn vote(address: u64, nonce: u64, body: RewardVoteBody) -> RewardVote {
		RewardVote {
			oracle_address: Address::from_low_u64_be(address),
			nonce,
			signature: Bytes::from(vec![address as u8; 65]),
			body,
		}
	}

	#[test]
	fn cache_deduplicates_identical_votes() {
		let mut cache = RewardsCache::default();
		let a = vote(1, 42, body(0xaa, 100));
		cache.update(vec![a.clone(), a.clone()]);
		cache.update(vec![a]);
		assert_eq!(cache.buckets().next().unwrap().1.len(), 1);
	}

	#[test]
	fn cache_evicts_oldest_buckets_past_bound() {
		let mut cache = RewardsCache::new(3);
		for timestamp in 0..10u64 {
			cache.update(vec![vote(1, 42, body(1, timestamp))]);
		}
		assert_eq!(cache.len(), 3);
		let oldest = *cache.buckets().next().unwrap().0;
		assert_eq!(oldest, 7);
	}

	#[test]
	fn earliest_winning_bucket_is_selected() {
		let mut cache = RewardsCache::default();
		// Older bucket lacks quorum; newer bucket has it.
		cache.update(vec![vote(1, 42, body(0xaa, 100))]);
		cache.update(vec![
			vote(1, 42, body(0xbb, 200)),
			vote(2, 42, body(0xbb, 200)),
			vote(3, 42, body(0xbb, 200)),
		]);
		let quorum = find_earliest_winner(&cache, 3).unwrap();
		assert_eq!(quorum.body.update_timestamp, 200);

		// Once the older bucket reaches quorum it wins instead.
		cache.update(vec![
			vote(2, 42, body(0xaa, 100)),
			vote(3, 42, body(0xaa, 100)),
		]);
		let quorum = find_earliest_winner(&cache, 3).unwrap();
		assert_eq!(quorum.body.update_timestamp, 100);
	}

	#[test]
	fn rewards_happy_path_selects_majority_body() {
		// Committee of 5 on nonce 42: three oracles vote body R, two vote
		// R'. With threshold 3 the R body wins and carries exactly three
		// address-sorted signatures.
		let r = body(0xaa, 1000);
		let r_prime = body(0xbb, 1000);
		let mut cache = RewardsCache::default();
		cache.update(vec![
			vote(5, 42, r.clone()),
			vote(1, 42, r.clone()),
			vote(3, 42, r.clone()),
			vote(2, 42, r_prime.clone()),
			vote(4, 42, r_prime),
		]);

		let quorum = find_earliest_winner(&cache, 3).unwrap();
		assert_eq!(quorum.body, r);
		let addresses: Vec<Address> =
			quorum.votes.iter().map(|vote| vote.oracle_address).collect();
		assert_eq!(
			addresses,
			vec![
				Address::from_low_u64_be(1),
				Address::from_low_u64_be(3),
				Address::from_low_u64_be(5),
			]
		);
		let signatures = concat_signatures(&quorum);
		assert_eq!(signatures.len(), 3 * 65);
	}

	#[test]
	fn stale_nonce_votes_break_quorum() {
		// Same as the happy path but one of the three matching votes is on
		// the previous nonce: the duty filters it out before caching, so
		// only two agreeing votes remain and there is no winner.
		let r = body(0xaa, 1000);
		let mut votes = vec![
			vote(1, 42, r.clone()),
			vote(2, 41, r.clone()),
			vote(3, 42, r.clone()),
		];
		let current_nonce = 42;
		votes.retain(|vote| vote.nonce == current_nonce);

		let mut cache = RewardsCache::default();
		cache.update(votes);
		assert!(find_earliest_winner(&cache, 3).is_none());
	}

	#[test]
	fn reward_vote_parses_and_rejects_missing_keys() {
		let oracle_address = Address::from_low_u64_be(7);
		let valid = json!({
			"nonce": 42,
			"update_timestamp": 1712000000u64,
			"signature": format!("0x{}", "ab".repeat(65)),
			"root": format!("0x{}", "cd".repeat(32)),
			"ipfs_hash": "bafkreihash",
			"avg_reward_per_second": 1000,
		});
		let vote = parse_reward_vote(oracle_address, "http://oracle", valid.clone()).unwrap();
		assert_eq!(vote.nonce, 42);
		assert_eq!(vote.signature.len(), 65);
		assert_eq!(vote.body.update_timestamp, 1712000000);

		let mut missing = valid;
		missing.as_object_mut().unwrap().remove("root");
		assert!(matches!(
			parse_reward_vote(oracle_address, "http://oracle", missing),
			Err(OracleResponseError::Invalid { .. })
		));
	}
}
