//! Merkle distributor rewards duty.
//!
//! The distributor variant of the rewards pipeline: no cache, votes resolve
//! per oracle on nonce alone, and signatures arrive as hex strings that are
//! decoded before the address-ordered concatenation.

use ethers::types::{Address, Bytes, H256};
use serde::Deserialize;

use crate::{
	constants::DISTRIBUTOR_VOTE_URL_PATH,
	errors::OracleResponseError,
	protocol_config::OracleCommittee,
	services::Services,
	votes::{concat_signatures, fetch_votes, select_winner, OracleVote},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DistributorRewardVoteBody {
	pub root: H256,
	pub ipfs_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributorRewardVote {
	pub oracle_address: Address,
	pub nonce: u64,
	pub update_timestamp: u64,
	pub signature: Bytes,
	pub body: DistributorRewardVoteBody,
}

impl OracleVote for DistributorRewardVote {
	type Body = DistributorRewardVoteBody;

	const TIMESTAMP_TIEBREAK: bool = false;

	fn oracle_address(&self) -> Address {
		self.oracle_address
	}

	fn nonce(&self) -> u64 {
		self.nonce
	}

	fn update_timestamp(&self) -> u64 {
		self.update_timestamp
	}

	fn body(&self) -> &Self::Body {
		&self.body
	}

	fn signature(&self) -> &Bytes {
		&self.signature
	}
}

#[derive(Deserialize)]
struct DistributorVoteResponse {
	nonce: u64,
	update_timestamp: u64,
	signature: String,
	root: String,
	ipfs_hash: String,
}

pub(crate) fn parse_distributor_vote(
	oracle_address: Address,
	endpoint: &str,
	value: serde_json::Value,
) -> Result<DistributorRewardVote, OracleResponseError> {
	let response: DistributorVoteResponse =
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

	Ok(DistributorRewardVote {
		oracle_address,
		nonce: response.nonce,
		update_timestamp: response.update_timestamp,
		signature: Bytes::from(signature),
		body: DistributorRewardVoteBody { root, ipfs_hash: response.ipfs_hash },
	})
}

pub async fn process_distributor_rewards(
	services: &Services,
	committee: &OracleCommittee,
) -> anyhow::Result<()> {
	let mut votes = fetch_distributor_votes(services, committee).await;
	if votes.is_empty() {
		tracing::warn!("No active votes");
		return Ok(());
	}

	let current_nonce = services.distributor.nonce().await?;
	votes.retain(|vote| vote.nonce == current_nonce);
	if votes.is_empty() {
		tracing::info!("No votes with nonce {current_nonce}");
		return Ok(());
	}

	let next_update_timestamp = services.distributor.next_rewards_root_update_timestamp().await?;
	votes.retain(|vote| vote.update_timestamp > next_update_timestamp);
	if votes.is_empty() {
		tracing::info!("No votes with timestamp > next update timestamp");
		return Ok(());
	}

	let rewards_min_oracles = services.distributor.rewards_min_oracles().await?;
	let Some(quorum) = select_winner(&votes, rewards_min_oracles as usize) else {
		tracing::warn!("Not enough oracle votes, skipping distributor rewards update...");
		return Ok(());
	};

	if quorum.body.root == services.distributor.rewards_root().await? {
		tracing::info!("Distributor rewards root is already up to date");
		return Ok(());
	}

	tracing::info!(
		"Submitting distributor rewards update: root={:?}, ipfs hash={}",
		quorum.body.root,
		quorum.body.ipfs_hash,
	);

	let signatures = concat_signatures(&quorum);
	let tx_hash = services
		.submit_tx(|gas| {
			services.distributor.set_rewards_root(&quorum.body, signatures.clone(), gas)
		})
		.await?;

	if services.wait_for_tx_status(tx_hash).await? {
		tracing::info!("Distributor rewards have been successfully updated. Tx hash: {tx_hash:?}");
	} else {
		tracing::error!("Distributor rewards transaction failed. Tx hash: {tx_hash:?}");
	}
	Ok(())
}

async fn fetch_distributor_votes(
	services: &Services,
	committee: &OracleCommittee,
) -> Vec<DistributorRewardVote> {
	let oracle_http = &services.oracle_http;
	fetch_votes(&committee.oracles, |oracle, endpoint| {
		let oracle_address = oracle.address;
		async move {
			let value = oracle_http.get_json(&endpoint, DISTRIBUTOR_VOTE_URL_PATH).await?;
			parse_distributor_vote(oracle_address, &endpoint, value)
		}
	})
	.await
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn vote(
		address: u64,
		nonce: u64,
		update_timestamp: u64,
		root_byte: u8,
	) -> DistributorRewardVote {
		DistributorRewardVote {
			oracle_address: Address::from_low_u64_be(address),
			nonce,
			update_timestamp,
			signature: Bytes::from(vec![address as u8; 65]),
			body: DistributorRewardVoteBody {
				root: H256::repeat_byte(root_byte),
				ipfs_hash: format!("bafkrei{root_byte:02x}"),
			},
		}
	}

	#[test]
	fn timestamp_filter_drops_old_votes() {
		let mut votes = vec![vote(1, 5, 100, 0xaa), vote(2, 5, 300, 0xaa)];
		let next_update_timestamp = 200u64;
		votes.retain(|vote| vote.update_timestamp > next_update_timestamp);
		assert_eq!(votes.len(), 1);
		assert_eq!(votes[0].oracle_address, Address::from_low_u64_be(2));
	}

	#[test]
	fn winner_signatures_are_address_sorted() {
		let votes = vec![vote(4, 5, 300, 0xaa), vote(2, 5, 300, 0xaa), vote(9, 5, 300, 0xbb)];
		let quorum = select_winner(&votes, 2).unwrap();
		assert_eq!(quorum.body.root, H256::repeat_byte(0xaa));
		let packed = concat_signatures(&quorum);
		assert_eq!(packed[0], 2);
		assert_eq!(packed[65], 4);
	}

	#[test]
	fn distributor_vote_parses_hex_signature() {
		let value = json!({
			"nonce": 5,
			"update_timestamp": 1712000000u64,
			"signature": format!("0x{}", "ef".repeat(65)),
			"root": format!("0x{}", "11".repeat(32)),
			"ipfs_hash": "bafkreihash",
		});
		let vote = parse_distributor_vote(Address::zero(), "http://oracle", value).unwrap();
		assert_eq!(vote.signature.len(), 65);
		assert_eq!(vote.signature[0], 0xef);
	}

	#[test]
	fn missing_ipfs_hash_invalidates_response() {
		let value = json!({
			"nonce": 5,
			"update_timestamp": 1712000000u64,
			"signature": "0xef",
			"root": format!("0x{}", "11".repeat(32)),
		});
		assert!(parse_distributor_vote(Address::zero(), "http://oracle", value).is_err());
	}
}
