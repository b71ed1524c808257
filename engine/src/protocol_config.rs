//! Oracle committee loading.
//!
//! The committee is not static: the keeper contract emits `ConfigUpdated`
//! with an IPFS hash whenever the committee rotates, and the keeper reloads
//! the referenced document on every tick. Oracle addresses are derived from
//! the committee public keys, matching the recovery the contract performs on
//! submitted signatures.

use anyhow::{bail, Context, Result};
use ethers::types::Address;
use serde::Deserialize;

use crate::{contracts::KeeperContract, execution::ExecutionClient, ipfs::IpfsFetchClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oracle {
	pub public_key: String,
	pub address: Address,
	pub endpoints: Vec<String>,
	/// 1-based slot in the committee; exit-signature shares carry it.
	pub share_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleCommittee {
	pub oracles: Vec<Oracle>,
	pub rewards_threshold: u64,
	pub exit_signature_recover_threshold: u64,
}

impl OracleCommittee {
	pub fn is_empty(&self) -> bool {
		self.oracles.is_empty()
	}
}

#[derive(Deserialize)]
struct ProtocolConfigDocument {
	oracles: Vec<OracleEntry>,
	#[serde(default)]
	exit_signature_recover_threshold: u64,
}

#[derive(Deserialize)]
struct OracleEntry {
	public_key: String,
	#[serde(default)]
	endpoints: Vec<String>,
	// Legacy single-endpoint layout still appears in older documents.
	#[serde(default)]
	endpoint: Option<String>,
}

/// Derives the committee address from an uncompressed secp256k1 public key,
/// with or without the `0x04` prefix byte.
pub fn derive_oracle_address(public_key: &str) -> Result<Address> {
	let bytes = hex::decode(public_key.trim_start_matches("0x"))
		.with_context(|| format!("invalid oracle public key {public_key}"))?;
	let key_bytes: &[u8] = match bytes.len() {
		64 => &bytes,
		65 if bytes[0] == 0x04 => &bytes[1..],
		other => bail!("unexpected oracle public key length {other}"),
	};
	let hash = ethers::utils::keccak256(key_bytes);
	Ok(Address::from_slice(&hash[12..]))
}

pub fn parse_protocol_config(
	document: &serde_json::Value,
	rewards_threshold: u64,
) -> Result<OracleCommittee> {
	let document: ProtocolConfigDocument = serde_json::from_value(document.clone())
		.context("malformed protocol config document")?;

	let oracles = document
		.oracles
		.iter()
		.enumerate()
		.map(|(index, entry)| {
			let endpoints = if !entry.endpoints.is_empty() {
				entry.endpoints.clone()
			} else {
				entry.endpoint.iter().cloned().collect()
			};
			if endpoints.is_empty() {
				bail!("oracle {} has no endpoints", entry.public_key);
			}
			Ok(Oracle {
				public_key: entry.public_key.clone(),
				address: derive_oracle_address(&entry.public_key)?,
				endpoints,
				share_index: index as u64 + 1,
			})
		})
		.collect::<Result<Vec<_>>>()?;

	Ok(OracleCommittee {
		oracles,
		rewards_threshold,
		exit_signature_recover_threshold: document.exit_signature_recover_threshold,
	})
}

/// Loads the current committee: last `ConfigUpdated` event on the keeper,
/// referenced IPFS document, rewards threshold from the contract.
pub async fn load_protocol_config(
	execution: &ExecutionClient,
	keeper: &KeeperContract,
	ipfs: &IpfsFetchClient,
) -> Result<OracleCommittee> {
	let head = execution.get_block_number().await?;
	let cid = keeper
		.last_config_ipfs_hash(head)
		.await?
		.context("no ConfigUpdated event found on the keeper contract")?;
	let document = ipfs.fetch_json(&cid).await?;
	let rewards_threshold = keeper.rewards_min_oracles().await?;
	parse_protocol_config(&document, rewards_threshold)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	// Public key of the secp256k1 secret key 0x...01.
	const PUBLIC_KEY: &str = "0x0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";
	const ADDRESS: &str = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";

	#[test]
	fn derives_address_from_uncompressed_key() {
		let expected: Address = ADDRESS.parse().unwrap();
		assert_eq!(derive_oracle_address(PUBLIC_KEY).unwrap(), expected);
		// Without the 0x04 prefix byte.
		let raw = format!("0x{}", &PUBLIC_KEY[4..]);
		assert_eq!(derive_oracle_address(&raw).unwrap(), expected);
	}

	#[test]
	fn rejects_compressed_keys() {
		assert!(derive_oracle_address(
			"0x0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
		)
		.is_err());
	}

	#[test]
	fn parses_both_endpoint_layouts() {
		let document = json!({
			"oracles": [
				{ "public_key": PUBLIC_KEY, "endpoints": ["https://a.example", "https://b.example"] },
				{ "public_key": PUBLIC_KEY, "endpoint": "https://c.example" },
			],
			"exit_signature_recover_threshold": 5,
		});
		let committee = parse_protocol_config(&document, 7).unwrap();
		assert_eq!(committee.rewards_threshold, 7);
		assert_eq!(committee.exit_signature_recover_threshold, 5);
		assert_eq!(committee.oracles.len(), 2);
		assert_eq!(committee.oracles[0].endpoints.len(), 2);
		assert_eq!(committee.oracles[1].endpoints, vec!["https://c.example".to_string()]);
		assert_eq!(committee.oracles[0].share_index, 1);
		assert_eq!(committee.oracles[1].share_index, 2);
	}

	#[test]
	fn oracle_without_endpoints_is_rejected() {
		let document = json!({ "oracles": [{ "public_key": PUBLIC_KEY }] });
		assert!(parse_protocol_config(&document, 1).is_err());
	}
}
