//! Vote aggregation.
//!
//! The heart of every duty: fan out to all oracles concurrently, per oracle
//! fan out to all of its redundant endpoints, resolve one representative
//! vote per oracle, tally bodies and pick a quorum-backed winner with
//! address-ordered signatures. Failures stay local: a broken endpoint only
//! removes itself, a fully-broken oracle only removes that oracle, and no
//! per-oracle error ever aborts the batch.

use std::{collections::HashMap, fmt::Debug, future::Future, hash::Hash, time::Duration};

use ethers::types::{Address, Bytes};
use futures::future::join_all;

use crate::{
	errors::{OracleResponseError, OracleUnavailable},
	protocol_config::Oracle,
};

pub trait OracleVote: Clone + Send {
	type Body: Clone + Eq + Hash + Ord + Debug;

	/// Whether per-oracle nonce ties are broken by `update_timestamp`.
	/// The distributor duty resolves on nonce alone.
	const TIMESTAMP_TIEBREAK: bool = true;

	fn oracle_address(&self) -> Address;
	fn nonce(&self) -> u64;
	fn update_timestamp(&self) -> u64;
	fn body(&self) -> &Self::Body;
	fn signature(&self) -> &Bytes;
}

/// Plain HTTP client for oracle vote endpoints. No authentication; a
/// response is valid iff it is a 2xx carrying JSON.
pub struct OracleHttpClient {
	http: reqwest::Client,
}

impl OracleHttpClient {
	pub fn new(timeout: Duration) -> anyhow::Result<Self> {
		Ok(Self { http: reqwest::Client::builder().timeout(timeout).build()? })
	}

	pub async fn get_json(
		&self,
		endpoint: &str,
		path: &str,
	) -> Result<serde_json::Value, OracleResponseError> {
		let url = join_endpoint(endpoint, path);
		let response = self
			.http
			.get(&url)
			.send()
			.await
			.map_err(|source| OracleResponseError::Request { url: url.clone(), source })?;
		if !response.status().is_success() {
			return Err(OracleResponseError::BadStatus {
				status: response.status().as_u16(),
				url,
			});
		}
		response
			.json()
			.await
			.map_err(|error| OracleResponseError::Invalid { url, reason: error.to_string() })
	}
}

pub fn join_endpoint(endpoint: &str, path: &str) -> String {
	format!("{}/{}", endpoint.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Fans out to every oracle concurrently and collects one representative
/// vote per responsive oracle. Per-oracle failures are logged, never raised.
pub async fn fetch_votes<V, F, Fut>(oracles: &[Oracle], fetch_endpoint: F) -> Vec<V>
where
	V: OracleVote,
	F: Fn(&Oracle, String) -> Fut,
	Fut: Future<Output = Result<V, OracleResponseError>>,
{
	let outcomes = join_all(
		oracles.iter().map(|oracle| resolve_oracle_vote(oracle, &fetch_endpoint)),
	)
	.await;

	let mut votes = Vec::new();
	for outcome in outcomes {
		match outcome {
			Ok(vote) => votes.push(vote),
			Err(error) => tracing::warn!("{error}"),
		}
	}
	votes
}

/// Queries every endpoint of one oracle concurrently and picks the argmax
/// by `(nonce, update_timestamp)` over the surviving responses.
async fn resolve_oracle_vote<V, F, Fut>(oracle: &Oracle, fetch_endpoint: &F) -> Result<V, OracleUnavailable>
where
	V: OracleVote,
	F: Fn(&Oracle, String) -> Fut,
	Fut: Future<Output = Result<V, OracleResponseError>>,
{
	let outcomes = join_all(
		oracle
			.endpoints
			.iter()
			.map(|endpoint| fetch_endpoint(oracle, endpoint.clone())),
	)
	.await;

	let mut votes: Vec<V> = Vec::new();
	for (endpoint, outcome) in oracle.endpoints.iter().zip(outcomes) {
		match outcome {
			Ok(vote) => votes.push(vote),
			Err(error) => tracing::warn!("{error} from {endpoint}"),
		}
	}

	if votes.is_empty() {
		return Err(OracleUnavailable { public_key: oracle.public_key.clone() });
	}

	let max_nonce = votes.iter().map(|vote| vote.nonce()).max().expect("non-empty");
	votes.retain(|vote| vote.nonce() == max_nonce);

	if V::TIMESTAMP_TIEBREAK {
		// Stable sort: among equal timestamps the earlier endpoint wins.
		votes.sort_by_key(|vote| vote.update_timestamp());
		Ok(votes.pop().expect("non-empty"))
	} else {
		Ok(votes.swap_remove(0))
	}
}

/// A quorum-backed winner: the body plus exactly `threshold` agreeing votes
/// in ascending oracle-address order.
#[derive(Debug, Clone)]
pub struct Quorum<V: OracleVote> {
	pub body: V::Body,
	pub votes: Vec<V>,
}

/// Tallies bodies and returns the winner iff it reached `threshold`.
/// Tally iteration is deterministic: ties on count resolve by body ordering.
pub fn select_winner<V: OracleVote>(votes: &[V], threshold: usize) -> Option<Quorum<V>> {
	if threshold == 0 || votes.len() < threshold {
		return None;
	}

	let mut tally: HashMap<&V::Body, usize> = HashMap::new();
	for vote in votes {
		*tally.entry(vote.body()).or_default() += 1;
	}
	let mut entries: Vec<(&V::Body, usize)> = tally.into_iter().collect();
	entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

	let (winner_body, count) = entries.first().expect("votes are non-empty");
	if *count < threshold {
		return None;
	}
	let winner_body = (*winner_body).clone();

	let mut winners: Vec<V> =
		votes.iter().filter(|vote| *vote.body() == winner_body).cloned().collect();
	// Ascending address order, matching the signer recovery on-chain.
	winners.sort_by_key(|vote| vote.oracle_address());
	winners.truncate(threshold);

	Some(Quorum { body: winner_body, votes: winners })
}

/// Concatenates the quorum's raw signature bytes in address order.
pub fn concat_signatures<V: OracleVote>(quorum: &Quorum<V>) -> Bytes {
	let mut packed = Vec::new();
	for vote in &quorum.votes {
		packed.extend_from_slice(vote.signature());
	}
	Bytes::from(packed)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Clone, PartialEq)]
	struct TestVote {
		oracle_address: Address,
		nonce: u64,
		update_timestamp: u64,
		signature: Bytes,
		body: (u64, u64),
	}

	impl OracleVote for TestVote {
		type Body = (u64, u64);

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

	fn oracle(index: u64, endpoints: &[&str]) -> Oracle {
		Oracle {
			public_key: format!("0xkey{index}"),
			address: Address::from_low_u64_be(index),
			endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
			share_index: index,
		}
	}

	fn vote(address: u64, nonce: u64, timestamp: u64, body: (u64, u64)) -> TestVote {
		TestVote {
			oracle_address: Address::from_low_u64_be(address),
			nonce,
			update_timestamp: timestamp,
			signature: Bytes::from(vec![address as u8; 65]),
			body,
		}
	}

	#[tokio::test]
	async fn endpoint_heterogeneity_picks_max_nonce() {
		// Endpoint 1 times out, endpoint 2 returns nonce 5, endpoint 3
		// returns nonce 6: the oracle contributes the nonce-6 vote.
		let oracles = vec![oracle(1, &["http://o1/a", "http://o1/b", "http://o1/c"])];

		let votes: Vec<TestVote> = fetch_votes(&oracles, |_oracle, endpoint| async move {
			match endpoint.as_str() {
				"http://o1/b" => Ok(vote(1, 5, 100, (5, 5))),
				"http://o1/c" => Ok(vote(1, 6, 100, (6, 6))),
				other => Err(OracleResponseError::BadStatus {
					url: other.to_string(),
					status: 504,
				}),
			}
		})
		.await;

		assert_eq!(votes.len(), 1);
		assert_eq!(votes[0].nonce, 6);
	}

	#[tokio::test]
	async fn nonce_tie_resolves_by_newest_timestamp() {
		let oracles = vec![oracle(1, &["a", "b"])];

		let votes: Vec<TestVote> = fetch_votes(&oracles, |_oracle, endpoint| async move {
			match endpoint.as_str() {
				"a" => Ok(vote(1, 7, 50, (1, 1))),
				_ => Ok(vote(1, 7, 90, (2, 2))),
			}
		})
		.await;

		assert_eq!(votes[0].update_timestamp, 90);
	}

	#[tokio::test]
	async fn dead_oracle_contributes_nothing_without_raising() {
		let oracles = vec![oracle(1, &["a"]), oracle(2, &["b"])];

		let votes: Vec<TestVote> = fetch_votes(&oracles, |oracle, endpoint| {
			let alive = oracle.share_index == 2;
			async move {
				if alive {
					Ok(vote(2, 1, 10, (1, 1)))
				} else {
					Err(OracleResponseError::BadStatus { url: endpoint, status: 500 })
				}
			}
		})
		.await;

		assert_eq!(votes.len(), 1);
		assert_eq!(votes[0].oracle_address, Address::from_low_u64_be(2));
	}

	#[test]
	fn winner_requires_threshold() {
		let votes =
			vec![vote(1, 42, 10, (1, 1)), vote(2, 42, 10, (1, 1)), vote(3, 42, 10, (2, 2))];
		assert!(select_winner(&votes, 3).is_none());
		let quorum = select_winner(&votes, 2).unwrap();
		assert_eq!(quorum.body, (1, 1));
		assert_eq!(quorum.votes.len(), 2);
	}

	#[test]
	fn no_winner_from_empty_votes() {
		assert!(select_winner::<TestVote>(&[], 1).is_none());
	}

	#[test]
	fn signatures_are_address_sorted_and_truncated() {
		// Addresses deliberately out of order; only `threshold` signatures
		// make it into the blob.
		let votes = vec![
			vote(9, 42, 10, (1, 1)),
			vote(3, 42, 10, (1, 1)),
			vote(7, 42, 10, (1, 1)),
			vote(5, 42, 10, (2, 2)),
		];
		let quorum = select_winner(&votes, 2).unwrap();
		let addresses: Vec<Address> =
			quorum.votes.iter().map(|vote| vote.oracle_address).collect();
		assert_eq!(
			addresses,
			vec![Address::from_low_u64_be(3), Address::from_low_u64_be(7)]
		);

		let packed = concat_signatures(&quorum);
		assert_eq!(packed.len(), 130);
		assert_eq!(packed[0], 3);
		assert_eq!(packed[65], 7);
	}

	#[test]
	fn count_ties_resolve_by_body_order() {
		let votes = vec![
			vote(1, 42, 10, (2, 9)),
			vote(2, 42, 10, (2, 9)),
			vote(3, 42, 10, (1, 5)),
			vote(4, 42, 10, (1, 5)),
		];
		let quorum = select_winner(&votes, 2).unwrap();
		assert_eq!(quorum.body, (1, 5));
	}
}
